//! Derives the remote calls a topology change needs. No I/O happens here: a plan is plain
//! data until it is turned into [`WorkUnit`]s and handed to the fan-out executor.

use std::sync::Arc;

use tracing::debug;

use crate::{
    agent::{AgentClient, AgentCommand},
    domain::{
        AssignmentEntry, CLIENT_REQUEST_TIMEOUT, ClientConfig, ClusterMode, SERVER_IDLE_SECONDS,
        ServerTransportConfig,
    },
    fanout::{WorkUnit, chain},
    machine::{MachineAddress, parse_command_port, parse_machine_id},
};

/// Ordered commands for one agent. Each command runs only if the previous one succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUnit {
    pub addr: MachineAddress,
    pub commands: Vec<AgentCommand>,
}

impl PlannedUnit {
    pub fn tag(&self) -> String {
        self.addr.tag()
    }

    pub fn into_work_unit(self, client: Arc<dyn AgentClient>, app: &str) -> WorkUnit {
        let tag = self.tag();
        WorkUnit::new(tag, chain(client, app.to_string(), self.addr, self.commands))
    }
}

pub fn into_work_units(
    plan: Vec<PlannedUnit>,
    client: &Arc<dyn AgentClient>,
    app: &str,
) -> Vec<WorkUnit> {
    plan.into_iter()
        .map(|unit| unit.into_work_unit(client.clone(), app))
        .collect()
}

/// Server promotion chains for every entry that belongs to the app:
/// mode SERVER, transport config, then flow and namespace config when present.
pub fn plan_server_work(
    entries: &[AssignmentEntry],
    default_command_port: u16,
) -> Vec<PlannedUnit> {
    entries
        .iter()
        .filter(|entry| entry.belongs_to_app)
        .map(|entry| {
            let command_port = parse_command_port(&entry.machine_id, default_command_port);
            let mut commands = vec![
                AgentCommand::SetMode(ClusterMode::Server),
                AgentCommand::SetServerTransportConfig(ServerTransportConfig {
                    port: entry.port,
                    idle_seconds: SERVER_IDLE_SECONDS,
                }),
            ];
            if let Some(flow) = entry.flow_config() {
                commands.push(AgentCommand::SetServerFlowConfig(flow));
            }
            if let Some(namespaces) = entry.namespaces() {
                commands.push(AgentCommand::SetServerNamespaceSet(namespaces.clone()));
            }
            PlannedUnit {
                addr: MachineAddress::new(entry.host.clone(), command_port),
                commands,
            }
        })
        .collect()
}

/// Client binding chains for every parsable member of every entry's client set.
pub fn plan_client_work(entries: &[AssignmentEntry]) -> Vec<PlannedUnit> {
    let mut plan = Vec::new();
    for entry in entries {
        for client_id in &entry.client_set {
            let Some(addr) = parse_machine_id(client_id) else {
                debug!(machine_id = %client_id, "skipping unparsable client id");
                continue;
            };
            plan.push(PlannedUnit {
                addr,
                commands: vec![
                    AgentCommand::SetMode(ClusterMode::Client),
                    AgentCommand::SetClientConfig(ClientConfig {
                        server_host: entry.host.clone(),
                        server_port: entry.port,
                        request_timeout: CLIENT_REQUEST_TIMEOUT,
                    }),
                ],
            });
        }
    }
    plan
}

/// A single NOT_STARTED mode change for every parsable machine id.
pub fn plan_unbind_work<'a, I>(machine_ids: I) -> Vec<PlannedUnit>
where
    I: IntoIterator<Item = &'a String>,
{
    machine_ids
        .into_iter()
        .filter_map(|machine_id| {
            let addr = parse_machine_id(machine_id);
            if addr.is_none() {
                debug!(machine_id = %machine_id, "skipping unparsable machine id");
            }
            addr
        })
        .map(|addr| PlannedUnit {
            addr,
            commands: vec![AgentCommand::SetMode(ClusterMode::NotStarted)],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{domain::ServerFlowConfig, machine::DEFAULT_COMMAND_PORT};

    fn server(machine_id: &str, host: &str, clients: &[&str]) -> AssignmentEntry {
        AssignmentEntry {
            machine_id: machine_id.to_string(),
            host: host.to_string(),
            port: 18730,
            belongs_to_app: true,
            client_set: clients.iter().map(|c| c.to_string()).collect(),
            max_allowed_qps: None,
            namespace_set: None,
        }
    }

    #[test]
    fn server_chain_orders_mode_before_transport() {
        let plan = plan_server_work(&[server("10.0.0.1@8720", "10.0.0.1", &[])], 8719);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].tag(), "10.0.0.1@8720");
        assert_eq!(
            plan[0].commands,
            vec![
                AgentCommand::SetMode(ClusterMode::Server),
                AgentCommand::SetServerTransportConfig(ServerTransportConfig {
                    port: 18730,
                    idle_seconds: 600,
                }),
            ]
        );
    }

    #[test]
    fn server_chain_appends_flow_and_namespace_steps() {
        let mut entry = server("10.0.0.1@8719", "10.0.0.1", &[]);
        entry.max_allowed_qps = Some(5000.0);
        entry.namespace_set = Some(BTreeSet::from(["orderApp".to_string()]));

        let plan = plan_server_work(&[entry], DEFAULT_COMMAND_PORT);
        let commands = &plan[0].commands;
        assert_eq!(commands.len(), 4);
        assert_eq!(
            commands[2],
            AgentCommand::SetServerFlowConfig(ServerFlowConfig {
                max_allowed_qps: 5000.0
            })
        );
        assert_eq!(
            commands[3],
            AgentCommand::SetServerNamespaceSet(BTreeSet::from(["orderApp".to_string()]))
        );
    }

    #[test]
    fn out_of_range_qps_skips_flow_step() {
        for qps in [0.0, -1.0, 200_001.0] {
            let mut entry = server("10.0.0.1@8719", "10.0.0.1", &[]);
            entry.max_allowed_qps = Some(qps);
            let plan = plan_server_work(&[entry], DEFAULT_COMMAND_PORT);
            assert_eq!(plan[0].commands.len(), 2, "qps {qps}");
        }
    }

    #[test]
    fn server_plan_skips_entries_outside_app_and_defaults_port() {
        let mut candidate = server("10.0.0.9@8719", "10.0.0.9", &[]);
        candidate.belongs_to_app = false;
        let unnamed = server("10.0.0.1", "10.0.0.1", &[]);

        let plan = plan_server_work(&[candidate, unnamed], 9000);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].tag(), "10.0.0.1@9000");
    }

    #[test]
    fn client_plan_points_clients_at_their_server_and_drops_bad_ids() {
        let mut candidate = server("10.0.0.5@8719", "10.0.0.5", &["10.0.0.6@8719"]);
        candidate.belongs_to_app = false;
        let entries = [
            server("10.0.0.1@8719", "10.0.0.1", &["10.0.0.2@8719", "garbage"]),
            candidate,
        ];

        let plan = plan_client_work(&entries);
        let tags: Vec<_> = plan.iter().map(PlannedUnit::tag).collect();
        assert_eq!(tags, vec!["10.0.0.2@8719", "10.0.0.6@8719"]);
        assert_eq!(
            plan[0].commands,
            vec![
                AgentCommand::SetMode(ClusterMode::Client),
                AgentCommand::SetClientConfig(ClientConfig {
                    server_host: "10.0.0.1".to_string(),
                    server_port: 18730,
                    request_timeout: 20,
                }),
            ]
        );
    }

    #[test]
    fn unbind_plan_is_one_mode_change_per_parsable_id() {
        let ids = BTreeSet::from([
            "10.0.0.3@8719".to_string(),
            "".to_string(),
            "no-port".to_string(),
        ]);
        let plan = plan_unbind_work(&ids);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].tag(), "10.0.0.3@8719");
        assert_eq!(
            plan[0].commands,
            vec![AgentCommand::SetMode(ClusterMode::NotStarted)]
        );
    }
}
