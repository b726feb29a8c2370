use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    agent::AgentClient,
    cluster_state::ClusterStateSource,
    domain::{AssignmentEntry, AssignmentResult, DomainError, validate_app, validate_machine_id},
    fanout::run_all,
    machine::DEFAULT_COMMAND_PORT,
    planner::{
        PlannedUnit, into_work_units, plan_client_work, plan_server_work, plan_unbind_work,
    },
    store::TopologyStore,
    topology::{ClusterConfigPublisher, snapshot_from_assignment},
};

pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STATE_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Wait bound for each fan-out unit.
    pub unit_timeout: Duration,
    /// Wait bound for the cluster-state lookup in `unbind_server`.
    pub state_query_timeout: Duration,
    pub default_command_port: u16,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
            state_query_timeout: DEFAULT_STATE_QUERY_TIMEOUT,
            default_command_port: DEFAULT_COMMAND_PORT,
        }
    }
}

/// Assigns token server/client roles across an app's agents and records the topology.
///
/// Remote failures never abort a call; they are reported per machine in the returned
/// [`AssignmentResult`]. Only precondition violations surface as errors.
pub struct ClusterAssignmentCoordinator {
    agents: Arc<dyn AgentClient>,
    publisher: ClusterConfigPublisher,
    cluster_state: Arc<dyn ClusterStateSource>,
    options: CoordinatorOptions,
}

impl ClusterAssignmentCoordinator {
    pub fn new(
        agents: Arc<dyn AgentClient>,
        store: Arc<dyn TopologyStore>,
        cluster_state: Arc<dyn ClusterStateSource>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            agents,
            publisher: ClusterConfigPublisher::new(store),
            cluster_state,
            options,
        }
    }

    /// Demotes `machine_id` and every client currently bound to it to NOT_STARTED.
    pub async fn unbind_server(
        &self,
        app: &str,
        machine_id: &str,
    ) -> Result<AssignmentResult, DomainError> {
        validate_app(app)?;
        validate_machine_id(machine_id)?;

        let mut result = AssignmentResult::default();
        let lookup = tokio::time::timeout(
            self.options.state_query_timeout,
            self.cluster_state.group_for_machine(app, machine_id),
        )
        .await;
        let group = match lookup {
            Ok(Ok(group)) => group,
            Ok(Err(err)) => {
                warn!(
                    app = %app,
                    machine_id = %machine_id,
                    error = %err,
                    "failed to unbind machine"
                );
                result.failed_client_set.insert(machine_id.to_string());
                return Ok(result);
            }
            Err(_) => {
                warn!(
                    app = %app,
                    machine_id = %machine_id,
                    timeout_ms = self.options.state_query_timeout.as_millis() as u64,
                    "failed to unbind machine: cluster state lookup timed out"
                );
                result.failed_client_set.insert(machine_id.to_string());
                return Ok(result);
            }
        };

        let mut targets = BTreeSet::from([machine_id.to_string()]);
        targets.extend(group.client_set);
        result.failed_client_set = self.run(app, plan_unbind_work(&targets)).await;

        info!(
            app = %app,
            machine_id = %machine_id,
            targets = targets.len(),
            failed = result.failed_client_set.len(),
            "unbound token server"
        );
        Ok(result)
    }

    /// Unbinds each server in turn and unions the results.
    pub async fn unbind_servers(
        &self,
        app: &str,
        machine_ids: &BTreeSet<String>,
    ) -> Result<AssignmentResult, DomainError> {
        validate_app(app)?;
        if machine_ids.is_empty() {
            return Err(DomainError::EmptyMachineIdSet);
        }
        for machine_id in machine_ids {
            validate_machine_id(machine_id)?;
        }

        let mut result = AssignmentResult::default();
        for machine_id in machine_ids {
            result.merge(self.unbind_server(app, machine_id).await?);
        }
        Ok(result)
    }

    /// Applies a full assignment: promotes servers, binds their clients, unbinds the
    /// remainder, then commits the requested topology to the store.
    ///
    /// The cluster map is written once per call whatever the remote outcome; it records the
    /// requested servers, not the successfully configured ones.
    pub async fn apply_assignment(
        &self,
        app: &str,
        assignment_map: Option<&[AssignmentEntry]>,
        remainder: &BTreeSet<String>,
    ) -> Result<AssignmentResult, DomainError> {
        validate_app(app)?;
        let entries = assignment_map.ok_or(DomainError::MissingAssignmentMap)?;

        let server_plan = plan_server_work(entries, self.options.default_command_port);
        let failed_server_set = self.run(app, server_plan).await;

        let mut failed_client_set = self.run(app, plan_client_work(entries)).await;
        failed_client_set.extend(self.run(app, plan_unbind_work(remainder)).await);

        let groups = snapshot_from_assignment(entries);
        let topology_error = match self.publisher.publish_cluster_map(app, &groups).await {
            Ok(()) => None,
            Err(err) => Some(err.to_string()),
        };

        info!(
            app = %app,
            servers = entries.iter().filter(|e| e.belongs_to_app).count(),
            remainder = remainder.len(),
            failed_servers = failed_server_set.len(),
            failed_clients = failed_client_set.len(),
            topology_committed = topology_error.is_none(),
            "applied cluster assignment"
        );

        Ok(AssignmentResult {
            failed_server_set,
            failed_client_set,
            topology_error,
        })
    }

    async fn run(&self, app: &str, plan: Vec<PlannedUnit>) -> BTreeSet<String> {
        let units = into_work_units(plan, &self.agents, app);
        run_all(units, self.options.unit_timeout).await
    }
}
