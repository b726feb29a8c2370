use std::collections::BTreeSet;

use tracing::debug;

use super::{AgentClient, AgentError, AgentFuture};
use crate::{
    domain::{ClientConfig, ClusterMode, ServerFlowConfig, ServerTransportConfig},
    machine::MachineAddress,
};

const SET_CLUSTER_MODE: &str = "setClusterMode";
const MODIFY_CLIENT_CONFIG: &str = "cluster/client/modifyConfig";
const MODIFY_TRANSPORT_CONFIG: &str = "cluster/server/modifyTransportConfig";
const MODIFY_FLOW_CONFIG: &str = "cluster/server/modifyFlowConfig";
const MODIFY_NAMESPACE_SET: &str = "cluster/server/modifyNamespaceSet";

/// Talks to an agent's command center over plain HTTP.
///
/// Every command is a form-encoded `POST http://{host}:{port}/{command}`; the agent answers
/// `success` on acceptance.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
}

impl HttpAgentClient {
    pub fn try_new() -> Result<Self, AgentError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn send(
        &self,
        app: &str,
        addr: &MachineAddress,
        command: &'static str,
        params: Result<Vec<(&'static str, String)>, serde_json::Error>,
    ) -> AgentFuture {
        let client = self.client.clone();
        let url = format!("http://{}:{}/{}", addr.host, addr.command_port, command);
        let app = app.to_string();
        Box::pin(async move {
            let params = params?;
            debug!(app = %app, url = %url, "sending agent command");
            let resp = client.post(&url).form(&params).send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            if status.is_success() && body.trim().eq_ignore_ascii_case("success") {
                return Ok(());
            }
            Err(AgentError::Rejected {
                command,
                status: status.as_u16(),
                body,
            })
        })
    }
}

fn json_param<T: serde::Serialize>(
    value: &T,
) -> Result<Vec<(&'static str, String)>, serde_json::Error> {
    Ok(vec![("data", serde_json::to_string(value)?)])
}

impl AgentClient for HttpAgentClient {
    fn set_mode(&self, app: &str, addr: &MachineAddress, mode: ClusterMode) -> AgentFuture {
        let params = vec![("mode", mode.code().to_string())];
        self.send(app, addr, SET_CLUSTER_MODE, Ok(params))
    }

    fn set_client_config(
        &self,
        app: &str,
        addr: &MachineAddress,
        config: ClientConfig,
    ) -> AgentFuture {
        self.send(app, addr, MODIFY_CLIENT_CONFIG, json_param(&config))
    }

    fn set_server_transport_config(
        &self,
        app: &str,
        addr: &MachineAddress,
        config: ServerTransportConfig,
    ) -> AgentFuture {
        let params = vec![
            ("port", config.port.to_string()),
            ("idleSeconds", config.idle_seconds.to_string()),
        ];
        self.send(app, addr, MODIFY_TRANSPORT_CONFIG, Ok(params))
    }

    fn set_server_flow_config(
        &self,
        app: &str,
        addr: &MachineAddress,
        config: ServerFlowConfig,
    ) -> AgentFuture {
        self.send(app, addr, MODIFY_FLOW_CONFIG, json_param(&config))
    }

    fn set_server_namespace_set(
        &self,
        app: &str,
        addr: &MachineAddress,
        namespaces: BTreeSet<String>,
    ) -> AgentFuture {
        self.send(app, addr, MODIFY_NAMESPACE_SET, json_param(&namespaces))
    }
}
