use std::{collections::BTreeSet, future::Future, pin::Pin};

use crate::{
    domain::{ClientConfig, ClusterMode, ServerFlowConfig, ServerTransportConfig},
    machine::MachineAddress,
};

pub mod http;

pub use http::HttpAgentClient;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type AgentFuture = BoxFuture<'static, Result<(), AgentError>>;

#[derive(Debug)]
pub enum AgentError {
    Transport(reqwest::Error),
    Encode(serde_json::Error),
    Rejected {
        command: &'static str,
        status: u16,
        body: String,
    },
    Unavailable(String),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "agent transport error: {err}"),
            Self::Encode(err) => write!(f, "encode agent payload: {err}"),
            Self::Rejected {
                command,
                status,
                body,
            } => write!(f, "agent rejected {command}: http {status}: {body}"),
            Self::Unavailable(reason) => write!(f, "agent unavailable: {reason}"),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            Self::Encode(err) => Some(err),
            Self::Rejected { .. } | Self::Unavailable(_) => None,
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value)
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// Remote configuration surface of a flow-control agent.
///
/// Implementations apply no timeout of their own; the fan-out layer bounds every call.
/// Returned futures own their inputs so they can be spawned.
pub trait AgentClient: Send + Sync + 'static {
    fn set_mode(&self, app: &str, addr: &MachineAddress, mode: ClusterMode) -> AgentFuture;

    fn set_client_config(
        &self,
        app: &str,
        addr: &MachineAddress,
        config: ClientConfig,
    ) -> AgentFuture;

    fn set_server_transport_config(
        &self,
        app: &str,
        addr: &MachineAddress,
        config: ServerTransportConfig,
    ) -> AgentFuture;

    fn set_server_flow_config(
        &self,
        app: &str,
        addr: &MachineAddress,
        config: ServerFlowConfig,
    ) -> AgentFuture;

    fn set_server_namespace_set(
        &self,
        app: &str,
        addr: &MachineAddress,
        namespaces: BTreeSet<String>,
    ) -> AgentFuture;
}

/// One configuration call against one agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentCommand {
    SetMode(ClusterMode),
    SetClientConfig(ClientConfig),
    SetServerTransportConfig(ServerTransportConfig),
    SetServerFlowConfig(ServerFlowConfig),
    SetServerNamespaceSet(BTreeSet<String>),
}

impl AgentCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetMode(_) => "set_mode",
            Self::SetClientConfig(_) => "set_client_config",
            Self::SetServerTransportConfig(_) => "set_server_transport_config",
            Self::SetServerFlowConfig(_) => "set_server_flow_config",
            Self::SetServerNamespaceSet(_) => "set_server_namespace_set",
        }
    }

    pub fn dispatch(
        self,
        client: &dyn AgentClient,
        app: &str,
        addr: &MachineAddress,
    ) -> AgentFuture {
        match self {
            Self::SetMode(mode) => client.set_mode(app, addr, mode),
            Self::SetClientConfig(config) => client.set_client_config(app, addr, config),
            Self::SetServerTransportConfig(config) => {
                client.set_server_transport_config(app, addr, config)
            }
            Self::SetServerFlowConfig(config) => client.set_server_flow_config(app, addr, config),
            Self::SetServerNamespaceSet(namespaces) => {
                client.set_server_namespace_set(app, addr, namespaces)
            }
        }
    }
}
