use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Request timeout pushed to token clients, in the agent's own time unit.
pub const CLIENT_REQUEST_TIMEOUT: u32 = 20;
/// Idle window pushed to token servers.
pub const SERVER_IDLE_SECONDS: u32 = 600;
/// Upper bound for a flow config push; values above it are never sent.
pub const MAX_ALLOWED_QPS_CEILING: f64 = 200_000.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    BlankApp,
    BlankMachineId,
    EmptyMachineIdSet,
    MissingAssignmentMap,
}

impl DomainError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BlankApp
            | Self::BlankMachineId
            | Self::EmptyMachineIdSet
            | Self::MissingAssignmentMap => "invalid_request",
        }
    }
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankApp => write!(f, "app cannot be blank"),
            Self::BlankMachineId => write!(f, "machineId cannot be blank"),
            Self::EmptyMachineIdSet => write!(f, "machineIdSet cannot be empty"),
            Self::MissingAssignmentMap => write!(f, "clusterMap cannot be null"),
        }
    }
}

impl std::error::Error for DomainError {}

pub fn validate_app(app: &str) -> Result<(), DomainError> {
    if app.trim().is_empty() {
        return Err(DomainError::BlankApp);
    }
    Ok(())
}

pub fn validate_machine_id(machine_id: &str) -> Result<(), DomainError> {
    if machine_id.trim().is_empty() {
        return Err(DomainError::BlankMachineId);
    }
    Ok(())
}

/// Role an agent is asked to assume. Lives on the agent, never tracked here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterMode {
    NotStarted,
    Server,
    Client,
}

impl ClusterMode {
    /// Numeric mode understood by the agent's `setClusterMode` command.
    pub fn code(self) -> i32 {
        match self {
            Self::NotStarted => -1,
            Self::Client => 0,
            Self::Server => 1,
        }
    }
}

/// One row of the desired topology for an app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEntry {
    pub machine_id: String,
    #[serde(rename = "ip")]
    pub host: String,
    /// Token server port clients connect to.
    pub port: u16,
    #[serde(default, alias = "belongToApp")]
    pub belongs_to_app: bool,
    #[serde(default)]
    pub client_set: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_allowed_qps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_set: Option<BTreeSet<String>>,
}

impl AssignmentEntry {
    /// Flow config to push, if `max_allowed_qps` is within `(0, 200000]`.
    pub fn flow_config(&self) -> Option<ServerFlowConfig> {
        self.max_allowed_qps
            .filter(|qps| *qps > 0.0 && *qps <= MAX_ALLOWED_QPS_CEILING)
            .map(|max_allowed_qps| ServerFlowConfig { max_allowed_qps })
    }

    pub fn namespaces(&self) -> Option<&BTreeSet<String>> {
        self.namespace_set.as_ref().filter(|set| !set.is_empty())
    }
}

/// Persisted topology row: a server and the clients bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEntity {
    pub machine_id: String,
    #[serde(rename = "ip")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub client_set: BTreeSet<String>,
}

impl From<&AssignmentEntry> for GroupEntity {
    fn from(entry: &AssignmentEntry) -> Self {
        Self {
            machine_id: entry.machine_id.clone(),
            host: entry.host.clone(),
            port: entry.port,
            client_set: entry.client_set.clone(),
        }
    }
}

/// Full assignment for an app: the servers with their clients, plus the machines to
/// release from any cluster role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRequest {
    #[serde(default)]
    pub cluster_map: Option<Vec<AssignmentEntry>>,
    #[serde(default)]
    pub remaining_list: BTreeSet<String>,
}

/// Machines that could not be configured, keyed by `host@port`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResult {
    pub failed_server_set: BTreeSet<String>,
    pub failed_client_set: BTreeSet<String>,
    /// Set when the topology snapshot could not be committed to the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_error: Option<String>,
}

impl AssignmentResult {
    pub fn merge(&mut self, other: AssignmentResult) {
        self.failed_server_set.extend(other.failed_server_set);
        self.failed_client_set.extend(other.failed_client_set);
        if self.topology_error.is_none() {
            self.topology_error = other.topology_error;
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed_server_set.is_empty()
            && self.failed_client_set.is_empty()
            && self.topology_error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    pub request_timeout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTransportConfig {
    pub port: u16,
    pub idle_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFlowConfig {
    pub max_allowed_qps: f64,
}
