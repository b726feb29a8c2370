use std::collections::BTreeSet;

use crate::{
    agent::BoxFuture,
    domain::GroupEntity,
    machine::parse_machine_id,
    store::StoreError,
    topology::ClusterConfigPublisher,
};

#[derive(Debug)]
pub enum ClusterStateError {
    Store(StoreError),
    Unavailable(String),
}

impl std::fmt::Display for ClusterStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "cluster state lookup: {e}"),
            Self::Unavailable(reason) => write!(f, "cluster state unavailable: {reason}"),
        }
    }
}

impl std::error::Error for ClusterStateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Unavailable(_) => None,
        }
    }
}

impl From<StoreError> for ClusterStateError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Answers "which group does this machine currently lead?" for the unbind path.
pub trait ClusterStateSource: Send + Sync + 'static {
    fn group_for_machine(
        &self,
        app: &str,
        machine_id: &str,
    ) -> BoxFuture<'_, Result<GroupEntity, ClusterStateError>>;
}

/// Resolves membership from the cluster map last committed for the app.
///
/// A machine that is not a recorded server resolves to a group holding only itself.
#[derive(Clone)]
pub struct StoredClusterState {
    publisher: ClusterConfigPublisher,
}

impl StoredClusterState {
    pub fn new(publisher: ClusterConfigPublisher) -> Self {
        Self { publisher }
    }
}

impl ClusterStateSource for StoredClusterState {
    fn group_for_machine(
        &self,
        app: &str,
        machine_id: &str,
    ) -> BoxFuture<'_, Result<GroupEntity, ClusterStateError>> {
        let app = app.to_string();
        let machine_id = machine_id.to_string();
        Box::pin(async move {
            let groups = self.publisher.fetch_cluster_map(&app).await?;
            if let Some(group) = groups.into_iter().find(|g| g.machine_id == machine_id) {
                return Ok(group);
            }
            let (host, port) = parse_machine_id(&machine_id)
                .map(|addr| (addr.host, addr.command_port))
                .unwrap_or_default();
            Ok(GroupEntity {
                machine_id,
                host,
                port,
                client_set: BTreeSet::new(),
            })
        })
    }
}
