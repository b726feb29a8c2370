use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    domain::{AssignmentEntry, GroupEntity},
    store::{CLIENT_CONFIG_DATA_ID, CLUSTER_MAP_DATA_ID, StoreError, TopologyStore},
};

/// Persisted form of a requested assignment: one group per entry, stripped of flow and
/// namespace detail.
pub fn snapshot_from_assignment(entries: &[AssignmentEntry]) -> Vec<GroupEntity> {
    entries.iter().map(GroupEntity::from).collect()
}

pub fn encode_snapshot(groups: &[GroupEntity]) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(groups)?)
}

/// Decodes a cluster map node. An empty (freshly created) node holds no groups.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Vec<GroupEntity>, StoreError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Writes cluster-level configuration (cluster map, client config) for an app.
#[derive(Clone)]
pub struct ClusterConfigPublisher {
    store: Arc<dyn TopologyStore>,
}

impl ClusterConfigPublisher {
    pub fn new(store: Arc<dyn TopologyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TopologyStore> {
        &self.store
    }

    pub async fn publish_cluster_map(
        &self,
        app: &str,
        groups: &[GroupEntity],
    ) -> Result<(), StoreError> {
        let payload = encode_snapshot(groups)?;
        self.publish(app, CLUSTER_MAP_DATA_ID, payload).await
    }

    pub async fn fetch_cluster_map(&self, app: &str) -> Result<Vec<GroupEntity>, StoreError> {
        match self.store.fetch(app, CLUSTER_MAP_DATA_ID).await? {
            Some(bytes) => decode_snapshot(&bytes),
            None => Ok(Vec::new()),
        }
    }

    /// Publishes a client config document. Blank input is skipped and reported as `false`.
    pub async fn publish_client_config(&self, app: &str, data: &str) -> Result<bool, StoreError> {
        if data.trim().is_empty() {
            debug!(app = %app, "skipping blank client config");
            return Ok(false);
        }
        serde_json::from_str::<serde_json::Value>(data)?;
        self.publish(app, CLIENT_CONFIG_DATA_ID, data.as_bytes().to_vec())
            .await?;
        Ok(true)
    }

    async fn publish(&self, app: &str, data_id: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        self.store
            .publish(app, data_id, payload)
            .await
            .inspect_err(|err| {
                warn!(
                    app = %app,
                    data_id,
                    path = %self.store.path_for(app, data_id),
                    error = %err,
                    "topology publish failed"
                );
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::MemoryTopologyStore;

    fn entry() -> AssignmentEntry {
        AssignmentEntry {
            machine_id: "10.0.0.1@8719".to_string(),
            host: "10.0.0.1".to_string(),
            port: 18730,
            belongs_to_app: true,
            client_set: BTreeSet::from(["10.0.0.2@8719".to_string()]),
            max_allowed_qps: Some(1000.0),
            namespace_set: Some(BTreeSet::from(["orderApp".to_string()])),
        }
    }

    #[test]
    fn snapshot_drops_flow_and_namespace_detail() {
        let groups = snapshot_from_assignment(&[entry()]);
        let json = serde_json::to_value(&groups).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "machineId": "10.0.0.1@8719",
                "ip": "10.0.0.1",
                "port": 18730,
                "clientSet": ["10.0.0.2@8719"]
            }])
        );
    }

    #[test]
    fn empty_node_decodes_to_no_groups() {
        assert_eq!(decode_snapshot(b"").unwrap(), Vec::new());
        assert_eq!(decode_snapshot(b" \n").unwrap(), Vec::new());
        assert!(decode_snapshot(b"{oops").is_err());
    }

    #[tokio::test]
    async fn cluster_map_roundtrips_through_store() {
        let store = Arc::new(MemoryTopologyStore::default());
        let publisher = ClusterConfigPublisher::new(store.clone());
        let groups = snapshot_from_assignment(&[entry()]);

        publisher.publish_cluster_map("orderApp", &groups).await.unwrap();

        assert_eq!(publisher.fetch_cluster_map("orderApp").await.unwrap(), groups);
        assert!(publisher.fetch_cluster_map("otherApp").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_client_config_is_not_written() {
        let store = Arc::new(MemoryTopologyStore::default());
        let publisher = ClusterConfigPublisher::new(store.clone());

        assert!(!publisher.publish_client_config("orderApp", "  ").await.unwrap());
        assert!(store.paths().is_empty());

        let written = publisher
            .publish_client_config("orderApp", r#"{"requestTimeout":20}"#)
            .await
            .unwrap();
        assert!(written);
        assert_eq!(
            store.get("/sentinel/orderApp/cluster-client-config"),
            Some(br#"{"requestTimeout":20}"#.to_vec())
        );
    }

    #[tokio::test]
    async fn malformed_client_config_is_rejected() {
        let store = Arc::new(MemoryTopologyStore::default());
        let publisher = ClusterConfigPublisher::new(store.clone());
        let err = publisher
            .publish_client_config("orderApp", "not json")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SerdeJson(_)));
        assert!(store.paths().is_empty());
    }
}
