use std::{marker::PhantomData, sync::Arc};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{info, warn};

use crate::store::{DEGRADE_RULES_DATA_ID, FLOW_RULES_DATA_ID, StoreError, TopologyStore};

/// A rule list type persisted under its own data id.
pub trait RuleKind: Serialize + DeserializeOwned + Send + Sync + 'static {
    const DATA_ID: &'static str;
    const NAME: &'static str;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub resource: String,
    #[serde(default = "default_limit_app")]
    pub limit_app: String,
    /// 0 = thread count, 1 = QPS.
    #[serde(default = "default_flow_grade")]
    pub grade: i32,
    pub count: f64,
    #[serde(default)]
    pub strategy: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_resource: Option<String>,
    #[serde(default)]
    pub control_behavior: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warm_up_period_sec: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queueing_time_ms: Option<u32>,
    #[serde(default)]
    pub cluster_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_config: Option<serde_json::Value>,
}

impl RuleKind for FlowRule {
    const DATA_ID: &'static str = FLOW_RULES_DATA_ID;
    const NAME: &'static str = "flow";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradeRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub resource: String,
    #[serde(default = "default_limit_app")]
    pub limit_app: String,
    /// 0 = slow request ratio, 1 = error ratio, 2 = error count.
    #[serde(default)]
    pub grade: i32,
    pub count: f64,
    pub time_window: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_request_amount: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slow_ratio_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_interval_ms: Option<u32>,
}

impl RuleKind for DegradeRule {
    const DATA_ID: &'static str = DEGRADE_RULES_DATA_ID;
    const NAME: &'static str = "degrade";
}

fn default_limit_app() -> String {
    "default".to_string()
}

fn default_flow_grade() -> i32 {
    1
}

/// Publishes and reads back one kind of rule list for an app.
pub struct RuleRepository<R> {
    store: Arc<dyn TopologyStore>,
    _rule: PhantomData<fn() -> R>,
}

pub type FlowRuleRepository = RuleRepository<FlowRule>;
pub type DegradeRuleRepository = RuleRepository<DegradeRule>;

impl<R> Clone for RuleRepository<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _rule: PhantomData,
        }
    }
}

impl<R: RuleKind> RuleRepository<R> {
    pub fn new(store: Arc<dyn TopologyStore>) -> Self {
        Self {
            store,
            _rule: PhantomData,
        }
    }

    pub async fn publish(&self, app: &str, rules: &[R]) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(rules)?;
        match self.store.publish(app, R::DATA_ID, payload).await {
            Ok(()) => {
                info!(app = %app, kind = R::NAME, count = rules.len(), "published rules");
                Ok(())
            }
            Err(err) => {
                warn!(app = %app, kind = R::NAME, error = %err, "rule publish failed");
                Err(err)
            }
        }
    }

    /// Rules stored for `app`; a missing or empty node yields no rules.
    pub async fn fetch(&self, app: &str) -> Result<Vec<R>, StoreError> {
        let bytes = match self.store.fetch(app, R::DATA_ID).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(Vec::new()),
            Err(err) => {
                warn!(app = %app, kind = R::NAME, error = %err, "rule fetch failed");
                return Err(err);
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::MemoryTopologyStore;

    #[tokio::test]
    async fn flow_rules_are_stored_as_json_array_under_flow_data_id() {
        let store = Arc::new(MemoryTopologyStore::default());
        let repo = FlowRuleRepository::new(store.clone());
        let rule: FlowRule = serde_json::from_value(serde_json::json!({
            "resource": "GET:/orders",
            "count": 100.0,
            "clusterMode": true
        }))
        .unwrap();
        assert_eq!(rule.limit_app, "default");
        assert_eq!(rule.grade, 1);

        repo.publish("orderApp", std::slice::from_ref(&rule))
            .await
            .unwrap();

        let raw = store.get("/sentinel/orderApp/rules/flow-rules").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["resource"], "GET:/orders");
        assert_eq!(value[0]["clusterMode"], true);

        assert_eq!(repo.fetch("orderApp").await.unwrap(), vec![rule]);
    }

    #[tokio::test]
    async fn degrade_rules_use_their_own_node() {
        let store = Arc::new(MemoryTopologyStore::default());
        let repo = DegradeRuleRepository::new(store.clone());
        let rule = DegradeRule {
            resource: "GET:/orders".to_string(),
            limit_app: "default".to_string(),
            count: 0.5,
            time_window: 10,
            ..DegradeRule::default()
        };
        repo.publish("orderApp", &[rule]).await.unwrap();
        assert_eq!(
            store.paths(),
            vec!["/sentinel/orderApp/rules/degrade-rules".to_string()]
        );
    }

    #[tokio::test]
    async fn fetch_without_node_is_empty() {
        let store = Arc::new(MemoryTopologyStore::default());
        let repo = FlowRuleRepository::new(store);
        assert!(repo.fetch("orderApp").await.unwrap().is_empty());
    }
}
