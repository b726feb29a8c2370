use std::{collections::BTreeSet, sync::Arc, time::Duration};

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    agent::{AgentClient, AgentCommand, AgentFuture},
    machine::MachineAddress,
};

/// An independently awaited piece of remote work, tagged `host@port`.
pub struct WorkUnit {
    pub tag: String,
    pub work: AgentFuture,
}

impl WorkUnit {
    pub fn new(tag: impl Into<String>, work: AgentFuture) -> Self {
        Self {
            tag: tag.into(),
            work,
        }
    }
}

impl std::fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit").field("tag", &self.tag).finish()
    }
}

/// Runs `commands` against one agent in order, stopping at the first failure.
pub fn chain(
    client: Arc<dyn AgentClient>,
    app: String,
    addr: MachineAddress,
    commands: Vec<AgentCommand>,
) -> AgentFuture {
    Box::pin(async move {
        for command in commands {
            let name = command.name();
            if let Err(err) = command.dispatch(client.as_ref(), &app, &addr).await {
                debug!(app = %app, tag = %addr, command = name, error = %err, "chain stopped");
                return Err(err);
            }
        }
        Ok(())
    })
}

/// Dispatches every unit at once and waits up to `unit_timeout` for each.
///
/// Returns the tags of units that failed or did not settle in time. Units that time out are
/// abandoned, not cancelled: their task keeps running in the background.
pub async fn run_all(units: Vec<WorkUnit>, unit_timeout: Duration) -> BTreeSet<String> {
    let failed = Arc::new(Mutex::new(BTreeSet::new()));

    let waiters = units.into_iter().map(|unit| {
        let WorkUnit { tag, work } = unit;
        let handle = tokio::spawn(work);
        let failed = failed.clone();
        tokio::spawn(async move {
            let error = match tokio::time::timeout(unit_timeout, handle).await {
                Ok(Ok(Ok(()))) => return,
                Ok(Ok(Err(err))) => err.to_string(),
                Ok(Err(join_err)) => format!("task aborted: {join_err}"),
                Err(_) => format!("timeout after {}ms", unit_timeout.as_millis()),
            };
            warn!(tag = %tag, error = %error, "request failed");
            failed.lock().await.insert(tag);
        })
    });
    let waiters: Vec<_> = waiters.collect();

    for joined in join_all(waiters).await {
        if let Err(err) = joined {
            warn!(error = %err, "fan-out waiter aborted");
        }
    }

    let failed = failed.lock().await;
    failed.clone()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::agent::AgentError;

    fn after(delay: Duration, outcome: Result<(), String>) -> AgentFuture {
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            outcome.map_err(AgentError::Unavailable)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn unit_settling_before_timeout_is_not_failed() {
        let units = vec![
            WorkUnit::new("a@1", after(Duration::from_millis(9_900), Ok(()))),
            WorkUnit::new("b@1", after(Duration::from_millis(10_100), Ok(()))),
        ];
        let failed = run_all(units, Duration::from_secs(10)).await;
        assert_eq!(failed, BTreeSet::from(["b@1".to_string()]));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_units_are_collected_without_failing_siblings() {
        let units = vec![
            WorkUnit::new("a@1", after(Duration::from_millis(5), Err("boom".into()))),
            WorkUnit::new("b@1", after(Duration::from_millis(1), Ok(()))),
            WorkUnit::new("c@1", after(Duration::ZERO, Err("refused".into()))),
        ];
        let failed = run_all(units, Duration::from_secs(10)).await;
        assert_eq!(
            failed,
            BTreeSet::from(["a@1".to_string(), "c@1".to_string()])
        );
    }

    #[tokio::test]
    async fn empty_batch_returns_empty_set() {
        let failed = run_all(Vec::new(), Duration::from_secs(10)).await;
        assert!(failed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_work_keeps_running_after_abandonment() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let work: AgentFuture = Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        let failed = run_all(vec![WorkUnit::new("slow@1", work)], Duration::from_secs(10)).await;
        assert!(failed.contains("slow@1"));
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn many_concurrent_failures_are_all_recorded() {
        let units = (0..64)
            .map(|i| {
                WorkUnit::new(
                    format!("10.0.0.{i}@8719"),
                    after(Duration::from_millis(i), Err("down".into())),
                )
            })
            .collect();
        let failed = run_all(units, Duration::from_secs(10)).await;
        assert_eq!(failed.len(), 64);
    }
}
