//! Action dispatcher - hands resolved plans to the outbound sink.
//!
//! Delivery is at-most-once: a plan id is claimed before the first attempt
//! and never sent again, whatever the outcome. Transient sink failures are
//! retried with bounded exponential backoff; exhaustion or a permanent
//! failure drops the plan and surfaces it to the failure reporter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skylark_backends::{ActionSink, Component, Failure, FailureReporter, SinkError};
use skylark_types::{ActionPlan, PlanId, UserId};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::types::DispatchError;

/// Final outcome of one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DispatchOutcome {
    Delivered,
    Dropped { reason: String },
}

/// History entry for one dispatched plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub plan_id: PlanId,
    pub user_id: UserId,
    pub interventions: usize,
    pub attempts: u32,
    pub outcome: DispatchOutcome,
    pub finished_at: DateTime<Utc>,
}

/// Dispatcher counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    pub delivered: u64,
    pub dropped: u64,
    pub retries: u64,
    pub duplicates_refused: u64,
}

/// Plan ids already claimed, oldest first.
#[derive(Default)]
struct Claimed {
    ids: HashSet<PlanId>,
    order: VecDeque<PlanId>,
}

pub struct ActionDispatcher {
    config: DispatchConfig,
    sink: Arc<dyn ActionSink>,
    reporter: Arc<dyn FailureReporter>,
    claimed: Mutex<Claimed>,
    history: RwLock<VecDeque<DispatchRecord>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
    retries: AtomicU64,
    duplicates_refused: AtomicU64,
}

impl ActionDispatcher {
    pub fn new(config: DispatchConfig, sink: Arc<dyn ActionSink>, reporter: Arc<dyn FailureReporter>) -> Self {
        Self {
            config,
            sink,
            reporter,
            claimed: Mutex::new(Claimed::default()),
            history: RwLock::new(VecDeque::new()),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            duplicates_refused: AtomicU64::new(0),
        }
    }

    /// Deliver a plan, retrying transient sink failures.
    pub async fn dispatch(&self, plan: ActionPlan) -> Result<(), DispatchError> {
        if !self.claim(plan.id) {
            self.duplicates_refused.fetch_add(1, Ordering::Relaxed);
            warn!(plan_id = %plan.id, "Refusing to dispatch plan twice");
            return Err(DispatchError::AlreadyDispatched(plan.id));
        }

        let max_attempts = self.config.retry_cap.max(1);
        let mut attempts = 0;
        let failure = loop {
            attempts += 1;
            match self.sink.deliver(&plan).await {
                Ok(()) => break None,
                Err(e @ SinkError::Permanent(_)) => break Some(e),
                Err(e) if attempts >= max_attempts => break Some(e),
                Err(e) => {
                    let delay = self.config.backoff(attempts);
                    debug!(
                        plan_id = %plan.id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying plan delivery"
                    );
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
            }
        };

        match failure {
            None => {
                info!(
                    plan_id = %plan.id,
                    user_id = %plan.user_id,
                    sink = self.sink.id(),
                    interventions = plan.len(),
                    attempts,
                    "Plan delivered"
                );
                self.delivered.fetch_add(1, Ordering::Relaxed);
                self.record(&plan, attempts, DispatchOutcome::Delivered).await;
                Ok(())
            }
            Some(e) => {
                let reason = e.to_string();
                warn!(plan_id = %plan.id, user_id = %plan.user_id, attempts, error = %reason, "Plan dropped");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.reporter.report(Failure::new(
                    Component::Dispatcher,
                    Some(plan.user_id.clone()),
                    format!("plan {} dropped after {} attempt(s): {}", plan.id, attempts, reason),
                ));
                self.record(&plan, attempts, DispatchOutcome::Dropped { reason: reason.clone() })
                    .await;
                Err(DispatchError::SinkUnavailable { attempts, reason })
            }
        }
    }

    fn claim(&self, plan_id: PlanId) -> bool {
        let Ok(mut claimed) = self.claimed.lock() else {
            return false;
        };
        if !claimed.ids.insert(plan_id) {
            return false;
        }
        claimed.order.push_back(plan_id);
        while claimed.order.len() > self.config.history_size.max(1) {
            if let Some(oldest) = claimed.order.pop_front() {
                claimed.ids.remove(&oldest);
            }
        }
        true
    }

    async fn record(&self, plan: &ActionPlan, attempts: u32, outcome: DispatchOutcome) {
        let mut history = self.history.write().await;
        history.push_back(DispatchRecord {
            plan_id: plan.id,
            user_id: plan.user_id.clone(),
            interventions: plan.len(),
            attempts,
            outcome,
            finished_at: Utc::now(),
        });
        while history.len() > self.config.history_size {
            history.pop_front();
        }
    }

    /// Most recent outcomes, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<DispatchRecord> {
        let history = self.history.read().await;
        history.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            duplicates_refused: self.duplicates_refused.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylark_backends::{FlakySink, RecordingReporter, RecordingSink};

    fn plan() -> ActionPlan {
        ActionPlan::new(UserId::from("u-1"), Vec::new(), Utc::now())
    }

    fn dispatcher(sink: Arc<dyn ActionSink>, reporter: Arc<RecordingReporter>) -> ActionDispatcher {
        ActionDispatcher::new(DispatchConfig::default(), sink, reporter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retried() {
        let sink = Arc::new(FlakySink::transient(2));
        let reporter = Arc::new(RecordingReporter::new());
        let dispatcher = dispatcher(sink.clone(), reporter.clone());

        dispatcher.dispatch(plan()).await.unwrap();

        assert_eq!(sink.attempts(), 3);
        assert_eq!(sink.plans().await.len(), 1);
        assert_eq!(dispatcher.stats().retries, 2);
        assert_eq!(reporter.count_for(Component::Dispatcher), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_drops_and_reports() {
        let sink = Arc::new(FlakySink::transient(5));
        let reporter = Arc::new(RecordingReporter::new());
        let dispatcher = dispatcher(sink.clone(), reporter.clone());

        let err = dispatcher.dispatch(plan()).await.unwrap_err();

        assert!(matches!(err, DispatchError::SinkUnavailable { attempts: 3, .. }));
        assert_eq!(sink.attempts(), 3);
        assert_eq!(reporter.count_for(Component::Dispatcher), 1);
        let recent = dispatcher.recent(10).await;
        assert!(matches!(recent[0].outcome, DispatchOutcome::Dropped { .. }));
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let sink = Arc::new(FlakySink::permanent());
        let reporter = Arc::new(RecordingReporter::new());
        let dispatcher = dispatcher(sink.clone(), reporter.clone());

        assert!(dispatcher.dispatch(plan()).await.is_err());
        assert_eq!(sink.attempts(), 1);
        assert_eq!(dispatcher.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_plan_never_sent_twice() {
        let sink = Arc::new(RecordingSink::new());
        let reporter = Arc::new(RecordingReporter::new());
        let dispatcher = dispatcher(sink.clone(), reporter);
        let plan = plan();

        dispatcher.dispatch(plan.clone()).await.unwrap();
        let err = dispatcher.dispatch(plan).await.unwrap_err();

        assert!(matches!(err, DispatchError::AlreadyDispatched(_)));
        assert_eq!(sink.count(), 1);
        assert_eq!(dispatcher.stats().duplicates_refused, 1);
    }
}
