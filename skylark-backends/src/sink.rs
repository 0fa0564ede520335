//! Outbound action sink.
//!
//! The notification/UI layer receives resolved plans through [`ActionSink`].
//! It acknowledges, fails transiently (worth retrying), or fails permanently.

use async_trait::async_trait;
use skylark_types::ActionPlan;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::info;

/// Delivery failure reported by a sink.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// Temporary failure, retry may succeed
    #[error("Transient sink failure: {0}")]
    Transient(String),

    /// The sink will never accept this plan
    #[error("Permanent sink failure: {0}")]
    Permanent(String),
}

impl SinkError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

/// Core trait for the outbound action sink.
#[async_trait]
pub trait ActionSink: Send + Sync {
    /// Sink identifier.
    fn id(&self) -> &str;

    /// Deliver one plan.
    async fn deliver(&self, plan: &ActionPlan) -> Result<(), SinkError>;
}

/// Records every delivered plan. Tests can wait for a number of deliveries.
pub struct RecordingSink {
    plans: Mutex<Vec<ActionPlan>>,
    delivered: watch::Sender<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        let (delivered, _) = watch::channel(0);
        Self {
            plans: Mutex::new(Vec::new()),
            delivered,
        }
    }

    /// All plans delivered so far, in delivery order.
    pub async fn plans(&self) -> Vec<ActionPlan> {
        self.plans.lock().await.clone()
    }

    /// Number of plans delivered so far.
    pub fn count(&self) -> usize {
        *self.delivered.borrow()
    }

    /// Wait until at least `n` plans were delivered. Returns false on timeout.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let mut rx = self.delivered.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|count| *count >= n))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    async fn record(&self, plan: &ActionPlan) {
        let mut plans = self.plans.lock().await;
        plans.push(plan.clone());
        self.delivered.send_replace(plans.len());
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionSink for RecordingSink {
    fn id(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, plan: &ActionPlan) -> Result<(), SinkError> {
        self.record(plan).await;
        Ok(())
    }
}

/// A sink that fails a configured number of times before recording.
pub struct FlakySink {
    transient_failures: AtomicU32,
    permanent: bool,
    attempts: AtomicU32,
    inner: RecordingSink,
}

impl FlakySink {
    /// Fail transiently `failures` times, then succeed.
    pub fn transient(failures: u32) -> Self {
        Self {
            transient_failures: AtomicU32::new(failures),
            permanent: false,
            attempts: AtomicU32::new(0),
            inner: RecordingSink::new(),
        }
    }

    /// Always fail permanently.
    pub fn permanent() -> Self {
        Self {
            transient_failures: AtomicU32::new(0),
            permanent: true,
            attempts: AtomicU32::new(0),
            inner: RecordingSink::new(),
        }
    }

    /// Total delivery attempts seen.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Plans eventually accepted.
    pub async fn plans(&self) -> Vec<ActionPlan> {
        self.inner.plans().await
    }
}

#[async_trait]
impl ActionSink for FlakySink {
    fn id(&self) -> &str {
        "flaky"
    }

    async fn deliver(&self, plan: &ActionPlan) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.permanent {
            return Err(SinkError::Permanent("sink rejects all plans".to_string()));
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SinkError::Transient(format!(
                "simulated outage ({} left)",
                remaining - 1
            )));
        }

        self.inner.record(plan).await;
        Ok(())
    }
}

/// Logs each plan through `tracing`. Used by the demo binary.
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl ActionSink for LoggingSink {
    fn id(&self) -> &str {
        "logging"
    }

    async fn deliver(&self, plan: &ActionPlan) -> Result<(), SinkError> {
        let actions: Vec<&str> = plan.interventions.iter().map(|i| i.action_type.as_str()).collect();
        info!(
            plan_id = %plan.id,
            user_id = %plan.user_id,
            actions = ?actions,
            "Action plan delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skylark_types::UserId;

    fn plan() -> ActionPlan {
        ActionPlan::new(UserId::from("u-1"), Vec::new(), Utc::now())
    }

    #[tokio::test]
    async fn test_recording_sink_counts() {
        let sink = RecordingSink::new();
        sink.deliver(&plan()).await.unwrap();
        sink.deliver(&plan()).await.unwrap();

        assert_eq!(sink.count(), 2);
        assert!(sink.wait_for(2, Duration::from_millis(10)).await);
        assert!(!sink.wait_for(3, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_flaky_sink_recovers() {
        let sink = FlakySink::transient(2);
        assert!(sink.deliver(&plan()).await.unwrap_err().is_transient());
        assert!(sink.deliver(&plan()).await.is_err());
        assert!(sink.deliver(&plan()).await.is_ok());
        assert_eq!(sink.attempts(), 3);
        assert_eq!(sink.plans().await.len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_sink() {
        let sink = FlakySink::permanent();
        let err = sink.deliver(&plan()).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
