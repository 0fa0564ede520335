//! Per-user resolution windows.
//!
//! The first intervention for a user opens a window: a task that collects
//! further interventions for that user until the debounce deadline passes
//! without a new arrival, or the hard cap is reached. The window then
//! unregisters itself, drains what raced in, resolves and dispatches.
//! Windows of different users never wait on each other.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use skylark_backends::{Component, Failure, FailureReporter};
use skylark_types::{Intervention, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ConflictResolver, ResolverStats};
use crate::dispatcher::ActionDispatcher;

/// Scheduler counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub windows_opened: u64,
    pub plans_dispatched: u64,
    pub plans_empty: u64,
    pub open_windows: usize,
    pub resolver: ResolverStats,
}

struct Window {
    id: u64,
    tx: mpsc::UnboundedSender<Intervention>,
}

struct Inner {
    windows: DashMap<UserId, Window>,
    resolver: ConflictResolver,
    dispatcher: Arc<ActionDispatcher>,
    reporter: Arc<dyn FailureReporter>,
    debounce: Duration,
    hard_cap: Duration,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_window: AtomicU64,
    submitted: AtomicU64,
    plans_dispatched: AtomicU64,
    plans_empty: AtomicU64,
}

/// Owns the resolution windows of every user.
#[derive(Clone)]
pub struct ResolutionScheduler {
    inner: Arc<Inner>,
}

impl ResolutionScheduler {
    pub fn new(
        debounce: Duration,
        hard_cap: Duration,
        dispatcher: Arc<ActionDispatcher>,
        reporter: Arc<dyn FailureReporter>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                windows: DashMap::new(),
                resolver: ConflictResolver::new(),
                dispatcher,
                reporter,
                debounce,
                hard_cap: hard_cap.max(debounce),
                shutdown,
                handles: Mutex::new(Vec::new()),
                next_window: AtomicU64::new(1),
                submitted: AtomicU64::new(0),
                plans_dispatched: AtomicU64::new(0),
                plans_empty: AtomicU64::new(0),
            }),
        }
    }

    /// Queue an intervention into its user's window, opening one if needed.
    pub fn submit(&self, intervention: Intervention) {
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        let user_id = intervention.user_id.clone();
        let mut item = intervention;

        loop {
            let (window_id, tx) = self.window_for(&user_id);
            match tx.send(item) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    // The window closed between lookup and send.
                    debug!(user_id = %user_id, "Window closed, reopening");
                    self.inner.windows.remove_if(&user_id, |_, w| w.id == window_id);
                    item = returned;
                }
            }
        }
    }

    fn window_for(&self, user_id: &UserId) -> (u64, mpsc::UnboundedSender<Intervention>) {
        let mut opened = None;
        let found = {
            let entry = self.inner.windows.entry(user_id.clone()).or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                let id = self.inner.next_window.fetch_add(1, Ordering::Relaxed);
                opened = Some((id, rx));
                Window { id, tx }
            });
            (entry.id, entry.tx.clone())
        };

        if let Some((id, rx)) = opened {
            debug!(user_id = %user_id, window = id, "Resolution window opened");
            let handle = tokio::spawn(run_window(
                Arc::clone(&self.inner),
                user_id.clone(),
                id,
                rx,
                self.inner.shutdown.subscribe(),
            ));
            if let Ok(mut handles) = self.inner.handles.lock() {
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
        }
        found
    }

    /// Close every open window now and wait for their plans to be dispatched.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let handles = match self.inner.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => Vec::new(),
        };
        info!(windows = handles.len(), "Flushing resolution windows");
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Resolution window task failed");
                self.inner
                    .reporter
                    .report(Failure::new(Component::Resolver, None, format!("window task failed: {}", e)));
            }
        }
    }

    pub fn open_windows(&self) -> usize {
        self.inner.windows.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            windows_opened: self.inner.next_window.load(Ordering::Relaxed) - 1,
            plans_dispatched: self.inner.plans_dispatched.load(Ordering::Relaxed),
            plans_empty: self.inner.plans_empty.load(Ordering::Relaxed),
            open_windows: self.inner.windows.len(),
            resolver: self.inner.resolver.stats(),
        }
    }
}

async fn run_window(
    inner: Arc<Inner>,
    user_id: UserId,
    window_id: u64,
    mut rx: mpsc::UnboundedReceiver<Intervention>,
    mut shutdown: watch::Receiver<bool>,
) {
    let opened = Instant::now();
    let hard_deadline = opened + inner.hard_cap;
    let mut deadline = (opened + inner.debounce).min(hard_deadline);
    let mut pending = Vec::new();

    if !*shutdown.borrow() {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                received = rx.recv() => match received {
                    Some(intervention) => {
                        pending.push(intervention);
                        deadline = (Instant::now() + inner.debounce).min(hard_deadline);
                    }
                    None => break,
                },
            }
        }
    }

    inner.windows.remove_if(&user_id, |_, w| w.id == window_id);
    rx.close();
    while let Ok(intervention) = rx.try_recv() {
        pending.push(intervention);
    }

    let received = pending.len();
    let plan = inner.resolver.resolve(&user_id, pending, Utc::now());
    if plan.is_empty() {
        info!(user_id = %user_id, received, "Nothing left to dispatch after resolution");
        inner.plans_empty.fetch_add(1, Ordering::Relaxed);
        return;
    }
    if plan.len() < received {
        debug!(user_id = %user_id, received, chosen = plan.len(), "Interventions merged");
    }

    match inner.dispatcher.dispatch(plan).await {
        Ok(()) => {
            inner.plans_dispatched.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            // Sink failures are reported by the dispatcher itself.
            debug!(user_id = %user_id, error = %e, "Plan not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use chrono::Duration as ChronoDuration;
    use skylark_backends::{RecordingReporter, RecordingSink};
    use skylark_types::{ActionType, AgentKind};

    fn scheduler(sink: Arc<RecordingSink>) -> ResolutionScheduler {
        let reporter = Arc::new(RecordingReporter::new());
        let dispatcher = Arc::new(ActionDispatcher::new(DispatchConfig::default(), sink, reporter.clone()));
        ResolutionScheduler::new(Duration::from_secs(5), Duration::from_secs(30), dispatcher, reporter)
    }

    fn notify(user: &str, priority: u8) -> Intervention {
        Intervention::new(
            AgentKind::FeedbackLoop,
            UserId::from(user),
            ActionType::Notify,
            priority,
            Utc::now() + ChronoDuration::hours(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_plan_per_window() {
        let sink = Arc::new(RecordingSink::new());
        let scheduler = scheduler(sink.clone());

        scheduler.submit(notify("u-1", 3));
        tokio::time::sleep(Duration::from_secs(2)).await;
        scheduler.submit(notify("u-1", 7));

        assert!(sink.wait_for(1, Duration::from_secs(60)).await);
        let plans = sink.plans().await;
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].interventions[0].priority, 7);
        assert_eq!(scheduler.open_windows(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_cap_forces_resolution() {
        let sink = Arc::new(RecordingSink::new());
        let scheduler = scheduler(sink.clone());

        // An arrival every 4s keeps resetting the 5s debounce.
        for _ in 0..10 {
            scheduler.submit(notify("u-1", 1));
            tokio::time::sleep(Duration::from_secs(4)).await;
        }

        let plans = sink.plans().await;
        assert!(!plans.is_empty());
        assert!(scheduler.stats().windows_opened >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_users_resolved_independently() {
        let sink = Arc::new(RecordingSink::new());
        let scheduler = scheduler(sink.clone());

        scheduler.submit(notify("u-1", 1));
        scheduler.submit(notify("u-2", 2));

        assert!(sink.wait_for(2, Duration::from_secs(60)).await);
        let mut users: Vec<String> = sink.plans().await.iter().map(|p| p.user_id.to_string()).collect();
        users.sort();
        assert_eq!(users, vec!["u-1", "u-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_open_windows() {
        let sink = Arc::new(RecordingSink::new());
        let scheduler = scheduler(sink.clone());

        scheduler.submit(notify("u-1", 4));
        tokio::task::yield_now().await;
        scheduler.shutdown().await;

        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_only_window_dispatches_nothing() {
        let sink = Arc::new(RecordingSink::new());
        let scheduler = scheduler(sink.clone());
        let mut stale = notify("u-1", 9);
        stale.ttl = Utc::now() - ChronoDuration::seconds(1);

        scheduler.submit(stale);
        scheduler.shutdown().await;

        assert_eq!(sink.count(), 0);
        assert_eq!(scheduler.stats().plans_empty, 1);
    }
}
