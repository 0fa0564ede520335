//! Agent runtime - hosts each agent as an isolated task.
//!
//! A hosted agent owns a bus mailbox, its private state and its own tick
//! timer. Handler errors and panics are caught, logged, counted and
//! reported; the agent keeps running and its peers never notice.

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use skylark_backends::{Component, Failure, FailureReporter};
use skylark_types::{AgentKind, UserId};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::agents::{AgentContext, AgentOutput, EngagementAgent};
use crate::bus::{BusMessage, Delivery, Mailbox, Publisher, SignalBus};
use crate::resolver::ResolutionScheduler;
use crate::types::{AgentError, BusError};

/// Per-agent counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStats {
    pub name: String,
    pub kind: AgentKind,
    pub events: u64,
    pub signals: u64,
    pub ticks: u64,
    pub failures: u64,
    pub emitted_signals: u64,
    pub emitted_interventions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events: AtomicU64,
    signals: AtomicU64,
    ticks: AtomicU64,
    failures: AtomicU64,
    emitted_signals: AtomicU64,
    emitted_interventions: AtomicU64,
}

struct Hosted {
    name: String,
    kind: AgentKind,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
}

/// Everything a hosted agent's task needs besides the agent itself.
#[derive(Clone)]
struct Worker {
    name: String,
    kind: AgentKind,
    bus: Arc<SignalBus>,
    context: AgentContext,
    scheduler: ResolutionScheduler,
    reporter: Arc<dyn FailureReporter>,
    counters: Arc<Counters>,
}

pub struct AgentRuntime {
    bus: Arc<SignalBus>,
    context: AgentContext,
    scheduler: ResolutionScheduler,
    reporter: Arc<dyn FailureReporter>,
    tick_interval: Duration,
    shutdown: watch::Sender<bool>,
    hosted: Mutex<Vec<Hosted>>,
}

impl AgentRuntime {
    pub fn new(
        bus: Arc<SignalBus>,
        context: AgentContext,
        scheduler: ResolutionScheduler,
        reporter: Arc<dyn FailureReporter>,
    ) -> Self {
        let tick_interval = context.config.agent_tick_interval();
        let (shutdown, _) = watch::channel(false);
        Self {
            bus,
            context,
            scheduler,
            reporter,
            tick_interval,
            shutdown,
            hosted: Mutex::new(Vec::new()),
        }
    }

    /// Attach an agent to the bus and start its task.
    pub async fn host<A: EngagementAgent>(&self, agent: A) -> Result<(), BusError> {
        let name = agent.name().to_string();
        let kind = agent.kind();
        let mailbox = self.bus.attach(name.clone()).await?;
        if let Err(e) = self.bus.subscribe(&name, &agent.interest()).await {
            self.bus.detach(&name).await;
            return Err(e);
        }

        let counters = Arc::new(Counters::default());
        let worker = Worker {
            name: name.clone(),
            kind,
            bus: Arc::clone(&self.bus),
            context: self.context.clone(),
            scheduler: self.scheduler.clone(),
            reporter: Arc::clone(&self.reporter),
            counters: Arc::clone(&counters),
        };
        let handle = tokio::spawn(run_agent(
            agent,
            mailbox,
            worker,
            self.tick_interval,
            self.shutdown.subscribe(),
        ));
        info!(agent = %name, tick_ms = self.tick_interval.as_millis() as u64, "Agent hosted");

        if let Ok(mut hosted) = self.hosted.lock() {
            hosted.push(Hosted {
                name,
                kind,
                counters,
                handle: Some(handle),
            });
        }
        Ok(())
    }

    /// Stop every agent task and detach its mailbox.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let stopping: Vec<(String, JoinHandle<()>)> = match self.hosted.lock() {
            Ok(mut hosted) => hosted
                .iter_mut()
                .filter_map(|h| h.handle.take().map(|handle| (h.name.clone(), handle)))
                .collect(),
            Err(_) => Vec::new(),
        };
        for (name, handle) in stopping {
            if let Err(e) = handle.await {
                warn!(agent = %name, error = %e, "Agent task ended abnormally");
            }
            self.bus.detach(&name).await;
        }
    }

    pub fn stats(&self) -> Vec<AgentStats> {
        let Ok(hosted) = self.hosted.lock() else {
            return Vec::new();
        };
        hosted
            .iter()
            .map(|h| AgentStats {
                name: h.name.clone(),
                kind: h.kind,
                events: h.counters.events.load(Ordering::Relaxed),
                signals: h.counters.signals.load(Ordering::Relaxed),
                ticks: h.counters.ticks.load(Ordering::Relaxed),
                failures: h.counters.failures.load(Ordering::Relaxed),
                emitted_signals: h.counters.emitted_signals.load(Ordering::Relaxed),
                emitted_interventions: h.counters.emitted_interventions.load(Ordering::Relaxed),
            })
            .collect()
    }
}

async fn run_agent<A: EngagementAgent>(
    mut agent: A,
    mut mailbox: Mailbox,
    worker: Worker,
    tick_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticks = tokio::time::interval_at(Instant::now() + tick_interval, tick_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            delivery = mailbox.recv() => match delivery {
                Some(delivery) => worker.deliver(&mut agent, delivery).await,
                None => break,
            },
            _ = ticks.tick() => {
                worker.counters.ticks.fetch_add(1, Ordering::Relaxed);
                let now = Utc::now();
                let output = agent.tick(&worker.context, now);
                worker.run("tick", None, output).await;
            }
        }
    }
    debug!(agent = %worker.name, "Agent task stopped");
}

impl Worker {
    async fn deliver<A: EngagementAgent>(&self, agent: &mut A, delivery: Delivery) {
        match delivery.message {
            BusMessage::Event(event) => {
                self.counters.events.fetch_add(1, Ordering::Relaxed);
                let user_id = event.user_id.clone();
                let output = agent.on_event(&self.context, &event);
                self.run("event", Some(user_id), output).await;
            }
            BusMessage::Signal(signal) => {
                self.counters.signals.fetch_add(1, Ordering::Relaxed);
                let user_id = signal.user_id.clone();
                let output = agent.on_signal(&self.context, &signal);
                self.run("signal", user_id, output).await;
            }
        }
    }

    /// Run one handler invocation in isolation and route what it produced.
    async fn run<F>(&self, handler: &str, user_id: Option<UserId>, invocation: F)
    where
        F: Future<Output = Result<AgentOutput, AgentError>>,
    {
        let result = match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(AgentError::Panicked(panic_message(panic.as_ref()))),
        };

        match result {
            Ok(output) => self.emit(output).await,
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                error!(agent = %self.name, handler, error = %e, "Agent handler failed");
                self.reporter.report(Failure::new(
                    Component::Agent(self.kind),
                    user_id,
                    format!("{} handler of {} failed: {}", handler, self.name, e),
                ));
            }
        }
    }

    async fn emit(&self, output: AgentOutput) {
        for signal in output.signals {
            self.counters.emitted_signals.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self
                .bus
                .publish(Publisher::Agent(self.kind), BusMessage::signal(signal))
                .await
            {
                warn!(agent = %self.name, error = %e, "Signal not published");
            }
        }
        for intervention in output.interventions {
            self.counters.emitted_interventions.fetch_add(1, Ordering::Relaxed);
            self.scheduler.submit(intervention);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
