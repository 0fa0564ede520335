//! EngagementCoordinator - wires ingress, bus, agents, resolution and dispatch.

use serde::{Deserialize, Serialize};
use skylark_backends::{
    ActionSink, FailureReporter, LoggingSink, PassthroughScoring, ScoringBackend, StateBackend,
    TracingReporter,
};
use skylark_types::{AgentKind, Event};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::agents::{Agent, AgentContext, EngagementAgent};
use crate::bus::{BusStats, SignalBus};
use crate::config::CoreConfig;
use crate::dispatcher::{ActionDispatcher, DispatchRecord, DispatchStats};
use crate::ingress::{EventIngress, IngressStats, RawEvent};
use crate::resolver::{ResolutionScheduler, SchedulerStats};
use crate::runtime::{AgentRuntime, AgentStats};
use crate::store::UserStateStore;
use crate::types::{CoreError, Result};

/// Snapshot of every component's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub instance_id: String,
    pub running: bool,
    pub users: usize,
    pub ingress: IngressStats,
    pub bus: BusStats,
    pub agents: Vec<AgentStats>,
    pub resolution: SchedulerStats,
    pub dispatch: DispatchStats,
}

/// The agent coordination core.
///
/// Events enter through [`ingest`](Self::ingest), fan out over the signal
/// bus to the hosted agents, and the interventions the agents propose are
/// merged per user and handed to the outbound sink.
pub struct EngagementCoordinator {
    /// Configuration
    config: Arc<CoreConfig>,
    /// Signal bus
    bus: Arc<SignalBus>,
    /// Event ingress
    ingress: EventIngress,
    /// Per-user state
    store: Arc<UserStateStore>,
    /// Outbound dispatch
    dispatcher: Arc<ActionDispatcher>,
    /// Resolution windows
    scheduler: ResolutionScheduler,
    /// Agent host
    runtime: AgentRuntime,
    /// Agents waiting for `start`
    pending: Mutex<Vec<Agent>>,
    /// Whether the coordinator is running
    running: RwLock<bool>,
}

impl EngagementCoordinator {
    /// Create a coordinator with default collaborators.
    pub fn new(instance_id: impl Into<String>) -> Result<Self> {
        CoordinatorBuilder::new(instance_id).build()
    }

    /// Create a builder.
    pub fn builder(instance_id: impl Into<String>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(instance_id)
    }

    pub fn id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Host the configured agents and start accepting events.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.write().await;
        if *running {
            return Ok(());
        }

        let agents = std::mem::take(&mut *self.pending.lock().await);
        let count = agents.len();
        for agent in agents {
            self.runtime.host(agent).await?;
        }
        *running = true;

        info!(instance_id = %self.config.instance_id, agents = count, "Engagement coordinator started");
        Ok(())
    }

    /// Host an additional agent next to the configured ones.
    pub async fn host_agent<A: EngagementAgent>(&self, agent: A) -> Result<()> {
        self.runtime.host(agent).await?;
        Ok(())
    }

    /// Accept one raw activity record.
    pub async fn ingest(&self, raw: RawEvent) -> Result<Event> {
        if !*self.running.read().await {
            return Err(CoreError::NotRunning);
        }
        Ok(self.ingress.ingest(raw).await?)
    }

    /// Stop agents, flush open resolution windows, then close the bus.
    pub async fn shutdown(&self) {
        {
            let mut running = self.running.write().await;
            *running = false;
        }
        self.runtime.shutdown().await;
        self.scheduler.shutdown().await;
        self.bus.close().await;
        info!(instance_id = %self.config.instance_id, "Engagement coordinator stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub fn store(&self) -> Arc<UserStateStore> {
        Arc::clone(&self.store)
    }

    pub fn bus(&self) -> Arc<SignalBus> {
        Arc::clone(&self.bus)
    }

    /// Most recent dispatch outcomes, newest first.
    pub async fn recent_dispatches(&self, limit: usize) -> Vec<DispatchRecord> {
        self.dispatcher.recent(limit).await
    }

    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            instance_id: self.config.instance_id.clone(),
            running: self.is_running().await,
            users: self.store.len(),
            ingress: self.ingress.stats().await,
            bus: self.bus.stats().await,
            agents: self.runtime.stats(),
            resolution: self.scheduler.stats(),
            dispatch: self.dispatcher.stats(),
        }
    }
}

/// Builder for an [`EngagementCoordinator`].
pub struct CoordinatorBuilder {
    config: CoreConfig,
    scoring: Option<Arc<dyn ScoringBackend>>,
    sink: Option<Arc<dyn ActionSink>>,
    persistence: Option<Arc<dyn StateBackend>>,
    reporter: Option<Arc<dyn FailureReporter>>,
}

impl CoordinatorBuilder {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self::from_config(CoreConfig::new(instance_id))
    }

    pub fn from_config(config: CoreConfig) -> Self {
        Self {
            config,
            scoring: None,
            sink: None,
            persistence: None,
            reporter: None,
        }
    }

    /// Set the personalization scoring backend.
    pub fn with_scoring(mut self, scoring: Arc<dyn ScoringBackend>) -> Self {
        self.scoring = Some(scoring);
        self
    }

    /// Set the outbound action sink.
    pub fn with_sink(mut self, sink: Arc<dyn ActionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Persist user state through a key-value backend.
    pub fn with_persistence(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.persistence = Some(backend);
        self
    }

    /// Set the failure reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Agents to host on start.
    pub fn agents(mut self, kinds: impl IntoIterator<Item = AgentKind>) -> Self {
        self.config.agents.enabled = kinds.into_iter().collect();
        self
    }

    pub fn inactivity_threshold_secs(mut self, secs: u64) -> Self {
        self.config.agents.behavior.inactivity_threshold_secs = secs;
        self
    }

    pub fn disengagement_cooldown_secs(mut self, secs: u64) -> Self {
        self.config.agents.behavior.disengagement_cooldown_secs = secs;
        self
    }

    pub fn resolution_debounce_ms(mut self, ms: u64) -> Self {
        self.config.resolver.debounce_ms = ms;
        self
    }

    pub fn resolution_hard_cap_ms(mut self, ms: u64) -> Self {
        self.config.resolver.hard_cap_ms = ms;
        self
    }

    pub fn agent_tick_interval_ms(mut self, ms: u64) -> Self {
        self.config.agents.tick_interval_ms = ms;
        self
    }

    pub fn dispatch_retry_cap(mut self, attempts: u32) -> Self {
        self.config.dispatch.retry_cap = attempts;
        self
    }

    /// Validate the configuration and assemble the coordinator.
    pub fn build(self) -> Result<EngagementCoordinator> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let bus = Arc::new(SignalBus::with_config(config.bus.clone()));
        let ingress = EventIngress::with_config(config.ingress.clone(), Arc::clone(&bus));
        let store = Arc::new(match self.persistence {
            Some(backend) => UserStateStore::with_backend(backend),
            None => UserStateStore::new(),
        });
        let reporter = self.reporter.unwrap_or_else(|| Arc::new(TracingReporter));
        let sink = self.sink.unwrap_or_else(|| Arc::new(LoggingSink));
        let scoring = self.scoring.unwrap_or_else(|| Arc::new(PassthroughScoring));

        let dispatcher = Arc::new(ActionDispatcher::new(
            config.dispatch.clone(),
            sink,
            Arc::clone(&reporter),
        ));
        let scheduler = ResolutionScheduler::new(
            config.resolution_debounce(),
            config.resolution_hard_cap(),
            Arc::clone(&dispatcher),
            Arc::clone(&reporter),
        );
        let context = AgentContext::new(Arc::clone(&store), scoring, Arc::clone(&reporter), Arc::clone(&config));
        let runtime = AgentRuntime::new(Arc::clone(&bus), context, scheduler.clone(), reporter);

        Ok(EngagementCoordinator {
            pending: Mutex::new(Agent::enabled(&config)),
            config,
            bus,
            ingress,
            store,
            dispatcher,
            scheduler,
            runtime,
            running: RwLock::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylark_types::EventType;

    #[tokio::test]
    async fn test_coordinator_lifecycle() {
        let coordinator = EngagementCoordinator::new("test-core").unwrap();
        assert!(!coordinator.is_running().await);

        let raw = RawEvent::new("u-1", EventType::SessionStart);
        assert!(matches!(coordinator.ingest(raw.clone()).await, Err(CoreError::NotRunning)));

        coordinator.start().await.unwrap();
        assert!(coordinator.is_running().await);
        coordinator.ingest(raw).await.unwrap();

        let stats = coordinator.stats().await;
        assert_eq!(stats.agents.len(), 8);
        assert_eq!(stats.ingress.accepted, 1);

        coordinator.shutdown().await;
        assert!(!coordinator.is_running().await);
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        let result = EngagementCoordinator::builder("bad")
            .resolution_debounce_ms(10_000)
            .resolution_hard_cap_ms(1_000)
            .build();
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[tokio::test]
    async fn test_builder_selects_agents() {
        let coordinator = EngagementCoordinator::builder("subset")
            .agents([AgentKind::HabitFormation, AgentKind::Evolution])
            .build()
            .unwrap();
        coordinator.start().await.unwrap();
        let mut names: Vec<String> = coordinator.stats().await.agents.into_iter().map(|a| a.name).collect();
        names.sort();
        assert_eq!(names, vec!["evolution", "habit_formation"]);
        coordinator.shutdown().await;
    }
}
