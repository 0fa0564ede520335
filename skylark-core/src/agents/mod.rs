//! Engagement agents.
//!
//! Every agent reacts to events, signals and ticks through the
//! [`EngagementAgent`] capability set. The closed [`Agent`] enum holds the
//! eight strategy variants and dispatches to them statically.
//!
//! Agents own their private state exclusively. They read and write shared
//! per-user state only through the [`UserStateStore`] in their context and
//! coordinate with each other only by emitting signals.

pub mod anchoring;
pub mod behavior;
pub mod evolution;
pub mod feedback;
pub mod goals;
pub mod habit;
pub mod motivation;
pub mod social;

pub use anchoring::EmotionalAnchoringAgent;
pub use behavior::BehaviorMonitoringAgent;
pub use evolution::EvolutionAgent;
pub use feedback::FeedbackLoopAgent;
pub use goals::GoalSettingAgent;
pub use habit::HabitFormationAgent;
pub use motivation::MotivationMappingAgent;
pub use social::SocialDynamicsAgent;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skylark_backends::{Component, Failure, FailureReporter, ScoringBackend};
use skylark_types::{
    ActionType, AgentKind, Event, Intervention, Signal, SignalKind, UserId,
};
use std::sync::Arc;
use tracing::warn;

use crate::bus::MessageFilter;
use crate::config::CoreConfig;
use crate::store::UserStateStore;
use crate::types::AgentError;

/// Shared collaborators handed to every agent invocation.
#[derive(Clone)]
pub struct AgentContext {
    pub store: Arc<UserStateStore>,
    pub scoring: Arc<dyn ScoringBackend>,
    pub reporter: Arc<dyn FailureReporter>,
    pub config: Arc<CoreConfig>,
}

impl AgentContext {
    pub fn new(
        store: Arc<UserStateStore>,
        scoring: Arc<dyn ScoringBackend>,
        reporter: Arc<dyn FailureReporter>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            store,
            scoring,
            reporter,
            config,
        }
    }

    /// Report a failure confined to one user. The caller carries on with the others.
    pub fn report_user_failure(&self, agent: AgentKind, user_id: &UserId, error: &AgentError) {
        warn!(agent = %agent, user_id = %user_id, error = %error, "Skipping user after failure");
        self.reporter.report(Failure::new(
            Component::Agent(agent),
            Some(user_id.clone()),
            error.to_string(),
        ));
    }

    /// Expiry for an intervention issued at `now`.
    pub fn ttl(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.config.intervention_ttl()
    }
}

/// What one handler invocation produced.
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub signals: Vec<Signal>,
    pub interventions: Vec<Intervention>,
}

impl AgentOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn signal(&mut self, signal: Signal) {
        self.signals.push(signal);
    }

    pub fn intervention(&mut self, intervention: Intervention) {
        self.interventions.push(intervention);
    }

    pub fn extend(&mut self, other: AgentOutput) {
        self.signals.extend(other.signals);
        self.interventions.extend(other.interventions);
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty() && self.interventions.is_empty()
    }
}

/// Common capability set of every engagement agent.
#[async_trait]
pub trait EngagementAgent: Send + 'static {
    /// Strategy variant.
    fn kind(&self) -> AgentKind;

    /// Mailbox name on the signal bus.
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Events and signals this agent wants delivered.
    fn interest(&self) -> MessageFilter;

    /// React to an ingested event.
    async fn on_event(&mut self, _ctx: &AgentContext, _event: &Event) -> Result<AgentOutput, AgentError> {
        Ok(AgentOutput::none())
    }

    /// React to a signal from another agent.
    async fn on_signal(&mut self, _ctx: &AgentContext, _signal: &Signal) -> Result<AgentOutput, AgentError> {
        Ok(AgentOutput::none())
    }

    /// Time-based work, invoked on the agent's own cadence.
    async fn tick(&mut self, _ctx: &AgentContext, _now: DateTime<Utc>) -> Result<AgentOutput, AgentError> {
        Ok(AgentOutput::none())
    }
}

/// The closed set of engagement strategies.
pub enum Agent {
    MotivationMapping(MotivationMappingAgent),
    GoalSetting(GoalSettingAgent),
    BehaviorMonitoring(BehaviorMonitoringAgent),
    FeedbackLoop(FeedbackLoopAgent),
    SocialDynamics(SocialDynamicsAgent),
    EmotionalAnchoring(EmotionalAnchoringAgent),
    HabitFormation(HabitFormationAgent),
    Evolution(EvolutionAgent),
}

impl Agent {
    /// Build one variant from configuration.
    pub fn new(kind: AgentKind, config: &CoreConfig) -> Self {
        let agents = &config.agents;
        match kind {
            AgentKind::MotivationMapping => {
                Agent::MotivationMapping(MotivationMappingAgent::new(agents.motivation.clone()))
            }
            AgentKind::GoalSetting => Agent::GoalSetting(GoalSettingAgent::new(agents.goals.clone())),
            AgentKind::BehaviorMonitoring => {
                Agent::BehaviorMonitoring(BehaviorMonitoringAgent::new(agents.behavior.clone()))
            }
            AgentKind::FeedbackLoop => Agent::FeedbackLoop(FeedbackLoopAgent::new(agents.feedback.clone())),
            AgentKind::SocialDynamics => {
                Agent::SocialDynamics(SocialDynamicsAgent::new(agents.social.clone()))
            }
            AgentKind::EmotionalAnchoring => {
                Agent::EmotionalAnchoring(EmotionalAnchoringAgent::new(agents.anchoring.clone()))
            }
            AgentKind::HabitFormation => {
                Agent::HabitFormation(HabitFormationAgent::new(agents.habit.clone()))
            }
            AgentKind::Evolution => Agent::Evolution(EvolutionAgent::new(agents.evolution.clone())),
        }
    }

    /// The variants enabled in configuration.
    pub fn enabled(config: &CoreConfig) -> Vec<Agent> {
        let mut kinds = config.agents.enabled.clone();
        kinds.sort();
        kinds.dedup();
        kinds.into_iter().map(|kind| Agent::new(kind, config)).collect()
    }
}

macro_rules! dispatch {
    ($self:ident, $agent:ident => $call:expr) => {
        match $self {
            Agent::MotivationMapping($agent) => $call,
            Agent::GoalSetting($agent) => $call,
            Agent::BehaviorMonitoring($agent) => $call,
            Agent::FeedbackLoop($agent) => $call,
            Agent::SocialDynamics($agent) => $call,
            Agent::EmotionalAnchoring($agent) => $call,
            Agent::HabitFormation($agent) => $call,
            Agent::Evolution($agent) => $call,
        }
    };
}

#[async_trait]
impl EngagementAgent for Agent {
    fn kind(&self) -> AgentKind {
        dispatch!(self, agent => agent.kind())
    }

    fn interest(&self) -> MessageFilter {
        dispatch!(self, agent => agent.interest())
    }

    async fn on_event(&mut self, ctx: &AgentContext, event: &Event) -> Result<AgentOutput, AgentError> {
        dispatch!(self, agent => agent.on_event(ctx, event).await)
    }

    async fn on_signal(&mut self, ctx: &AgentContext, signal: &Signal) -> Result<AgentOutput, AgentError> {
        dispatch!(self, agent => agent.on_signal(ctx, signal).await)
    }

    async fn tick(&mut self, ctx: &AgentContext, now: DateTime<Utc>) -> Result<AgentOutput, AgentError> {
        dispatch!(self, agent => agent.tick(ctx, now).await)
    }
}

/// A `notify` intervention carrying a message template.
pub(crate) fn notify(
    ctx: &AgentContext,
    source: AgentKind,
    user_id: UserId,
    priority: u8,
    template: &str,
    now: DateTime<Utc>,
) -> Intervention {
    Intervention::new(source, user_id, ActionType::Notify, priority, ctx.ttl(now))
        .with_payload("template", template)
}

/// Whether a signal is a per-user signal of `kind`.
pub(crate) fn is_user_signal(signal: &Signal, kind: SignalKind) -> bool {
    signal.kind == kind && signal.user_id.is_some()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use skylark_backends::{
        CasOutcome, MemoryStateBackend, PassthroughScoring, PersistenceError, RecordingReporter, StateBackend,
    };
    use std::collections::HashSet;
    use std::sync::Mutex;

    pub fn context() -> AgentContext {
        context_with(CoreConfig::default())
    }

    pub fn context_with(config: CoreConfig) -> AgentContext {
        context_over(UserStateStore::new(), config)
    }

    /// Context over a given store, reporting into a [`RecordingReporter`].
    pub fn context_over(store: UserStateStore, config: CoreConfig) -> AgentContext {
        AgentContext::new(
            Arc::new(store),
            Arc::new(PassthroughScoring),
            Arc::new(RecordingReporter::new()),
            Arc::new(config),
        )
    }

    pub fn event(user: &str, event_type: skylark_types::EventType, payload: serde_json::Value) -> Event {
        event_at(user, event_type, payload, Utc::now())
    }

    pub fn event_at(
        user: &str,
        event_type: skylark_types::EventType,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Event {
        Event {
            id: skylark_types::EventId::new(),
            sequence: 0,
            dedup_key: skylark_types::EventId::new().to_string(),
            user_id: UserId::from(user),
            event_type,
            timestamp,
            payload: payload.as_object().cloned().unwrap_or_default(),
        }
    }

    pub fn user_signal(source: AgentKind, user: &str, kind: SignalKind, strength: f64) -> Signal {
        Signal::new(source, UserId::from(user), kind, strength, Utc::now())
    }

    /// In-memory persistence that refuses writes for selected keys.
    #[derive(Default)]
    pub struct FailingKeysBackend {
        inner: MemoryStateBackend,
        failing: Mutex<HashSet<String>>,
    }

    impl FailingKeysBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_key(&self, key: &str) {
            self.failing.lock().unwrap().insert(key.to_string());
        }

        pub fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn check(&self, key: &str) -> Result<(), PersistenceError> {
            if self.failing.lock().unwrap().contains(key) {
                return Err(PersistenceError::Unavailable(format!("{} refused", key)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StateBackend for FailingKeysBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), PersistenceError> {
            self.check(key)?;
            self.inner.put(key, value).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<&[u8]>,
            new: Vec<u8>,
        ) -> Result<CasOutcome, PersistenceError> {
            self.check(key)?;
            self.inner.compare_and_swap(key, expected, new).await
        }
    }
}
