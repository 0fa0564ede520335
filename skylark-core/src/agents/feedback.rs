//! Feedback loop - turns observations into timely user notifications.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use skylark_types::{AgentKind, Event, EventType, Signal, SignalKind, UserId};
use std::collections::HashMap;
use tracing::{debug, info};

use super::{notify, AgentContext, AgentOutput, EngagementAgent};
use crate::bus::MessageFilter;
use crate::config::FeedbackConfig;
use crate::types::AgentError;

const KIND: AgentKind = AgentKind::FeedbackLoop;
const MAX_INTERVAL_MULTIPLIER: f64 = 8.0;
const RECOGNITION_TEMPLATE: &str = "peer_recognition";
const RECOGNITION_PRIORITY: u8 = 5;

/// Notification template and priority for each signal kind it reacts to.
fn template_for(kind: SignalKind) -> Option<(&'static str, u8)> {
    match kind {
        SignalKind::DisengagementRisk => Some(("we_miss_you", 5)),
        SignalKind::GoalCompleted => Some(("goal_celebration", 6)),
        SignalKind::MilestoneReached => Some(("milestone_celebration", 6)),
        SignalKind::StreakBroken => Some(("streak_recovery", 4)),
        SignalKind::CohortMatch => Some(("new_connection", 3)),
        SignalKind::MotivatorShift | SignalKind::StrategyAdjustment => None,
    }
}

fn interval_for(config: &FeedbackConfig, multipliers: &HashMap<SignalKind, f64>, kind: Option<SignalKind>) -> Duration {
    let multiplier = kind.and_then(|k| multipliers.get(&k).copied()).unwrap_or(1.0);
    let secs = config.min_interval_secs as f64 * multiplier;
    Duration::milliseconds((secs * 1000.0) as i64)
}

pub struct FeedbackLoopAgent {
    config: FeedbackConfig,
    last_sent: HashMap<(UserId, &'static str), (DateTime<Utc>, Option<SignalKind>)>,
    multipliers: HashMap<SignalKind, f64>,
}

impl FeedbackLoopAgent {
    pub fn new(config: FeedbackConfig) -> Self {
        Self {
            config,
            last_sent: HashMap::new(),
            multipliers: HashMap::new(),
        }
    }

    fn interval(&self, kind: Option<SignalKind>) -> Duration {
        interval_for(&self.config, &self.multipliers, kind)
    }

    /// Record a send unless the same template reached this user too recently.
    fn admit(&mut self, user_id: &UserId, template: &'static str, kind: Option<SignalKind>, now: DateTime<Utc>) -> bool {
        let interval = self.interval(kind);
        let key = (user_id.clone(), template);
        if let Some((last, _)) = self.last_sent.get(&key) {
            if now - *last < interval {
                debug!(user_id = %user_id, template, "Notification suppressed");
                return false;
            }
        }
        self.last_sent.insert(key, (now, kind));
        true
    }

    /// Forget sends whose suppression interval has lapsed.
    fn prune(&mut self, now: DateTime<Utc>) {
        let (config, multipliers) = (&self.config, &self.multipliers);
        self.last_sent
            .retain(|_, (sent, kind)| now - *sent < interval_for(config, multipliers, *kind));
    }
}

#[async_trait]
impl EngagementAgent for FeedbackLoopAgent {
    fn kind(&self) -> AgentKind {
        KIND
    }

    fn interest(&self) -> MessageFilter {
        MessageFilter::events([EventType::PeerRecognition]).with_signals([
            SignalKind::DisengagementRisk,
            SignalKind::GoalCompleted,
            SignalKind::MilestoneReached,
            SignalKind::StreakBroken,
            SignalKind::CohortMatch,
            SignalKind::StrategyAdjustment,
        ])
    }

    async fn on_event(&mut self, ctx: &AgentContext, event: &Event) -> Result<AgentOutput, AgentError> {
        if event.event_type != EventType::PeerRecognition {
            return Ok(AgentOutput::none());
        }
        let recipient = event
            .payload_str("recipient")
            .map(UserId::from)
            .unwrap_or_else(|| event.user_id.clone());
        if recipient.is_empty() {
            return Err(AgentError::InvalidPayload("peer_recognition without recipient".into()));
        }

        let now = Utc::now();
        let mut output = AgentOutput::none();
        if self.admit(&recipient, RECOGNITION_TEMPLATE, None, now) {
            output.intervention(
                notify(ctx, KIND, recipient, RECOGNITION_PRIORITY, RECOGNITION_TEMPLATE, now)
                    .with_payload("from", event.user_id.as_str()),
            );
        }
        Ok(output)
    }

    async fn on_signal(&mut self, ctx: &AgentContext, signal: &Signal) -> Result<AgentOutput, AgentError> {
        if signal.kind == SignalKind::StrategyAdjustment {
            if let Some(subject) = signal.subject.filter(|s| template_for(*s).is_some()) {
                let multiplier = self.multipliers.entry(subject).or_insert(1.0);
                *multiplier = (*multiplier * 2.0).min(MAX_INTERVAL_MULTIPLIER);
                info!(subject = %subject, multiplier = *multiplier, "Notification interval widened");
            }
            return Ok(AgentOutput::none());
        }

        let (Some(user_id), Some((template, priority))) = (signal.user_id.as_ref(), template_for(signal.kind)) else {
            return Ok(AgentOutput::none());
        };

        let now = Utc::now();
        let mut output = AgentOutput::none();
        if self.admit(user_id, template, Some(signal.kind), now) {
            output.intervention(
                notify(ctx, KIND, user_id.clone(), priority, template, now)
                    .with_payload("signal", signal.kind.as_str())
                    .with_payload("strength", signal.strength),
            );
        }
        Ok(output)
    }

    async fn tick(&mut self, _ctx: &AgentContext, now: DateTime<Utc>) -> Result<AgentOutput, AgentError> {
        self.prune(now);
        Ok(AgentOutput::none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing;
    use skylark_types::ActionType;

    #[tokio::test]
    async fn test_disengagement_becomes_priority_five_notify() {
        let ctx = testing::context();
        let mut agent = FeedbackLoopAgent::new(FeedbackConfig::default());
        let signal = testing::user_signal(AgentKind::BehaviorMonitoring, "u-1", SignalKind::DisengagementRisk, 1.0);

        let output = agent.on_signal(&ctx, &signal).await.unwrap();

        assert_eq!(output.interventions.len(), 1);
        let notify = &output.interventions[0];
        assert_eq!(notify.action_type, ActionType::Notify);
        assert_eq!(notify.priority, 5);
        assert_eq!(notify.payload["template"], "we_miss_you");
        assert_eq!(notify.user_id, UserId::from("u-1"));
    }

    #[tokio::test]
    async fn test_repeat_notifications_suppressed() {
        let ctx = testing::context();
        let mut agent = FeedbackLoopAgent::new(FeedbackConfig::default());
        let signal = testing::user_signal(AgentKind::HabitFormation, "u-1", SignalKind::StreakBroken, 0.5);

        assert_eq!(agent.on_signal(&ctx, &signal).await.unwrap().interventions.len(), 1);
        assert!(agent.on_signal(&ctx, &signal).await.unwrap().is_empty());

        let other_user = testing::user_signal(AgentKind::HabitFormation, "u-2", SignalKind::StreakBroken, 0.5);
        assert_eq!(agent.on_signal(&ctx, &other_user).await.unwrap().interventions.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_never_suppresses() {
        let ctx = testing::context();
        let mut agent = FeedbackLoopAgent::new(FeedbackConfig { min_interval_secs: 0 });
        let signal = testing::user_signal(AgentKind::GoalSetting, "u-1", SignalKind::GoalCompleted, 0.4);

        for _ in 0..3 {
            let output = agent.on_signal(&ctx, &signal).await.unwrap();
            assert_eq!(output.interventions[0].priority, 6);
        }
    }

    #[tokio::test]
    async fn test_peer_recognition_notifies_recipient() {
        let ctx = testing::context();
        let mut agent = FeedbackLoopAgent::new(FeedbackConfig::default());
        let event = testing::event("u-1", EventType::PeerRecognition, serde_json::json!({"recipient": "u-2"}));

        let output = agent.on_event(&ctx, &event).await.unwrap();
        assert_eq!(output.interventions[0].user_id, UserId::from("u-2"));
        assert_eq!(output.interventions[0].payload["from"], "u-1");
    }

    #[tokio::test]
    async fn test_strategy_adjustment_widens_interval() {
        let ctx = testing::context();
        let mut agent = FeedbackLoopAgent::new(FeedbackConfig { min_interval_secs: 10 });
        let adjustment = Signal::community(AgentKind::Evolution, SignalKind::StrategyAdjustment, 0.5, Utc::now())
            .with_subject(SignalKind::CohortMatch);

        for _ in 0..5 {
            agent.on_signal(&ctx, &adjustment).await.unwrap();
        }
        assert_eq!(agent.interval(Some(SignalKind::CohortMatch)), Duration::seconds(80));
        assert_eq!(agent.interval(Some(SignalKind::StreakBroken)), Duration::seconds(10));
    }

    #[tokio::test]
    async fn test_tick_forgets_lapsed_sends() {
        let ctx = testing::context();
        let mut agent = FeedbackLoopAgent::new(FeedbackConfig { min_interval_secs: 60 });
        let adjustment = Signal::community(AgentKind::Evolution, SignalKind::StrategyAdjustment, 0.5, Utc::now())
            .with_subject(SignalKind::CohortMatch);
        agent.on_signal(&ctx, &adjustment).await.unwrap();

        let now = Utc::now();
        for (user, kind) in [("u-1", SignalKind::StreakBroken), ("u-2", SignalKind::CohortMatch)] {
            let signal = testing::user_signal(AgentKind::HabitFormation, user, kind, 0.5);
            agent.on_signal(&ctx, &signal).await.unwrap();
        }
        assert_eq!(agent.last_sent.len(), 2);

        agent.tick(&ctx, now + Duration::seconds(30)).await.unwrap();
        assert_eq!(agent.last_sent.len(), 2);

        // The widened cohort interval outlives the plain one.
        agent.tick(&ctx, now + Duration::seconds(90)).await.unwrap();
        assert_eq!(agent.last_sent.len(), 1);
        assert!(agent.last_sent.contains_key(&(UserId::from("u-2"), "new_connection")));

        agent.tick(&ctx, now + Duration::seconds(150)).await.unwrap();
        assert!(agent.last_sent.is_empty());
    }

    #[tokio::test]
    async fn test_community_signals_ignored() {
        let ctx = testing::context();
        let mut agent = FeedbackLoopAgent::new(FeedbackConfig::default());
        let signal = Signal::community(AgentKind::Evolution, SignalKind::CohortMatch, 0.5, Utc::now());
        assert!(agent.on_signal(&ctx, &signal).await.unwrap().is_empty());
    }
}
