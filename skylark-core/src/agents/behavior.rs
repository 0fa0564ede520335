//! Behavior monitoring - tracks activity and detects disengagement.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use skylark_types::{AgentKind, Event, EventType, Signal, SignalKind, UserId};
use std::collections::HashMap;
use tracing::{debug, info};

use super::{AgentContext, AgentOutput, EngagementAgent};
use crate::bus::MessageFilter;
use crate::config::BehaviorConfig;
use crate::types::AgentError;

const KIND: AgentKind = AgentKind::BehaviorMonitoring;
const MAX_COOLDOWN_STRETCH: f64 = 4.0;

fn activity_weight(event: &Event) -> f64 {
    match event.payload_str("activity") {
        Some("content_creation") => 1.0,
        Some("reaction") => 0.3,
        _ => 0.7,
    }
}

pub struct BehaviorMonitoringAgent {
    config: BehaviorConfig,
    last_signal: HashMap<UserId, DateTime<Utc>>,
    engagement: HashMap<UserId, f64>,
    cooldown_stretch: f64,
}

impl BehaviorMonitoringAgent {
    pub fn new(config: BehaviorConfig) -> Self {
        Self {
            config,
            last_signal: HashMap::new(),
            engagement: HashMap::new(),
            cooldown_stretch: 1.0,
        }
    }

    /// Smoothed engagement score of a user.
    pub fn engagement_score(&self, user_id: &UserId) -> Option<f64> {
        self.engagement.get(user_id).copied()
    }

    fn threshold(&self) -> Duration {
        Duration::seconds(self.config.inactivity_threshold_secs as i64)
    }

    fn cooldown(&self) -> Duration {
        let secs = self.config.disengagement_cooldown_secs as f64 * self.cooldown_stretch;
        Duration::milliseconds((secs * 1000.0) as i64)
    }
}

#[async_trait]
impl EngagementAgent for BehaviorMonitoringAgent {
    fn kind(&self) -> AgentKind {
        KIND
    }

    fn interest(&self) -> MessageFilter {
        MessageFilter::all_events().with_signals([SignalKind::StrategyAdjustment])
    }

    async fn on_event(&mut self, ctx: &AgentContext, event: &Event) -> Result<AgentOutput, AgentError> {
        let at = event.timestamp;
        ctx.store.update(&event.user_id, |state| state.touch(at)).await?;

        if event.event_type == EventType::Interaction {
            let alpha = self.config.engagement_smoothing.clamp(0.0, 1.0);
            let weight = activity_weight(event);
            let score = self.engagement.entry(event.user_id.clone()).or_insert(weight);
            *score = alpha * weight + (1.0 - alpha) * *score;
        }
        Ok(AgentOutput::none())
    }

    async fn on_signal(&mut self, _ctx: &AgentContext, signal: &Signal) -> Result<AgentOutput, AgentError> {
        if signal.kind == SignalKind::StrategyAdjustment && signal.subject == Some(SignalKind::DisengagementRisk) {
            self.cooldown_stretch = (self.cooldown_stretch * (1.0 + signal.strength)).min(MAX_COOLDOWN_STRETCH);
            info!(stretch = self.cooldown_stretch, "Disengagement cooldown stretched");
        }
        Ok(AgentOutput::none())
    }

    async fn tick(&mut self, ctx: &AgentContext, now: DateTime<Utc>) -> Result<AgentOutput, AgentError> {
        let threshold = self.threshold();
        let cooldown = self.cooldown();
        let mut output = AgentOutput::none();
        self.last_signal.retain(|_, last| now - *last < cooldown);

        for state in ctx.store.snapshots().await {
            let Some(idle) = state.idle_for(now) else { continue };
            if idle <= threshold {
                continue;
            }
            if let Some(last) = self.last_signal.get(&state.user_id) {
                if now - *last < cooldown {
                    continue;
                }
            }

            let ratio = idle.num_milliseconds() as f64 / threshold.num_milliseconds().max(1) as f64;
            let strength = ratio.min(1.0);
            debug!(user_id = %state.user_id, idle_secs = idle.num_seconds(), strength, "Disengagement risk");
            output.signal(
                Signal::new(KIND, state.user_id.clone(), SignalKind::DisengagementRisk, strength, now)
                    .with_detail(serde_json::json!({
                        "idle_secs": idle.num_seconds(),
                        "engagement": self.engagement.get(&state.user_id),
                    })),
            );
            self.last_signal.insert(state.user_id, now);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing;
    use crate::config::CoreConfig;

    fn config(threshold_secs: u64, cooldown_secs: u64) -> BehaviorConfig {
        BehaviorConfig {
            inactivity_threshold_secs: threshold_secs,
            disengagement_cooldown_secs: cooldown_secs,
            ..BehaviorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_idle_user_is_flagged_with_capped_strength() {
        let ctx = testing::context();
        let mut agent = BehaviorMonitoringAgent::new(config(3600, 0));
        let now = Utc::now();
        let event = testing::event_at("u-1", EventType::Interaction, serde_json::json!({}), now - Duration::hours(2));
        agent.on_event(&ctx, &event).await.unwrap();

        let output = agent.tick(&ctx, now).await.unwrap();
        assert_eq!(output.signals.len(), 1);
        assert_eq!(output.signals[0].kind, SignalKind::DisengagementRisk);
        assert_eq!(output.signals[0].strength, 1.0);

        // Zero cooldown: flagged again on the next sweep.
        assert_eq!(agent.tick(&ctx, now).await.unwrap().signals.len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_repeats() {
        let ctx = testing::context();
        let mut agent = BehaviorMonitoringAgent::new(config(3600, 86_400));
        let now = Utc::now();
        let last = now - Duration::minutes(90);
        ctx.store.update(&UserId::from("u-1"), |s| s.touch(last)).await.unwrap();

        assert_eq!(agent.tick(&ctx, now).await.unwrap().signals.len(), 1);
        assert!(agent.tick(&ctx, now + Duration::hours(3)).await.unwrap().is_empty());
        assert_eq!(
            agent.tick(&ctx, now + Duration::hours(25)).await.unwrap().signals.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_tick_forgets_signals_past_cooldown() {
        let ctx = testing::context();
        let mut agent = BehaviorMonitoringAgent::new(config(3600, 86_400));
        let now = Utc::now();
        let user = UserId::from("u-1");
        ctx.store.update(&user, |s| s.touch(now - Duration::hours(2))).await.unwrap();

        assert_eq!(agent.tick(&ctx, now).await.unwrap().signals.len(), 1);
        assert!(agent.last_signal.contains_key(&user));

        ctx.store.update(&user, |s| s.touch(now + Duration::hours(24))).await.unwrap();
        assert!(agent.tick(&ctx, now + Duration::hours(12)).await.unwrap().is_empty());
        assert!(agent.last_signal.contains_key(&user));

        assert!(agent.tick(&ctx, now + Duration::hours(25)).await.unwrap().is_empty());
        assert!(agent.last_signal.is_empty());
    }

    #[tokio::test]
    async fn test_idle_exactly_at_threshold_is_not_flagged() {
        let ctx = testing::context();
        let mut agent = BehaviorMonitoringAgent::new(config(3600, 0));
        let now = Utc::now();
        ctx.store
            .update(&UserId::from("u-1"), |s| s.touch(now - Duration::hours(1)))
            .await
            .unwrap();

        assert!(agent.tick(&ctx, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_user_not_flagged() {
        let ctx = testing::context_with(CoreConfig::default());
        let mut agent = BehaviorMonitoringAgent::new(config(3600, 0));
        let event = testing::event("u-1", EventType::SessionStart, serde_json::json!({}));
        agent.on_event(&ctx, &event).await.unwrap();
        assert!(agent.tick(&ctx, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_active_never_moves_back() {
        let ctx = testing::context();
        let mut agent = BehaviorMonitoringAgent::new(BehaviorConfig::default());
        let now = Utc::now();
        for offset in [0, 5, 2] {
            let event = testing::event_at(
                "u-1",
                EventType::Interaction,
                serde_json::json!({"activity": "reaction"}),
                now - Duration::minutes(offset),
            );
            agent.on_event(&ctx, &event).await.unwrap();
        }
        let state = ctx.store.snapshot(&UserId::from("u-1")).await.unwrap().unwrap();
        assert_eq!(state.last_active, Some(now));
        assert!((agent.engagement_score(&UserId::from("u-1")).unwrap() - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_strategy_adjustment_stretches_cooldown() {
        let ctx = testing::context();
        let mut agent = BehaviorMonitoringAgent::new(config(60, 100));
        let adjustment = Signal::community(AgentKind::Evolution, SignalKind::StrategyAdjustment, 1.0, Utc::now())
            .with_subject(SignalKind::DisengagementRisk);
        for _ in 0..3 {
            agent.on_signal(&ctx, &adjustment).await.unwrap();
        }
        assert_eq!(agent.cooldown(), Duration::seconds(400));
    }
}
