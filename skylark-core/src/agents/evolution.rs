//! Evolution - watches community-wide signal frequency and retunes strategy.
//!
//! The agent never addresses users. When one kind of signal becomes too
//! frequent it broadcasts a community-wide `strategy_adjustment` whose
//! `subject` names that kind, and the agents that produce or consume it
//! adapt their own thresholds.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use skylark_types::{AgentKind, Signal, SignalKind};
use std::collections::{HashMap, VecDeque};
use tracing::info;

use super::{AgentContext, AgentOutput, EngagementAgent};
use crate::bus::MessageFilter;
use crate::config::EvolutionConfig;
use crate::types::AgentError;

const KIND: AgentKind = AgentKind::Evolution;

pub struct EvolutionAgent {
    config: EvolutionConfig,
    observed: VecDeque<(DateTime<Utc>, SignalKind)>,
    adjusted: HashMap<SignalKind, DateTime<Utc>>,
}

impl EvolutionAgent {
    pub fn new(config: EvolutionConfig) -> Self {
        Self {
            config,
            observed: VecDeque::new(),
            adjusted: HashMap::new(),
        }
    }

    /// Signals of `kind` currently inside the window.
    pub fn frequency(&self, kind: SignalKind) -> usize {
        self.observed.iter().filter(|(_, k)| *k == kind).count()
    }

    fn window(&self) -> Duration {
        Duration::seconds(self.config.window_secs as i64)
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - self.window();
        while self.observed.front().is_some_and(|(at, _)| *at <= horizon) {
            self.observed.pop_front();
        }
        self.adjusted.retain(|_, at| *at > horizon);
    }
}

#[async_trait]
impl EngagementAgent for EvolutionAgent {
    fn kind(&self) -> AgentKind {
        KIND
    }

    fn interest(&self) -> MessageFilter {
        MessageFilter::all_signals()
    }

    async fn on_signal(&mut self, _ctx: &AgentContext, signal: &Signal) -> Result<AgentOutput, AgentError> {
        if signal.kind == SignalKind::StrategyAdjustment {
            return Ok(AgentOutput::none());
        }

        // Signals may arrive slightly out of order across publishers.
        let position = self.observed.partition_point(|(at, _)| *at <= signal.timestamp);
        self.observed.insert(position, (signal.timestamp, signal.kind));
        let now = self
            .observed
            .back()
            .map(|(at, _)| *at)
            .unwrap_or(signal.timestamp);
        self.prune(now);

        let threshold = self.config.threshold_for(signal.kind).max(1);
        let count = self.frequency(signal.kind);
        if count < threshold as usize || self.adjusted.contains_key(&signal.kind) {
            return Ok(AgentOutput::none());
        }

        self.adjusted.insert(signal.kind, now);
        let strength = (count as f64 / (2.0 * threshold as f64)).min(1.0);
        info!(subject = %signal.kind, count, threshold, strength, "Strategy adjustment");

        let mut output = AgentOutput::none();
        output.signal(
            Signal::community(KIND, SignalKind::StrategyAdjustment, strength, now)
                .with_subject(signal.kind)
                .with_detail(serde_json::json!({
                    "count": count,
                    "threshold": threshold,
                    "window_secs": self.config.window_secs,
                })),
        );
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
    use std::collections::BTreeMap;
    use skylark_types::UserId;

    fn config(threshold: u32) -> EvolutionConfig {
        EvolutionConfig {
            window_secs: 3600,
            default_threshold: 50,
            thresholds: BTreeMap::from([(SignalKind::StreakBroken, threshold)]),
        }
    }

    fn streak_broken(at: DateTime<Utc>) -> Signal {
        Signal::new(AgentKind::HabitFormation, UserId::from("u-1"), SignalKind::StreakBroken, 0.2, at)
    }

    #[tokio::test]
    async fn test_adjustment_when_threshold_reached() {
        let ctx = testing::context();
        let mut agent = EvolutionAgent::new(config(3));
        let now = Utc::now();

        assert!(agent.on_signal(&ctx, &streak_broken(now)).await.unwrap().is_empty());
        assert!(agent.on_signal(&ctx, &streak_broken(now)).await.unwrap().is_empty());
        let output = agent.on_signal(&ctx, &streak_broken(now)).await.unwrap();

        assert_eq!(output.signals.len(), 1);
        let adjustment = &output.signals[0];
        assert_eq!(adjustment.kind, SignalKind::StrategyAdjustment);
        assert_eq!(adjustment.subject, Some(SignalKind::StreakBroken));
        assert!(adjustment.is_community_wide());
        assert!((adjustment.strength - 0.5).abs() < 1e-9);

        // One adjustment per kind per window.
        assert!(agent.on_signal(&ctx, &streak_broken(now)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_window_expires_old_signals() {
        let ctx = testing::context();
        let mut agent = EvolutionAgent::new(config(3));
        let now = Utc::now();

        agent.on_signal(&ctx, &streak_broken(now)).await.unwrap();
        agent.on_signal(&ctx, &streak_broken(now)).await.unwrap();
        agent.tick(&ctx, now + Duration::hours(2)).await.unwrap();
        assert_eq!(agent.frequency(SignalKind::StreakBroken), 0);

        let later = now + Duration::hours(2);
        assert!(agent.on_signal(&ctx, &streak_broken(later)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_own_adjustments_not_counted() {
        let ctx = testing::context();
        let mut agent = EvolutionAgent::new(EvolutionConfig {
            default_threshold: 1,
            ..EvolutionConfig::default()
        });
        let adjustment = Signal::community(KIND, SignalKind::StrategyAdjustment, 1.0, Utc::now())
            .with_subject(SignalKind::CohortMatch);
        assert!(agent.on_signal(&ctx, &adjustment).await.unwrap().is_empty());
        assert_eq!(agent.frequency(SignalKind::StrategyAdjustment), 0);
    }
}
