//! Motivation mapping - infers what drives each user.

use async_trait::async_trait;
use chrono::Utc;
use skylark_backends::{ScoringContext, ScoringPurpose};
use skylark_types::{
    ActionType, AgentKind, Event, EventType, Intervention, Motivator, Signal, SignalKind, UserId,
};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use super::{AgentContext, AgentOutput, EngagementAgent};
use crate::bus::MessageFilter;
use crate::config::MotivationConfig;
use crate::types::AgentError;

/// Payload counters and their contribution to each motivator.
const WEIGHTS: &[(&str, Motivator, f64)] = &[
    ("completed_tasks", Motivator::Achievement, 0.5),
    ("badges_earned", Motivator::Achievement, 0.3),
    ("interactions", Motivator::Social, 0.4),
    ("collaborations", Motivator::Social, 0.6),
    ("skill_progress", Motivator::Mastery, 0.7),
    ("learning_events", Motivator::Mastery, 0.3),
    ("goals_progress", Motivator::Progress, 0.6),
    ("milestones_reached", Motivator::Progress, 0.4),
];

/// Score given to a motivator a user names in a survey.
const SURVEY_WEIGHT: f64 = 1.0;

const RECOMMEND_PRIORITY: u8 = 4;

pub struct MotivationMappingAgent {
    config: MotivationConfig,
    scores: HashMap<UserId, HashMap<Motivator, f64>>,
}

impl MotivationMappingAgent {
    pub fn new(config: MotivationConfig) -> Self {
        Self {
            config,
            scores: HashMap::new(),
        }
    }

    /// Normalized score shares of a user, if any activity was scored.
    pub fn shares(&self, user_id: &UserId) -> Option<HashMap<Motivator, f64>> {
        let scores = self.scores.get(user_id)?;
        let total: f64 = scores.values().sum();
        if total <= 0.0 {
            return None;
        }
        Some(scores.iter().map(|(m, s)| (*m, s / total)).collect())
    }

    fn deltas(event: &Event) -> HashMap<Motivator, f64> {
        let mut deltas = HashMap::new();
        for (key, motivator, weight) in WEIGHTS {
            if let Some(value) = event.payload_f64(key).filter(|v| *v > 0.0) {
                *deltas.entry(*motivator).or_insert(0.0) += value * weight;
            }
        }
        if event.event_type == EventType::SurveyResponse {
            let named = event
                .payload
                .get("motivators")
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten()
                .filter_map(|v| v.as_str())
                .filter_map(Motivator::parse);
            for motivator in named {
                *deltas.entry(motivator).or_insert(0.0) += SURVEY_WEIGHT;
            }
        }
        deltas
    }
}

#[async_trait]
impl EngagementAgent for MotivationMappingAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::MotivationMapping
    }

    fn interest(&self) -> MessageFilter {
        MessageFilter::events([EventType::Interaction, EventType::SurveyResponse, EventType::Milestone])
    }

    async fn on_event(&mut self, ctx: &AgentContext, event: &Event) -> Result<AgentOutput, AgentError> {
        let deltas = Self::deltas(event);
        if deltas.is_empty() {
            return Ok(AgentOutput::none());
        }

        let scores = self.scores.entry(event.user_id.clone()).or_default();
        for (motivator, delta) in deltas {
            *scores.entry(motivator).or_insert(0.0) += delta;
        }

        let Some(shares) = self.shares(&event.user_id) else {
            return Ok(AgentOutput::none());
        };
        let tags: BTreeSet<Motivator> = shares
            .iter()
            .filter(|(_, share)| **share >= self.config.tag_threshold)
            .map(|(m, _)| *m)
            .collect();
        let top_share = shares.values().cloned().fold(0.0, f64::max);

        let changed = ctx
            .store
            .update(&event.user_id, |state| {
                if state.motivators == tags {
                    false
                } else {
                    state.motivators = tags.clone();
                    true
                }
            })
            .await?;
        if !changed {
            return Ok(AgentOutput::none());
        }

        let now = Utc::now();
        let names: Vec<&str> = tags.iter().map(|m| m.as_str()).collect();
        debug!(user_id = %event.user_id, motivators = ?names, "Motivator tags changed");

        let mut output = AgentOutput::none();
        output.signal(
            Signal::new(self.kind(), event.user_id.clone(), SignalKind::MotivatorShift, top_share, now)
                .with_detail(serde_json::json!({ "motivators": names })),
        );

        let context = ScoringContext::new(ScoringPurpose::Content)
            .with_motivators(tags.iter().copied())
            .with_candidates(self.config.content_catalog.iter().cloned())
            .with_limit(self.config.recommendation_limit);
        match ctx.scoring.score(&event.user_id, &context).await {
            Ok(ranked) if !ranked.is_empty() => {
                let ids: Vec<String> = ranked.into_iter().map(|c| c.id).collect();
                output.intervention(
                    Intervention::new(
                        self.kind(),
                        event.user_id.clone(),
                        ActionType::RecommendContent,
                        RECOMMEND_PRIORITY,
                        ctx.ttl(now),
                    )
                    .with_payload("content_ids", ids)
                    .with_payload("motivators", names),
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(user_id = %event.user_id, error = %e, "Scoring failed, no recommendation");
            }
        }

        Ok(output)
    }
}
