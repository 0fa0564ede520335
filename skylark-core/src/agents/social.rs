//! Social dynamics - builds the interaction graph and forms cohorts.

use async_trait::async_trait;
use chrono::Utc;
use skylark_types::{ActionType, AgentKind, Event, EventType, Intervention, Signal, SignalKind, UserId};
use std::collections::HashMap;
use tracing::info;

use super::{AgentContext, AgentOutput, EngagementAgent};
use crate::bus::MessageFilter;
use crate::config::SocialConfig;
use crate::types::AgentError;

const KIND: AgentKind = AgentKind::SocialDynamics;
const MATCH_PRIORITY: u8 = 4;

fn interaction_weight(interaction_type: &str) -> f64 {
    match interaction_type {
        "direct_message" => 1.0,
        "comment" => 0.5,
        "like" => 0.1,
        "share" => 0.3,
        "collaboration" => 1.5,
        "recognition" => 1.0,
        _ => 0.1,
    }
}

#[derive(Debug, Default, Clone)]
struct Edge {
    strength: f64,
    count: u32,
    matched: bool,
}

pub struct SocialDynamicsAgent {
    config: SocialConfig,
    edges: HashMap<(UserId, UserId), Edge>,
}

impl SocialDynamicsAgent {
    pub fn new(config: SocialConfig) -> Self {
        Self {
            config,
            edges: HashMap::new(),
        }
    }

    /// Accumulated strength between two users.
    pub fn connection_strength(&self, a: &UserId, b: &UserId) -> f64 {
        self.edges.get(&pair(a, b)).map(|e| e.strength).unwrap_or(0.0)
    }
}

fn pair(a: &UserId, b: &UserId) -> (UserId, UserId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

#[async_trait]
impl EngagementAgent for SocialDynamicsAgent {
    fn kind(&self) -> AgentKind {
        KIND
    }

    fn interest(&self) -> MessageFilter {
        MessageFilter::events([EventType::Interaction, EventType::PeerRecognition])
    }

    async fn on_event(&mut self, ctx: &AgentContext, event: &Event) -> Result<AgentOutput, AgentError> {
        let (target, interaction_type) = match event.event_type {
            EventType::PeerRecognition => (event.payload_str("recipient"), "recognition"),
            _ => (
                event.payload_str("target_user"),
                event.payload_str("interaction_type").unwrap_or("other"),
            ),
        };
        let Some(target) = target.map(UserId::from).filter(|t| !t.is_empty()) else {
            return Ok(AgentOutput::none());
        };
        if target == event.user_id {
            return Ok(AgentOutput::none());
        }

        let key = pair(&event.user_id, &target);
        let edge = self.edges.entry(key.clone()).or_default();
        edge.strength += interaction_weight(interaction_type);
        edge.count += 1;

        let forms_cohort = !edge.matched
            && edge.strength > self.config.cohort_strength_threshold
            && edge.count > self.config.cohort_min_interactions;
        if !forms_cohort {
            return Ok(AgentOutput::none());
        }
        let strength = (edge.strength / (2.0 * self.config.cohort_strength_threshold)).min(1.0);

        let (a, b) = key;
        let cohort_id = format!("circle:{}:{}", a, b);
        // Membership is a set insert, so a retry after a partial write is harmless.
        for user in [&a, &b] {
            ctx.store
                .update(user, |state| {
                    state.cohort_ids.insert(cohort_id.clone());
                })
                .await?;
        }
        edge.matched = true;
        info!(cohort_id = %cohort_id, "Cohort formed");

        let now = Utc::now();
        let mut output = AgentOutput::none();
        for (user, peer) in [(&a, &b), (&b, &a)] {
            output.signal(
                Signal::new(KIND, user.clone(), SignalKind::CohortMatch, strength, now)
                    .with_detail(serde_json::json!({ "cohort_id": cohort_id, "peer": peer.as_str() })),
            );
            output.intervention(
                Intervention::new(KIND, user.clone(), ActionType::SuggestSocialMatch, MATCH_PRIORITY, ctx.ttl(now))
                    .with_payload("peer", peer.as_str())
                    .with_payload("cohort_id", &cohort_id),
            );
        }
        Ok(output)
    }
}
