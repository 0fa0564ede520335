//! Interventions proposed by agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Payload;
use crate::ids::{InterventionId, UserId};
use crate::signal::AgentKind;

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Highest valid intervention priority.
pub const MAX_PRIORITY: u8 = 9;

/// Kind of user-directed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Notify,
    RecommendContent,
    AwardBadge,
    SuggestSocialMatch,
    AdjustDifficulty,
}

impl ActionType {
    /// Every action type.
    pub const ALL: [ActionType; 5] = [
        ActionType::Notify,
        ActionType::RecommendContent,
        ActionType::AwardBadge,
        ActionType::SuggestSocialMatch,
        ActionType::AdjustDifficulty,
    ];

    /// Wire name. Plan ordering uses the lexical order of this name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notify => "notify",
            Self::RecommendContent => "recommend_content",
            Self::AwardBadge => "award_badge",
            Self::SuggestSocialMatch => "suggest_social_match",
            Self::AdjustDifficulty => "adjust_difficulty",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed action for one user, consumed once by the conflict resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Intervention {
    /// Unique intervention id
    pub id: InterventionId,
    /// Agent that proposed it
    pub source_agent: AgentKind,
    /// Target user
    pub user_id: UserId,
    /// Priority `0..=9`, higher wins
    pub priority: u8,
    /// Action kind
    pub action_type: ActionType,
    /// Opaque content for the outbound sink
    #[cfg_attr(feature = "typescript", ts(type = "Record<string, unknown>"))]
    pub payload: Payload,
    /// Expiry instant
    pub ttl: DateTime<Utc>,
}

impl Intervention {
    /// Create an intervention with an empty payload.
    pub fn new(
        source_agent: AgentKind,
        user_id: UserId,
        action_type: ActionType,
        priority: u8,
        ttl: DateTime<Utc>,
    ) -> Self {
        Self {
            id: InterventionId::new(),
            source_agent,
            user_id,
            priority,
            action_type,
            payload: Payload::new(),
            ttl,
        }
    }

    /// Add a payload entry.
    pub fn with_payload(mut self, key: &str, value: impl Serialize) -> Self {
        self.payload.insert(
            key.to_string(),
            serde_json::to_value(value).unwrap_or_default(),
        );
        self
    }

    /// Whether the intervention expired before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl < now
    }
}
