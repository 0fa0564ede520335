//! Core traits for personalization scoring.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skylark_types::{Motivator, UserId};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Error types for scoring calls.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    /// Scorer is not available
    #[error("Scoring backend unavailable: {0}")]
    Unavailable(String),

    /// Scorer rejected the request
    #[error("Scoring request rejected: {0}")]
    Rejected(String),
}

/// What the caller wants ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ScoringPurpose {
    /// Content recommendations
    Content,
    /// Goal or challenge templates
    Goals,
}

/// Input to a scoring call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ScoringContext {
    /// What is being ranked
    pub purpose: ScoringPurpose,
    /// The user's current motivator tags
    pub motivators: Vec<Motivator>,
    /// Candidate ids the caller knows about (may be empty)
    pub candidates: Vec<String>,
    /// Maximum number of results wanted
    pub limit: usize,
}

impl ScoringContext {
    /// Create a context for a purpose.
    pub fn new(purpose: ScoringPurpose) -> Self {
        Self {
            purpose,
            motivators: Vec::new(),
            candidates: Vec::new(),
            limit: 3,
        }
    }

    /// Set the motivator tags.
    pub fn with_motivators(mut self, motivators: impl IntoIterator<Item = Motivator>) -> Self {
        self.motivators = motivators.into_iter().collect();
        self
    }

    /// Set the candidate ids.
    pub fn with_candidates(mut self, candidates: impl IntoIterator<Item = String>) -> Self {
        self.candidates = candidates.into_iter().collect();
        self
    }

    /// Set the result limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// A scored candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct RankedCandidate {
    /// Content or template id
    pub id: String,
    /// Score, higher is better
    pub score: f64,
}

impl RankedCandidate {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Core trait for personalization scoring.
///
/// Implementations return candidates ordered best first, at most
/// `context.limit` of them.
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Backend identifier.
    fn id(&self) -> &str;

    /// Rank candidates for a user.
    async fn score(
        &self,
        user_id: &UserId,
        context: &ScoringContext,
    ) -> Result<Vec<RankedCandidate>, ScoringError>;
}
