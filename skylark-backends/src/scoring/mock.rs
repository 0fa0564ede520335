//! Scoring implementations for tests and demos.

use async_trait::async_trait;
use skylark_types::UserId;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::traits::*;

/// Ranks the caller's candidates in the order given.
///
/// Used when no personalization collaborator is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughScoring;

#[async_trait]
impl ScoringBackend for PassthroughScoring {
    fn id(&self) -> &str {
        "passthrough"
    }

    async fn score(
        &self,
        _user_id: &UserId,
        context: &ScoringContext,
    ) -> Result<Vec<RankedCandidate>, ScoringError> {
        Ok(rank_in_order(&context.candidates, context.limit))
    }
}

/// Mock scoring backend for testing.
///
/// Returns a fixed ranking when one is configured, otherwise echoes the
/// caller's candidates in order.
pub struct MockScoringBackend {
    backend_id: String,
    available: AtomicBool,
    ranking: Option<Vec<String>>,
    call_count: AtomicU32,
}

impl MockScoringBackend {
    /// Create a new mock backend.
    pub fn new(backend_id: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            available: AtomicBool::new(true),
            ranking: None,
            call_count: AtomicU32::new(0),
        }
    }

    /// Always return this ranking (truncated to the requested limit).
    pub fn with_ranking<I, S>(mut self, ranking: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ranking = Some(ranking.into_iter().map(Into::into).collect());
        self
    }

    /// Set availability.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Toggle availability at runtime.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of times `score` was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for MockScoringBackend {
    fn default() -> Self {
        Self::new("mock-scoring")
    }
}

#[async_trait]
impl ScoringBackend for MockScoringBackend {
    fn id(&self) -> &str {
        &self.backend_id
    }

    async fn score(
        &self,
        _user_id: &UserId,
        context: &ScoringContext,
    ) -> Result<Vec<RankedCandidate>, ScoringError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(ScoringError::Unavailable("Mock scorer disabled".to_string()));
        }

        let source = self.ranking.as_ref().unwrap_or(&context.candidates);
        Ok(rank_in_order(source, context.limit))
    }
}

fn rank_in_order(ids: &[String], limit: usize) -> Vec<RankedCandidate> {
    let total = ids.len().max(1) as f64;
    ids.iter()
        .take(limit)
        .enumerate()
        .map(|(i, id)| RankedCandidate::new(id.clone(), 1.0 - i as f64 / total))
        .collect()
}
