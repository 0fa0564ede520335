//! External collaborators of the Skylark coordination core.
//!
//! The core owns no implementation of these concerns; it talks to them
//! through the traits defined here:
//!
//! - [`ScoringBackend`]: personalization scoring of candidate content or challenges
//! - [`ActionSink`]: outbound delivery of resolved action plans
//! - [`StateBackend`]: key-value persistence with compare-and-swap
//! - [`FailureReporter`]: observability sink for isolated failures
//!
//! In-memory and mock implementations are provided for tests and demos.

pub mod observe;
pub mod persistence;
pub mod scoring;
pub mod sink;

pub use observe::{Component, Failure, FailureReporter, RecordingReporter, TracingReporter};
pub use persistence::{CasOutcome, MemoryStateBackend, PersistenceError, StateBackend};
pub use scoring::{
    MockScoringBackend, PassthroughScoring, RankedCandidate, ScoringBackend, ScoringContext,
    ScoringError, ScoringPurpose,
};
pub use sink::{ActionSink, FlakySink, LoggingSink, RecordingSink, SinkError};
