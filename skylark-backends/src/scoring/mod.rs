//! Personalization scoring abstraction.
//!
//! Agents describe what they need ranked with a [`ScoringContext`]; the
//! external scoring collaborator returns ranked candidate ids.

pub mod mock;
pub mod traits;

pub use mock::{MockScoringBackend, PassthroughScoring};
pub use traits::{RankedCandidate, ScoringBackend, ScoringContext, ScoringError, ScoringPurpose};
