//! Conflict resolution of concurrent interventions.

pub mod resolve;
pub mod scheduler;

pub use resolve::{ConflictResolver, ResolverStats};
pub use scheduler::{ResolutionScheduler, SchedulerStats};
