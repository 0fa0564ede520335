//! Shared data model for Skylark.
//!
//! Every component of the coordination core speaks in these types:
//!
//! - [`Event`]: an immutable record of one user activity
//! - [`Signal`]: a derived observation broadcast between agents
//! - [`Intervention`]: a user-directed action proposed by one agent
//! - [`ActionPlan`]: the resolved set of interventions for one user
//! - [`UserEngagementState`]: per-user engagement state owned by the state store
//!
//! With the `typescript` feature enabled the types derive `ts_rs::TS` so
//! the outbound layer can share them with a web client.

pub mod event;
pub mod ids;
pub mod intervention;
pub mod plan;
pub mod signal;
pub mod state;

pub use event::{Event, EventType, Payload};
pub use ids::{EventId, InterventionId, PlanId, SignalId, UserId};
pub use intervention::{ActionType, Intervention, MAX_PRIORITY};
pub use plan::ActionPlan;
pub use signal::{AgentKind, Signal, SignalKind};
pub use state::{Motivator, Tier, UserEngagementState};
