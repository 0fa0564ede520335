//! Error types for the coordination core.

use skylark_backends::{PersistenceError, ScoringError};
use skylark_types::{PlanId, UserId};

/// Rejection of an inbound raw event.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    /// Malformed record, not retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// The dedup key was already ingested
    #[error("Duplicate event: {dedup_key}")]
    Duplicate { dedup_key: String },

    /// The bus refused the event
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Signal bus failures.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// No mailbox attached under this name
    #[error("Unknown subscriber: {0}")]
    UnknownSubscriber(String),

    /// A mailbox with this name is already attached
    #[error("Subscriber already attached: {0}")]
    AlreadyAttached(String),

    /// The bus was closed
    #[error("Signal bus closed")]
    Closed,
}

/// User state store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Persistence collaborator failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Stored state could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compare-and-swap kept losing to concurrent writers
    #[error("Gave up writing state for {user_id} after {attempts} conflicts")]
    ConflictRetriesExhausted { user_id: UserId, attempts: u32 },
}

/// Failure inside one agent handler. Isolated by the runtime.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// State store access failed
    #[error("State error: {0}")]
    State(#[from] StoreError),

    /// Scoring collaborator failed
    #[error("Scoring error: {0}")]
    Scoring(#[from] ScoringError),

    /// Event or signal payload was unusable
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Handler panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

/// Malformed intervention found during resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// Priority outside `0..=9`
    #[error("Invalid priority {priority}")]
    InvalidPriority { priority: u8 },

    /// Intervention targets another user than the window
    #[error("Intervention for {found} in window of {expected}")]
    UserMismatch { expected: UserId, found: UserId },

    /// Intervention has no user
    #[error("Intervention has an empty user id")]
    MissingUser,
}

/// Dispatch failures.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The sink did not accept the plan; the plan was dropped
    #[error("Sink unavailable after {attempts} attempt(s): {reason}")]
    SinkUnavailable { attempts: u32, reason: String },

    /// The plan was already delivered once
    #[error("Plan already dispatched: {0}")]
    AlreadyDispatched(PlanId),
}

/// Error types for the coordination core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Ingress error: {0}")]
    Ingress(#[from] IngressError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Coordinator not started
    #[error("Coordinator is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, CoreError>;
