//! Skylark - agent coordination core for community engagement.
//!
//! Ingests user activity, keeps per-user engagement state, routes derived
//! signals between eight autonomous engagement agents, and resolves the
//! interventions they propose into one action plan per user:
//!
//! - **Ingress**: validation, sequencing and deduplication of raw events
//! - **Signal bus**: publish/subscribe with per-publisher FIFO
//! - **Agents**: motivation, goals, behavior, feedback, social, anchoring, habit, evolution
//! - **Resolution**: per-user debounce windows and deterministic conflict resolution
//! - **Dispatch**: at-most-once delivery with bounded retries
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    EngagementCoordinator                      │
//! │                                                              │
//! │  ┌─────────┐   ┌────────────┐   ┌──────────────────┐         │
//! │  │ Ingress │──▶│ Signal Bus │◀─▶│ Agent Runtime (8) │         │
//! │  └─────────┘   └────────────┘   └────────┬─────────┘         │
//! │                                          │ interventions     │
//! │                  ┌────────────┐   ┌──────▼──────┐            │
//! │                  │ Dispatcher │◀──│  Resolver   │            │
//! │                  └─────┬──────┘   └─────────────┘            │
//! └────────────────────────┼─────────────────────────────────────┘
//!                          ▼ ActionSink
//! ```

pub mod agents;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod ingress;
pub mod resolver;
pub mod runtime;
pub mod store;
pub mod types;

// Re-export main types
pub use agents::{Agent, AgentContext, AgentOutput, EngagementAgent};
pub use bus::{BusMessage, Delivery, Mailbox, MessageFilter, Publisher, SignalBus};
pub use config::CoreConfig;
pub use coordinator::{CoordinatorBuilder, CoordinatorStats, EngagementCoordinator};
pub use dispatcher::{ActionDispatcher, DispatchOutcome, DispatchRecord, DispatchStats};
pub use ingress::{EventIngress, RawEvent};
pub use resolver::{ConflictResolver, ResolutionScheduler};
pub use runtime::{AgentRuntime, AgentStats};
pub use store::UserStateStore;
pub use types::*;
