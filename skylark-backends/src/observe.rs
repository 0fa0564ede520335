//! Observability collaborator for isolated failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skylark_types::{AgentKind, UserId};
use std::sync::Mutex;
use tracing::error;

/// Where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "component", content = "agent")]
pub enum Component {
    Agent(AgentKind),
    Resolver,
    Dispatcher,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Component::Agent(kind) => write!(f, "agent:{}", kind),
            Component::Resolver => f.write_str("resolver"),
            Component::Dispatcher => f.write_str("dispatcher"),
        }
    }
}

/// An isolated failure surfaced to observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub component: Component,
    pub user_id: Option<UserId>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Failure {
    pub fn new(component: Component, user_id: Option<UserId>, message: impl Into<String>) -> Self {
        Self {
            component,
            user_id,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives failures that the core isolated instead of propagating.
pub trait FailureReporter: Send + Sync {
    fn report(&self, failure: Failure);
}

/// Reports failures as `tracing` error events.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl FailureReporter for TracingReporter {
    fn report(&self, failure: Failure) {
        error!(
            component = %failure.component,
            user_id = ?failure.user_id.as_ref().map(|u| u.as_str()),
            "{}",
            failure.message
        );
    }
}

/// Keeps every reported failure in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    failures: Mutex<Vec<Failure>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All failures reported so far.
    pub fn failures(&self) -> Vec<Failure> {
        self.failures.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Failures reported by one component.
    pub fn count_for(&self, component: Component) -> usize {
        self.failures()
            .iter()
            .filter(|f| f.component == component)
            .count()
    }
}

impl FailureReporter for RecordingReporter {
    fn report(&self, failure: Failure) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(failure);
        }
    }
}
