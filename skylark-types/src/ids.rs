//! Identifier newtypes.
//!
//! Event, signal, intervention and plan ids wrap time-ordered UUIDv7 values:
//! ids are unique, never reused, and compare in creation order, which is what
//! the conflict resolver relies on for its "earliest id wins" tie-break.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[cfg(feature = "typescript")]
use ts_rs::TS;

macro_rules! ordered_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[cfg_attr(feature = "typescript", derive(TS))]
        #[cfg_attr(feature = "typescript", ts(export))]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Allocate a fresh, time-ordered id.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Build an id from a raw value. Used by fixtures that need a known order.
            pub fn from_u128(value: u128) -> Self {
                Self(Uuid::from_u128(value))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

ordered_id!(
    /// Identifier of an ingested [`Event`](crate::Event).
    EventId
);
ordered_id!(
    /// Identifier of a published [`Signal`](crate::Signal).
    SignalId
);
ordered_id!(
    /// Identifier of an [`Intervention`](crate::Intervention).
    InterventionId
);
ordered_id!(
    /// Identifier of a resolved [`ActionPlan`](crate::ActionPlan).
    PlanId
);

/// External user identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a user id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty (never valid for ingestion).
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_time_ordered() {
        let first = InterventionId::new();
        let second = InterventionId::new();
        assert!(first < second);
    }

    #[test]
    fn test_fixture_ids_compare_by_value() {
        assert!(EventId::from_u128(1) < EventId::from_u128(2));
    }

    #[test]
    fn test_blank_user_id_is_empty() {
        assert!(UserId::from("  ").is_empty());
        assert!(!UserId::from("u-1").is_empty());
    }
}
