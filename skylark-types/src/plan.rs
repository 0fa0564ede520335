//! Resolved action plans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PlanId, UserId};
use crate::intervention::{ActionType, Intervention};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// The deduplicated, ordered interventions chosen for one user in one
/// resolution window. Immutable; discarded after dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ActionPlan {
    /// Unique plan id
    pub id: PlanId,
    /// Target user
    pub user_id: UserId,
    /// Chosen interventions, highest priority first
    pub interventions: Vec<Intervention>,
    /// When the plan was resolved
    pub resolution_timestamp: DateTime<Utc>,
}

impl ActionPlan {
    /// Create a plan.
    pub fn new(user_id: UserId, interventions: Vec<Intervention>, resolved_at: DateTime<Utc>) -> Self {
        Self {
            id: PlanId::new(),
            user_id,
            interventions,
            resolution_timestamp: resolved_at,
        }
    }

    /// Whether nothing survived resolution.
    pub fn is_empty(&self) -> bool {
        self.interventions.is_empty()
    }

    /// Number of chosen interventions.
    pub fn len(&self) -> usize {
        self.interventions.len()
    }

    /// Action types in plan order.
    pub fn action_types(&self) -> Vec<ActionType> {
        self.interventions.iter().map(|i| i.action_type).collect()
    }

    /// The chosen intervention for an action type, if any.
    pub fn get(&self, action_type: ActionType) -> Option<&Intervention> {
        self.interventions.iter().find(|i| i.action_type == action_type)
    }
}
