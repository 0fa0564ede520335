//! Conflict resolution - merges one window of interventions into a plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skylark_types::{ActionPlan, ActionType, Intervention, UserId, MAX_PRIORITY};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::types::ResolutionError;

/// Resolver counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverStats {
    pub resolutions: u64,
    pub chosen: u64,
    pub dropped_expired: u64,
    pub dropped_malformed: u64,
    pub superseded: u64,
}

/// Deterministic merge of pending interventions.
///
/// Expired and malformed interventions are dropped, then at most one
/// intervention survives per action type: the highest priority, with the
/// earliest id breaking ties. Survivors are ordered by descending priority,
/// then by action type name.
#[derive(Debug, Default)]
pub struct ConflictResolver {
    resolutions: AtomicU64,
    chosen: AtomicU64,
    dropped_expired: AtomicU64,
    dropped_malformed: AtomicU64,
    superseded: AtomicU64,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that an intervention may take part in `user_id`'s window.
    pub fn validate(user_id: &UserId, intervention: &Intervention) -> Result<(), ResolutionError> {
        if intervention.priority > MAX_PRIORITY {
            return Err(ResolutionError::InvalidPriority {
                priority: intervention.priority,
            });
        }
        if intervention.user_id.is_empty() {
            return Err(ResolutionError::MissingUser);
        }
        if &intervention.user_id != user_id {
            return Err(ResolutionError::UserMismatch {
                expected: user_id.clone(),
                found: intervention.user_id.clone(),
            });
        }
        Ok(())
    }

    /// Resolve one window. The result depends only on `pending` and `now`,
    /// apart from the plan id and timestamp.
    pub fn resolve(&self, user_id: &UserId, pending: Vec<Intervention>, now: DateTime<Utc>) -> ActionPlan {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        let mut best: HashMap<ActionType, Intervention> = HashMap::new();

        for intervention in pending {
            if let Err(e) = Self::validate(user_id, &intervention) {
                warn!(
                    intervention_id = %intervention.id,
                    source = %intervention.source_agent,
                    error = %e,
                    "Dropping malformed intervention"
                );
                self.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if intervention.is_expired(now) {
                debug!(intervention_id = %intervention.id, "Dropping expired intervention");
                self.dropped_expired.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            match best.get_mut(&intervention.action_type) {
                Some(current) => {
                    if outranks(&intervention, current) {
                        *current = intervention;
                    }
                    self.superseded.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    best.insert(intervention.action_type, intervention);
                }
            }
        }

        let mut chosen: Vec<Intervention> = best.into_values().collect();
        chosen.sort_by(|a, b| {
            (Reverse(a.priority), a.action_type.as_str()).cmp(&(Reverse(b.priority), b.action_type.as_str()))
        });
        self.chosen.fetch_add(chosen.len() as u64, Ordering::Relaxed);

        ActionPlan::new(user_id.clone(), chosen, now)
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            resolutions: self.resolutions.load(Ordering::Relaxed),
            chosen: self.chosen.load(Ordering::Relaxed),
            dropped_expired: self.dropped_expired.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
        }
    }
}

fn outranks(candidate: &Intervention, current: &Intervention) -> bool {
    candidate.priority > current.priority || (candidate.priority == current.priority && candidate.id < current.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use skylark_types::{AgentKind, InterventionId};

    fn intervention(id: u128, action_type: ActionType, priority: u8, now: DateTime<Utc>) -> Intervention {
        let mut i = Intervention::new(
            AgentKind::FeedbackLoop,
            UserId::from("u-1"),
            action_type,
            priority,
            now + Duration::minutes(5),
        );
        i.id = InterventionId::from_u128(id);
        i
    }

    #[test]
    fn test_highest_priority_wins_per_action_type() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();
        let plan = resolver.resolve(
            &UserId::from("u-1"),
            vec![
                intervention(1, ActionType::Notify, 3, now),
                intervention(2, ActionType::Notify, 7, now),
            ],
            now,
        );

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.interventions[0].priority, 7);
        assert_eq!(resolver.stats().superseded, 1);
    }

    #[test]
    fn test_tie_broken_by_earliest_id() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();
        let plan = resolver.resolve(
            &UserId::from("u-1"),
            vec![
                intervention(9, ActionType::AwardBadge, 5, now),
                intervention(4, ActionType::AwardBadge, 5, now),
                intervention(6, ActionType::AwardBadge, 5, now),
            ],
            now,
        );
        assert_eq!(plan.interventions[0].id, InterventionId::from_u128(4));
    }

    #[test]
    fn test_order_by_priority_then_action_name() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();
        let plan = resolver.resolve(
            &UserId::from("u-1"),
            vec![
                intervention(1, ActionType::RecommendContent, 4, now),
                intervention(2, ActionType::Notify, 4, now),
                intervention(3, ActionType::AdjustDifficulty, 4, now),
                intervention(4, ActionType::AwardBadge, 8, now),
            ],
            now,
        );
        assert_eq!(
            plan.action_types(),
            vec![
                ActionType::AwardBadge,
                ActionType::AdjustDifficulty,
                ActionType::Notify,
                ActionType::RecommendContent,
            ]
        );
    }

    #[test]
    fn test_expired_never_chosen() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();
        let mut stale = intervention(1, ActionType::Notify, 9, now);
        stale.ttl = now - Duration::seconds(1);

        let plan = resolver.resolve(&UserId::from("u-1"), vec![stale], now);
        assert!(plan.is_empty());
        assert_eq!(resolver.stats().dropped_expired, 1);
    }

    #[test]
    fn test_malformed_dropped_rest_resolved() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();
        let mut loud = intervention(1, ActionType::Notify, 9, now);
        loud.priority = 12;
        let mut stray = intervention(2, ActionType::AwardBadge, 5, now);
        stray.user_id = UserId::from("u-2");
        let good = intervention(3, ActionType::Notify, 2, now);

        let plan = resolver.resolve(&UserId::from("u-1"), vec![loud, stray, good], now);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.interventions[0].id, InterventionId::from_u128(3));
        assert_eq!(resolver.stats().dropped_malformed, 2);
    }

    #[test]
    fn test_validate_errors() {
        let now = Utc::now();
        let mut anonymous = intervention(1, ActionType::Notify, 1, now);
        anonymous.user_id = UserId::from("");
        assert!(matches!(
            ConflictResolver::validate(&UserId::from("u-1"), &anonymous),
            Err(ResolutionError::MissingUser)
        ));
    }
}
