//! Per-user engagement state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ids::UserId;

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Engagement tier derived from the daily streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Streak under 3 days
    Newcomer,
    /// Streak of 3-6 days
    Regular,
    /// Streak of 7-29 days
    Committed,
    /// Streak of 30 days or more
    Champion,
}

impl Tier {
    /// Tier for a streak length.
    pub fn for_streak(streak: u32) -> Self {
        match streak {
            0..=2 => Self::Newcomer,
            3..=6 => Self::Regular,
            7..=29 => Self::Committed,
            _ => Self::Champion,
        }
    }

    /// Stable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Newcomer => "newcomer",
            Self::Regular => "regular",
            Self::Committed => "committed",
            Self::Champion => "champion",
        }
    }
}

impl Default for Tier {
    fn default() -> Self {
        Self::Newcomer
    }
}

/// Inferred motivator tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Motivator {
    Achievement,
    Social,
    Mastery,
    Progress,
}

impl Motivator {
    /// Every motivator.
    pub const ALL: [Motivator; 4] = [
        Motivator::Achievement,
        Motivator::Social,
        Motivator::Mastery,
        Motivator::Progress,
    ];

    /// Stable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Achievement => "achievement",
            Self::Social => "social",
            Self::Mastery => "mastery",
            Self::Progress => "progress",
        }
    }

    /// Parse a stable name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

/// Engagement state of one user, owned by the user state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct UserEngagementState {
    /// User this state belongs to
    pub user_id: UserId,
    /// Last observed activity
    pub last_active: Option<DateTime<Utc>>,
    /// Consecutive active days
    pub streak_count: u32,
    /// Last UTC day counted into the streak
    #[serde(default)]
    pub streak_day: Option<NaiveDate>,
    /// Tier derived from the streak
    pub tier: Tier,
    /// Inferred motivator tags
    pub motivators: BTreeSet<Motivator>,
    /// Cohorts the user belongs to
    pub cohort_ids: BTreeSet<String>,
    /// Write counter, bumped by every store update
    pub version: u64,
}

impl UserEngagementState {
    /// Fresh state for a user.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            last_active: None,
            streak_count: 0,
            streak_day: None,
            tier: Tier::Newcomer,
            motivators: BTreeSet::new(),
            cohort_ids: BTreeSet::new(),
            version: 0,
        }
    }

    /// Set the streak and recompute the tier.
    pub fn set_streak(&mut self, streak: u32) {
        self.streak_count = streak;
        self.tier = Tier::for_streak(streak);
    }

    /// Record a streak counted up to `day`.
    pub fn record_streak(&mut self, streak: u32, day: NaiveDate) {
        self.set_streak(streak);
        self.streak_day = Some(day);
    }

    /// Advance `last_active`, never moving it backwards.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if self.last_active.map_or(true, |last| at > last) {
            self.last_active = Some(at);
        }
    }

    /// Time since last activity, if any activity was recorded.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_active.map(|last| now - last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(Tier::for_streak(0), Tier::Newcomer);
        assert_eq!(Tier::for_streak(3), Tier::Regular);
        assert_eq!(Tier::for_streak(7), Tier::Committed);
        assert_eq!(Tier::for_streak(30), Tier::Champion);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let now = Utc::now();
        let mut state = UserEngagementState::new(UserId::from("u-1"));
        state.touch(now);
        state.touch(now - Duration::hours(1));
        assert_eq!(state.last_active, Some(now));
        assert_eq!(state.idle_for(now + Duration::minutes(5)), Some(Duration::minutes(5)));
    }

    #[test]
    fn test_state_without_streak_day_still_decodes() {
        let json = r#"{"user_id":"u-1","last_active":null,"streak_count":2,"tier":"newcomer","motivators":[],"cohort_ids":[],"version":3}"#;
        let state: UserEngagementState = serde_json::from_str(json).unwrap();
        assert_eq!(state.streak_count, 2);
        assert_eq!(state.streak_day, None);
    }

    #[test]
    fn test_set_streak_updates_tier() {
        let mut state = UserEngagementState::new(UserId::from("u-1"));
        state.set_streak(8);
        assert_eq!(state.tier, Tier::Committed);
    }
}
