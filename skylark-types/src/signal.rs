//! Derived signals exchanged between agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SignalId, UserId};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// The closed set of engagement agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    MotivationMapping,
    GoalSetting,
    BehaviorMonitoring,
    FeedbackLoop,
    SocialDynamics,
    EmotionalAnchoring,
    HabitFormation,
    Evolution,
}

impl AgentKind {
    /// Every agent variant, in hosting order.
    pub const ALL: [AgentKind; 8] = [
        AgentKind::MotivationMapping,
        AgentKind::GoalSetting,
        AgentKind::BehaviorMonitoring,
        AgentKind::FeedbackLoop,
        AgentKind::SocialDynamics,
        AgentKind::EmotionalAnchoring,
        AgentKind::HabitFormation,
        AgentKind::Evolution,
    ];

    /// Stable name, also used as the agent's bus subscriber id.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MotivationMapping => "motivation_mapping",
            Self::GoalSetting => "goal_setting",
            Self::BehaviorMonitoring => "behavior_monitoring",
            Self::FeedbackLoop => "feedback_loop",
            Self::SocialDynamics => "social_dynamics",
            Self::EmotionalAnchoring => "emotional_anchoring",
            Self::HabitFormation => "habit_formation",
            Self::Evolution => "evolution",
        }
    }

    /// Parse a stable name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of derived observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// User has been idle past the inactivity threshold
    DisengagementRisk,
    /// A daily streak lapsed
    StreakBroken,
    /// User was matched into a cohort with a peer
    CohortMatch,
    /// Inferred motivator tags changed
    MotivatorShift,
    /// A goal was completed
    GoalCompleted,
    /// A milestone was celebrated
    MilestoneReached,
    /// Community-wide retuning request from the evolution agent
    StrategyAdjustment,
}

impl SignalKind {
    /// Every signal kind.
    pub const ALL: [SignalKind; 7] = [
        SignalKind::DisengagementRisk,
        SignalKind::StreakBroken,
        SignalKind::CohortMatch,
        SignalKind::MotivatorShift,
        SignalKind::GoalCompleted,
        SignalKind::MilestoneReached,
        SignalKind::StrategyAdjustment,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DisengagementRisk => "disengagement_risk",
            Self::StreakBroken => "streak_broken",
            Self::CohortMatch => "cohort_match",
            Self::MotivatorShift => "motivator_shift",
            Self::GoalCompleted => "goal_completed",
            Self::MilestoneReached => "milestone_reached",
            Self::StrategyAdjustment => "strategy_adjustment",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable observation broadcast on the signal bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Signal {
    /// Unique signal id
    pub id: SignalId,
    /// Agent that derived the signal
    pub source_agent: AgentKind,
    /// Target user; `None` means community-wide
    pub user_id: Option<UserId>,
    /// What was observed
    pub kind: SignalKind,
    /// Strength in `0.0..=1.0`
    pub strength: f64,
    /// When the signal was derived
    pub timestamp: DateTime<Utc>,
    /// For `strategy_adjustment`: the kind being retuned
    pub subject: Option<SignalKind>,
    /// Optional opaque detail for subscribers
    pub detail: Option<serde_json::Value>,
}

impl Signal {
    /// Create a per-user signal. Strength is clamped into `0.0..=1.0`.
    pub fn new(
        source_agent: AgentKind,
        user_id: UserId,
        kind: SignalKind,
        strength: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SignalId::new(),
            source_agent,
            user_id: Some(user_id),
            kind,
            strength: clamp_strength(strength),
            timestamp,
            subject: None,
            detail: None,
        }
    }

    /// Create a community-wide signal.
    pub fn community(
        source_agent: AgentKind,
        kind: SignalKind,
        strength: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SignalId::new(),
            source_agent,
            user_id: None,
            kind,
            strength: clamp_strength(strength),
            timestamp,
            subject: None,
            detail: None,
        }
    }

    /// Set the subject kind.
    pub fn with_subject(mut self, subject: SignalKind) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Attach opaque detail.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Whether this signal targets the whole community.
    pub fn is_community_wide(&self) -> bool {
        self.user_id.is_none()
    }
}

fn clamp_strength(strength: f64) -> f64 {
    if strength.is_nan() {
        0.0
    } else {
        strength.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strength_is_clamped() {
        let now = Utc::now();
        let high = Signal::new(
            AgentKind::BehaviorMonitoring,
            UserId::from("u-1"),
            SignalKind::DisengagementRisk,
            2.5,
            now,
        );
        assert_eq!(high.strength, 1.0);

        let nan = Signal::community(AgentKind::Evolution, SignalKind::StrategyAdjustment, f64::NAN, now);
        assert_eq!(nan.strength, 0.0);
        assert!(nan.is_community_wide());
    }

    #[test]
    fn test_agent_names_round_trip() {
        for kind in AgentKind::ALL {
            assert_eq!(AgentKind::parse(kind.as_str()), Some(kind));
        }
    }
}
