//! Goal setting - assigns personal goals and tracks progress toward them.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use skylark_backends::{ScoringContext, ScoringPurpose};
use skylark_types::{
    ActionType, AgentKind, Event, EventType, Intervention, Signal, SignalKind, UserId,
};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{is_user_signal, AgentContext, AgentOutput, EngagementAgent};
use crate::bus::MessageFilter;
use crate::config::GoalConfig;
use crate::types::AgentError;

const KIND: AgentKind = AgentKind::GoalSetting;
const COMPLETION_PRIORITY: u8 = 6;
const ADJUST_PRIORITY: u8 = 3;
const FALLBACK_GOAL: &str = "daily_interaction";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    Daily,
    Weekly,
    Once,
}

/// A goal template.
struct Template {
    id: &'static str,
    target: u32,
    reward: u32,
    period: Period,
    counts: fn(&Event) -> bool,
}

const TEMPLATES: &[Template] = &[
    Template {
        id: "daily_interaction",
        target: 5,
        reward: 10,
        period: Period::Daily,
        counts: any_interaction,
    },
    Template {
        id: "weekly_contribution",
        target: 3,
        reward: 25,
        period: Period::Weekly,
        counts: content_creation,
    },
    Template {
        id: "complete_tutorial",
        target: 1,
        reward: 15,
        period: Period::Once,
        counts: tutorial_completed,
    },
    Template {
        id: "help_others",
        target: 3,
        reward: 20,
        period: Period::Once,
        counts: helped_someone,
    },
];

fn any_interaction(event: &Event) -> bool {
    event.event_type == EventType::Interaction
}

fn content_creation(event: &Event) -> bool {
    any_interaction(event) && event.payload_str("activity") == Some("content_creation")
}

fn tutorial_completed(event: &Event) -> bool {
    event.event_type == EventType::Milestone && event.payload_str("milestone") == Some("tutorial_completed")
}

fn helped_someone(event: &Event) -> bool {
    any_interaction(event) && event.payload_str("activity") == Some("help")
}

fn template(id: &str) -> Option<&'static Template> {
    TEMPLATES.iter().find(|t| t.id == id)
}

/// A goal a user is working on.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveGoal {
    pub template_id: &'static str,
    pub target: u32,
    pub progress: u32,
    pub reward: u32,
    period_start: NaiveDate,
}

#[derive(Debug, Default)]
struct UserGoals {
    active: Vec<ActiveGoal>,
    completed_once: Vec<&'static str>,
}

pub struct GoalSettingAgent {
    config: GoalConfig,
    users: HashMap<UserId, UserGoals>,
}

impl GoalSettingAgent {
    pub fn new(config: GoalConfig) -> Self {
        Self {
            config,
            users: HashMap::new(),
        }
    }

    /// Goals a user is currently working on.
    pub fn active_goals(&self, user_id: &UserId) -> Vec<ActiveGoal> {
        self.users
            .get(user_id)
            .map(|g| g.active.clone())
            .unwrap_or_default()
    }

    async fn assign(&mut self, ctx: &AgentContext, user_id: &UserId, today: NaiveDate) {
        let goals = self.users.entry(user_id.clone()).or_default();
        if !goals.active.is_empty() {
            return;
        }
        let candidates: Vec<String> = TEMPLATES
            .iter()
            .filter(|t| !goals.completed_once.contains(&t.id))
            .map(|t| t.id.to_string())
            .collect();

        let motivators = match ctx.store.snapshot(user_id).await {
            Ok(state) => state.map(|s| s.motivators.into_iter().collect()).unwrap_or_default(),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "No state for goal scoring");
                Vec::new()
            }
        };
        let scoring = ScoringContext::new(ScoringPurpose::Goals)
            .with_motivators(motivators)
            .with_candidates(candidates)
            .with_limit(self.config.max_active_goals);

        let mut chosen: Vec<&'static Template> = match ctx.scoring.score(user_id, &scoring).await {
            Ok(ranked) => ranked.iter().filter_map(|c| template(&c.id)).collect(),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Goal scoring failed, using fallback");
                Vec::new()
            }
        };
        chosen.truncate(self.config.max_active_goals);
        if chosen.is_empty() {
            chosen.extend(template(FALLBACK_GOAL));
        }

        let goals = self.users.entry(user_id.clone()).or_default();
        for t in chosen {
            goals.active.push(ActiveGoal {
                template_id: t.id,
                target: t.target,
                progress: 0,
                reward: t.reward,
                period_start: today,
            });
        }
        debug!(
            user_id = %user_id,
            goals = ?goals.active.iter().map(|g| g.template_id).collect::<Vec<_>>(),
            "Goals assigned"
        );
    }
}

fn same_period(period: Period, start: NaiveDate, today: NaiveDate) -> bool {
    match period {
        Period::Daily => start == today,
        Period::Weekly => start.iso_week() == today.iso_week(),
        Period::Once => true,
    }
}

#[async_trait]
impl EngagementAgent for GoalSettingAgent {
    fn kind(&self) -> AgentKind {
        KIND
    }

    fn interest(&self) -> MessageFilter {
        MessageFilter::events([EventType::SessionStart, EventType::Interaction, EventType::Milestone])
            .with_signals([SignalKind::DisengagementRisk])
    }

    async fn on_event(&mut self, ctx: &AgentContext, event: &Event) -> Result<AgentOutput, AgentError> {
        let today = event.timestamp.date_naive();
        if event.event_type == EventType::SessionStart {
            self.assign(ctx, &event.user_id, today).await;
            return Ok(AgentOutput::none());
        }

        let Some(goals) = self.users.get_mut(&event.user_id) else {
            return Ok(AgentOutput::none());
        };

        let now = Utc::now();
        let mut output = AgentOutput::none();
        let mut completed = Vec::new();
        for goal in goals.active.iter_mut() {
            let Some(t) = template(goal.template_id) else { continue };
            if !(t.counts)(event) {
                continue;
            }
            goal.progress += 1;
            if goal.progress >= goal.target {
                completed.push(goal.clone());
            }
        }
        goals
            .active
            .retain(|g| !completed.iter().any(|c| c.template_id == g.template_id));

        for goal in completed {
            if template(goal.template_id).map(|t| t.period) == Some(Period::Once) {
                goals.completed_once.push(goal.template_id);
            }
            debug!(user_id = %event.user_id, goal = goal.template_id, "Goal completed");
            output.signal(
                Signal::new(
                    KIND,
                    event.user_id.clone(),
                    SignalKind::GoalCompleted,
                    (goal.reward as f64 / 25.0).min(1.0),
                    now,
                )
                .with_detail(serde_json::json!({ "goal": goal.template_id, "reward": goal.reward })),
            );
            output.intervention(
                Intervention::new(
                    KIND,
                    event.user_id.clone(),
                    ActionType::AwardBadge,
                    COMPLETION_PRIORITY,
                    ctx.ttl(now),
                )
                .with_payload("badge", format!("goal_{}", goal.template_id))
                .with_payload("reward", goal.reward),
            );
        }
        Ok(output)
    }

    async fn on_signal(&mut self, ctx: &AgentContext, signal: &Signal) -> Result<AgentOutput, AgentError> {
        if !is_user_signal(signal, SignalKind::DisengagementRisk) {
            return Ok(AgentOutput::none());
        }
        let Some(user_id) = signal.user_id.as_ref() else {
            return Ok(AgentOutput::none());
        };
        let Some(goals) = self.users.get_mut(user_id) else {
            return Ok(AgentOutput::none());
        };
        if goals.active.is_empty() {
            return Ok(AgentOutput::none());
        }

        let easing = self.config.easing_factor;
        let mut adjusted = Vec::new();
        for goal in goals.active.iter_mut() {
            let eased = ((goal.target as f64) * easing).ceil().max(1.0) as u32;
            let eased = eased.max(goal.progress + 1);
            if eased < goal.target {
                goal.target = eased;
            }
            adjusted.push(serde_json::json!({ "goal": goal.template_id, "target": goal.target }));
        }

        let now = Utc::now();
        let mut output = AgentOutput::none();
        output.intervention(
            Intervention::new(KIND, user_id.clone(), ActionType::AdjustDifficulty, ADJUST_PRIORITY, ctx.ttl(now))
                .with_payload("easing_factor", easing)
                .with_payload("goals", adjusted),
        );
        Ok(output)
    }

    async fn tick(&mut self, _ctx: &AgentContext, now: DateTime<Utc>) -> Result<AgentOutput, AgentError> {
        let today = now.date_naive();
        for goals in self.users.values_mut() {
            for goal in goals.active.iter_mut() {
                let Some(t) = template(goal.template_id) else { continue };
                if !same_period(t.period, goal.period_start, today) {
                    goal.progress = 0;
                    goal.target = t.target;
                    goal.period_start = today;
                }
            }
        }
        Ok(AgentOutput::none())
    }
}
