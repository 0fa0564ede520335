//! Habit formation - daily streaks, achievements and reminders.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use skylark_types::{ActionType, AgentKind, Event, Intervention, Signal, SignalKind, UserId};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use super::{notify, AgentContext, AgentOutput, EngagementAgent};
use crate::bus::MessageFilter;
use crate::config::HabitConfig;
use crate::types::AgentError;

const KIND: AgentKind = AgentKind::HabitFormation;
const ACHIEVEMENT_PRIORITY: u8 = 5;
const REMINDER_PRIORITY: u8 = 4;
const FULL_STRENGTH_STREAK: f64 = 30.0;

#[derive(Debug, Clone)]
struct Habit {
    last_day: NaiveDate,
    last_seen: DateTime<Utc>,
    streak: u32,
    achieved: BTreeSet<u32>,
    reminded_on: Option<NaiveDate>,
}

pub struct HabitFormationAgent {
    config: HabitConfig,
    habits: HashMap<UserId, Habit>,
}

impl HabitFormationAgent {
    pub fn new(config: HabitConfig) -> Self {
        Self {
            config,
            habits: HashMap::new(),
        }
    }

    /// Current streak of a user.
    pub fn streak(&self, user_id: &UserId) -> u32 {
        self.habits.get(user_id).map(|h| h.streak).unwrap_or(0)
    }
}

#[async_trait]
impl EngagementAgent for HabitFormationAgent {
    fn kind(&self) -> AgentKind {
        KIND
    }

    fn interest(&self) -> MessageFilter {
        MessageFilter::all_events()
    }

    async fn on_event(&mut self, ctx: &AgentContext, event: &Event) -> Result<AgentOutput, AgentError> {
        let day = event.timestamp.date_naive();
        let habit = match self.habits.entry(event.user_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let restored = restore(ctx, &event.user_id, &self.config.achievements, event.timestamp).await?;
                entry.insert(restored)
            }
        };

        let streak = if habit.streak == 0 {
            1
        } else if day == habit.last_day {
            habit.streak
        } else if day == habit.last_day + Duration::days(1) {
            habit.streak + 1
        } else if day > habit.last_day {
            1
        } else {
            // Late event for a day already counted.
            return Ok(AgentOutput::none());
        };
        let last_day = if day > habit.last_day || habit.streak == 0 {
            day
        } else {
            habit.last_day
        };

        if streak == habit.streak {
            habit.last_day = last_day;
            habit.last_seen = habit.last_seen.max(event.timestamp);
            return Ok(AgentOutput::none());
        }
        ctx.store
            .update(&event.user_id, |state| state.record_streak(streak, last_day))
            .await?;

        if streak < habit.streak {
            habit.achieved.retain(|target| *target <= streak);
        }
        habit.streak = streak;
        habit.last_day = last_day;
        habit.last_seen = habit.last_seen.max(event.timestamp);
        debug!(user_id = %event.user_id, streak, "Streak updated");

        let now = Utc::now();
        let mut output = AgentOutput::none();
        for &target in &self.config.achievements {
            if streak >= target && habit.achieved.insert(target) {
                info!(user_id = %event.user_id, streak = target, "Streak achievement");
                output.intervention(
                    Intervention::new(
                        KIND,
                        event.user_id.clone(),
                        ActionType::AwardBadge,
                        ACHIEVEMENT_PRIORITY,
                        ctx.ttl(now),
                    )
                    .with_payload("badge", format!("streak_{}", target))
                    .with_payload("streak", streak),
                );
            }
        }
        Ok(output)
    }

    async fn tick(&mut self, ctx: &AgentContext, now: DateTime<Utc>) -> Result<AgentOutput, AgentError> {
        let today = now.date_naive();
        let yesterday = today - Duration::days(1);
        let reminder_after = Duration::seconds(self.config.reminder_after_secs as i64);
        let mut output = AgentOutput::none();

        for (user_id, habit) in self.habits.iter_mut() {
            if habit.last_day < yesterday && habit.streak > 0 {
                let last_day = habit.last_day;
                if let Err(e) = ctx.store.update(user_id, |state| state.record_streak(0, last_day)).await {
                    ctx.report_user_failure(KIND, user_id, &AgentError::from(e));
                    continue;
                }
                let broken = habit.streak;
                habit.streak = 0;
                habit.achieved.clear();
                info!(user_id = %user_id, streak = broken, "Streak broken");
                output.signal(
                    Signal::new(
                        KIND,
                        user_id.clone(),
                        SignalKind::StreakBroken,
                        (broken as f64 / FULL_STRENGTH_STREAK).min(1.0),
                        now,
                    )
                    .with_detail(serde_json::json!({ "streak": broken })),
                );
            } else if habit.last_day == yesterday
                && habit.streak > 0
                && now - habit.last_seen >= reminder_after
                && habit.reminded_on != Some(today)
            {
                habit.reminded_on = Some(today);
                output.intervention(
                    notify(ctx, KIND, user_id.clone(), REMINDER_PRIORITY, "streak_reminder", now)
                        .with_payload("streak", habit.streak),
                );
            }
        }
        Ok(output)
    }
}

/// Resume a user's habit from the store, or start a fresh one.
async fn restore(
    ctx: &AgentContext,
    user_id: &UserId,
    achievements: &[u32],
    seen_at: DateTime<Utc>,
) -> Result<Habit, AgentError> {
    let fresh = Habit {
        last_day: seen_at.date_naive(),
        last_seen: seen_at,
        streak: 0,
        achieved: BTreeSet::new(),
        reminded_on: None,
    };
    let Some(state) = ctx.store.snapshot(user_id).await? else {
        return Ok(fresh);
    };
    let counted_day = state.streak_day.or(state.last_active.map(|at| at.date_naive()));
    match counted_day {
        Some(last_day) if state.streak_count > 0 => {
            debug!(user_id = %user_id, streak = state.streak_count, "Streak resumed");
            Ok(Habit {
                last_day,
                last_seen: state.last_active.unwrap_or(seen_at),
                streak: state.streak_count,
                achieved: achievements
                    .iter()
                    .copied()
                    .filter(|target| *target <= state.streak_count)
                    .collect(),
                reminded_on: None,
            })
        }
        _ => Ok(fresh),
    }
}
