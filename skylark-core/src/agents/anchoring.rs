//! Emotional anchoring - ties milestones into a personal narrative.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use skylark_types::{ActionType, AgentKind, Event, EventType, Intervention, Signal, SignalKind, UserId};
use std::collections::HashMap;
use tracing::debug;

use super::{is_user_signal, notify, AgentContext, AgentOutput, EngagementAgent};
use crate::bus::MessageFilter;
use crate::config::AnchoringConfig;
use crate::types::AgentError;

const KIND: AgentKind = AgentKind::EmotionalAnchoring;
const BADGE_PRIORITY: u8 = 7;
const STORY_PRIORITY: u8 = 3;
const TOUCHPOINT_PRIORITY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Journey,
    Mastery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chapter {
    Beginning,
    Progress,
    Achievement,
}

impl Chapter {
    fn for_count(milestones: u32) -> Self {
        match milestones {
            0 | 1 => Chapter::Beginning,
            2..=4 => Chapter::Progress,
            _ => Chapter::Achievement,
        }
    }
}

fn theme_for(milestone: &str) -> Theme {
    if milestone.starts_with("skill_") || milestone == "mentor_status" || milestone == "expert_recognition" {
        Theme::Mastery
    } else {
        Theme::Journey
    }
}

/// Community impact of a milestone, used as signal strength.
fn impact(milestone: &str) -> f64 {
    match milestone {
        "first_post" => 0.3,
        "first_collaboration" => 0.6,
        "mentor_status" | "expert_recognition" => 0.9,
        _ => 0.5,
    }
}

/// Narrative position of one user.
#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    pub theme: Theme,
    pub chapter: Chapter,
    pub milestones: u32,
}

pub struct EmotionalAnchoringAgent {
    config: AnchoringConfig,
    stories: HashMap<UserId, Story>,
    touchpoints: HashMap<UserId, DateTime<Utc>>,
}

impl EmotionalAnchoringAgent {
    pub fn new(config: AnchoringConfig) -> Self {
        Self {
            config,
            stories: HashMap::new(),
            touchpoints: HashMap::new(),
        }
    }

    pub fn story(&self, user_id: &UserId) -> Option<&Story> {
        self.stories.get(user_id)
    }

    fn interval(&self) -> Duration {
        Duration::seconds(self.config.touchpoint_interval_secs as i64)
    }
}

#[async_trait]
impl EngagementAgent for EmotionalAnchoringAgent {
    fn kind(&self) -> AgentKind {
        KIND
    }

    fn interest(&self) -> MessageFilter {
        MessageFilter::events([EventType::Milestone]).with_signals([SignalKind::DisengagementRisk])
    }

    async fn on_event(&mut self, ctx: &AgentContext, event: &Event) -> Result<AgentOutput, AgentError> {
        if event.event_type != EventType::Milestone {
            return Ok(AgentOutput::none());
        }
        let milestone = event.payload_str("milestone").unwrap_or("milestone");
        let theme = theme_for(milestone);

        let story = self.stories.entry(event.user_id.clone()).or_insert(Story {
            theme,
            chapter: Chapter::Beginning,
            milestones: 0,
        });
        story.milestones += 1;
        story.theme = theme;
        story.chapter = Chapter::for_count(story.milestones);
        debug!(user_id = %event.user_id, milestone, chapter = ?story.chapter, "Story advanced");

        let now = Utc::now();
        let mut output = AgentOutput::none();
        output.signal(
            Signal::new(KIND, event.user_id.clone(), SignalKind::MilestoneReached, impact(milestone), now)
                .with_detail(serde_json::json!({
                    "milestone": milestone,
                    "theme": story.theme,
                    "chapter": story.chapter,
                })),
        );
        output.intervention(
            Intervention::new(KIND, event.user_id.clone(), ActionType::AwardBadge, BADGE_PRIORITY, ctx.ttl(now))
                .with_payload("badge", milestone)
                .with_payload("theme", story.theme)
                .with_payload("chapter", story.chapter),
        );
        Ok(output)
    }

    async fn on_signal(&mut self, ctx: &AgentContext, signal: &Signal) -> Result<AgentOutput, AgentError> {
        if !is_user_signal(signal, SignalKind::DisengagementRisk) {
            return Ok(AgentOutput::none());
        }
        let Some(user_id) = signal.user_id.clone() else {
            return Ok(AgentOutput::none());
        };
        let now = Utc::now();
        let mut output = AgentOutput::none();
        let mut story_continue = notify(ctx, KIND, user_id.clone(), STORY_PRIORITY, "story_continue", now);
        if let Some(story) = self.stories.get(&user_id) {
            story_continue = story_continue
                .with_payload("theme", story.theme)
                .with_payload("chapter", story.chapter);
        }
        output.intervention(story_continue);
        Ok(output)
    }

    async fn tick(&mut self, ctx: &AgentContext, now: DateTime<Utc>) -> Result<AgentOutput, AgentError> {
        let interval = self.interval();
        let mut output = AgentOutput::none();

        for state in ctx.store.snapshots().await {
            let Some(last_touchpoint) = self.touchpoints.get(&state.user_id).copied() else {
                self.touchpoints.insert(state.user_id, now);
                continue;
            };
            let recently_active = state.idle_for(now).is_some_and(|idle| idle <= interval);
            if recently_active && now - last_touchpoint >= interval {
                output.intervention(notify(
                    ctx,
                    KIND,
                    state.user_id.clone(),
                    TOUCHPOINT_PRIORITY,
                    "emotional_touchpoint",
                    now,
                ));
                self.touchpoints.insert(state.user_id, now);
            }
        }
        Ok(output)
    }
}
