//! Configuration for the coordination core.

use serde::{Deserialize, Serialize};
use skylark_types::{AgentKind, SignalKind};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::types::{CoreError, Result};

/// Configuration for an engagement coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Instance ID
    pub instance_id: String,
    /// Event ingress configuration
    pub ingress: IngressConfig,
    /// Signal bus configuration
    pub bus: BusConfig,
    /// Agent configuration
    pub agents: AgentsConfig,
    /// Conflict resolver configuration
    pub resolver: ResolverConfig,
    /// Action dispatcher configuration
    pub dispatch: DispatchConfig,
    /// General settings
    pub general: GeneralConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            ingress: IngressConfig::default(),
            bus: BusConfig::default(),
            agents: AgentsConfig::default(),
            resolver: ResolverConfig::default(),
            dispatch: DispatchConfig::default(),
            general: GeneralConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Create a new config with instance ID.
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ..Default::default()
        }
    }

    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Load and validate a YAML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_yaml(&yaml)
            .map_err(|e| CoreError::Config(format!("invalid YAML in {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.agents.tick_interval_ms == 0 {
            return Err(CoreError::Config("agents.tick_interval_ms must be > 0".into()));
        }
        if self.agents.behavior.inactivity_threshold_secs == 0 {
            return Err(CoreError::Config(
                "agents.behavior.inactivity_threshold_secs must be > 0".into(),
            ));
        }
        if self.resolver.hard_cap_ms < self.resolver.debounce_ms {
            return Err(CoreError::Config(format!(
                "resolver.hard_cap_ms ({}) is shorter than resolver.debounce_ms ({})",
                self.resolver.hard_cap_ms, self.resolver.debounce_ms
            )));
        }
        if self.dispatch.retry_cap == 0 {
            return Err(CoreError::Config("dispatch.retry_cap must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.agents.motivation.tag_threshold) {
            return Err(CoreError::Config(
                "agents.motivation.tag_threshold must be within 0.0..=1.0".into(),
            ));
        }
        if self.agents.evolution.default_threshold == 0 {
            return Err(CoreError::Config(
                "agents.evolution.default_threshold must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Idle time after which a user is at risk of disengaging.
    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.agents.behavior.inactivity_threshold_secs)
    }

    /// Minimum time between two disengagement signals for one user.
    pub fn disengagement_cooldown(&self) -> Duration {
        Duration::from_secs(self.agents.behavior.disengagement_cooldown_secs)
    }

    /// Quiet period after the latest intervention before a window resolves.
    pub fn resolution_debounce(&self) -> Duration {
        Duration::from_millis(self.resolver.debounce_ms)
    }

    /// Longest a resolution window may stay open.
    pub fn resolution_hard_cap(&self) -> Duration {
        Duration::from_millis(self.resolver.hard_cap_ms)
    }

    /// Cadence of agent ticks.
    pub fn agent_tick_interval(&self) -> Duration {
        Duration::from_millis(self.agents.tick_interval_ms)
    }

    /// Total delivery attempts per plan.
    pub fn dispatch_retry_cap(&self) -> u32 {
        self.dispatch.retry_cap
    }

    /// Lifetime of agent-issued interventions.
    pub fn intervention_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.agents.intervention_ttl_secs as i64)
    }
}

/// Event ingress configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// How far in the future a timestamp may be (seconds)
    pub max_clock_skew_secs: u64,
    /// How long dedup keys are remembered (seconds).
    ///
    /// Duplicates are rejected only inside this window. Keys older than
    /// this are forgotten to bound memory, so a much later redelivery of
    /// the same key is accepted as a new event.
    pub dedup_retention_secs: u64,
    /// Maximum user id length
    pub max_user_id_len: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            max_clock_skew_secs: 300,
            dedup_retention_secs: 86_400, // 24 hours
            max_user_id_len: 256,
        }
    }
}

/// Signal bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Log every delivery at trace level
    pub trace_deliveries: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            trace_deliveries: false,
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Agents to host
    pub enabled: Vec<AgentKind>,
    /// Tick cadence (ms)
    pub tick_interval_ms: u64,
    /// Lifetime of issued interventions (seconds)
    pub intervention_ttl_secs: u64,
    pub motivation: MotivationConfig,
    pub goals: GoalConfig,
    pub behavior: BehaviorConfig,
    pub feedback: FeedbackConfig,
    pub social: SocialConfig,
    pub anchoring: AnchoringConfig,
    pub habit: HabitConfig,
    pub evolution: EvolutionConfig,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            enabled: AgentKind::ALL.to_vec(),
            tick_interval_ms: 60_000,
            intervention_ttl_secs: 3600,
            motivation: MotivationConfig::default(),
            goals: GoalConfig::default(),
            behavior: BehaviorConfig::default(),
            feedback: FeedbackConfig::default(),
            social: SocialConfig::default(),
            anchoring: AnchoringConfig::default(),
            habit: HabitConfig::default(),
            evolution: EvolutionConfig::default(),
        }
    }
}

/// Motivation mapping configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotivationConfig {
    /// Minimum score share for a motivator to become a tag
    pub tag_threshold: f64,
    /// Content ids offered to the scoring collaborator
    pub content_catalog: Vec<String>,
    /// Recommendations per intervention
    pub recommendation_limit: usize,
}

impl Default for MotivationConfig {
    fn default() -> Self {
        Self {
            tag_threshold: 0.3,
            content_catalog: Vec::new(),
            recommendation_limit: 3,
        }
    }
}

/// Goal setting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalConfig {
    /// Concurrent goals per user
    pub max_active_goals: usize,
    /// Target multiplier applied when a user is at risk
    pub easing_factor: f64,
}

impl Default for GoalConfig {
    fn default() -> Self {
        Self {
            max_active_goals: 2,
            easing_factor: 0.8,
        }
    }
}

/// Behavior monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Idle time before disengagement risk (seconds)
    pub inactivity_threshold_secs: u64,
    /// Minimum time between disengagement signals per user (seconds)
    pub disengagement_cooldown_secs: u64,
    /// EWMA smoothing factor for the engagement score
    pub engagement_smoothing: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold_secs: 7 * 86_400, // 7 days
            disengagement_cooldown_secs: 86_400,
            engagement_smoothing: 0.3,
        }
    }
}

/// Feedback loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Minimum interval between notifications of one template to one user (seconds)
    pub min_interval_secs: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 300,
        }
    }
}

/// Social dynamics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialConfig {
    /// Pair strength that forms a cohort
    pub cohort_strength_threshold: f64,
    /// Interactions required (exclusive) before a cohort forms
    pub cohort_min_interactions: u32,
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            cohort_strength_threshold: 5.0,
            cohort_min_interactions: 3,
        }
    }
}

/// Emotional anchoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchoringConfig {
    /// Time between emotional touchpoints (seconds)
    pub touchpoint_interval_secs: u64,
}

impl Default for AnchoringConfig {
    fn default() -> Self {
        Self {
            touchpoint_interval_secs: 3 * 86_400,
        }
    }
}

/// Habit formation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HabitConfig {
    /// Idle time after which a streak reminder is sent (seconds)
    pub reminder_after_secs: u64,
    /// Streak lengths that earn a badge
    pub achievements: Vec<u32>,
}

impl Default for HabitConfig {
    fn default() -> Self {
        Self {
            reminder_after_secs: 20 * 3600,
            achievements: vec![3, 7, 30, 100],
        }
    }
}

/// Evolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Rolling window for signal frequency (seconds)
    pub window_secs: u64,
    /// Signals per window that trigger an adjustment
    pub default_threshold: u32,
    /// Per-kind overrides
    pub thresholds: BTreeMap<SignalKind, u32>,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            default_threshold: 50,
            thresholds: BTreeMap::new(),
        }
    }
}

impl EvolutionConfig {
    /// Threshold for one signal kind.
    pub fn threshold_for(&self, kind: SignalKind) -> u32 {
        self.thresholds
            .get(&kind)
            .copied()
            .unwrap_or(self.default_threshold)
    }
}

/// Conflict resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Debounce after each intervention arrival (ms)
    pub debounce_ms: u64,
    /// Hard cap on a window's lifetime (ms)
    pub hard_cap_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 5000,
            hard_cap_ms: 30_000,
        }
    }
}

/// Action dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Total delivery attempts per plan
    pub retry_cap: u32,
    /// First retry delay (ms)
    pub base_backoff_ms: u64,
    /// Longest retry delay (ms)
    pub max_backoff_ms: u64,
    /// Dispatch outcomes kept in history
    pub history_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_cap: 3,
            base_backoff_ms: 200,
            max_backoff_ms: 5000,
            history_size: 1000,
        }
    }
}

impl DispatchConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let delay = self.base_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// General configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.inactivity_threshold(), Duration::from_secs(7 * 86_400));
        assert_eq!(config.resolution_debounce(), Duration::from_secs(5));
        assert_eq!(config.resolution_hard_cap(), Duration::from_secs(30));
        assert_eq!(config.agent_tick_interval(), Duration::from_secs(60));
        assert_eq!(config.dispatch_retry_cap(), 3);
        assert_eq!(config.agents.enabled.len(), 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = CoreConfig::new("test-instance");
        let yaml = config.to_yaml().unwrap();
        let parsed = CoreConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.instance_id, "test-instance");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
resolver:
  debounce_ms: 100
agents:
  evolution:
    thresholds:
      disengagement_risk: 5
"#;
        let config = CoreConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.resolver.debounce_ms, 100);
        assert_eq!(config.resolver.hard_cap_ms, 30_000);
        assert_eq!(config.agents.evolution.threshold_for(SignalKind::DisengagementRisk), 5);
        assert_eq!(config.agents.evolution.threshold_for(SignalKind::CohortMatch), 50);
    }

    #[test]
    fn test_validate_rejects_short_hard_cap() {
        let mut config = CoreConfig::default();
        config.resolver.hard_cap_ms = 10;
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.dispatch.retry_cap = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.backoff(1), Duration::from_millis(200));
        assert_eq!(dispatch.backoff(2), Duration::from_millis(400));
        assert_eq!(dispatch.backoff(10), Duration::from_millis(5000));
    }
}
