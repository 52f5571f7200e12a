use crate::breakpoint::types::EvaluationMode;
use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Policy applied to dependents when a task fails terminally.
///
/// The default leaves dependents blocked; they surface as unresolved
/// dependencies on the next resolution attempt and must be handled by
/// the driver. Cascade cancellation is opt-in.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    LeaveBlocked,
    CascadeCancel,
}

/// Scheduler tuning knobs
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Base delay for exponential retry backoff
    pub base_retry_delay_seconds: u64,
    /// Default retry budget for tasks that do not specify one
    pub max_retries: u32,
    /// Deadlines closer than this window earn the +2 priority boost
    pub deadline_boost_window_seconds: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_retry_delay_seconds: 60,
            max_retries: 3,
            deadline_boost_window_seconds: 3600,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Per-type rule override applied over the built-in defaults
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct RuleOverride {
    pub enabled: Option<bool>,
    pub priority: Option<u8>,
}

/// Breakpoint subsystem tuning knobs
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct BreakpointConfig {
    pub evaluation_mode: EvaluationMode,
    /// Wait applied by the rate-limit auto-resolution strategy
    pub rate_limit_wait_seconds: u64,
    /// Elapsed-time ceiling checked by the time-threshold rule
    pub time_threshold_seconds: u64,
    /// Confidence floor checked by the low-confidence rule
    pub confidence_threshold: f64,
    /// Overrides keyed by breakpoint type name, e.g. "rate_limit_hit"
    pub rules: HashMap<String, RuleOverride>,
}

impl Default for BreakpointConfig {
    fn default() -> Self {
        Self {
            evaluation_mode: EvaluationMode::default(),
            rate_limit_wait_seconds: 30,
            time_threshold_seconds: 1800,
            confidence_threshold: 0.5,
            rules: HashMap::new(),
        }
    }
}

/// Full recognized configuration surface for the engine
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub scheduler: SchedulerConfig,
    pub breakpoints: BreakpointConfig,
}

impl OrchestratorConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| OrchestratorError::Config(e.to_string()))
    }
}
