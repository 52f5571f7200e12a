use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Run-time context snapshot a rule set is evaluated against
pub type BreakpointContext = HashMap<String, Value>;

/// Rule priorities at or above this value are dispatched immediately;
/// everything below is queued for batched delivery.
pub const IMMEDIATE_PRIORITY: u8 = 70;

pub const HIGH_PRIORITY: u8 = 80;
pub const MEDIUM_PRIORITY: u8 = 50;

/// Named conditions that pause or escalate the pipeline
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointType {
    ArchitectureDecision,
    BreakingTestFailure,
    ConflictingSolutions,
    MilestoneCompletion,
    RateLimitHit,
    TimeThresholdExceeded,
    ConfidenceTooLow,
    ConsecutiveFailures,
    #[serde(untagged)]
    Custom(String),
}

impl BreakpointType {
    pub fn name(&self) -> &str {
        match self {
            BreakpointType::ArchitectureDecision => "architecture_decision",
            BreakpointType::BreakingTestFailure => "breaking_test_failure",
            BreakpointType::ConflictingSolutions => "conflicting_solutions",
            BreakpointType::MilestoneCompletion => "milestone_completion",
            BreakpointType::RateLimitHit => "rate_limit_hit",
            BreakpointType::TimeThresholdExceeded => "time_threshold_exceeded",
            BreakpointType::ConfidenceTooLow => "confidence_too_low",
            BreakpointType::ConsecutiveFailures => "consecutive_failures",
            BreakpointType::Custom(name) => name,
        }
    }

    /// Fixed default priority tier for the built-ins
    pub fn default_priority(&self) -> u8 {
        match self {
            BreakpointType::ArchitectureDecision
            | BreakpointType::BreakingTestFailure
            | BreakpointType::ConflictingSolutions
            | BreakpointType::ConsecutiveFailures => HIGH_PRIORITY,
            _ => MEDIUM_PRIORITY,
        }
    }

    /// Only the rate-limit and time-threshold built-ins auto-resolve
    pub fn auto_resolves_by_default(&self) -> bool {
        matches!(
            self,
            BreakpointType::RateLimitHit | BreakpointType::TimeThresholdExceeded
        )
    }
}

impl std::fmt::Display for BreakpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether one rule or every matching rule fires per evaluation pass
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Only the highest-priority matching rule triggers (default)
    #[default]
    FirstMatch,
    /// Every matching rule triggers, in descending priority order
    AllMatches,
}

/// Closed predicate abstraction over the context map.
///
/// A restricted typed AST instead of dynamic expression evaluation: the
/// host composes comparisons and combinators, nothing here executes
/// arbitrary code. A missing key is a non-match; a type-mismatched
/// comparison is an evaluation failure the engine logs and skips.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Exists { key: String },
    Eq { key: String, value: Value },
    Ne { key: String, value: Value },
    Gt { key: String, value: f64 },
    Ge { key: String, value: f64 },
    Lt { key: String, value: f64 },
    Le { key: String, value: f64 },
    Contains { key: String, needle: String },
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn evaluate(&self, ctx: &BreakpointContext) -> Result<bool> {
        match self {
            Condition::Exists { key } => Ok(ctx.contains_key(key)),
            Condition::Eq { key, value } => Ok(ctx.get(key) == Some(value)),
            Condition::Ne { key, value } => {
                Ok(ctx.get(key).map(|v| v != value).unwrap_or(false))
            }
            Condition::Gt { key, value } => self.compare(ctx, key, |n| n > *value),
            Condition::Ge { key, value } => self.compare(ctx, key, |n| n >= *value),
            Condition::Lt { key, value } => self.compare(ctx, key, |n| n < *value),
            Condition::Le { key, value } => self.compare(ctx, key, |n| n <= *value),
            Condition::Contains { key, needle } => match ctx.get(key) {
                None => Ok(false),
                Some(Value::String(s)) => Ok(s.contains(needle)),
                Some(Value::Array(items)) => {
                    Ok(items.iter().any(|v| v.as_str() == Some(needle)))
                }
                Some(other) => Err(self.type_error(key, "string or array", other)),
            },
            Condition::All(conditions) => {
                for condition in conditions {
                    if !condition.evaluate(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any(conditions) => {
                for condition in conditions {
                    if condition.evaluate(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(inner) => Ok(!inner.evaluate(ctx)?),
        }
    }

    fn compare<F>(&self, ctx: &BreakpointContext, key: &str, cmp: F) -> Result<bool>
    where
        F: Fn(f64) -> bool,
    {
        match ctx.get(key) {
            None => Ok(false),
            Some(value) => match value.as_f64() {
                Some(n) => Ok(cmp(n)),
                None => Err(self.type_error(key, "number", value)),
            },
        }
    }

    fn type_error(&self, key: &str, expected: &str, got: &Value) -> OrchestratorError {
        OrchestratorError::RuleEvaluationFailure {
            rule: key.to_string(),
            message: format!("expected {expected}, got {got}"),
        }
    }
}

/// Built-in strategies executed without external input
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Wait the configured duration, then resolve with a retry signal
    WaitAndRetry { wait_seconds: u64 },
    /// Mark the associated task for cancellation, then resolve with a
    /// retry signal
    CancelTaskAndRetry,
}

/// What the driver should do once an event is resolved
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    Retry,
    CancelTask { task_id: Option<Uuid> },
    Proceed,
    Abort,
}

/// Resolution payload recorded on the event
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Resolution {
    pub action: ResolutionAction,
    pub note: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl Resolution {
    pub fn retry(note: impl Into<String>) -> Self {
        Self {
            action: ResolutionAction::Retry,
            note: Some(note.into()),
            payload: None,
        }
    }

    pub fn proceed() -> Self {
        Self {
            action: ResolutionAction::Proceed,
            note: None,
            payload: None,
        }
    }
}

/// An ordered condition predicate in the rule set
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BreakpointRule {
    pub breakpoint_type: BreakpointType,
    /// Ordering weight; higher priorities are checked first
    pub priority: u8,
    pub condition: Condition,
    pub auto_resolve: bool,
    pub resolution: Option<ResolutionStrategy>,
    pub enabled: bool,
}

impl BreakpointRule {
    pub fn new(breakpoint_type: BreakpointType, condition: Condition) -> Self {
        let priority = breakpoint_type.default_priority();
        let auto_resolve = breakpoint_type.auto_resolves_by_default();
        Self {
            breakpoint_type,
            priority,
            condition,
            auto_resolve,
            resolution: None,
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_resolution(mut self, strategy: ResolutionStrategy) -> Self {
        self.auto_resolve = true;
        self.resolution = Some(strategy);
        self
    }
}

/// Triggered breakpoint, retained indefinitely in the history ledger.
/// Mutated exactly once, on resolution.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BreakpointEvent {
    pub id: Uuid,
    pub breakpoint_type: BreakpointType,
    pub priority: u8,
    pub project_id: String,
    pub context: BreakpointContext,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<Resolution>,
    pub auto_resolved: bool,
}

impl BreakpointEvent {
    pub fn new(
        breakpoint_type: BreakpointType,
        priority: u8,
        project_id: impl Into<String>,
        context: BreakpointContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            breakpoint_type,
            priority,
            project_id: project_id.into(),
            context,
            triggered_at: Utc::now(),
            resolved_at: None,
            resolution: None,
            auto_resolved: false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Time from trigger to resolution, if resolved
    pub fn resolution_latency(&self) -> Option<chrono::Duration> {
        self.resolved_at
            .map(|resolved| resolved.signed_duration_since(self.triggered_at))
    }
}

/// Per-type analytics aggregated from the history ledger
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BreakpointStats {
    pub triggered: u64,
    pub resolved: u64,
    pub auto_resolved: u64,
    pub mean_resolution_seconds: Option<f64>,
}
