use crate::breakpoint::types::{
    BreakpointContext, BreakpointRule, BreakpointType, Condition, EvaluationMode,
    ResolutionStrategy,
};
use crate::config::BreakpointConfig;
use crate::error::{OrchestratorError, Result};
use serde_json::json;
use tracing::warn;

/// Ordered set of condition predicates evaluated against a context map.
///
/// Rules are kept sorted by descending priority; insertion order breaks
/// ties. A predicate that errors is logged, treated as non-matching, and
/// never aborts evaluation of the remaining rules.
pub struct RuleEngine {
    rules: Vec<BreakpointRule>,
    mode: EvaluationMode,
}

impl RuleEngine {
    pub fn new(mode: EvaluationMode) -> Self {
        Self {
            rules: Vec::new(),
            mode,
        }
    }

    /// Engine pre-loaded with the eight built-in rules, with per-type
    /// enabled/priority overrides from the configuration applied.
    pub fn with_builtins(config: &BreakpointConfig) -> Self {
        let mut engine = Self::new(config.evaluation_mode);
        for mut rule in builtin_rules(config) {
            if let Some(overrides) = config.rules.get(rule.breakpoint_type.name()) {
                if let Some(enabled) = overrides.enabled {
                    rule.enabled = enabled;
                }
                if let Some(priority) = overrides.priority {
                    rule.priority = priority;
                }
            }
            engine.add_rule(rule);
        }
        engine
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    pub fn add_rule(&mut self, rule: BreakpointRule) {
        self.rules.push(rule);
        // Stable sort keeps insertion order within a priority tier
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn rule(&self, breakpoint_type: &BreakpointType) -> Option<&BreakpointRule> {
        self.rules
            .iter()
            .find(|r| &r.breakpoint_type == breakpoint_type)
    }

    pub fn set_enabled(&mut self, breakpoint_type: &BreakpointType, enabled: bool) -> Result<()> {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| &r.breakpoint_type == breakpoint_type)
            .ok_or_else(|| {
                OrchestratorError::UnknownBreakpointType(breakpoint_type.name().to_string())
            })?;
        rule.enabled = enabled;
        Ok(())
    }

    /// Evaluate enabled rules in descending priority order against the
    /// context. Returns the matching rules: one for first-match mode,
    /// all of them for all-matches mode.
    pub fn evaluate(&self, ctx: &BreakpointContext) -> Vec<&BreakpointRule> {
        let mut matched = Vec::new();
        for rule in self.rules.iter().filter(|r| r.enabled) {
            match rule.condition.evaluate(ctx) {
                Ok(true) => {
                    matched.push(rule);
                    if self.mode == EvaluationMode::FirstMatch {
                        break;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(rule = %rule.breakpoint_type, error = %e, "rule predicate failed, skipping");
                }
            }
        }
        matched
    }
}

/// The eight pre-registered built-in rules, each enable/disable-able at
/// runtime. Context keys form the fixed schema the driver populates.
pub fn builtin_rules(config: &BreakpointConfig) -> Vec<BreakpointRule> {
    vec![
        BreakpointRule::new(
            BreakpointType::ArchitectureDecision,
            Condition::Eq {
                key: "requires_architecture_decision".into(),
                value: json!(true),
            },
        ),
        BreakpointRule::new(
            BreakpointType::BreakingTestFailure,
            Condition::Eq {
                key: "breaking_test_failure".into(),
                value: json!(true),
            },
        ),
        BreakpointRule::new(
            BreakpointType::ConflictingSolutions,
            Condition::Ge {
                key: "candidate_solutions".into(),
                value: 2.0,
            },
        ),
        BreakpointRule::new(
            BreakpointType::ConsecutiveFailures,
            Condition::Ge {
                key: "consecutive_failures".into(),
                value: 3.0,
            },
        ),
        BreakpointRule::new(
            BreakpointType::MilestoneCompletion,
            Condition::Eq {
                key: "milestone_completed".into(),
                value: json!(true),
            },
        ),
        BreakpointRule::new(
            BreakpointType::RateLimitHit,
            Condition::Eq {
                key: "rate_limit_hit".into(),
                value: json!(true),
            },
        )
        .with_resolution(ResolutionStrategy::WaitAndRetry {
            wait_seconds: config.rate_limit_wait_seconds,
        }),
        BreakpointRule::new(
            BreakpointType::TimeThresholdExceeded,
            Condition::Gt {
                key: "elapsed_seconds".into(),
                value: config.time_threshold_seconds as f64,
            },
        )
        .with_resolution(ResolutionStrategy::CancelTaskAndRetry),
        BreakpointRule::new(
            BreakpointType::ConfidenceTooLow,
            Condition::Lt {
                key: "confidence".into(),
                value: config.confidence_threshold,
            },
        ),
    ]
}
