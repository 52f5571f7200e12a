//! Condition-driven breakpoint and escalation subsystem.
//!
//! The [`BreakpointManager`] facade composes the rule engine, the
//! auto-resolver, the notification dispatcher, and the analytics
//! ledger. Rules are pure predicates over a context map; the first (or
//! every) matching rule triggers an event the outer driver must honor
//! before continuing.

pub mod manager;
pub mod notify;
pub mod rules;
pub mod types;

#[cfg(test)]
mod tests;

pub use manager::BreakpointManager;
pub use notify::{NotificationCallback, NotificationDispatcher};
pub use rules::{RuleEngine, builtin_rules};
pub use types::{
    BreakpointContext, BreakpointEvent, BreakpointRule, BreakpointStats, BreakpointType,
    Condition, EvaluationMode, Resolution, ResolutionAction, ResolutionStrategy,
};
