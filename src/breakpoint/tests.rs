use crate::breakpoint::manager::BreakpointManager;
use crate::breakpoint::notify::NotificationDispatcher;
use crate::breakpoint::rules::RuleEngine;
use crate::breakpoint::types::{
    BreakpointContext, BreakpointEvent, BreakpointRule, BreakpointType, Condition,
    EvaluationMode, Resolution, ResolutionAction, ResolutionStrategy,
};
use crate::config::{BreakpointConfig, RuleOverride};
use crate::error::{OrchestratorError, Result};
use crate::scheduler::types::{Task, TaskId};
use crate::store::{MemoryStore, TaskStore};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn ctx(pairs: &[(&str, Value)]) -> BreakpointContext {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn manager_with(config: BreakpointConfig) -> (BreakpointManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (BreakpointManager::new(config, store.clone()), store)
}

fn default_manager() -> (BreakpointManager, Arc<MemoryStore>) {
    manager_with(BreakpointConfig::default())
}

#[test]
fn condition_missing_key_is_non_match() {
    let empty = BreakpointContext::new();
    let cases = [
        Condition::Exists { key: "k".into() },
        Condition::Eq {
            key: "k".into(),
            value: json!(true),
        },
        Condition::Ne {
            key: "k".into(),
            value: json!(1),
        },
        Condition::Gt {
            key: "k".into(),
            value: 1.0,
        },
        Condition::Contains {
            key: "k".into(),
            needle: "x".into(),
        },
    ];
    for condition in cases {
        assert_eq!(condition.evaluate(&empty).unwrap(), false, "{condition:?}");
    }
}

#[test]
fn condition_comparisons() {
    let context = ctx(&[("n", json!(3)), ("s", json!("rate limit hit")), ("flag", json!(true))]);

    assert!(Condition::Exists { key: "n".into() }.evaluate(&context).unwrap());
    assert!(
        Condition::Eq {
            key: "flag".into(),
            value: json!(true)
        }
        .evaluate(&context)
        .unwrap()
    );
    assert!(
        Condition::Ne {
            key: "n".into(),
            value: json!(4)
        }
        .evaluate(&context)
        .unwrap()
    );
    assert!(Condition::Gt { key: "n".into(), value: 2.0 }.evaluate(&context).unwrap());
    assert!(Condition::Ge { key: "n".into(), value: 3.0 }.evaluate(&context).unwrap());
    assert!(Condition::Lt { key: "n".into(), value: 4.0 }.evaluate(&context).unwrap());
    assert!(Condition::Le { key: "n".into(), value: 3.0 }.evaluate(&context).unwrap());
    assert!(
        !Condition::Gt { key: "n".into(), value: 3.0 }.evaluate(&context).unwrap()
    );
    assert!(
        Condition::Contains {
            key: "s".into(),
            needle: "limit".into()
        }
        .evaluate(&context)
        .unwrap()
    );
}

#[test]
fn condition_contains_over_arrays() {
    let context = ctx(&[("tags", json!(["urgent", "infra"]))]);
    let hit = Condition::Contains {
        key: "tags".into(),
        needle: "infra".into(),
    };
    let miss = Condition::Contains {
        key: "tags".into(),
        needle: "docs".into(),
    };
    assert!(hit.evaluate(&context).unwrap());
    assert!(!miss.evaluate(&context).unwrap());
}

#[test]
fn condition_type_mismatch_is_an_error() {
    let context = ctx(&[("n", json!("not a number")), ("obj", json!({"a": 1}))]);

    let numeric = Condition::Gt { key: "n".into(), value: 1.0 };
    assert!(matches!(
        numeric.evaluate(&context),
        Err(OrchestratorError::RuleEvaluationFailure { .. })
    ));

    let contains = Condition::Contains {
        key: "obj".into(),
        needle: "a".into(),
    };
    assert!(matches!(
        contains.evaluate(&context),
        Err(OrchestratorError::RuleEvaluationFailure { .. })
    ));
}

#[test]
fn condition_combinators() {
    let context = ctx(&[("a", json!(1)), ("b", json!(2)), ("s", json!("text"))]);

    let all = Condition::All(vec![
        Condition::Exists { key: "a".into() },
        Condition::Gt { key: "b".into(), value: 1.0 },
    ]);
    assert!(all.evaluate(&context).unwrap());

    let any = Condition::Any(vec![
        Condition::Exists { key: "missing".into() },
        Condition::Exists { key: "a".into() },
    ]);
    assert!(any.evaluate(&context).unwrap());

    let not = Condition::Not(Box::new(Condition::Exists { key: "missing".into() }));
    assert!(not.evaluate(&context).unwrap());

    // Short-circuit: All stops at the first false before the erroring arm
    let short = Condition::All(vec![
        Condition::Exists { key: "missing".into() },
        Condition::Gt { key: "s".into(), value: 1.0 },
    ]);
    assert!(!short.evaluate(&context).unwrap());
}

#[test]
fn engine_evaluates_in_descending_priority() {
    let mut engine = RuleEngine::new(EvaluationMode::AllMatches);
    engine.add_rule(
        BreakpointRule::new(
            BreakpointType::Custom("low".into()),
            Condition::Exists { key: "hit".into() },
        )
        .with_priority(10),
    );
    engine.add_rule(
        BreakpointRule::new(
            BreakpointType::Custom("high".into()),
            Condition::Exists { key: "hit".into() },
        )
        .with_priority(90),
    );

    let matched = engine.evaluate(&ctx(&[("hit", json!(true))]));
    let names: Vec<&str> = matched.iter().map(|r| r.breakpoint_type.name()).collect();
    assert_eq!(names, vec!["high", "low"]);
}

#[test]
fn engine_first_match_stops_at_highest_priority() {
    let config = BreakpointConfig::default();
    let engine = RuleEngine::with_builtins(&config);

    // Matches both the architecture rule (high) and the confidence
    // rule (medium); first-match keeps only the former.
    let context = ctx(&[
        ("requires_architecture_decision", json!(true)),
        ("confidence", json!(0.1)),
    ]);
    let matched = engine.evaluate(&context);
    assert_eq!(matched.len(), 1);
    assert_eq!(
        matched[0].breakpoint_type,
        BreakpointType::ArchitectureDecision
    );
}

#[test]
fn engine_skips_erroring_predicate_and_continues() {
    let mut engine = RuleEngine::new(EvaluationMode::AllMatches);
    engine.add_rule(
        BreakpointRule::new(
            BreakpointType::Custom("broken".into()),
            Condition::Gt { key: "text".into(), value: 1.0 },
        )
        .with_priority(90),
    );
    engine.add_rule(
        BreakpointRule::new(
            BreakpointType::Custom("sound".into()),
            Condition::Exists { key: "text".into() },
        )
        .with_priority(10),
    );

    let matched = engine.evaluate(&ctx(&[("text", json!("oops"))]));
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].breakpoint_type.name(), "sound");
}

#[test]
fn config_overrides_apply_to_builtins() {
    let mut config = BreakpointConfig::default();
    config.rules.insert(
        "milestone_completion".into(),
        RuleOverride {
            enabled: Some(false),
            priority: Some(95),
        },
    );
    let engine = RuleEngine::with_builtins(&config);

    let rule = engine.rule(&BreakpointType::MilestoneCompletion).unwrap();
    assert!(!rule.enabled);
    assert_eq!(rule.priority, 95);

    let matched = engine.evaluate(&ctx(&[("milestone_completed", json!(true))]));
    assert!(matched.is_empty(), "disabled rule must not match");
}

#[tokio::test]
async fn evaluate_conditions_creates_pending_event() {
    let (manager, _) = default_manager();
    let events = manager
        .evaluate_breakpoint_conditions(
            "proj",
            &ctx(&[("requires_architecture_decision", json!(true))]),
        )
        .await
        .unwrap();

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.breakpoint_type, BreakpointType::ArchitectureDecision);
    assert!(!event.is_resolved());

    let pending = manager.pending_events().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, event.id);
}

#[tokio::test]
async fn all_matches_mode_triggers_every_match() {
    let config = BreakpointConfig {
        evaluation_mode: EvaluationMode::AllMatches,
        ..Default::default()
    };
    let (manager, _) = manager_with(config);

    let events = manager
        .evaluate_breakpoint_conditions(
            "proj",
            &ctx(&[
                ("requires_architecture_decision", json!(true)),
                ("confidence", json!(0.1)),
            ]),
        )
        .await
        .unwrap();

    assert_eq!(events.len(), 2);
    assert!(events[0].priority > events[1].priority);
    assert_eq!(
        events[0].breakpoint_type,
        BreakpointType::ArchitectureDecision
    );
    assert_eq!(events[1].breakpoint_type, BreakpointType::ConfidenceTooLow);
}

#[tokio::test]
async fn unmatched_context_triggers_nothing() {
    let (manager, _) = default_manager();
    let events = manager
        .evaluate_breakpoint_conditions("proj", &ctx(&[("confidence", json!(0.9))]))
        .await
        .unwrap();
    assert!(events.is_empty());
    assert!(manager.pending_events().await.is_empty());
}

#[tokio::test]
async fn manual_resolution_and_double_resolution() {
    let (manager, _) = default_manager();
    let event = manager
        .trigger_breakpoint(
            BreakpointType::ArchitectureDecision,
            "proj",
            BreakpointContext::new(),
        )
        .await
        .unwrap();

    let resolved = manager
        .resolve_breakpoint(event.id, Resolution::proceed())
        .await
        .unwrap();
    assert!(resolved.is_resolved());
    assert!(!resolved.auto_resolved);
    assert_eq!(
        resolved.resolution.as_ref().map(|r| &r.action),
        Some(&ResolutionAction::Proceed)
    );
    assert!(manager.pending_events().await.is_empty());

    let again = manager
        .resolve_breakpoint(event.id, Resolution::proceed())
        .await;
    assert!(matches!(
        again,
        Err(OrchestratorError::EventAlreadyResolved(id)) if id == event.id
    ));

    let unknown = manager
        .resolve_breakpoint(Uuid::new_v4(), Resolution::proceed())
        .await;
    assert!(matches!(unknown, Err(OrchestratorError::EventNotFound(_))));
}

#[tokio::test]
async fn unregistered_type_cannot_trigger() {
    let (manager, _) = default_manager();
    let result = manager
        .trigger_breakpoint(
            BreakpointType::Custom("deploy_gate".into()),
            "proj",
            BreakpointContext::new(),
        )
        .await;
    assert!(matches!(
        result,
        Err(OrchestratorError::UnknownBreakpointType(name)) if name == "deploy_gate"
    ));
}

#[tokio::test]
async fn custom_rule_registers_and_fires() {
    let (manager, _) = default_manager();
    manager
        .add_custom_rule(
            BreakpointRule::new(
                BreakpointType::Custom("deploy_gate".into()),
                Condition::Eq {
                    key: "awaiting_deploy_approval".into(),
                    value: json!(true),
                },
            )
            .with_priority(85),
        )
        .await;

    let events = manager
        .evaluate_breakpoint_conditions(
            "proj",
            &ctx(&[("awaiting_deploy_approval", json!(true))]),
        )
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].breakpoint_type.name(), "deploy_gate");
    assert_eq!(events[0].priority, 85);
}

#[tokio::test]
async fn disabled_type_is_skipped_until_reenabled() {
    let (manager, _) = default_manager();
    let context = ctx(&[("breaking_test_failure", json!(true))]);

    // One trigger lands in history before the type is disabled
    manager
        .evaluate_breakpoint_conditions("proj", &context)
        .await
        .unwrap();

    manager
        .disable_breakpoint_type(&BreakpointType::BreakingTestFailure)
        .await
        .unwrap();
    let events = manager
        .evaluate_breakpoint_conditions("proj", &context)
        .await
        .unwrap();
    assert!(events.is_empty());

    // Disabling removes the type from evaluation, not from history
    let stats = manager.get_breakpoint_stats("proj").await.unwrap();
    assert_eq!(stats["breaking_test_failure"].triggered, 1);

    manager
        .enable_breakpoint_type(&BreakpointType::BreakingTestFailure)
        .await
        .unwrap();
    let events = manager
        .evaluate_breakpoint_conditions("proj", &context)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);

    let missing = manager
        .disable_breakpoint_type(&BreakpointType::Custom("ghost".into()))
        .await;
    assert!(matches!(
        missing,
        Err(OrchestratorError::UnknownBreakpointType(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn rate_limit_auto_resolves_after_wait() {
    let (manager, store) = default_manager();
    let events = manager
        .evaluate_breakpoint_conditions("proj", &ctx(&[("rate_limit_hit", json!(true))]))
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    let event_id = events[0].id;
    assert_eq!(manager.pending_events().await.len(), 1);

    // Default wait is 30s; the timer resolves without external input
    tokio::time::sleep(std::time::Duration::from_secs(31)).await;

    assert!(manager.pending_events().await.is_empty());
    let history = store.load_breakpoint_history("proj", None).await.unwrap();
    let resolved = history.iter().find(|e| e.id == event_id).unwrap();
    assert!(resolved.auto_resolved);
    assert_eq!(
        resolved.resolution.as_ref().map(|r| &r.action),
        Some(&ResolutionAction::Retry)
    );
}

#[tokio::test]
async fn time_threshold_cancels_task_and_signals_retry() {
    let (manager, _) = default_manager();
    let task_id = Uuid::new_v4();
    let events = manager
        .evaluate_breakpoint_conditions(
            "proj",
            &ctx(&[
                ("elapsed_seconds", json!(2400)),
                ("task_id", json!(task_id.to_string())),
            ]),
        )
        .await
        .unwrap();

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.breakpoint_type, BreakpointType::TimeThresholdExceeded);
    assert!(event.is_resolved(), "strategy resolves inline");
    assert!(event.auto_resolved);
    let resolution = event.resolution.as_ref().unwrap();
    assert_eq!(
        resolution.action,
        ResolutionAction::CancelTask {
            task_id: Some(task_id)
        }
    );
    assert_eq!(resolution.payload, Some(json!({ "retry": true })));
    assert!(manager.pending_events().await.is_empty());
}

#[tokio::test]
async fn high_priority_notifies_immediately_low_batches() {
    let (manager, _) = default_manager();
    let received: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    manager
        .register_notification_callback(Arc::new(move |event, batched| {
            if let Ok(mut log) = sink.lock() {
                log.push((event.breakpoint_type.name().to_string(), batched));
            }
        }))
        .await;

    manager
        .trigger_breakpoint(
            BreakpointType::ArchitectureDecision,
            "proj",
            BreakpointContext::new(),
        )
        .await
        .unwrap();
    assert_eq!(
        received.lock().unwrap().as_slice(),
        &[("architecture_decision".to_string(), false)]
    );

    manager
        .trigger_breakpoint(
            BreakpointType::MilestoneCompletion,
            "proj",
            BreakpointContext::new(),
        )
        .await
        .unwrap();
    // Medium priority is queued, not delivered
    assert_eq!(received.lock().unwrap().len(), 1);

    let flushed = manager.flush_batched().await;
    assert_eq!(flushed, 1);
    let log = received.lock().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1], ("milestone_completion".to_string(), true));
}

#[tokio::test]
async fn should_notify_follows_priority_threshold() {
    let (manager, _) = default_manager();
    assert!(
        manager
            .should_notify(&BreakpointType::ArchitectureDecision, None)
            .await
            .unwrap()
    );
    assert!(
        !manager
            .should_notify(&BreakpointType::ConfidenceTooLow, None)
            .await
            .unwrap()
    );

    // An explicit severity overrides the rule's registered priority
    assert!(
        manager
            .should_notify(&BreakpointType::ConfidenceTooLow, Some(90))
            .await
            .unwrap()
    );
    assert!(
        !manager
            .should_notify(&BreakpointType::ArchitectureDecision, Some(10))
            .await
            .unwrap()
    );

    assert!(NotificationDispatcher::should_notify_immediately(70));
    assert!(!NotificationDispatcher::should_notify_immediately(69));
}

#[tokio::test]
async fn stats_aggregate_from_history() {
    let (manager, _) = default_manager();

    let first = manager
        .trigger_breakpoint(
            BreakpointType::ArchitectureDecision,
            "proj",
            BreakpointContext::new(),
        )
        .await
        .unwrap();
    manager
        .trigger_breakpoint(
            BreakpointType::ArchitectureDecision,
            "proj",
            BreakpointContext::new(),
        )
        .await
        .unwrap();
    manager
        .resolve_breakpoint(first.id, Resolution::proceed())
        .await
        .unwrap();

    let stats = manager.get_breakpoint_stats("proj").await.unwrap();
    let arch = &stats["architecture_decision"];
    assert_eq!(arch.triggered, 2);
    assert_eq!(arch.resolved, 1);
    assert_eq!(arch.auto_resolved, 0);
    assert!(arch.mean_resolution_seconds.is_some());

    // Other projects have no history here
    let other = manager.get_breakpoint_stats("elsewhere").await.unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
async fn custom_wait_and_retry_rule_uses_its_own_wait() {
    let (manager, _) = default_manager();
    manager
        .add_custom_rule(
            BreakpointRule::new(
                BreakpointType::Custom("quota_exceeded".into()),
                Condition::Exists { key: "quota_exceeded".into() },
            )
            .with_resolution(ResolutionStrategy::WaitAndRetry { wait_seconds: 5 }),
        )
        .await;

    let event = manager
        .trigger_breakpoint(
            BreakpointType::Custom("quota_exceeded".into()),
            "proj",
            ctx(&[("quota_exceeded", json!(true))]),
        )
        .await
        .unwrap();
    assert!(!event.is_resolved(), "wait strategy resolves later");
    assert_eq!(manager.pending_events().await.len(), 1);
}

/// Store double that rejects the next event write, then recovers.
struct FlakyEventStore {
    inner: MemoryStore,
    fail_next_save: AtomicBool,
}

impl FlakyEventStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_next_save: AtomicBool::new(false),
        }
    }

    fn trip(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskStore for FlakyEventStore {
    async fn save_task(&self, task: &Task) -> Result<()> {
        self.inner.save_task(task).await
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.inner.load_task(id).await
    }

    async fn save_breakpoint_event(&self, event: &BreakpointEvent) -> Result<()> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(OrchestratorError::Store("injected write failure".into()));
        }
        self.inner.save_breakpoint_event(event).await
    }

    async fn load_breakpoint_history(
        &self,
        project_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<BreakpointEvent>> {
        self.inner.load_breakpoint_history(project_id, limit).await
    }
}

#[tokio::test]
async fn store_write_failure_keeps_event_pending() {
    let store = Arc::new(FlakyEventStore::new());
    let manager = BreakpointManager::new(BreakpointConfig::default(), store.clone());
    let event = manager
        .trigger_breakpoint(
            BreakpointType::ArchitectureDecision,
            "proj",
            BreakpointContext::new(),
        )
        .await
        .unwrap();

    store.trip();
    let result = manager
        .resolve_breakpoint(event.id, Resolution::proceed())
        .await;
    assert!(matches!(result, Err(OrchestratorError::Store(_))));

    // Nothing committed: the event is still pending and the durable
    // history still shows it unresolved
    assert_eq!(manager.pending_events().await.len(), 1);
    let history = store.load_breakpoint_history("proj", None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].is_resolved());

    let resolved = manager
        .resolve_breakpoint(event.id, Resolution::proceed())
        .await
        .unwrap();
    assert!(resolved.is_resolved());
    assert!(manager.pending_events().await.is_empty());
    let history = store.load_breakpoint_history("proj", None).await.unwrap();
    assert!(history[0].is_resolved());
}

#[test]
fn breakpoint_type_serde_names() {
    let rate: BreakpointType = serde_json::from_value(json!("rate_limit_hit")).unwrap();
    assert_eq!(rate, BreakpointType::RateLimitHit);

    let custom: BreakpointType = serde_json::from_value(json!("deploy_gate")).unwrap();
    assert_eq!(custom, BreakpointType::Custom("deploy_gate".into()));

    assert_eq!(
        serde_json::to_value(&BreakpointType::TimeThresholdExceeded).unwrap(),
        json!("time_threshold_exceeded")
    );
}

#[test]
fn resolution_latency_reported_only_when_resolved() {
    let mut event = crate::breakpoint::types::BreakpointEvent::new(
        BreakpointType::ConfidenceTooLow,
        50,
        "proj",
        BreakpointContext::new(),
    );
    assert!(event.resolution_latency().is_none());
    event.resolved_at = Some(event.triggered_at + chrono::Duration::seconds(12));
    assert_eq!(
        event.resolution_latency().map(|d| d.num_seconds()),
        Some(12)
    );
}

#[test]
fn manager_is_clone_send_sync() {
    fn check<T: Clone + Send + Sync>() {}
    check::<BreakpointManager>();
}
