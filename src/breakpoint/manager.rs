use crate::breakpoint::notify::{NotificationCallback, NotificationDispatcher};
use crate::breakpoint::rules::RuleEngine;
use crate::breakpoint::types::{
    BreakpointContext, BreakpointEvent, BreakpointRule, BreakpointStats, BreakpointType,
    Resolution, ResolutionAction, ResolutionStrategy,
};
use crate::config::BreakpointConfig;
use crate::error::{OrchestratorError, Result};
use crate::store::TaskStore;
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Breakpoint subsystem facade: rule engine, auto-resolver, notification
/// dispatcher, and the append-only history ledger behind one lock.
///
/// Triggers may arrive concurrently from multiple task completions and
/// failures; every mutating entry point takes the write lock for its
/// full duration.
#[derive(Clone)]
pub struct BreakpointManager {
    inner: Arc<RwLock<BreakpointInner>>,
    store: Arc<dyn TaskStore>,
    config: BreakpointConfig,
}

struct BreakpointInner {
    engine: RuleEngine,
    pending: HashMap<Uuid, BreakpointEvent>,
    resolved: HashSet<Uuid>,
    dispatcher: NotificationDispatcher,
}

impl BreakpointManager {
    pub fn new(config: BreakpointConfig, store: Arc<dyn TaskStore>) -> Self {
        let engine = RuleEngine::with_builtins(&config);
        Self {
            inner: Arc::new(RwLock::new(BreakpointInner {
                engine,
                pending: HashMap::new(),
                resolved: HashSet::new(),
                dispatcher: NotificationDispatcher::new(),
            })),
            store,
            config,
        }
    }

    /// Evaluate enabled rules against the context and trigger every
    /// match permitted by the evaluation mode. Returns the created
    /// events; an empty vec means nothing fired.
    pub async fn evaluate_breakpoint_conditions(
        &self,
        project_id: &str,
        ctx: &BreakpointContext,
    ) -> Result<Vec<BreakpointEvent>> {
        let mut inner = self.inner.write().await;
        let matched: Vec<BreakpointRule> =
            inner.engine.evaluate(ctx).into_iter().cloned().collect();

        let mut events = Vec::with_capacity(matched.len());
        for rule in matched {
            let event = self
                .trigger_locked(&mut inner, &rule, project_id, ctx.clone())
                .await?;
            events.push(event);
        }
        Ok(events)
    }

    /// Trigger a breakpoint of the given type directly, bypassing
    /// condition evaluation. The type must be registered.
    pub async fn trigger_breakpoint(
        &self,
        breakpoint_type: BreakpointType,
        project_id: &str,
        ctx: BreakpointContext,
    ) -> Result<BreakpointEvent> {
        let mut inner = self.inner.write().await;
        let rule = inner.engine.rule(&breakpoint_type).cloned().ok_or_else(|| {
            OrchestratorError::UnknownBreakpointType(breakpoint_type.name().to_string())
        })?;
        self.trigger_locked(&mut inner, &rule, project_id, ctx).await
    }

    async fn trigger_locked(
        &self,
        inner: &mut BreakpointInner,
        rule: &BreakpointRule,
        project_id: &str,
        ctx: BreakpointContext,
    ) -> Result<BreakpointEvent> {
        let event = BreakpointEvent::new(
            rule.breakpoint_type.clone(),
            rule.priority,
            project_id,
            ctx,
        );
        info!(
            breakpoint = %event.breakpoint_type,
            event = %event.id,
            project = project_id,
            "breakpoint triggered"
        );

        self.store.save_breakpoint_event(&event).await?;
        inner.pending.insert(event.id, event.clone());
        inner.dispatcher.dispatch(&event);

        if rule.auto_resolve {
            match rule.resolution.clone() {
                Some(ResolutionStrategy::WaitAndRetry { wait_seconds }) => {
                    self.spawn_wait_and_retry(event.id, wait_seconds);
                }
                Some(ResolutionStrategy::CancelTaskAndRetry) => {
                    let task_id = event
                        .context
                        .get("task_id")
                        .and_then(|v| v.as_str())
                        .and_then(|s| Uuid::parse_str(s).ok());
                    let resolution = Resolution {
                        action: ResolutionAction::CancelTask { task_id },
                        note: Some("time threshold exceeded, cancel and retry".to_string()),
                        payload: Some(json!({ "retry": true })),
                    };
                    let resolved = self
                        .resolve_locked(inner, event.id, resolution, true)
                        .await?;
                    return Ok(resolved);
                }
                None => {
                    let resolved = self
                        .resolve_locked(inner, event.id, Resolution::proceed(), true)
                        .await?;
                    return Ok(resolved);
                }
            }
        }

        Ok(event)
    }

    /// Non-blocking deferral: no caller thread is held idle while the
    /// rate-limit wait elapses.
    fn spawn_wait_and_retry(&self, event_id: Uuid, wait_seconds: u64) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(wait_seconds)).await;
            let resolution = Resolution::retry("rate limit wait elapsed");
            match manager.resolve_auto(event_id, resolution).await {
                Ok(_) => debug!(event = %event_id, "auto-resolved after rate limit wait"),
                Err(e) => debug!(event = %event_id, error = %e, "auto-resolution skipped"),
            }
        });
    }

    /// Resolve a pending event by external decision. Double resolution
    /// is rejected.
    pub async fn resolve_breakpoint(
        &self,
        event_id: Uuid,
        resolution: Resolution,
    ) -> Result<BreakpointEvent> {
        let mut inner = self.inner.write().await;
        self.resolve_locked(&mut inner, event_id, resolution, false)
            .await
    }

    async fn resolve_auto(&self, event_id: Uuid, resolution: Resolution) -> Result<BreakpointEvent> {
        let mut inner = self.inner.write().await;
        self.resolve_locked(&mut inner, event_id, resolution, true)
            .await
    }

    async fn resolve_locked(
        &self,
        inner: &mut BreakpointInner,
        event_id: Uuid,
        resolution: Resolution,
        auto: bool,
    ) -> Result<BreakpointEvent> {
        let mut event = match inner.pending.get(&event_id) {
            Some(event) => event.clone(),
            None if inner.resolved.contains(&event_id) => {
                return Err(OrchestratorError::EventAlreadyResolved(event_id));
            }
            None => return Err(OrchestratorError::EventNotFound(event_id)),
        };

        event.resolved_at = Some(Utc::now());
        event.resolution = Some(resolution);
        event.auto_resolved = auto;

        // The event stays pending until the write-through succeeds, so
        // a store failure leaves the resolution retryable.
        self.store.save_breakpoint_event(&event).await?;
        inner.pending.remove(&event_id);
        inner.resolved.insert(event_id);
        inner.dispatcher.dispatch(&event);
        info!(event = %event_id, auto, "breakpoint resolved");
        Ok(event)
    }

    /// Register a custom rule at runtime. Custom types become valid
    /// trigger targets once registered.
    pub async fn add_custom_rule(&self, rule: BreakpointRule) {
        let mut inner = self.inner.write().await;
        debug!(breakpoint = %rule.breakpoint_type, priority = rule.priority, "registered custom rule");
        inner.engine.add_rule(rule);
    }

    pub async fn enable_breakpoint_type(&self, breakpoint_type: &BreakpointType) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.engine.set_enabled(breakpoint_type, true)
    }

    /// Disabling skips the predicate during evaluation; already-triggered
    /// events of the type stay pending until resolved.
    pub async fn disable_breakpoint_type(&self, breakpoint_type: &BreakpointType) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.engine.set_enabled(breakpoint_type, false)
    }

    /// Whether a trigger of this type is dispatched immediately rather
    /// than queued for batched delivery. An explicit severity overrides
    /// the rule's registered priority for this check.
    pub async fn should_notify(
        &self,
        breakpoint_type: &BreakpointType,
        severity: Option<u8>,
    ) -> Result<bool> {
        let inner = self.inner.read().await;
        let rule = inner.engine.rule(breakpoint_type).ok_or_else(|| {
            OrchestratorError::UnknownBreakpointType(breakpoint_type.name().to_string())
        })?;
        Ok(NotificationDispatcher::should_notify_immediately(
            severity.unwrap_or(rule.priority),
        ))
    }

    pub async fn register_notification_callback(&self, callback: NotificationCallback) {
        let mut inner = self.inner.write().await;
        inner.dispatcher.register(callback);
    }

    /// Deliver queued low-priority notifications. Returns how many were
    /// flushed.
    pub async fn flush_batched(&self) -> usize {
        let mut inner = self.inner.write().await;
        inner.dispatcher.flush()
    }

    /// Unresolved events, newest last
    pub async fn pending_events(&self) -> Vec<BreakpointEvent> {
        let inner = self.inner.read().await;
        let mut events: Vec<BreakpointEvent> = inner.pending.values().cloned().collect();
        events.sort_by_key(|e| e.triggered_at);
        events
    }

    /// Per-type analytics aggregated from the durable history ledger,
    /// never from the ephemeral pending set.
    pub async fn get_breakpoint_stats(
        &self,
        project_id: &str,
    ) -> Result<HashMap<String, BreakpointStats>> {
        let history = self.store.load_breakpoint_history(project_id, None).await?;
        let mut stats: HashMap<String, BreakpointStats> = HashMap::new();
        let mut latencies: HashMap<String, Vec<f64>> = HashMap::new();

        for event in &history {
            let name = event.breakpoint_type.name().to_string();
            let entry = stats.entry(name.clone()).or_default();
            entry.triggered += 1;
            if event.is_resolved() {
                entry.resolved += 1;
                if event.auto_resolved {
                    entry.auto_resolved += 1;
                }
                if let Some(latency) = event.resolution_latency() {
                    latencies
                        .entry(name)
                        .or_default()
                        .push(latency.num_milliseconds() as f64 / 1000.0);
                }
            }
        }

        for (name, samples) in latencies {
            if let Some(entry) = stats.get_mut(&name) {
                if !samples.is_empty() {
                    entry.mean_resolution_seconds =
                        Some(samples.iter().sum::<f64>() / samples.len() as f64);
                }
            }
        }

        if history.is_empty() {
            warn!(project = project_id, "no breakpoint history for project");
        }
        Ok(stats)
    }

    pub fn config(&self) -> &BreakpointConfig {
        &self.config
    }
}
