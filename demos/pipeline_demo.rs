//! Demonstration of a dependency pipeline with breakpoint escalation
//!
//! This example schedules a small build pipeline, drains it through the
//! worker interface, and shows a breakpoint pausing the run when the
//! simulated confidence drops too low.

use conductor::{
    BreakpointConfig, BreakpointContext, BreakpointManager, MemoryStore, Resolution,
    SchedulerConfig, TaskScheduler, TaskSpec,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("conductor=debug")
        .init();

    let store = Arc::new(MemoryStore::new());
    let scheduler = TaskScheduler::new(SchedulerConfig::default(), store.clone());
    let breakpoints = BreakpointManager::new(BreakpointConfig::default(), store);

    breakpoints
        .register_notification_callback(Arc::new(|event, batched| {
            println!(
                "[notify] {} (priority {}, batched: {batched})",
                event.breakpoint_type, event.priority
            );
        }))
        .await;

    // fetch -> {build, lint} -> package
    let fetch = scheduler
        .schedule_task(TaskSpec::new("demo").with_priority(5))
        .await?;
    let build = scheduler
        .schedule_task(TaskSpec::new("demo").with_priority(3).with_dependency(fetch))
        .await?;
    let lint = scheduler
        .schedule_task(TaskSpec::new("demo").with_priority(2).with_dependency(fetch))
        .await?;
    scheduler
        .schedule_task(TaskSpec::new("demo").with_dependencies([build, lint]))
        .await?;

    while let Some(task) = scheduler.get_next_task("demo").await? {
        info!("worker picked up task {}", task.id);

        // A worker would do real work here; we simulate a confidence
        // reading and let the rule engine decide whether to pause.
        let mut ctx = BreakpointContext::new();
        ctx.insert("confidence".to_string(), json!(0.4));
        ctx.insert("task_id".to_string(), json!(task.id.to_string()));

        let events = breakpoints.evaluate_breakpoint_conditions("demo", &ctx).await?;
        for event in events {
            println!("paused on breakpoint {}", event.breakpoint_type);
            // Stand in for a human decision
            breakpoints
                .resolve_breakpoint(event.id, Resolution::proceed())
                .await?;
        }

        scheduler
            .mark_complete(task.id, json!({"status": "ok"}))
            .await?;
    }

    // Low-priority notifications are delivered in one batch at the end
    let flushed = breakpoints.flush_batched().await;
    println!("flushed {flushed} batched notifications");

    let counts = scheduler.task_counts("demo").await;
    println!("pipeline finished: {} tasks completed", counts.completed);
    Ok(())
}
