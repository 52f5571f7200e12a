use crate::breakpoint::types::{BreakpointEvent, IMMEDIATE_PRIORITY};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Observer invoked for every dispatched notification. The `bool` flag
/// is true when the event arrives via a flushed batch. Callbacks must
/// not block the triggering call for long; hand off to an internal
/// queue for anything slow.
pub type NotificationCallback = Arc<dyn Fn(&BreakpointEvent, bool) + Send + Sync>;

/// Fan-out of triggered/resolved events to registered observers,
/// immediate for high-priority types and batched for the rest.
#[derive(Default)]
pub struct NotificationDispatcher {
    callbacks: Vec<NotificationCallback>,
    batched: VecDeque<BreakpointEvent>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback: NotificationCallback) {
        self.callbacks.push(callback);
    }

    /// High-priority events are dispatched immediately; lower priorities
    /// are queued for batched delivery.
    pub fn should_notify_immediately(priority: u8) -> bool {
        priority >= IMMEDIATE_PRIORITY
    }

    pub fn dispatch(&mut self, event: &BreakpointEvent) {
        if Self::should_notify_immediately(event.priority) {
            for callback in &self.callbacks {
                callback(event, false);
            }
        } else {
            debug!(event = %event.id, "queued event for batched notification");
            self.batched.push_back(event.clone());
        }
    }

    /// Deliver every queued event to every observer. Returns the number
    /// of events flushed.
    pub fn flush(&mut self) -> usize {
        let mut flushed = 0;
        while let Some(event) = self.batched.pop_front() {
            for callback in &self.callbacks {
                callback(&event, true);
            }
            flushed += 1;
        }
        flushed
    }

    pub fn queued(&self) -> usize {
        self.batched.len()
    }
}
