use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};

use crate::usage::{Dimension, ResourceUsage};

/// Everything a sandbox reports while a workload runs.
///
/// Per-sandbox ordering is total, and every successful `execute()` ends in
/// exactly one `ExecutionCompleted` — whether by natural exit, limit
/// breach, timeout, or external cancellation.
#[derive(Debug, Clone)]
pub enum SandboxEvent {
    /// One per monitor tick while a workload is running.
    ResourceUsageUpdated(ResourceUsage),
    /// First tick on which a capped dimension was breached. The workload
    /// is terminated; `ExecutionCompleted` follows.
    ResourceLimitExceeded {
        dimension: Dimension,
        context: Map<String, Value>,
    },
    /// The workload did something its permissions deny that pre-flight
    /// could not statically exclude. Does not itself terminate the
    /// workload.
    SecurityViolation {
        description: String,
        context: Map<String, Value>,
    },
    /// Terminal event for one `execute()` call.
    ExecutionCompleted {
        exit_code: i32,
        summary: Map<String, Value>,
    },
}

pub type EventCallback = Box<dyn Fn(&SandboxEvent) + Send + Sync>;

/// Ordered fan-out of sandbox events to registered callbacks.
///
/// Emission happens under the lock, so subscribers observe events in
/// emission order. No delivery thread is guaranteed; callbacks run on the
/// emitting task and must not block.
#[derive(Default)]
pub struct EventSubscribers {
    callbacks: Mutex<Vec<EventCallback>>,
}

impl EventSubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: EventCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    pub fn emit(&self, event: &SandboxEvent) {
        let callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        for callback in callbacks.iter() {
            callback(event);
        }
    }
}
