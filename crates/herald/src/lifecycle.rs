//! Lifecycle event bus.
//!
//! The engine emits one BEFORE event and then exactly one SUCCESS or FAILURE
//! event per provider invocation. Listeners observe them; a listener that
//! fails is logged as a warning and never affects the run.

use std::path::PathBuf;

use herald_events::{EventLog, LifecycleRecord};
use herald_types::{Category, StepPhase};

use crate::context::ExecutionContext;
use crate::error::ListenerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub phase: StepPhase,
    pub category: Category,
    pub step: String,
    pub cause: Option<String>,
}

impl LifecycleEvent {
    pub fn before(category: Category, step: &str) -> Self {
        Self {
            phase: StepPhase::Before,
            category,
            step: step.to_string(),
            cause: None,
        }
    }

    pub fn success(category: Category, step: &str) -> Self {
        Self {
            phase: StepPhase::Success,
            category,
            step: step.to_string(),
            cause: None,
        }
    }

    pub fn failure(category: Category, step: &str, cause: impl Into<String>) -> Self {
        Self {
            phase: StepPhase::Failure,
            category,
            step: step.to_string(),
            cause: Some(cause.into()),
        }
    }
}

pub trait StepListener {
    fn name(&self) -> &str;

    fn on_step(&self, event: &LifecycleEvent, ctx: &ExecutionContext) -> Result<(), ListenerError>;
}

#[derive(Default)]
pub struct EventBus {
    listeners: Vec<Box<dyn StepListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Box<dyn StepListener>) {
        self.listeners.push(listener);
    }

    pub fn with_listener(mut self, listener: Box<dyn StepListener>) -> Self {
        self.subscribe(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver `event` to every listener in subscription order.
    pub fn emit(&self, event: &LifecycleEvent, ctx: &ExecutionContext) {
        for listener in &self.listeners {
            if let Err(err) = listener.on_step(event, ctx) {
                ctx.logger().warn(&format!(
                    "ignoring {} event for {}: {err}",
                    event.phase, event.step
                ));
            }
        }
    }
}

/// Appends every event to a JSONL file.
pub struct EventLogListener {
    path: PathBuf,
}

impl EventLogListener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl StepListener for EventLogListener {
    fn name(&self) -> &str {
        "event-log"
    }

    fn on_step(&self, event: &LifecycleEvent, _ctx: &ExecutionContext) -> Result<(), ListenerError> {
        let mut log = EventLog::new();
        log.record(LifecycleRecord::now(
            event.phase,
            event.category,
            event.step.clone(),
            event.cause.clone(),
        ));
        log.write_to_file(&self.path)
            .map_err(|e| ListenerError::new(self.name(), format!("{e:#}")))
    }
}
