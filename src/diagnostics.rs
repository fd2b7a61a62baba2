//! Injectable diagnostic sink
//!
//! The session engine reports every protocol message and notable transition
//! through a `DiagnosticSink` supplied by the host. Nothing is accumulated in
//! process-wide state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Outbound,
    Inbound,
    Malformed,
    Transition,
    Transport,
    Persistence,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEvent {
    pub kind: DiagnosticKind,
    pub at: DateTime<Utc>,
    pub detail: Value,
}

impl DiagnosticEvent {
    pub fn new(kind: DiagnosticKind, detail: Value) -> Self {
        Self {
            kind,
            at: Utc::now(),
            detail,
        }
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, event: DiagnosticEvent);
}

/// Writes diagnostics to the `tracing` subscriber at debug level
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, event: DiagnosticEvent) {
        debug!(kind = ?event.kind, "{}", event.detail);
    }
}

/// Keeps diagnostics in memory, for hosts that render a debug panel
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, event: DiagnosticEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Forwards every event to each wrapped sink in order
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn DiagnosticSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn DiagnosticSink>>) -> Self {
        Self { sinks }
    }
}

impl DiagnosticSink for FanoutSink {
    fn emit(&self, event: DiagnosticEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
