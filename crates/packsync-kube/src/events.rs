//! Events emitted while classifying and reconciling releases

use std::sync::Mutex;

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
    Debug,
}

/// An event about a release
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub severity: Severity,
    pub reason: String,
    pub message: String,
    /// `namespace/name` of the release in storage
    pub release: String,
}

impl Event {
    pub fn new(
        severity: Severity,
        reason: impl Into<String>,
        message: impl Into<String>,
        release: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            reason: reason.into(),
            message: message.into(),
            release: release.into(),
        }
    }
}

/// Receives events from the classifier and the action reconcilers
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &Event) {
        match event.severity {
            Severity::Normal => {
                tracing::info!(release = %event.release, reason = %event.reason, "{}", event.message)
            }
            Severity::Warning => {
                tracing::warn!(release = %event.release, reason = %event.reason, "{}", event.message)
            }
            Severity::Debug => {
                tracing::debug!(release = %event.release, reason = %event.reason, "{}", event.message)
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Recorded events with the given reason
    pub fn with_reason(&self, reason: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.reason == reason)
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
