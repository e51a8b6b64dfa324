//! Tracing utilities for asserting on what the engine logs.
//!
//! [`EventCaptureLayer`] records every event and every `callbox.*` span into
//! a shared [`EventCollector`]. Install it for a whole test with
//! [`EventCollector::set_default`]; on a current-thread runtime that also
//! covers the tasks the engine spawns.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::dispatcher::DefaultGuard;
use tracing::span::{Attributes, Id};
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;

/// Captured event information for testing.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    /// Event level
    pub level: Level,
    /// The event target (e.g., "callbox::config")
    pub target: String,
    /// The `message` field, empty if absent
    pub message: String,
    /// Other field values as strings
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    /// Value of a field, if recorded.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Captured span information for testing.
#[derive(Debug, Clone)]
pub struct CapturedSpan {
    /// The span name (e.g., "callbox.attempt")
    pub name: String,
    /// Captured field values as strings
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Captured {
    events: Vec<CapturedEvent>,
    spans: Vec<CapturedSpan>,
}

/// A tracing layer that captures events and engine spans.
pub struct EventCaptureLayer {
    captured: Arc<Mutex<Captured>>,
}

/// Visitor to capture field values.
#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn push(&mut self, field: &tracing::field::Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.push(field, value.to_string());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.push(field, value.to_string());
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.push(field, value.to_string());
    }
}

impl<S> Layer<S> for EventCaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        let metadata = attrs.metadata();
        if !metadata.name().starts_with("callbox.") {
            return;
        }

        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        lock(&self.captured).spans.push(CapturedSpan {
            name: metadata.name().to_string(),
            fields: visitor.fields,
        });
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        lock(&self.captured).events.push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

fn lock(captured: &Mutex<Captured>) -> MutexGuard<'_, Captured> {
    captured.lock().unwrap_or_else(|e| e.into_inner())
}

/// Collector for captured events and spans.
#[derive(Clone)]
pub struct EventCollector {
    captured: Arc<Mutex<Captured>>,
    dispatch: Dispatch,
}

/// Create a new event collector with its associated dispatch.
pub fn create_event_collector() -> EventCollector {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let layer = EventCaptureLayer {
        captured: captured.clone(),
    };
    let subscriber = Registry::default().with(layer);
    EventCollector {
        captured,
        dispatch: Dispatch::new(subscriber),
    }
}

impl EventCollector {
    /// Get the dispatch for use with spawned tasks.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Installs the collector as the thread default until the guard drops.
    pub fn set_default(&self) -> DefaultGuard {
        tracing::dispatcher::set_default(&self.dispatch)
    }

    /// Get all captured events.
    pub fn events(&self) -> Vec<CapturedEvent> {
        lock(&self.captured).events.clone()
    }

    /// Get captured events at `level`.
    pub fn events_at(&self, level: Level) -> Vec<CapturedEvent> {
        lock(&self.captured)
            .events
            .iter()
            .filter(|event| event.level == level)
            .cloned()
            .collect()
    }

    /// Get the events whose message contains `needle`.
    pub fn find(&self, needle: &str) -> Vec<CapturedEvent> {
        lock(&self.captured)
            .events
            .iter()
            .filter(|event| event.message.contains(needle))
            .cloned()
            .collect()
    }

    /// Check if an event whose message contains `needle` was captured.
    pub fn has_event(&self, needle: &str) -> bool {
        !self.find(needle).is_empty()
    }

    /// Get all captured `callbox.*` spans.
    pub fn spans(&self) -> Vec<CapturedSpan> {
        lock(&self.captured).spans.clone()
    }

    /// Number of captured spans named `name`.
    pub fn span_count(&self, name: &str) -> usize {
        lock(&self.captured)
            .spans
            .iter()
            .filter(|span| span.name == name)
            .count()
    }

    /// Clear everything captured so far.
    pub fn clear(&self) {
        let mut captured = lock(&self.captured);
        captured.events.clear();
        captured.spans.clear();
    }

    /// Assert that events with the given message fragments were captured in
    /// this order. Other events may appear in between.
    pub fn assert_event_sequence(&self, expected: &[&str]) {
        let messages: Vec<String> = self.events().into_iter().map(|e| e.message).collect();
        let mut expected_iter = expected.iter();
        let mut current_expected = expected_iter.next();

        for message in &messages {
            if let Some(exp) = current_expected
                && message.contains(*exp)
            {
                current_expected = expected_iter.next();
            }
        }

        if current_expected.is_some() {
            panic!(
                "Expected event sequence {:?} but got {:?}",
                expected, messages
            );
        }
    }
}

/// Run a closure with event capturing enabled.
///
/// Returns the result of the closure and a collector with captured events.
pub fn with_event_capture<F, R>(f: F) -> (R, EventCollector)
where
    F: FnOnce() -> R,
{
    let collector = create_event_collector();
    let result = tracing::dispatcher::with_default(collector.dispatch(), f);
    (result, collector)
}
