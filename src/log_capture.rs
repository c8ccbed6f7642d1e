//! Captures `tracing` events so tests can assert on structured fields.

use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::Registry;

/// One event's fields as `(name, value)` pairs, in recording order.
pub type Fields = Vec<(String, String)>;

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Fields>>>);

impl EventLog {
    /// A subscriber that records into this log.
    pub fn subscriber(&self) -> impl Subscriber + Send + Sync + 'static {
        Registry::default().with(self.clone())
    }

    /// Events carrying every one of `names`.
    pub fn with_fields(&self, names: &[&str]) -> Vec<Fields> {
        self.0
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|fields| names.iter().all(|n| fields.iter().any(|(k, _)| k == n)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Value of `name` in one event.
pub fn field<'a>(fields: &'a Fields, name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

struct Recorder(Fields);

impl Visit for Recorder {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }
}

impl<S: Subscriber> Layer<S> for EventLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut recorder = Recorder(Vec::new());
        event.record(&mut recorder);
        if let Ok(mut events) = self.0.lock() {
            events.push(recorder.0);
        }
    }
}
