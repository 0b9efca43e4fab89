//! Observability for the freshness layer
//!
//! - Structured logging (JSON lines on stderr)
//! - Typed lifecycle events
//! - Relaxed-atomic counters
//!
//! Observability is read-only: a failure to log never changes what the
//! bus, the views or the dispatcher do.
//!
//! ```ignore
//! use freshsync::observability::{log_event, Event};
//!
//! log_event(Event::BusPublish, &[("collection", "users"), ("cause", "delete")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsSnapshot, SyncMetrics};

/// Severity an event is logged at when the caller does not choose one
pub fn default_severity(event: Event) -> Severity {
    match event {
        Event::BusSubscriberFailed => Severity::Error,
        Event::FetchFailed
        | Event::FetchDiscarded
        | Event::MutationFailed
        | Event::MutationRetry
        | Event::MutationAckRecovered
        | Event::MutationUnrouted
        | Event::StaleGuardRefetch => Severity::Warn,
        e if e.is_verbose() => Severity::Trace,
        _ => Severity::Info,
    }
}

/// Log a lifecycle event with fields at its default severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(default_severity(event), event.as_str(), fields);
}
