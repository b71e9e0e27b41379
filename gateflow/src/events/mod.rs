//! Event sink system for observability.
//!
//! The runner and the gate stages report lifecycle events through an
//! [`EventSink`] passed in explicitly; there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
