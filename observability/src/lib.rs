//! # Observability
//!
//! Consumers of the pipeline's structured events:
//! - [`TracingSink`]: structured log line plus `metrics` counter per event
//! - [`RecordingSink`]: in-memory history, used by tests and the replay tools
//! - [`FanoutSink`]: sends each event to several sinks

pub mod sinks;
pub mod telemetry;

pub use sinks::{FanoutSink, RecordingSink, TracingSink};
pub use telemetry::CaptureTelemetry;
