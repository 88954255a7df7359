//! `EventSink` implementations.

use std::sync::Arc;

use capture_core::{EventSink, PipelineEvent};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::telemetry::CaptureTelemetry;

/// Logs every event with structured fields and bumps the matching counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink {
    telemetry: CaptureTelemetry
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: &PipelineEvent) {
        let name = event.name();
        match event {
            PipelineEvent::ItemStaged {
                capture_id,
                source,
                external_id
            } => {
                self.telemetry.record_staged(*source);
                info!(event = name, capture_id = %capture_id, source = %source, external_id = %external_id);
            }
            PipelineEvent::DuplicateSkipped {
                capture_id,
                duplicate_of,
                stage
            } => {
                self.telemetry.record_duplicate(*stage);
                info!(
                    event = name,
                    capture_id = %capture_id,
                    duplicate_of = duplicate_of.as_ref().map(|id| id.as_str()),
                    stage = %stage
                );
            }
            PipelineEvent::RetryAttempt {
                capture_id,
                stage,
                dependency,
                error_kind,
                attempt,
                delay_ms
            } => {
                self.telemetry.record_retry_attempt(*stage, dependency, *error_kind);
                info!(
                    event = name,
                    capture_id = %capture_id,
                    stage = %stage,
                    dependency = %dependency,
                    error_kind = %error_kind,
                    attempt,
                    delay_ms
                );
            }
            PipelineEvent::CircuitStateChange {
                dependency,
                from,
                to
            } => {
                self.telemetry.record_circuit_transition(dependency, *from, *to);
                warn!(event = name, dependency = %dependency, from = %from, to = %to);
            }
            PipelineEvent::Escalated {
                capture_id,
                stage,
                error_kind,
                action,
                attempts
            } => {
                self.telemetry.record_escalation(*stage, *error_kind, *action);
                warn!(
                    event = name,
                    capture_id = %capture_id,
                    stage = %stage,
                    error_kind = %error_kind,
                    action = %action,
                    attempts
                );
            }
            PipelineEvent::ExportCompleted {
                capture_id,
                destination_path,
                mode
            } => {
                self.telemetry.record_export(*mode);
                info!(
                    event = name,
                    capture_id = %capture_id,
                    destination_path = %destination_path,
                    mode = %mode
                );
            }
            PipelineEvent::ItemQuarantined { capture_id, reason } => {
                self.telemetry.record_quarantined();
                warn!(event = name, capture_id = %capture_id, reason = %reason);
            }
        }
    }
}

/// Keeps every event in memory, in order. Clones share the buffer.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<PipelineEvent>>>
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(PipelineEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    /// Events as JSON lines, for replaying a capture's history.
    pub fn to_json_lines(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| serde_json::to_string(event).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &PipelineEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards each event to every inner sink.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &PipelineEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
