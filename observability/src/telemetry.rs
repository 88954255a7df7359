use capture_core::{BreakerState, ErrorKind, EscalationAction, ExportMode, Source, Stage};
use metrics::counter;

/// Metric recorders for pipeline events. Label values are the stable
/// snake_case/PascalCase forms used in the ledger.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureTelemetry;

impl CaptureTelemetry {
    pub fn new() -> Self {
        Self
    }

    pub fn record_staged(&self, source: Source) {
        counter!("capture_items_staged_total", "source" => source.to_string()).increment(1);
    }

    pub fn record_duplicate(&self, stage: Stage) {
        counter!("capture_duplicates_total", "stage" => stage.to_string()).increment(1);
    }

    pub fn record_retry_attempt(&self, stage: Stage, dependency: &str, kind: ErrorKind) {
        let labels = [
            ("stage", stage.to_string()),
            ("dependency", dependency.to_string()),
            ("error_kind", kind.to_string())
        ];
        counter!("capture_retry_attempts_total", &labels).increment(1);
    }

    pub fn record_circuit_transition(&self, dependency: &str, from: BreakerState, to: BreakerState) {
        let labels = [
            ("dependency", dependency.to_string()),
            ("from", from.to_string()),
            ("to", to.to_string())
        ];
        counter!("capture_circuit_transitions_total", &labels).increment(1);
    }

    pub fn record_escalation(&self, stage: Stage, kind: ErrorKind, action: EscalationAction) {
        let labels = [
            ("stage", stage.to_string()),
            ("error_kind", kind.to_string()),
            ("action", action.to_string())
        ];
        counter!("capture_escalations_total", &labels).increment(1);
    }

    pub fn record_export(&self, mode: ExportMode) {
        counter!("capture_exports_total", "mode" => mode.to_string()).increment(1);
    }

    pub fn record_quarantined(&self) {
        counter!("capture_quarantined_total").increment(1);
    }
}
