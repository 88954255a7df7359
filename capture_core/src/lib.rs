//! # Capture Pipeline Core
//!
//! Shared types, traits, and the capture state machine.
//!
//! This crate provides:
//! - The persisted data model (`Capture`, `ExportRecord`, `ErrorEvent`)
//! - The capture status transition table
//! - The error taxonomy and per-kind retry policies
//! - Collaborator traits for fetchers, normalizers, destination stores,
//!   attempt journals and event sinks

pub mod events;
pub mod failure;
pub mod policy;
pub mod status;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use events::{BreakerState, PipelineEvent};
pub use failure::Failure;
pub use policy::{ErrorKind, EscalationAction, PolicyTable, RetryPolicy};
pub use status::CaptureStatus;
pub use traits::{
    AttemptJournal, ContentNormalizer, DestinationStore, EventSink, NoopSink, PayloadFetcher
};
pub use types::{
    Capture, CaptureId, ContentIdentity, ErrorEvent, ExportMode, ExportRecord, NewErrorEvent,
    NormalizedText, RawItem, Source, Stage
};
