//! # Capture Pipeline
//!
//! Sequences polling → staging → processing → export for voice memos and
//! email, with crash recovery and the operator API.
//!
//! This crate provides:
//! - [`CapturePipeline`]: the coordinator (`ingest`, `run_once`, `recover`,
//!   `process_capture`)
//! - [`PipelineBuilder`]: wiring from collaborators or a [`config::PipelineConfig`]
//! - [`OperatorApi`]: status, quarantine and dead-letter listings, resets

pub mod coordinator;
pub mod error;
pub mod operator;
pub mod outcome;

pub use coordinator::{CapturePipeline, PipelineBuilder, dependency_for};
pub use error::{PipelineError, Result};
pub use operator::{CaptureReport, OperatorApi};
pub use outcome::{ItemOutcome, RunSummary};
