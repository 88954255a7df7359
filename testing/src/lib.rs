//! Shared test fixtures for the capture pipeline workspace.
//!
//! Provides:
//! - File-backed staging ledgers in temp directories (reopenable, to
//!   simulate restarts)
//! - Temp vault directories
//! - Scripted fetchers and normalizers that fail on demand
//! - A destination store wrapper that counts writes
//! - `RawItem` builders

mod fixtures;

pub use fixtures::*;
pub use observability::RecordingSink;
