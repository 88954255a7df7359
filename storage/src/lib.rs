//! # Storage Layer
//!
//! Durable state for the capture pipeline:
//! - [`StagingLedger`]: SQLite-backed capture state machine and audit trail
//! - [`FsVault`]: plain-directory destination store
//! - [`AtomicExporter`]: temp-write, fsync, rename, then ledger transition

pub mod export;
pub mod ledger;
pub mod render;
mod schema;
pub mod vault;

pub use export::AtomicExporter;
pub use ledger::{
    BindOutcome, DeadLetter, LedgerError, LedgerStats, ProcessOutcome, StageOutcome,
    StagingLedger
};
pub use vault::FsVault;
