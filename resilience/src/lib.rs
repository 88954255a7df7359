//! # Resilience
//!
//! Everything that wraps a fallible collaborator call:
//! - [`ErrorClassifier`]: raw failure to a stable `ErrorKind`
//! - [`backoff`]: exponential delay with injectable jitter
//! - [`CircuitBreaker`] and the [`CircuitRegistry`] that owns one per dependency
//! - [`RetryOrchestrator`]: classify, look up policy, check breaker, back off,
//!   re-invoke, escalate

pub mod backoff;
pub mod breaker;
pub mod classify;
pub mod orchestrator;

pub use breaker::{BreakerTransition, CircuitBreaker, CircuitRegistry};
pub use classify::{Classification, ErrorClassifier, ErrorContext};
pub use orchestrator::{RetryOrchestrator, RetryOutcome, TerminalError};
