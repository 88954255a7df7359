//! # Retry Orchestrator
//!
//! Wraps a fallible collaborator call:
//!
//! 1. Fail fast if the dependency's breaker refuses the call (not counted as
//!    an attempt).
//! 2. Invoke the operation.
//! 3. On success record it with the breaker and return.
//! 4. On failure classify it and look up the policy. Permanent kinds and
//!    exhausted budgets persist a terminal `ErrorEvent` carrying the resolved
//!    escalation and return [`TerminalError::Exhausted`]; the breaker does not
//!    count them. Anything else is recorded with the breaker, persists a retry
//!    `ErrorEvent`, sleeps the backoff delay, and loops.
//!
//! Before every retry the journal is re-read; a capture that already reached
//! a terminal status is reported as [`RetryOutcome::AlreadySettled`] and the
//! operation is not invoked again.
//!
//! The backoff sleep is the only place the shutdown token is observed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use capture_core::{
    AttemptJournal, BreakerState, CaptureStatus, ErrorKind, EscalationAction, EventSink, Failure,
    NewErrorEvent, PipelineEvent, PolicyTable
};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::backoff;
use crate::breaker::{BreakerTransition, CircuitRegistry};
use crate::classify::{ErrorClassifier, ErrorContext};

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Completed(T),
    /// The capture reached a terminal status while we were backing off; the
    /// operation was skipped.
    AlreadySettled(CaptureStatus)
}

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("Circuit open for dependency {dependency}")]
    CircuitOpen { dependency: String },

    #[error("Shutdown requested during backoff")]
    Cancelled,

    #[error("{kind} after {attempts} attempt(s), escalating to {escalation}: {message}")]
    Exhausted {
        kind: ErrorKind,
        escalation: EscalationAction,
        attempts: u32,
        message: String
    },

    #[error("Attempt journal failed: {0}")]
    Journal(String)
}

pub struct RetryOrchestrator<J: AttemptJournal> {
    journal: Arc<J>,
    policies: PolicyTable,
    breakers: CircuitRegistry,
    classifier: ErrorClassifier,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
    rng: Mutex<StdRng>
}

impl<J: AttemptJournal> RetryOrchestrator<J> {
    pub fn new(
        journal: Arc<J>,
        policies: PolicyTable,
        breakers: CircuitRegistry,
        events: Arc<dyn EventSink>,
        shutdown: CancellationToken
    ) -> Self {
        Self {
            journal,
            policies,
            breakers,
            classifier: ErrorClassifier::new(),
            events,
            shutdown,
            rng: Mutex::new(StdRng::from_entropy())
        }
    }

    /// Replaces the jitter source, for reproducible delays.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn breakers(&self) -> &CircuitRegistry {
        &self.breakers
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub async fn execute<T, F, Fut>(
        &self,
        context: &ErrorContext,
        mut operation: F
    ) -> Result<RetryOutcome<T>, TerminalError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Failure>>
    {
        let prior = self
            .journal
            .prior_attempts(&context.capture_id, context.stage)
            .await
            .map_err(journal_error)?;
        let breaker = self.breakers.get(&context.dependency);
        let mut failures = prior;
        let mut first = true;

        loop {
            if !first {
                if let Some(status) = self.settled_status(context).await? {
                    debug!(
                        capture_id = %context.capture_id,
                        status = %status,
                        "Capture settled during backoff, skipping retry"
                    );
                    return Ok(RetryOutcome::AlreadySettled(status));
                }
            }
            first = false;

            match breaker.try_acquire() {
                Ok(transition) => self.publish(&context.dependency, transition),
                Err(state) => {
                    debug!(
                        dependency = %context.dependency,
                        state = %state,
                        "Circuit refused call"
                    );
                    return Err(TerminalError::CircuitOpen {
                        dependency: context.dependency.clone()
                    });
                }
            }

            let failure = match operation().await {
                Ok(value) => {
                    self.publish(&context.dependency, breaker.record_success());
                    return Ok(RetryOutcome::Completed(value));
                }
                Err(failure) => failure
            };

            failures = failures.saturating_add(1);
            let classification = self.classifier.classify(&failure, context);
            let policy = self.policies.get(classification.kind);
            let retriable = classification.retriable && policy.retriable;

            // Only failures that will be retried count against the dependency.
            if !retriable || failures >= policy.max_attempts {
                breaker.release_probe();
                let action = policy.escalation_action.resolve_for(context.stage);
                return Err(self
                    .escalate(context, classification.kind, action, failures, failure)
                    .await);
            }

            self.publish(
                &context.dependency,
                breaker.record_failure(policy.circuit_breaker_threshold)
            );

            self.journal
                .record_error(NewErrorEvent {
                    capture_id: context.capture_id.clone(),
                    stage: context.stage,
                    error_kind: classification.kind,
                    message: failure.message.clone(),
                    attempt_number: failures,
                    escalation_action: None,
                    dead_lettered: false
                })
                .await
                .map_err(journal_error)?;

            let wait = {
                let mut rng = self.rng.lock();
                backoff::delay(&policy, failures - 1, &mut *rng)
            };

            warn!(
                capture_id = %context.capture_id,
                stage = %context.stage,
                dependency = %context.dependency,
                error_kind = %classification.kind,
                attempt = failures,
                delay_ms = wait.as_millis() as u64,
                error = %failure,
                "Attempt failed, backing off"
            );
            self.events.emit(&PipelineEvent::RetryAttempt {
                capture_id: context.capture_id.clone(),
                stage: context.stage,
                dependency: context.dependency.clone(),
                error_kind: classification.kind,
                attempt: failures,
                delay_ms: wait.as_millis() as u64
            });

            self.sleep(wait).await?;
        }
    }

    async fn escalate(
        &self,
        context: &ErrorContext,
        kind: ErrorKind,
        action: EscalationAction,
        attempts: u32,
        failure: Failure
    ) -> TerminalError {
        if action == EscalationAction::OpenCircuit {
            self.publish(
                &context.dependency,
                self.breakers.force_open(&context.dependency)
            );
        }

        error!(
            capture_id = %context.capture_id,
            stage = %context.stage,
            dependency = %context.dependency,
            error_kind = %kind,
            escalation = %action,
            attempts,
            error = %failure,
            "Retries over, escalating"
        );

        let recorded = self
            .journal
            .record_error(NewErrorEvent {
                capture_id: context.capture_id.clone(),
                stage: context.stage,
                error_kind: kind,
                message: failure.message.clone(),
                attempt_number: attempts,
                escalation_action: Some(action),
                dead_lettered: action.dead_letters()
            })
            .await;
        if let Err(err) = recorded {
            return journal_error(err);
        }

        self.events.emit(&PipelineEvent::Escalated {
            capture_id: context.capture_id.clone(),
            stage: context.stage,
            error_kind: kind,
            action,
            attempts
        });

        TerminalError::Exhausted {
            kind,
            escalation: action,
            attempts,
            message: failure.message
        }
    }

    async fn settled_status(
        &self,
        context: &ErrorContext
    ) -> Result<Option<CaptureStatus>, TerminalError> {
        let status = self
            .journal
            .current_status(&context.capture_id)
            .await
            .map_err(journal_error)?;
        Ok(status.filter(|status| status.is_terminal()))
    }

    async fn sleep(&self, wait: Duration) -> Result<(), TerminalError> {
        tokio::select! {
            () = self.shutdown.cancelled() => Err(TerminalError::Cancelled),
            () = tokio::time::sleep(wait) => Ok(())
        }
    }

    fn publish(&self, dependency: &str, transition: Option<BreakerTransition>) {
        if let Some(BreakerTransition { from, to }) = transition {
            self.events.emit(&PipelineEvent::CircuitStateChange {
                dependency: dependency.to_string(),
                from,
                to
            });
            if to == BreakerState::Open {
                debug!(dependency, "Dependency paused");
            }
        }
    }
}

fn journal_error<E: std::error::Error>(err: E) -> TerminalError {
    TerminalError::Journal(err.to_string())
}
