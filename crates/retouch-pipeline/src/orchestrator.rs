//! Async driver for [`PipelineState`].
//!
//! The [`Orchestrator`] owns no state of its own. It repeatedly takes
//! the pending call of a [`PipelineState`], runs it against a
//! [`GenerationGateway`] under the configured per-call timeout, and
//! feeds the result back. Each call is raced against the run's
//! [`RunToken`]; once the token is cancelled the call is abandoned and
//! nothing further is written to the state.

use tokio::time::Instant;

use crate::cancel::RunToken;
use crate::diagnostics::{CallDiagnostics, CallOutcome, RunDiagnostics};
use crate::gateway::{GenerationFailure, GenerationGateway, GenerationResult};
use crate::state::{Phase, PipelineState, RunReport, StepEvent};
use crate::types::PipelineError;

/// Sequences generation calls for a pipeline run.
#[derive(Debug)]
pub struct Orchestrator<'g, G> {
    gateway: &'g G,
}

impl<'g, G: GenerationGateway> Orchestrator<'g, G> {
    /// Create an orchestrator over `gateway`.
    #[must_use]
    pub const fn new(gateway: &'g G) -> Self {
        Self { gateway }
    }

    /// Run from the current phase until [`Phase::Done`].
    ///
    /// A state in [`Phase::Idle`] is submitted first; a state restored
    /// mid-run continues from its current phase.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] if the token is cancelled
    /// before the run finishes, and [`PipelineError::InvalidPhase`] if
    /// the state cannot reach [`Phase::Done`] from where it is (for
    /// example while a refinement is waiting).
    pub async fn run(
        &self,
        state: &mut PipelineState,
        token: &mut RunToken,
        diagnostics: &mut RunDiagnostics,
    ) -> Result<RunReport, PipelineError> {
        if state.phase() == Phase::Idle {
            state.submit()?;
        }
        self.drive(state, token, diagnostics).await?;
        state.report().ok_or(PipelineError::InvalidPhase {
            operation: "run",
            phase: state.phase(),
        })
    }

    /// Run one refinement over a finished state.
    ///
    /// Returns [`StepEvent::Refined`] or
    /// [`StepEvent::RefinementRolledBack`]; either way the state ends in
    /// [`Phase::Done`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyInstruction`] for a blank
    /// instruction, [`PipelineError::InvalidPhase`] if the state is not
    /// done, and [`PipelineError::Cancelled`] if the token is cancelled
    /// while the call is in flight.
    pub async fn refine(
        &self,
        state: &mut PipelineState,
        instruction: &str,
        token: &mut RunToken,
        diagnostics: &mut RunDiagnostics,
    ) -> Result<StepEvent, PipelineError> {
        state.begin_refinement(instruction)?;
        state.dispatch_refinement()?;
        let mut events = self.drive(state, token, diagnostics).await?;
        events.pop().ok_or(PipelineError::InvalidPhase {
            operation: "refine",
            phase: state.phase(),
        })
    }

    /// Make pending calls until the state has none left.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] if the token is cancelled.
    pub async fn drive(
        &self,
        state: &mut PipelineState,
        token: &mut RunToken,
        diagnostics: &mut RunDiagnostics,
    ) -> Result<Vec<StepEvent>, PipelineError> {
        let mut events = Vec::new();
        loop {
            token.ensure_current()?;
            let phase = state.phase();
            let call_timeout = state.config().call_timeout;

            let (attempt, outcome, duration) = {
                let Some(call) = state.pending_call() else {
                    break;
                };
                log::debug!("calling gateway for {phase}");
                let started = Instant::now();
                let outcome = tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    result = tokio::time::timeout(call_timeout, self.gateway.generate(call.request())) => {
                        Some(result.unwrap_or_else(|_| {
                            Err(GenerationFailure::timeout(format!(
                                "no response within {:.1}s",
                                call_timeout.as_secs_f64()
                            )))
                        }))
                    }
                };
                (call.attempt, outcome, started.elapsed())
            };

            let Some(result) = outcome else {
                log::info!("run abandoned during {phase}");
                return Err(PipelineError::Cancelled);
            };
            diagnostics.record(CallDiagnostics {
                phase,
                attempt,
                duration,
                outcome: call_outcome(&result),
            });
            // A reset may have landed while the result was in hand.
            token.ensure_current()?;
            events.push(state.advance(result)?);
        }
        Ok(events)
    }
}

fn call_outcome(result: &GenerationResult) -> CallOutcome {
    match result {
        Ok(_) => CallOutcome::Image,
        Err(failure) => CallOutcome::Failure(failure.kind),
    }
}
