//! retouch-pipeline: zone-based photo retouching (sans-IO).
//!
//! The user paints colored zones over a photo and writes one
//! instruction per zone. A run then edits the photo zone by zone:
//! base upgrade -> zone edits (with retries) -> optional refinements.
//! Each zone's generated image is composited back through that zone's
//! mask only, so a failed or misbehaving zone never touches pixels
//! outside its own mask.
//!
//! This crate has **no I/O dependencies**. Image generation is reached
//! through the [`GenerationGateway`] trait; the caller supplies the
//! transport. Async is used only for per-call timeouts and
//! cancellation, so any executor with a `tokio` time driver works.

pub mod cancel;
pub mod composite;
pub mod diagnostics;
pub mod editor;
pub mod gateway;
pub mod mask;
pub mod orchestrator;
pub mod ordering;
pub mod prompt;
pub mod session;
pub mod state;
pub mod transform;
pub mod types;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod testing;

pub use cancel::{CancelHandle, RunToken};
pub use diagnostics::RunDiagnostics;
pub use editor::{EditorTool, MaskEditor};
pub use gateway::{
    FailureKind, GenerationFailure, GenerationGateway, GenerationRequest, GenerationResult,
    GenerationStrategy,
};
pub use mask::Mask;
pub use orchestrator::Orchestrator;
pub use ordering::{ComplexityEstimator, ZoneOrdering};
pub use session::{EditSession, SessionError};
pub use state::{Phase, PipelineState, RunReport, SessionSnapshot, StepEvent, ZoneOutcome};
pub use transform::{ViewTransform, Viewport};
pub use types::{Dimensions, Photo, PipelineConfig, PipelineError, Point, Zone, ZoneColor};

/// Run a complete edit over prepared zones.
///
/// Orders the zones, upgrades the base image, then edits each zone in
/// turn, compositing every result through its own mask. Returns the
/// final report together with per-call diagnostics.
///
/// # Pipeline steps
///
/// 1. Order zones (pluggable strategy)
/// 2. Base upgrade (failure is non-fatal)
/// 3. Zone edits, each retried up to `max_attempts` times
/// 4. Masked compositing of every successful zone edit
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` fails
/// validation. Returns [`PipelineError::Cancelled`] if `token` is
/// cancelled before the run finishes.
pub async fn retouch<G: GenerationGateway>(
    photo: &Photo,
    zones: Vec<Zone>,
    config: PipelineConfig,
    gateway: &G,
    token: &mut RunToken,
) -> Result<(RunReport, RunDiagnostics), PipelineError> {
    let mut state = PipelineState::new(photo, zones, config)?;
    let mut diagnostics = RunDiagnostics::default();
    let report = Orchestrator::new(gateway)
        .run(&mut state, token, &mut diagnostics)
        .await?;
    Ok((report, diagnostics))
}
