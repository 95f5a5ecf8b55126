//! Session lifecycle: photo, editor, and the current run.
//!
//! An [`EditSession`] owns at most one photo, the [`MaskEditor`] for
//! it, and at most one [`PipelineState`]. Masks can only be edited
//! before a run is submitted. A reset, whether called directly or
//! through a [`CancelHandle`] from another task, abandons any call in
//! flight and discards everything.

use std::sync::Arc;

use crate::cancel::CancelHandle;
use crate::diagnostics::RunDiagnostics;
use crate::editor::MaskEditor;
use crate::gateway::GenerationGateway;
use crate::orchestrator::Orchestrator;
use crate::state::{FailureReason, Phase, PipelineState, RunReport, SessionSnapshot, StepEvent};
use crate::transform::Viewport;
use crate::types::{Photo, PipelineConfig, PipelineError, RgbaImage, Zone};

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The pipeline rejected the operation or the run was cancelled.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The refinement failed; the previous image is still current.
    #[error("refinement failed, previous image kept: {0}")]
    RefinementFailed(FailureReason),

    /// Masks cannot change once a run has been submitted.
    #[error("masks are locked while the pipeline is in phase {0}")]
    Locked(Phase),
}

/// One user's editing session.
#[derive(Debug)]
pub struct EditSession {
    config: PipelineConfig,
    photo: Option<Photo>,
    editor: Option<MaskEditor>,
    state: Option<PipelineState>,
    cancel: CancelHandle,
    diagnostics: RunDiagnostics,
}

impl EditSession {
    /// Create an empty session.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` fails
    /// validation.
    pub fn new(config: PipelineConfig) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            config,
            photo: None,
            editor: None,
            state: None,
            cancel: CancelHandle::new(),
            diagnostics: RunDiagnostics::default(),
        })
    }

    /// The session configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Import a photo, replacing any previous one along with its
    /// strokes, instructions, and run.
    pub fn load_photo(&mut self, photo: Photo, viewport: Viewport) {
        let previous = self.editor.take();
        self.reset();
        let dimensions = photo.dimensions();
        log::info!("loaded {dimensions} photo");
        // Keep tool, color, and brush across photos.
        let editor = match previous {
            Some(mut editor) => {
                editor.set_viewport(viewport);
                editor.set_photo(dimensions);
                editor
            }
            None => MaskEditor::new(dimensions, viewport, self.config.mask_threshold),
        };
        self.editor = Some(editor);
        self.photo = Some(photo);
    }

    /// The imported photo.
    #[must_use]
    pub const fn photo(&self) -> Option<&Photo> {
        self.photo.as_ref()
    }

    /// The mask editor, once a photo is loaded.
    #[must_use]
    pub const fn editor(&self) -> Option<&MaskEditor> {
        self.editor.as_ref()
    }

    /// Mutable access to the mask editor.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoPhoto`] before a photo is loaded and
    /// [`SessionError::Locked`] once a run has been submitted.
    pub fn editor_mut(&mut self) -> Result<&mut MaskEditor, SessionError> {
        let phase = self.phase();
        if phase != Phase::Idle {
            return Err(SessionError::Locked(phase));
        }
        self.editor
            .as_mut()
            .ok_or(SessionError::Pipeline(PipelineError::NoPhoto))
    }

    /// The current phase; [`Phase::Idle`] when nothing was submitted.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.as_ref().map_or(Phase::Idle, PipelineState::phase)
    }

    /// A handle that resets runs from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Diagnostics for every call made since the last reset.
    #[must_use]
    pub const fn diagnostics(&self) -> &RunDiagnostics {
        &self.diagnostics
    }

    /// The image to show: the working image during and after a run,
    /// otherwise the photo.
    #[must_use]
    pub fn visible_image(&self) -> Option<&RgbaImage> {
        self.state
            .as_ref()
            .map(PipelineState::working)
            .or_else(|| self.photo.as_ref().map(Photo::full))
    }

    /// The finished run, if the current phase is [`Phase::Done`].
    #[must_use]
    pub fn report(&self) -> Option<RunReport> {
        self.state.as_ref().and_then(PipelineState::report)
    }

    /// Persistable state of the current run.
    #[must_use]
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.state.as_ref().map(PipelineState::snapshot)
    }

    /// Submit the editor's zones and run to completion.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoPhoto`] without a photo,
    /// [`PipelineError::InvalidPhase`] if a run was already submitted,
    /// [`PipelineError::BaseUpgradeRejected`] if the base upgrade request
    /// was malformed (the run can be resumed), and
    /// [`PipelineError::Cancelled`] if the session was reset while the
    /// run was in flight (the session is then empty).
    pub async fn submit<G: GenerationGateway>(
        &mut self,
        gateway: &G,
    ) -> Result<RunReport, SessionError> {
        let phase = self.phase();
        if phase != Phase::Idle {
            return Err(PipelineError::InvalidPhase {
                operation: "submit",
                phase,
            }
            .into());
        }
        let (Some(photo), Some(editor)) = (&self.photo, &self.editor) else {
            return Err(PipelineError::NoPhoto.into());
        };
        let zones = editor.zones();
        let excluded = editor.rasterization_errors().len();
        if excluded > 0 {
            log::warn!("{excluded} zone(s) excluded after rasterization errors");
        }
        let state = PipelineState::new(photo, zones, self.config.clone())?;
        self.run_state(state, gateway).await
    }

    /// Continue the current run from its last completed phase, for
    /// example after [`restore`](Self::restore) or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidPhase`] without a run, and
    /// [`PipelineError::Cancelled`] if the session is reset meanwhile.
    pub async fn resume<G: GenerationGateway>(
        &mut self,
        gateway: &G,
    ) -> Result<RunReport, SessionError> {
        let Some(mut state) = self.state.take() else {
            return Err(PipelineError::InvalidPhase {
                operation: "resume",
                phase: Phase::Idle,
            }
            .into());
        };
        // A refinement restored before dispatch goes out now.
        if state.phase() == Phase::RefinementWaiting {
            state.dispatch_refinement()?;
        }
        self.run_state(state, gateway).await
    }

    /// Apply a refinement instruction to the finished image.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RefinementFailed`] if the call failed
    /// (the previous image stays current and the phase stays
    /// [`Phase::Done`]), [`PipelineError::EmptyInstruction`] for a
    /// blank instruction, and [`PipelineError::InvalidPhase`] if no run
    /// has finished.
    pub async fn refine<G: GenerationGateway>(
        &mut self,
        gateway: &G,
        instruction: &str,
    ) -> Result<RunReport, SessionError> {
        let phase = self.phase();
        let Some(state) = self.state.as_mut() else {
            return Err(PipelineError::InvalidPhase {
                operation: "refine",
                phase,
            }
            .into());
        };
        let mut token = self.cancel.token();
        let event = Orchestrator::new(gateway)
            .refine(state, instruction, &mut token, &mut self.diagnostics)
            .await;
        match event {
            Ok(StepEvent::RefinementRolledBack(reason)) => Err(SessionError::RefinementFailed(reason)),
            Ok(_) => state.report().ok_or_else(|| {
                SessionError::from(PipelineError::InvalidPhase {
                    operation: "refine",
                    phase: state.phase(),
                })
            }),
            Err(err) => Err(self.absorb(err)),
        }
    }

    /// Rebuild a run from a persisted snapshot and working image. The
    /// editor must already hold the strokes the run was started with;
    /// instructions are taken from the snapshot once it is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Locked`] if a run is already loaded,
    /// [`PipelineError::NoPhoto`] without a photo, and
    /// [`PipelineError::InvalidSnapshot`] if the snapshot does not fit
    /// the editor's masks or the photo. On error the session is left
    /// as it was.
    pub fn restore(&mut self, snapshot: SessionSnapshot, working: RgbaImage) -> Result<(), SessionError> {
        let phase = self.phase();
        if phase != Phase::Idle {
            return Err(SessionError::Locked(phase));
        }
        let (Some(photo), Some(editor)) = (&self.photo, &mut self.editor) else {
            return Err(PipelineError::NoPhoto.into());
        };
        let zones = snapshot
            .zones
            .iter()
            .map(|recorded| -> Result<Zone, PipelineError> {
                let mask = editor.mask(recorded.color).ok_or_else(|| {
                    PipelineError::InvalidSnapshot(format!("editor has no {} strokes", recorded.color))
                })?;
                Ok(Zone {
                    color: recorded.color,
                    instruction: recorded.instruction.clone(),
                    mask: Arc::clone(mask),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let instructions: Vec<_> = zones
            .iter()
            .map(|zone| (zone.color, zone.instruction.clone()))
            .collect();

        let state = PipelineState::rehydrate(snapshot, photo, working, zones, self.config.clone())?;
        for (color, instruction) in instructions {
            editor.set_instruction(color, instruction);
        }
        log::info!("restored run at phase {}", state.phase());
        self.state = Some(state);
        Ok(())
    }

    /// Discard the photo, strokes, instructions, and run, abandoning
    /// any call in flight.
    pub fn reset(&mut self) {
        self.cancel.cancel();
        self.clear();
    }

    fn clear(&mut self) {
        self.photo = None;
        self.editor = None;
        self.state = None;
        self.diagnostics = RunDiagnostics::default();
    }

    async fn run_state<G: GenerationGateway>(
        &mut self,
        state: PipelineState,
        gateway: &G,
    ) -> Result<RunReport, SessionError> {
        let mut token = self.cancel.token();
        let state = self.state.insert(state);
        let result = Orchestrator::new(gateway)
            .run(state, &mut token, &mut self.diagnostics)
            .await;
        result.map_err(|err| self.absorb(err))
    }

    /// A cancelled run means the session was reset from elsewhere:
    /// finish the reset here. Other errors leave the run resumable.
    fn absorb(&mut self, err: PipelineError) -> SessionError {
        if matches!(err, PipelineError::Cancelled) {
            self.clear();
        } else {
            log::error!("run stopped at phase {}: {err}", self.phase());
        }
        err.into()
    }
}
