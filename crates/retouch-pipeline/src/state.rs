//! The edit pipeline as an explicit state machine.
//!
//! [`PipelineState`] holds everything a run needs: the ordered zones,
//! the working image, the per-zone outcome log, and the current
//! [`Phase`]. It performs no I/O. A driver asks it for the
//! [`PendingCall`] of the current phase, runs that call against a
//! gateway, and feeds the [`GenerationResult`] back through
//! [`PipelineState::advance`], which applies the transition rules:
//!
//! ```text
//! Idle -> BaseUpgrade -> ZoneEdit(0, 1) -> ... -> ZoneEdit(N-1, k) -> Done
//! Done -> RefinementWaiting -> RefinementEdit -> Done
//! ```
//!
//! The working image is only ever replaced by a successful composite or
//! a successful refinement, so a failed call leaves it untouched.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::composite;
use crate::gateway::{FailureKind, GenerationFailure, GenerationRequest, GenerationResult};
use crate::mask::Mask;
use crate::ordering::order_zones;
use crate::prompt;
use crate::types::{
    CompositingError, Dimensions, Photo, PipelineConfig, PipelineError, RgbaImage, Zone,
    ZoneColor,
};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    /// Zones are being edited; nothing submitted yet.
    Idle,
    /// The global quality pass is in flight.
    BaseUpgrade,
    /// Zone `index` (into the ordered zones) is on attempt `attempt`.
    ZoneEdit {
        /// 0-based position in processing order.
        index: usize,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// A refinement instruction has been accepted but not dispatched.
    RefinementWaiting,
    /// The refinement call is in flight.
    RefinementEdit,
    /// The run is finished; the working image is the result.
    Done,
}

impl Phase {
    /// Whether this phase has a generation call to make.
    #[must_use]
    pub const fn is_calling(self) -> bool {
        matches!(
            self,
            Self::BaseUpgrade | Self::ZoneEdit { .. } | Self::RefinementEdit
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::BaseUpgrade => f.write_str("base upgrade"),
            Self::ZoneEdit { index, attempt } => {
                write!(f, "zone edit {} (attempt {attempt})", index + 1)
            }
            Self::RefinementWaiting => f.write_str("refinement waiting"),
            Self::RefinementEdit => f.write_str("refinement edit"),
            Self::Done => f.write_str("done"),
        }
    }
}

/// Why a zone, base upgrade, or refinement produced no change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The generation call failed.
    Generation(GenerationFailure),
    /// The generated image could not be composited.
    Compositing(CompositingError),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generation(failure) => write!(f, "{failure}"),
            Self::Compositing(err) => write!(f, "compositing: {err}"),
        }
    }
}

/// Final status of one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ZoneStatus {
    /// The zone's edit was composited into the working image.
    Applied {
        /// Attempts used, including the successful one.
        attempts: u32,
    },
    /// The zone was left unmodified.
    Failed {
        /// Attempts made.
        attempts: u32,
        /// The last failure.
        reason: FailureReason,
    },
}

/// One entry of the per-zone outcome log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneOutcome {
    /// The zone.
    pub color: ZoneColor,
    /// What happened to it.
    #[serde(flatten)]
    pub status: ZoneStatus,
}

impl ZoneOutcome {
    /// Whether the zone's edit was applied.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self.status, ZoneStatus::Applied { .. })
    }

    /// Attempts made for the zone.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self.status {
            ZoneStatus::Applied { attempts } | ZoneStatus::Failed { attempts, .. } => attempts,
        }
    }
}

/// Result of the global quality pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BaseUpgradeOutcome {
    /// Zone edits started from the upgraded image.
    Upgraded,
    /// Zone edits started from the original photo.
    Skipped {
        /// Why the upgrade was not used.
        reason: FailureReason,
    },
}

/// One refinement request and whether it took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementOutcome {
    /// The user's instruction.
    pub instruction: String,
    /// `None` if applied; otherwise why the image was rolled back.
    pub failure: Option<FailureReason>,
}

/// A generation call the current phase needs.
#[derive(Debug, Clone)]
pub struct PendingCall<'a> {
    /// Input image for the call.
    pub image: &'a RgbaImage,
    /// Full instruction text.
    pub instruction: String,
    /// Mask to send, if any.
    pub mask: Option<&'a Mask>,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl PendingCall<'_> {
    /// Borrow as a gateway request.
    #[must_use]
    pub fn request(&self) -> GenerationRequest<'_> {
        GenerationRequest {
            image: self.image,
            instruction: &self.instruction,
            mask: self.mask,
            attempt: self.attempt,
        }
    }
}

/// What a single [`PipelineState::advance`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEvent {
    /// The quality pass succeeded.
    BaseUpgraded,
    /// The quality pass failed; the original photo is used.
    BaseSkipped(FailureReason),
    /// A zone's edit was composited.
    ZoneApplied {
        /// The zone.
        color: ZoneColor,
        /// Attempts used.
        attempts: u32,
    },
    /// A zone attempt failed and will be retried.
    ZoneRetry {
        /// The zone.
        color: ZoneColor,
        /// The attempt that failed.
        attempt: u32,
        /// Why it failed.
        failure: GenerationFailure,
    },
    /// A zone was given up on.
    ZoneFailed {
        /// The zone.
        color: ZoneColor,
        /// Attempts made.
        attempts: u32,
        /// The last failure.
        reason: FailureReason,
    },
    /// The refinement replaced the working image.
    Refined,
    /// The refinement failed and the previous image was kept.
    RefinementRolledBack(FailureReason),
}

/// The finished run: final image, outcome log, and summary.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// The final working image.
    #[serde(skip)]
    pub image: Arc<RgbaImage>,
    /// How the quality pass went.
    pub base_upgrade: Option<BaseUpgradeOutcome>,
    /// Per-zone outcomes, in processing order.
    pub outcomes: Vec<ZoneOutcome>,
    /// Refinements applied or rolled back since the run finished.
    pub refinements: Vec<RefinementOutcome>,
    /// Consolidated instruction summary, one line per zone.
    pub summary: String,
}

impl RunReport {
    /// Number of zones whose edit was applied.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_applied()).count()
    }

    /// Zones left unmodified, in processing order.
    #[must_use]
    pub fn failed_zones(&self) -> Vec<ZoneColor> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_applied())
            .map(|o| o.color)
            .collect()
    }

    /// `"N of M zones applied"`, naming the unmodified zones if any.
    #[must_use]
    pub fn status_line(&self) -> String {
        let line = format!(
            "{} of {} zones applied",
            self.applied_count(),
            self.outcomes.len()
        );
        let failed = self.failed_zones();
        if failed.is_empty() {
            line
        } else {
            let names: Vec<&str> = failed.iter().map(|c| c.name()).collect();
            format!("{line} (unmodified: {})", names.join(", "))
        }
    }
}

/// A zone as recorded in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotZone {
    /// The zone.
    pub color: ZoneColor,
    /// Its instruction.
    pub instruction: String,
}

/// Everything needed to resume a run except the rasters, which the
/// persistence layer stores separately (the working image and the
/// zone masks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Phase at the time of the snapshot.
    pub phase: Phase,
    /// Zones in processing order.
    pub zones: Vec<SnapshotZone>,
    /// How the quality pass went, if it ran.
    pub base_upgrade: Option<BaseUpgradeOutcome>,
    /// Outcomes of completed zones.
    pub outcomes: Vec<ZoneOutcome>,
    /// Pending refinement instruction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refinement: Option<String>,
    /// Refinement history.
    #[serde(default)]
    pub refinements: Vec<RefinementOutcome>,
}

/// State of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineState {
    config: PipelineConfig,
    phase: Phase,
    photo: Arc<RgbaImage>,
    working: Arc<RgbaImage>,
    zones: Vec<Zone>,
    summary: String,
    base_upgrade: Option<BaseUpgradeOutcome>,
    outcomes: Vec<ZoneOutcome>,
    refinement: Option<String>,
    refinements: Vec<RefinementOutcome>,
}

impl PipelineState {
    /// Prepare a run over `zones`, which are sorted into processing
    /// order according to `config.ordering`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` fails
    /// validation.
    pub fn new(photo: &Photo, zones: Vec<Zone>, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let zones = order_zones(zones, config.ordering, config.mask_threshold);
        let summary = prompt::summarize(&zones);
        let full = photo.shared_full();
        Ok(Self {
            config,
            phase: Phase::Idle,
            working: Arc::clone(&full),
            photo: full,
            zones,
            summary,
            base_upgrade: None,
            outcomes: Vec::new(),
            refinement: None,
            refinements: Vec::new(),
        })
    }

    /// Rebuild a run from a snapshot, the persisted working image, and
    /// the zones (with masks) it was started with.
    ///
    /// A snapshot taken while a call was in flight resumes by repeating
    /// that call. A snapshot taken during a refinement call resumes at
    /// [`Phase::Done`] with the pre-refinement image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidSnapshot`] if the zones or the
    /// working image do not match the snapshot, and
    /// [`PipelineError::InvalidConfig`] if `config` fails validation.
    pub fn rehydrate(
        snapshot: SessionSnapshot,
        photo: &Photo,
        working: RgbaImage,
        zones: Vec<Zone>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        if Dimensions::of(&working) != photo.dimensions() {
            return Err(PipelineError::InvalidSnapshot(format!(
                "working image is {} but photo is {}",
                Dimensions::of(&working),
                photo.dimensions()
            )));
        }

        let mut pool = zones;
        let mut ordered = Vec::with_capacity(snapshot.zones.len());
        for recorded in &snapshot.zones {
            let pos = pool
                .iter()
                .position(|z| z.color == recorded.color)
                .ok_or_else(|| {
                    PipelineError::InvalidSnapshot(format!("no mask for {} zone", recorded.color))
                })?;
            let mut zone = pool.swap_remove(pos);
            zone.instruction.clone_from(&recorded.instruction);
            ordered.push(zone);
        }
        if !pool.is_empty() {
            return Err(PipelineError::InvalidSnapshot(format!(
                "{} zone(s) not present in the snapshot",
                pool.len()
            )));
        }

        let completed = snapshot.outcomes.len();
        let phase = match snapshot.phase {
            Phase::ZoneEdit { index, attempt } => {
                if index != completed || index >= ordered.len() || attempt == 0 {
                    return Err(PipelineError::InvalidSnapshot(format!(
                        "phase {} does not follow {completed} completed zone(s) of {}",
                        snapshot.phase,
                        ordered.len()
                    )));
                }
                snapshot.phase
            }
            Phase::RefinementEdit => {
                log::info!("resuming interrupted refinement as done");
                Phase::Done
            }
            Phase::RefinementWaiting if snapshot.refinement.is_none() => Phase::Done,
            other => other,
        };
        if matches!(phase, Phase::Done | Phase::RefinementWaiting) && completed != ordered.len() {
            return Err(PipelineError::InvalidSnapshot(format!(
                "finished run records {completed} outcome(s) for {} zone(s)",
                ordered.len()
            )));
        }

        let summary = prompt::summarize(&ordered);
        Ok(Self {
            config,
            phase,
            photo: photo.shared_full(),
            working: Arc::new(working),
            zones: ordered,
            summary,
            base_upgrade: snapshot.base_upgrade,
            outcomes: snapshot.outcomes,
            refinement: if phase == Phase::RefinementWaiting {
                snapshot.refinement
            } else {
                None
            },
            refinements: snapshot.refinements,
        })
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// The working image.
    #[must_use]
    pub fn working(&self) -> &RgbaImage {
        &self.working
    }

    /// Zones in processing order.
    #[must_use]
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Outcomes recorded so far.
    #[must_use]
    pub fn outcomes(&self) -> &[ZoneOutcome] {
        &self.outcomes
    }

    /// Consolidated instruction summary.
    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// The configuration the run was created with.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// `Idle -> BaseUpgrade`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidPhase`] outside [`Phase::Idle`].
    pub fn submit(&mut self) -> Result<(), PipelineError> {
        self.expect_phase("submit", Phase::Idle)?;
        log::info!("submitting {} zone(s)", self.zones.len());
        self.phase = Phase::BaseUpgrade;
        Ok(())
    }

    /// The generation call the current phase needs, if any.
    #[must_use]
    pub fn pending_call(&self) -> Option<PendingCall<'_>> {
        match self.phase {
            Phase::BaseUpgrade => Some(PendingCall {
                image: &self.photo,
                instruction: prompt::BASE_UPGRADE_INSTRUCTION.to_string(),
                mask: None,
                attempt: 1,
            }),
            Phase::ZoneEdit { index, attempt } => {
                let zone = self.zones.get(index)?;
                Some(PendingCall {
                    image: &self.working,
                    instruction: prompt::zone_instruction(
                        &zone.instruction,
                        index + 1,
                        self.zones.len(),
                        attempt,
                    ),
                    mask: self.config.strategy.request_mask(zone),
                    attempt,
                })
            }
            Phase::RefinementEdit => {
                let instruction = self.refinement.as_deref()?;
                Some(PendingCall {
                    image: &self.working,
                    instruction: prompt::refinement_instruction(&self.summary, instruction),
                    mask: None,
                    attempt: 1,
                })
            }
            Phase::Idle | Phase::RefinementWaiting | Phase::Done => None,
        }
    }

    /// Apply the result of the pending call and move to the next phase.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidPhase`] if the current phase has
    /// no call in flight, and [`PipelineError::BaseUpgradeRejected`] if
    /// the base upgrade request was malformed. The state is left
    /// unchanged either way.
    pub fn advance(&mut self, result: GenerationResult) -> Result<StepEvent, PipelineError> {
        match self.phase {
            Phase::BaseUpgrade => self.finish_base_upgrade(result),
            Phase::ZoneEdit { index, attempt } => self.finish_zone_attempt(index, attempt, result),
            Phase::RefinementEdit => Ok(self.finish_refinement(result)),
            phase => Err(PipelineError::InvalidPhase {
                operation: "advance",
                phase,
            }),
        }
    }

    /// `Done -> RefinementWaiting`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyInstruction`] for a blank
    /// instruction and [`PipelineError::InvalidPhase`] outside
    /// [`Phase::Done`].
    pub fn begin_refinement(&mut self, instruction: &str) -> Result<(), PipelineError> {
        self.expect_phase("refine", Phase::Done)?;
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(PipelineError::EmptyInstruction);
        }
        self.refinement = Some(instruction.to_string());
        self.phase = Phase::RefinementWaiting;
        Ok(())
    }

    /// `RefinementWaiting -> RefinementEdit`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidPhase`] outside
    /// [`Phase::RefinementWaiting`].
    pub fn dispatch_refinement(&mut self) -> Result<(), PipelineError> {
        self.expect_phase("dispatch refinement", Phase::RefinementWaiting)?;
        log::info!("dispatching refinement");
        self.phase = Phase::RefinementEdit;
        Ok(())
    }

    /// The finished run, once the phase is [`Phase::Done`].
    #[must_use]
    pub fn report(&self) -> Option<RunReport> {
        (self.phase == Phase::Done).then(|| RunReport {
            image: Arc::clone(&self.working),
            base_upgrade: self.base_upgrade.clone(),
            outcomes: self.outcomes.clone(),
            refinements: self.refinements.clone(),
            summary: self.summary.clone(),
        })
    }

    /// Capture the non-raster state for persistence.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            zones: self
                .zones
                .iter()
                .map(|z| SnapshotZone {
                    color: z.color,
                    instruction: z.instruction.clone(),
                })
                .collect(),
            base_upgrade: self.base_upgrade.clone(),
            outcomes: self.outcomes.clone(),
            refinement: self.refinement.clone(),
            refinements: self.refinements.clone(),
        }
    }

    fn expect_phase(&self, operation: &'static str, expected: Phase) -> Result<(), PipelineError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(PipelineError::InvalidPhase {
                operation,
                phase: self.phase,
            })
        }
    }

    fn first_zone_phase(&self) -> Phase {
        if self.zones.is_empty() {
            Phase::Done
        } else {
            Phase::ZoneEdit {
                index: 0,
                attempt: 1,
            }
        }
    }

    fn finish_base_upgrade(&mut self, result: GenerationResult) -> Result<StepEvent, PipelineError> {
        let photo_dims = Dimensions::of(&*self.photo);
        let event = match result {
            Err(failure) if failure.kind == FailureKind::MalformedRequest => {
                return Err(PipelineError::BaseUpgradeRejected(failure));
            }
            Ok(image) if Dimensions::of(&image) == photo_dims => {
                log::info!("base upgrade applied");
                self.working = Arc::new(image);
                self.base_upgrade = Some(BaseUpgradeOutcome::Upgraded);
                StepEvent::BaseUpgraded
            }
            Ok(image) => self.skip_base_upgrade(FailureReason::Compositing(
                CompositingError::ImageSize {
                    working: photo_dims,
                    edited: Dimensions::of(&image),
                },
            )),
            Err(failure) => self.skip_base_upgrade(FailureReason::Generation(failure)),
        };
        self.phase = self.first_zone_phase();
        Ok(event)
    }

    fn skip_base_upgrade(&mut self, reason: FailureReason) -> StepEvent {
        log::warn!("base upgrade skipped, continuing with the original photo: {reason}");
        self.base_upgrade = Some(BaseUpgradeOutcome::Skipped {
            reason: reason.clone(),
        });
        StepEvent::BaseSkipped(reason)
    }

    fn finish_zone_attempt(
        &mut self,
        index: usize,
        attempt: u32,
        result: GenerationResult,
    ) -> Result<StepEvent, PipelineError> {
        let Some(zone) = self.zones.get(index) else {
            return Err(PipelineError::InvalidPhase {
                operation: "advance",
                phase: self.phase,
            });
        };
        let color = zone.color;
        let position = index + 1;
        let total = self.zones.len();

        let reason = match result {
            Ok(edited) => {
                match composite::apply_zone(
                    &self.working,
                    &edited,
                    &zone.mask,
                    self.config.mask_threshold,
                ) {
                    Ok(image) => {
                        log::info!("zone {position}/{total} ({color}) applied on attempt {attempt}");
                        self.working = Arc::new(image);
                        self.complete_zone(index, color, ZoneStatus::Applied { attempts: attempt });
                        return Ok(StepEvent::ZoneApplied {
                            color,
                            attempts: attempt,
                        });
                    }
                    Err(err) => FailureReason::Compositing(err),
                }
            }
            Err(failure) if failure.kind.is_retryable() && attempt < self.config.max_attempts => {
                log::warn!(
                    "zone {position}/{total} ({color}) attempt {attempt}/{} failed, retrying: {failure}",
                    self.config.max_attempts
                );
                self.phase = Phase::ZoneEdit {
                    index,
                    attempt: attempt + 1,
                };
                return Ok(StepEvent::ZoneRetry {
                    color,
                    attempt,
                    failure,
                });
            }
            Err(failure) => FailureReason::Generation(failure),
        };

        log::warn!("zone {position}/{total} ({color}) left unmodified after {attempt} attempt(s): {reason}");
        self.complete_zone(
            index,
            color,
            ZoneStatus::Failed {
                attempts: attempt,
                reason: reason.clone(),
            },
        );
        Ok(StepEvent::ZoneFailed {
            color,
            attempts: attempt,
            reason,
        })
    }

    fn complete_zone(&mut self, index: usize, color: ZoneColor, status: ZoneStatus) {
        self.outcomes.push(ZoneOutcome { color, status });
        self.phase = if index + 1 < self.zones.len() {
            Phase::ZoneEdit {
                index: index + 1,
                attempt: 1,
            }
        } else {
            log::info!("run finished: {}", self.status_line());
            Phase::Done
        };
    }

    fn status_line(&self) -> String {
        let applied = self.outcomes.iter().filter(|o| o.is_applied()).count();
        format!("{applied} of {} zones applied", self.outcomes.len())
    }

    fn finish_refinement(&mut self, result: GenerationResult) -> StepEvent {
        let instruction = self.refinement.take().unwrap_or_default();
        let working_dims = Dimensions::of(&*self.working);
        let failure = match result {
            Ok(image) if Dimensions::of(&image) == working_dims => {
                log::info!("refinement applied");
                self.working = Arc::new(image);
                None
            }
            Ok(image) => Some(FailureReason::Compositing(CompositingError::ImageSize {
                working: working_dims,
                edited: Dimensions::of(&image),
            })),
            Err(failure) => Some(FailureReason::Generation(failure)),
        };
        self.phase = Phase::Done;
        self.refinements.push(RefinementOutcome {
            instruction,
            failure: failure.clone(),
        });
        match failure {
            None => StepEvent::Refined,
            Some(reason) => {
                log::warn!("refinement rolled back: {reason}");
                StepEvent::RefinementRolledBack(reason)
            }
        }
    }
}
