//! Per-frame orchestration: admit → readiness → convert → detect → select
//! → score → classify.
//!
//! Every per-frame failure is converted into [`PassOutcome::Failed`]; none of
//! them touch engine state, and the gate is released on every exit path.

use crate::engine::{EngineKind, FaceDetector, InferenceError, LivenessDetector, LoadError};
use crate::gate::{FrameGate, GatePermit};
use crate::registry::{EngineState, ModelRegistry};
use crate::types::{FaceBox, Verdict};
use liveguard_hw::{convert, FormatError, Frame, DEFAULT_ORIENTATION};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("conversion failed: {0}")]
    Format(#[from] FormatError),
    #[error("face detection failed: {0}")]
    Detection(#[source] InferenceError),
    #[error("liveness scoring failed: {0}")]
    Liveness(#[source] InferenceError),
}

/// How the primary face is picked from the detector's result.
///
/// The detector's ordering is engine-defined, so the choice is explicit.
/// Ties keep the earliest face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceSelection {
    /// First face in engine order.
    #[default]
    First,
    HighestConfidence,
    Largest,
}

impl FaceSelection {
    pub fn select(self, faces: &[FaceBox]) -> Option<&FaceBox> {
        match self {
            FaceSelection::First => faces.first(),
            FaceSelection::HighestConfidence => {
                pick_max(faces, |a, b| a.confidence > b.confidence)
            }
            FaceSelection::Largest => pick_max(faces, |a, b| a.area() > b.area()),
        }
    }
}

fn pick_max(faces: &[FaceBox], better: impl Fn(&FaceBox, &FaceBox) -> bool) -> Option<&FaceBox> {
    faces.iter().fold(None, |best, face| match best {
        Some(current) if !better(face, current) => Some(current),
        _ => Some(face),
    })
}

impl FromStr for FaceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(FaceSelection::First),
            "confidence" | "highest_confidence" => Ok(FaceSelection::HighestConfidence),
            "largest" => Ok(FaceSelection::Largest),
            other => Err(format!(
                "unknown face selection {other:?} (expected first, confidence or largest)"
            )),
        }
    }
}

/// What one call into the pipeline produced.
#[derive(Debug)]
pub enum PassOutcome {
    /// The gate was busy; the frame was discarded. Not an error.
    Dropped,
    /// A model is not Ready; the frame was discarded after admission.
    NotReady,
    Verdict(Verdict),
    Failed { sequence: u64, error: PipelineError },
}

impl PassOutcome {
    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            PassOutcome::Verdict(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PassOutcome::Failed { .. })
    }
}

pub struct InferencePipeline<D, L> {
    detector: D,
    liveness: L,
    registry: Arc<ModelRegistry>,
    gate: Arc<FrameGate>,
    selection: FaceSelection,
    orientation: i32,
}

impl<D, L> InferencePipeline<D, L>
where
    D: FaceDetector,
    L: LivenessDetector,
{
    pub fn new(detector: D, liveness: L, registry: Arc<ModelRegistry>, gate: Arc<FrameGate>) -> Self {
        Self {
            detector,
            liveness,
            registry,
            gate,
            selection: FaceSelection::default(),
            orientation: DEFAULT_ORIENTATION,
        }
    }

    pub fn with_selection(mut self, selection: FaceSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &Arc<FrameGate> {
        &self.gate
    }

    /// Load both engines through the registry. Engines already past
    /// Unloaded are left as they are.
    pub fn load_models<DC, LC>(&mut self, detector_config: DC, liveness_config: LC) -> (EngineState, EngineState)
    where
        DC: FnOnce() -> Result<D::Config, LoadError>,
        LC: FnOnce() -> Result<L::Config, LoadError>,
    {
        let detector = self.registry.load_engine(&mut self.detector, detector_config);
        let liveness = self.registry.load_engine(&mut self.liveness, liveness_config);
        (detector, liveness)
    }

    /// Run one frame through the whole pipeline, starting at the gate.
    pub fn process(&mut self, frame: Frame) -> PassOutcome {
        let Some(permit) = self.gate.admit() else {
            tracing::trace!(seq = frame.sequence(), "gate busy, frame dropped");
            return PassOutcome::Dropped;
        };
        self.run_admitted(permit, frame)
    }

    /// Run a frame that has already been admitted. The permit is released
    /// before this returns, whatever the outcome.
    pub fn run_admitted(&mut self, permit: GatePermit, frame: Frame) -> PassOutcome {
        if !self.registry.is_ready(EngineKind::Detector) || !self.registry.is_ready(EngineKind::Liveness) {
            permit.release();
            tracing::trace!(seq = frame.sequence(), "models not ready, frame skipped");
            return PassOutcome::NotReady;
        }

        let sequence = frame.sequence();
        let result = self.run_stages(&frame);
        permit.release();

        match result {
            Ok(verdict) => {
                tracing::debug!(
                    seq = sequence,
                    score = ?verdict.score,
                    status = ?verdict.status,
                    "verdict"
                );
                PassOutcome::Verdict(verdict)
            }
            Err(error) => {
                tracing::warn!(seq = sequence, error = %error, "pipeline pass failed");
                PassOutcome::Failed { sequence, error }
            }
        }
    }

    fn run_stages(&mut self, frame: &Frame) -> Result<Verdict, PipelineError> {
        let sequence = frame.sequence();
        let buffer = convert(frame, self.detector.input_layout())?;

        let faces = self
            .detector
            .detect_faces(&buffer, self.orientation)
            .map_err(PipelineError::Detection)?;

        let Some(face) = self.selection.select(&faces).copied() else {
            tracing::debug!(seq = sequence, "no face detected");
            return Ok(Verdict::no_face(sequence));
        };
        tracing::trace!(
            seq = sequence,
            faces = faces.len(),
            left = face.left,
            top = face.top,
            right = face.right,
            bottom = face.bottom,
            confidence = face.confidence,
            "primary face selected"
        );

        let score = self
            .liveness
            .score_liveness(&buffer, self.orientation, &face)
            .map_err(PipelineError::Liveness)?;

        Ok(Verdict::scored(score, face, sequence))
    }
}
