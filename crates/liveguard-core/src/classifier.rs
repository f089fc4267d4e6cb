//! Liveness score → status category.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scores at or above this are classified as a real face.
pub const REAL_THRESHOLD: f32 = 0.9;

/// Engine convention for "could not assess".
pub const UNASSESSED_SCORE: f32 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The detector found no face.
    NoFace,
    /// The liveness engine returned exactly 0.0.
    NoFaceOrLowConfidence,
    Real,
    PossibleSpoof,
}

impl Status {
    pub fn label(self) -> &'static str {
        match self {
            Status::NoFace => "No face",
            Status::NoFaceOrLowConfidence => "No face / low confidence",
            Status::Real => "Real face",
            Status::PossibleSpoof => "Possible spoof",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a raw liveness score.
///
/// Total over every float: negative and NaN scores fall through to
/// [`Status::PossibleSpoof`], and scores above 1.0 are not clamped.
pub fn classify(score: Option<f32>) -> Status {
    match score {
        None => Status::NoFace,
        Some(s) if s == UNASSESSED_SCORE => Status::NoFaceOrLowConfidence,
        Some(s) if s >= REAL_THRESHOLD => Status::Real,
        Some(_) => Status::PossibleSpoof,
    }
}
