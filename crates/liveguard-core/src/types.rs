use crate::classifier::{classify, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detected face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

impl FaceBox {
    /// Build a box, ordering the edges so `left <= right` and `top <= bottom`
    /// and clamping the confidence into [0, 1].
    pub fn new(left: i32, top: i32, right: i32, bottom: i32, confidence: f32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
            confidence: if confidence.is_nan() {
                0.0
            } else {
                confidence.clamp(0.0, 1.0)
            },
        }
    }

    /// Saturates at `i32::MAX` for boxes spanning the whole coordinate range.
    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn area(&self) -> i64 {
        (i64::from(self.right) - i64::from(self.left))
            * (i64::from(self.bottom) - i64::from(self.top))
    }

    pub fn center(&self) -> (i32, i32) {
        let mid = |a: i32, b: i32| ((i64::from(a) + i64::from(b)) / 2) as i32;
        (mid(self.left, self.right), mid(self.top, self.bottom))
    }
}

/// Outcome of one completed pipeline pass.
///
/// Superseded by the next verdict; never accumulated into history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Raw liveness score, `None` when no face was found. Not normalized.
    pub score: Option<f32>,
    pub status: Status,
    /// The face the score was computed for.
    pub face: Option<FaceBox>,
    /// Capture sequence number of the frame that produced this verdict.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl Verdict {
    pub fn no_face(sequence: u64) -> Self {
        Self {
            score: None,
            status: classify(None),
            face: None,
            sequence,
            timestamp: Utc::now(),
        }
    }

    pub fn scored(score: f32, face: FaceBox, sequence: u64) -> Self {
        Self {
            score: Some(score),
            status: classify(Some(score)),
            face: Some(face),
            sequence,
            timestamp: Utc::now(),
        }
    }
}
