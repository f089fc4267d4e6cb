//! Inference engine contract.
//!
//! The detector and the liveness model are opaque collaborators. The
//! pipeline talks to them only through these traits; each engine owns the
//! resources it allocates and releases them when dropped.

use crate::model_config::ConfigError;
use crate::registry::FailureCode;
use crate::types::FaceBox;
use liveguard_hw::{ConvertedBuffer, PixelFormat};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Registry slot of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Detector,
    Liveness,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::Detector, EngineKind::Liveness];

    pub(crate) fn index(self) -> usize {
        match self {
            EngineKind::Detector => 0,
            EngineKind::Liveness => 1,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Detector => f.write_str("detector"),
            EngineKind::Liveness => f.write_str("liveness"),
        }
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("liveness config: {0}")]
    Config(#[from] ConfigError),
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("engine rejected model: {0}")]
    Rejected(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl LoadError {
    /// Reason code recorded in the registry when this error fails a load.
    pub fn code(&self) -> FailureCode {
        match self {
            LoadError::Config(ConfigError::NotFound(_) | ConfigError::Read { .. }) => {
                FailureCode::ConfigMissing
            }
            LoadError::Config(ConfigError::Malformed(_) | ConfigError::InvalidEntry { .. }) => {
                FailureCode::ConfigMalformed
            }
            LoadError::Config(ConfigError::Empty) => FailureCode::ConfigEmpty,
            LoadError::ModelNotFound(_) => FailureCode::ModelMissing,
            LoadError::Rejected(_) | LoadError::Ort(_) => FailureCode::EngineRejected,
        }
    }
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },
    #[error("engine reads {expected}, got a {actual} buffer")]
    Layout {
        expected: PixelFormat,
        actual: PixelFormat,
    },
    #[error("engine has no loaded model")]
    NotLoaded,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Lifecycle shared by both engines.
pub trait InferenceEngine: Send {
    /// Configuration consumed by [`load`](Self::load).
    type Config;

    fn kind(&self) -> EngineKind;

    /// Load model resources. Called at most once per registry load attempt.
    fn load(&mut self, config: &Self::Config) -> Result<(), LoadError>;
}

/// Face detection stage.
pub trait FaceDetector: InferenceEngine {
    /// Layout the detector reads. Frames are converted into it, and the same
    /// buffer is then handed to the liveness stage.
    fn input_layout(&self) -> PixelFormat {
        PixelFormat::Rgba
    }

    /// Detect faces. An empty vector means "no face" and is not an error.
    fn detect_faces(
        &mut self,
        buffer: &ConvertedBuffer,
        orientation: i32,
    ) -> Result<Vec<FaceBox>, InferenceError>;
}

/// Liveness (anti-spoofing) stage.
pub trait LivenessDetector: InferenceEngine {
    /// Score one face. The range is model-defined and not normalized.
    fn score_liveness(
        &mut self,
        buffer: &ConvertedBuffer,
        orientation: i32,
        face: &FaceBox,
    ) -> Result<f32, InferenceError>;
}

/// Check a buffer against the layout an engine reads.
pub fn check_buffer(buffer: &ConvertedBuffer, layout: PixelFormat) -> Result<(), InferenceError> {
    if buffer.layout() != layout {
        return Err(InferenceError::Layout {
            expected: layout,
            actual: buffer.layout(),
        });
    }
    let expected = layout.packed_len(buffer.width() as usize, buffer.height() as usize);
    if buffer.len() != expected {
        return Err(InferenceError::BufferSize {
            expected,
            actual: buffer.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_codes() {
        assert_eq!(
            LoadError::from(ConfigError::NotFound("x".into())).code(),
            FailureCode::ConfigMissing
        );
        assert_eq!(
            LoadError::from(ConfigError::Empty).code(),
            FailureCode::ConfigEmpty
        );
        assert_eq!(
            LoadError::from(ConfigError::InvalidEntry {
                index: 0,
                reason: "bad".into()
            })
            .code(),
            FailureCode::ConfigMalformed
        );
        assert_eq!(
            LoadError::ModelNotFound("det.onnx".into()).code(),
            FailureCode::ModelMissing
        );
        assert_eq!(
            LoadError::Rejected("outputs".into()).code(),
            FailureCode::EngineRejected
        );
    }

    #[test]
    fn test_check_buffer_layout() {
        let nv21 = ConvertedBuffer::new(PixelFormat::Nv21, 2, 2, vec![0; 6]).unwrap();
        assert!(matches!(
            check_buffer(&nv21, PixelFormat::Rgba),
            Err(InferenceError::Layout { .. })
        ));
        let rgba = ConvertedBuffer::new(PixelFormat::Rgba, 2, 2, vec![0; 16]).unwrap();
        assert!(check_buffer(&rgba, PixelFormat::Rgba).is_ok());
    }
}
