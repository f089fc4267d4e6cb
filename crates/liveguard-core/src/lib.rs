//! liveguard-core: face liveness pipeline.
//!
//! Frames pass a single-slot gate, are converted to the detector's layout,
//! scanned for faces with SCRFD and scored by one or more MiniFAS liveness
//! models, all running via ONNX Runtime. Engine lifecycles are tracked by
//! the [`ModelRegistry`].

pub mod classifier;
pub mod detector;
pub mod engine;
pub mod gate;
pub mod liveness;
pub mod model_config;
pub mod pipeline;
pub mod registry;
pub mod types;

use std::path::PathBuf;

pub use classifier::{classify, Status, REAL_THRESHOLD, UNASSESSED_SCORE};
pub use detector::ScrfdDetector;
pub use engine::{EngineKind, FaceDetector, InferenceEngine, InferenceError, LivenessDetector, LoadError};
pub use gate::{FrameGate, GatePermit};
pub use liveness::MiniFasLiveness;
pub use model_config::{ConfigError, ModelConfig, ModelConfigSet};
pub use pipeline::{FaceSelection, InferencePipeline, PassOutcome, PipelineError};
pub use registry::{EngineState, FailureCode, LoadFailure, ModelRegistry, RegistrySnapshot};
pub use types::{FaceBox, Verdict};

/// Default model directory: `$XDG_DATA_HOME/liveguard/models`, falling back
/// to `~/.local/share/liveguard/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("liveguard")
        .join("models")
}
