use liveguard_core::FaceSelection;
use liveguard_hw::PixelFormat;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Detector model file name inside `model_dir`.
    pub detector_model: String,
    /// Liveness calibration file (JSON array of model configs).
    pub liveness_config: PathBuf,
    /// Replay directory of raw frame dumps. No frames are delivered when unset.
    pub frame_dir: Option<PathBuf>,
    pub frame_format: PixelFormat,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Pause between delivered frames.
    pub frame_interval: Duration,
    pub face_selection: FaceSelection,
    /// Passes slower than this are logged as warnings.
    pub slow_pass: Duration,
    /// Register the D-Bus status service.
    pub dbus_enabled: bool,
}

impl Config {
    /// Load configuration from `LIVEGUARD_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = var("LIVEGUARD_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(liveguard_core::default_model_dir);

        let liveness_config = var("LIVEGUARD_LIVENESS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| model_dir.join("config.json"));

        let frame_format = parse_or(&var, "LIVEGUARD_FRAME_FORMAT", PixelFormat::Nv12);
        let face_selection = parse_or(&var, "LIVEGUARD_FACE_SELECTION", FaceSelection::First);

        Self {
            detector_model: var("LIVEGUARD_DETECTOR_MODEL")
                .unwrap_or_else(|| "detector.onnx".to_string()),
            liveness_config,
            frame_dir: var("LIVEGUARD_FRAME_DIR").map(PathBuf::from),
            frame_format,
            frame_width: parse_or(&var, "LIVEGUARD_FRAME_WIDTH", 640),
            frame_height: parse_or(&var, "LIVEGUARD_FRAME_HEIGHT", 480),
            frame_interval: Duration::from_millis(parse_or(&var, "LIVEGUARD_FRAME_INTERVAL_MS", 33)),
            face_selection,
            slow_pass: Duration::from_millis(parse_or(&var, "LIVEGUARD_SLOW_PASS_MS", 1000)),
            dbus_enabled: var("LIVEGUARD_DBUS").map(|v| v != "0").unwrap_or(true),
            model_dir,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }
}

/// Parse `key`, falling back to `default` when unset or invalid.
fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => default,
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, value = %raw, error = %e, "invalid setting, using default");
                default
            }
        },
    }
}
