//! Liveness model calibration entries, decoded from the JSON config file.
//!
//! ```json
//! [
//!   { "scale": 2.7, "shift_x": 0.0, "shift_y": 0.0, "height": 80, "width": 80,
//!     "name": "model_1", "org_resize": false }
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("model config not found: {0}")]
    NotFound(String),
    #[error("failed to read model config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed model config: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("model config entry {index}: {reason}")]
    InvalidEntry { index: usize, reason: String },
    #[error("model config contains no entries")]
    Empty,
}

/// Calibration for one liveness model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Crop size as a multiple of the face box.
    pub scale: f32,
    /// Horizontal crop shift as a fraction of the face box width.
    pub shift_x: f32,
    /// Vertical crop shift as a fraction of the face box height.
    pub shift_y: f32,
    /// Model input height in pixels.
    pub height: u32,
    /// Model input width in pixels.
    pub width: u32,
    /// Model name; also the lookup key for the model file.
    pub name: String,
    /// Resize the whole frame instead of cropping around the face.
    pub org_resize: bool,
}

impl ModelConfig {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if self.width == 0 || self.height == 0 {
            return Err(format!(
                "{}: input size must be positive, got {}x{}",
                self.name, self.width, self.height
            ));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(format!("{}: scale must be positive, got {}", self.name, self.scale));
        }
        if !self.shift_x.is_finite() || !self.shift_y.is_finite() {
            return Err(format!("{}: shifts must be finite", self.name));
        }
        Ok(())
    }
}

/// A validated, non-empty set of model configs. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfigSet {
    entries: Vec<ModelConfig>,
}

impl ModelConfigSet {
    pub fn new(entries: Vec<ModelConfig>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut names = HashSet::new();
        for (index, entry) in entries.iter().enumerate() {
            entry
                .validate()
                .map_err(|reason| ConfigError::InvalidEntry { index, reason })?;
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::InvalidEntry {
                    index,
                    reason: format!("duplicate model name {:?}", entry.name),
                });
            }
        }

        Ok(Self { entries })
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let entries: Vec<ModelConfig> = serde_json::from_str(json)?;
        Self::new(entries)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let set = Self::from_json(&json)?;
        tracing::debug!(path = %path.display(), models = set.len(), "model config loaded");
        Ok(set)
    }

    pub fn entries(&self) -> &[ModelConfig] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModelConfig> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ModelConfig> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a ModelConfigSet {
    type Item = &'a ModelConfig;
    type IntoIter = std::slice::Iter<'a, ModelConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
