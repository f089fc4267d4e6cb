//! MiniFAS-style liveness scoring via ONNX Runtime.
//!
//! One session per [`ModelConfig`]. Each model looks at a differently scaled
//! crop around the face; the score is the mean "live" probability across
//! models.

use crate::engine::{check_buffer, EngineKind, InferenceEngine, InferenceError, LivenessDetector, LoadError};
use crate::model_config::{ModelConfig, ModelConfigSet};
use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use liveguard_hw::{ConvertedBuffer, PixelFormat};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};

/// Output class holding the "live" probability.
const LIVE_CLASS: usize = 1;

/// Score reported when the face box is too small to assess.
pub const DEGENERATE_FACE_SCORE: f32 = 0.0;

/// Pixel rectangle inside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

struct LoadedModel {
    config: ModelConfig,
    session: Session,
}

pub struct MiniFasLiveness {
    model_dir: PathBuf,
    models: Vec<LoadedModel>,
}

impl MiniFasLiveness {
    /// Create an unloaded engine; models are looked up as
    /// `<model_dir>/<name>.onnx` at load time.
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            models: Vec::new(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }
}

impl InferenceEngine for MiniFasLiveness {
    type Config = ModelConfigSet;

    fn kind(&self) -> EngineKind {
        EngineKind::Liveness
    }

    fn load(&mut self, config: &ModelConfigSet) -> Result<(), LoadError> {
        let mut models = Vec::with_capacity(config.len());
        for entry in config {
            let path = self.model_dir.join(format!("{}.onnx", entry.name));
            if !path.exists() {
                return Err(LoadError::ModelNotFound(path.display().to_string()));
            }

            let session = Session::builder()?
                .with_intra_threads(1)?
                .commit_from_file(&path)?;

            tracing::info!(
                model = %entry.name,
                path = %path.display(),
                input = %format!("{}x{}", entry.width, entry.height),
                scale = entry.scale,
                "loaded liveness model"
            );
            models.push(LoadedModel {
                config: entry.clone(),
                session,
            });
        }

        self.models = models;
        Ok(())
    }
}

impl LivenessDetector for MiniFasLiveness {
    fn score_liveness(
        &mut self,
        buffer: &ConvertedBuffer,
        _orientation: i32,
        face: &FaceBox,
    ) -> Result<f32, InferenceError> {
        check_buffer(buffer, PixelFormat::Rgba)?;
        if self.models.is_empty() {
            return Err(InferenceError::NotLoaded);
        }
        if face.width() <= 0 || face.height() <= 0 {
            tracing::debug!(?face, "degenerate face box, not assessed");
            return Ok(DEGENERATE_FACE_SCORE);
        }

        let (width, height) = (buffer.width(), buffer.height());
        let frame = RgbaImage::from_raw(width, height, buffer.as_bytes().to_vec()).ok_or(
            InferenceError::BufferSize {
                expected: PixelFormat::Rgba.packed_len(width as usize, height as usize),
                actual: buffer.len(),
            },
        )?;

        let mut total = 0.0f32;
        for model in &mut self.models {
            let cfg = &model.config;
            let patch = if cfg.org_resize {
                imageops::resize(&frame, cfg.width, cfg.height, FilterType::Triangle)
            } else {
                let rect = crop_rect(face, cfg, width, height);
                let crop = imageops::crop_imm(&frame, rect.x, rect.y, rect.width, rect.height).to_image();
                imageops::resize(&crop, cfg.width, cfg.height, FilterType::Triangle)
            };

            let input = to_bgr_tensor(&patch);
            let outputs = model
                .session
                .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, logits) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
                InferenceError::InferenceFailed(format!("{}: {e}", cfg.name))
            })?;

            let probs = softmax_if_needed(logits);
            let live = probs.get(LIVE_CLASS).copied().ok_or_else(|| {
                InferenceError::InferenceFailed(format!(
                    "{}: expected at least 2 classes, got {}",
                    cfg.name,
                    probs.len()
                ))
            })?;
            tracing::trace!(model = %cfg.name, live, "model score");
            total += live;
        }

        Ok(total / self.models.len() as f32)
    }
}

/// Crop around the face, scaled and shifted by `cfg`, kept inside a
/// `width`×`height` frame. The scale is capped so the crop always fits.
/// Empty dimensions are treated as 1 pixel.
pub fn crop_rect(face: &FaceBox, cfg: &ModelConfig, width: u32, height: u32) -> CropRect {
    let w = i64::from(width.max(1));
    let h = i64::from(height.max(1));
    let box_w = (i64::from(face.right) - i64::from(face.left) + 1).max(1);
    let box_h = (i64::from(face.bottom) - i64::from(face.top) + 1).max(1);

    let shift_x = (box_w as f32 * cfg.shift_x) as i64;
    let shift_y = (box_h as f32 * cfg.shift_y) as i64;
    let scale = cfg
        .scale
        .min((w - 1) as f32 / box_w as f32)
        .min((h - 1) as f32 / box_h as f32);

    let center_x = box_w / 2 + i64::from(face.left);
    let center_y = box_h / 2 + i64::from(face.top);
    let new_w = ((box_w as f32 * scale) as i64).clamp(1, w);
    let new_h = ((box_h as f32 * scale) as i64).clamp(1, h);

    let mut left = center_x - new_w / 2 + shift_x;
    let mut top = center_y - new_h / 2 + shift_y;
    let mut right = center_x + new_w / 2 + shift_x;
    let mut bottom = center_y + new_h / 2 + shift_y;

    if left < 0 {
        right -= left;
        left = 0;
    }
    if top < 0 {
        bottom -= top;
        top = 0;
    }
    if right >= w {
        left -= right - w + 1;
    }
    if bottom >= h {
        top -= bottom - h + 1;
    }

    let left = left.clamp(0, w - new_w);
    let top = top.clamp(0, h - new_h);
    CropRect {
        x: left as u32,
        y: top as u32,
        width: new_w as u32,
        height: new_h as u32,
    }
}

/// NCHW float tensor in B, G, R channel order, unnormalized 0..=255.
fn to_bgr_tensor(patch: &RgbaImage) -> Array4<f32> {
    let (w, h) = (patch.width() as usize, patch.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in patch.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[2] as f32;
        tensor[[0, 1, y, x]] = pixel[1] as f32;
        tensor[[0, 2, y, x]] = pixel[0] as f32;
    }
    tensor
}

/// Models exported with or without a softmax head both occur; apply it only
/// when the output is not already a distribution.
fn softmax_if_needed(values: &[f32]) -> Vec<f32> {
    let sum: f32 = values.iter().sum();
    let is_distribution = values.iter().all(|v| (0.0..=1.0).contains(v)) && (sum - 1.0).abs() < 1e-3;
    if is_distribution {
        return values.to_vec();
    }

    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}
