//! SCRFD face detector via ONNX Runtime.
//!
//! Consumes the packed RGBA buffer, letterboxes it to 640×640, decodes the
//! three anchor-free strides and suppresses overlaps with NMS.

use crate::engine::{check_buffer, EngineKind, FaceDetector, InferenceEngine, InferenceError, LoadError};
use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use liveguard_hw::{ConvertedBuffer, PixelFormat};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Scale and padding applied by the letterbox, for mapping boxes back.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> (Self, usize, usize) {
        let scale = (SCRFD_INPUT_SIZE as f32 / width as f32)
            .min(SCRFD_INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        let letterbox = Self {
            scale,
            pad_x: (SCRFD_INPUT_SIZE - new_w) as f32 / 2.0,
            pad_y: (SCRFD_INPUT_SIZE - new_h) as f32 / 2.0,
        };
        (letterbox, new_w, new_h)
    }

    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Detection in frame coordinates before clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn to_face_box(self, width: u32, height: u32) -> FaceBox {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        FaceBox::new(
            self.x1.clamp(0.0, max_x).round() as i32,
            self.y1.clamp(0.0, max_y).round() as i32,
            self.x2.clamp(0.0, max_x).round() as i32,
            self.y2.clamp(0.0, max_y).round() as i32,
            self.score,
        )
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputs = (usize, usize);

pub struct ScrfdDetector {
    model_path: PathBuf,
    session: Option<Session>,
    stride_outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    /// Create an unloaded detector for the model at `model_path`.
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            session: None,
            stride_outputs: [(0, 3), (1, 4), (2, 5)],
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn preprocess(&self, buffer: &ConvertedBuffer) -> Result<(Array4<f32>, Letterbox), InferenceError> {
        let (width, height) = (buffer.width(), buffer.height());
        let image = RgbaImage::from_raw(width, height, buffer.as_bytes().to_vec()).ok_or(
            InferenceError::BufferSize {
                expected: PixelFormat::Rgba.packed_len(width as usize, height as usize),
                actual: buffer.len(),
            },
        )?;

        let (letterbox, new_w, new_h) = Letterbox::fit(width as usize, height as usize);
        let resized = imageops::resize(&image, new_w as u32, new_h as u32, FilterType::Triangle);

        let pad_x = letterbox.pad_x.floor() as usize;
        let pad_y = letterbox.pad_y.floor() as usize;

        // Padding normalizes to 0.0.
        let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = (pad_x + x as usize, pad_y + y as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        Ok((tensor, letterbox))
    }
}

impl InferenceEngine for ScrfdDetector {
    type Config = ();

    fn kind(&self) -> EngineKind {
        EngineKind::Detector
    }

    fn load(&mut self, _config: &()) -> Result<(), LoadError> {
        if !self.model_path.exists() {
            return Err(LoadError::ModelNotFound(self.model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&self.model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %self.model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 6 {
            return Err(LoadError::Rejected(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        self.stride_outputs = discover_output_indices(&output_names);
        tracing::debug!(stride_outputs = ?self.stride_outputs, "SCRFD output mapping");
        self.session = Some(session);
        Ok(())
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect_faces(
        &mut self,
        buffer: &ConvertedBuffer,
        _orientation: i32,
    ) -> Result<Vec<FaceBox>, InferenceError> {
        check_buffer(buffer, PixelFormat::Rgba)?;
        let (input, letterbox) = self.preprocess(buffer)?;

        let session = self.session.as_mut().ok_or(InferenceError::NotLoaded)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_outputs[pos];
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                InferenceError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                InferenceError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;

            candidates.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let kept = nms(candidates, SCRFD_NMS_THRESHOLD);
        Ok(kept
            .into_iter()
            .map(|c| c.to_face_box(buffer.width(), buffer.height()))
            .collect())
    }
}

/// Map stride slots to output tensors.
///
/// Exports name their tensors either `score_8`, `bbox_16`, ... or with
/// generic numbers. Unrecognized names use the positional layout
/// `[0-2] = scores, [3-5] = bboxes`.
fn discover_output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(pairs) => [pairs[0], pairs[1], pairs[2]],
        None => {
            tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Candidate> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut out = Vec::new();
    for idx in 0..anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(offsets) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid) as f32 * step;
        let ay = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.to_frame(ax - offsets[0] * step, ay - offsets[1] * step);
        let (x2, y2) = letterbox.to_frame(ax + offsets[2] * step, ay + offsets[3] * step);
        out.push(Candidate { x1, y1, x2, y2, score });
    }
    out
}

/// Keep the highest-scoring box of every overlapping cluster. The result is
/// sorted by descending confidence.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let inter = Candidate {
        x1: a.x1.max(b.x1),
        y1: a.y1.max(b.y1),
        x2: a.x2.min(b.x2),
        y2: a.y2.min(b.y2),
        score: 0.0,
    }
    .area();
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
