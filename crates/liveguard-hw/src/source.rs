//! Frame sources: the narrow contract the pipeline consumes from capture.
//!
//! Capture session setup is owned by the platform; anything that can hand
//! over [`Frame`] values implements [`FrameSource`]. Two sources ship here:
//! an in-memory queue and a replay of raw frame dumps from a directory.

use crate::frame::{FormatError, Frame, PixelFormat};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Orientation passed to the inference engines alongside every frame.
///
/// The engines ignore it; it is carried through uninterpreted.
pub const DEFAULT_ORIENTATION: i32 = 0;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid frame {path}: {source}")]
    InvalidFrame {
        path: String,
        #[source]
        source: FormatError,
    },
}

/// A producer of captured frames.
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Frames queued in memory, delivered in order.
#[derive(Debug, Default)]
pub struct VecSource {
    frames: VecDeque<Frame>,
}

impl VecSource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for VecSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        Ok(self.frames.pop_front())
    }
}

/// Replays tightly packed `*.raw` frame dumps from a directory, sorted by name.
#[derive(Debug)]
pub struct DirectorySource {
    paths: VecDeque<PathBuf>,
    format: PixelFormat,
    width: u32,
    height: u32,
    sequence: u64,
}

impl DirectorySource {
    pub fn open(
        dir: &Path,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Self, SourceError> {
        if !dir.is_dir() {
            return Err(SourceError::DirectoryNotFound(dir.display().to_string()));
        }

        let entries = std::fs::read_dir(dir).map_err(|source| SourceError::Read {
            path: dir.display().to_string(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "raw"))
            .collect();
        paths.sort();

        tracing::info!(
            dir = %dir.display(),
            frames = paths.len(),
            %format,
            width,
            height,
            "opened frame replay directory"
        );

        Ok(Self {
            paths: paths.into(),
            format,
            width,
            height,
            sequence: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let display = path.display().to_string();

        let data = std::fs::read(&path).map_err(|source| SourceError::Read {
            path: display.clone(),
            source,
        })?;
        let frame = Frame::from_packed(self.format, self.width, self.height, data)
            .map_err(|source| SourceError::InvalidFrame {
                path: display,
                source,
            })?
            .with_sequence(self.sequence);

        self.sequence += 1;
        Ok(Some(frame))
    }
}
