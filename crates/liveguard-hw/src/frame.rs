//! Frame type and pixel layouts: planes, strides, geometry validation.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Pixel layout of a frame or converted buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 4-channel, byte order B, G, R, A (camera output).
    Bgra,
    /// Packed 4-channel, byte order R, G, B, A.
    Rgba,
    /// 2-plane 4:2:0: full-resolution Y plane, half-resolution interleaved Cb/Cr plane.
    Nv12,
    /// 2-plane 4:2:0 with the chroma pair stored Cr/Cb.
    Nv21,
}

impl PixelFormat {
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Bgra => "bgra",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Nv21 => "nv21",
        }
    }

    /// True for the 2-plane chroma-subsampled layouts.
    pub fn is_subsampled(self) -> bool {
        matches!(self, PixelFormat::Nv12 | PixelFormat::Nv21)
    }

    pub fn plane_count(self) -> usize {
        if self.is_subsampled() {
            2
        } else {
            1
        }
    }

    /// Meaningful bytes in one row of `plane` (excluding stride padding).
    ///
    /// The chroma plane of a 4:2:0 layout holds `width / 2` Cb/Cr pairs per
    /// row, which is `width` bytes, the same as the luma row.
    pub fn row_bytes(self, _plane: usize, width: usize) -> usize {
        if self.is_subsampled() {
            width
        } else {
            width * 4
        }
    }

    /// Number of rows stored in `plane`.
    pub fn plane_rows(self, plane: usize, height: usize) -> usize {
        if self.is_subsampled() && plane == 1 {
            height / 2
        } else {
            height
        }
    }

    /// Byte length of a tightly packed image in this layout.
    ///
    /// Packed layouts: `width * height * 4`.
    /// 4:2:0 layouts: `width * height + width * height / 2`.
    pub fn packed_len(self, width: usize, height: usize) -> usize {
        if self.is_subsampled() {
            width * height + width * height / 2
        } else {
            width * height * 4
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bgra" => Ok(PixelFormat::Bgra),
            "rgba" => Ok(PixelFormat::Rgba),
            "nv12" => Ok(PixelFormat::Nv12),
            "nv21" => Ok(PixelFormat::Nv21),
            other => Err(FormatError::UnknownFormat(other.to_string())),
        }
    }
}

/// One image plane: raw bytes plus the distance between row starts.
///
/// `stride` may exceed the row byte width because of platform row padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, stride: usize) -> Self {
        Self { data, stride }
    }

    /// Bytes of row `row`, trimmed to `len` (drops stride padding).
    pub fn row(&self, row: usize, len: usize) -> &[u8] {
        let start = row * self.stride;
        &self.data[start..start + len]
    }
}

/// A captured camera frame.
///
/// Geometry is validated on construction, so every row of every plane can
/// be read without bounds failures by the converter.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<Plane>,
    sequence: u64,
}

impl Frame {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        planes: Vec<Plane>,
    ) -> Result<Self, FormatError> {
        validate_geometry(width, height, format, &planes)?;
        Ok(Self {
            width,
            height,
            format,
            planes,
            sequence: 0,
        })
    }

    /// Build a frame from a tightly packed buffer (no row padding).
    ///
    /// For 4:2:0 layouts the luma plane is the first `width * height`
    /// bytes and the chroma plane follows.
    pub fn from_packed(
        format: PixelFormat,
        width: u32,
        height: u32,
        mut data: Vec<u8>,
    ) -> Result<Self, FormatError> {
        let (w, h) = (width as usize, height as usize);
        let expected = format.packed_len(w, h);
        if data.len() != expected {
            return Err(FormatError::BufferSize {
                expected,
                actual: data.len(),
            });
        }

        let planes = if format.is_subsampled() {
            let chroma = data.split_off(w * h);
            vec![Plane::new(data, w), Plane::new(chroma, w)]
        } else {
            vec![Plane::new(data, w * 4)]
        };
        Self::new(width, height, format, planes)
    }

    /// Attach the capture sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

fn validate_geometry(
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: &[Plane],
) -> Result<(), FormatError> {
    if width == 0 || height == 0 {
        return Err(FormatError::EmptyFrame { width, height });
    }
    if format.is_subsampled() && (width % 2 != 0 || height % 2 != 0) {
        return Err(FormatError::OddDimensions { width, height });
    }
    if planes.len() != format.plane_count() {
        return Err(FormatError::PlaneCount {
            format,
            expected: format.plane_count(),
            actual: planes.len(),
        });
    }

    for (index, plane) in planes.iter().enumerate() {
        let row_bytes = format.row_bytes(index, width as usize);
        let rows = format.plane_rows(index, height as usize);
        if plane.stride < row_bytes {
            return Err(FormatError::StrideTooSmall {
                plane: index,
                stride: plane.stride,
                min: row_bytes,
            });
        }
        // The last row does not need trailing padding.
        let needed = plane.stride * (rows - 1) + row_bytes;
        if plane.data.len() < needed {
            return Err(FormatError::PlaneTooShort {
                plane: index,
                expected: needed,
                actual: plane.data.len(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("unsupported source format: {0}")]
    UnsupportedSource(PixelFormat),
    #[error("unsupported target format: {0}")]
    UnsupportedTarget(PixelFormat),
    #[error("no conversion from {from} to {to}")]
    UnsupportedConversion { from: PixelFormat, to: PixelFormat },
    #[error("unknown pixel format: {0:?} (expected bgra, rgba, nv12 or nv21)")]
    UnknownFormat(String),
    #[error("empty frame: {width}x{height}")]
    EmptyFrame { width: u32, height: u32 },
    #[error("4:2:0 frame needs even dimensions, got {width}x{height}")]
    OddDimensions { width: u32, height: u32 },
    #[error("{format} expects {expected} planes, got {actual}")]
    PlaneCount {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
    #[error("plane {plane}: stride {stride} is smaller than row width {min}")]
    StrideTooSmall {
        plane: usize,
        stride: usize,
        min: usize,
    },
    #[error("plane {plane}: expected at least {expected} bytes, got {actual}")]
    PlaneTooShort {
        plane: usize,
        expected: usize,
        actual: usize,
    },
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_len() {
        assert_eq!(PixelFormat::Rgba.packed_len(4, 2), 32);
        assert_eq!(PixelFormat::Bgra.packed_len(640, 480), 640 * 480 * 4);
        assert_eq!(PixelFormat::Nv21.packed_len(4, 2), 12);
        assert_eq!(PixelFormat::Nv12.packed_len(640, 480), 640 * 480 * 3 / 2);
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("NV12".parse::<PixelFormat>().unwrap(), PixelFormat::Nv12);
        assert_eq!(" bgra ".parse::<PixelFormat>().unwrap(), PixelFormat::Bgra);
        assert!(matches!(
            "yuyv".parse::<PixelFormat>(),
            Err(FormatError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_frame_accepts_padded_stride_without_trailing_padding() {
        // 2x2 BGRA, stride 12 (4 bytes padding), last row unpadded: 12 + 8 bytes.
        let plane = Plane::new(vec![0u8; 20], 12);
        let frame = Frame::new(2, 2, PixelFormat::Bgra, vec![plane]).unwrap();
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.planes()[0].row(1, 8).len(), 8);
    }

    #[test]
    fn test_frame_rejects_small_stride() {
        let plane = Plane::new(vec![0u8; 64], 4);
        let err = Frame::new(2, 2, PixelFormat::Bgra, vec![plane]).unwrap_err();
        assert_eq!(
            err,
            FormatError::StrideTooSmall {
                plane: 0,
                stride: 4,
                min: 8
            }
        );
    }

    #[test]
    fn test_frame_rejects_short_plane() {
        let luma = Plane::new(vec![0u8; 8], 4);
        let chroma = Plane::new(vec![0u8; 2], 4);
        let err = Frame::new(4, 2, PixelFormat::Nv12, vec![luma, chroma]).unwrap_err();
        assert_eq!(
            err,
            FormatError::PlaneTooShort {
                plane: 1,
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn test_frame_rejects_odd_subsampled_dimensions() {
        let luma = Plane::new(vec![0u8; 9], 3);
        let chroma = Plane::new(vec![0u8; 3], 3);
        let err = Frame::new(3, 3, PixelFormat::Nv12, vec![luma, chroma]).unwrap_err();
        assert!(matches!(err, FormatError::OddDimensions { .. }));
    }

    #[test]
    fn test_frame_rejects_wrong_plane_count() {
        let err = Frame::new(2, 2, PixelFormat::Nv12, vec![Plane::new(vec![0; 4], 2)]).unwrap_err();
        assert!(matches!(err, FormatError::PlaneCount { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn test_frame_rejects_empty() {
        let err = Frame::new(0, 2, PixelFormat::Bgra, vec![Plane::new(vec![], 0)]).unwrap_err();
        assert!(matches!(err, FormatError::EmptyFrame { .. }));
    }

    #[test]
    fn test_from_packed_splits_planes() {
        let data: Vec<u8> = (0..12).collect();
        let frame = Frame::from_packed(PixelFormat::Nv12, 4, 2, data).unwrap();
        assert_eq!(frame.planes()[0].data, (0..8).collect::<Vec<u8>>());
        assert_eq!(frame.planes()[1].data, vec![8, 9, 10, 11]);
        assert_eq!(frame.planes()[1].stride, 4);
    }

    #[test]
    fn test_from_packed_wrong_length() {
        let err = Frame::from_packed(PixelFormat::Bgra, 2, 2, vec![0u8; 15]).unwrap_err();
        assert_eq!(
            err,
            FormatError::BufferSize {
                expected: 16,
                actual: 15
            }
        );
    }
}
