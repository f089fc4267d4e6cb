//! Pixel conversion from capture layouts into inference layouts.
//!
//! Supported conversions:
//!
//! | source | target | operation |
//! |--------|--------|-----------|
//! | BGRA   | RGBA   | swap channels 0 and 2 per pixel |
//! | NV12   | NV21   | copy luma, transpose each Cb/Cr pair |
//! | NV12   | RGBA   | BT.601 full-range YCbCr → RGB, alpha 255 |
//!
//! All functions are pure: the source frame is never mutated and every call
//! allocates a fresh output buffer, so distinct frames convert in parallel.

use crate::frame::{FormatError, Frame, PixelFormat};

/// A frame converted into the exact byte layout an inference engine reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedBuffer {
    layout: PixelFormat,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ConvertedBuffer {
    /// Wrap a tightly packed buffer, rejecting empty geometry and any size
    /// mismatch.
    pub fn new(
        layout: PixelFormat,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Result<Self, FormatError> {
        if width == 0 || height == 0 {
            return Err(FormatError::EmptyFrame { width, height });
        }
        let expected = layout.packed_len(width as usize, height as usize);
        if data.len() != expected {
            return Err(FormatError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            layout,
            width,
            height,
            data,
        })
    }

    pub fn layout(&self) -> PixelFormat {
        self.layout
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Convert `frame` into `target` layout.
pub fn convert(frame: &Frame, target: PixelFormat) -> Result<ConvertedBuffer, FormatError> {
    match (frame.format(), target) {
        (PixelFormat::Bgra, PixelFormat::Rgba) => bgra_to_rgba(frame),
        (PixelFormat::Nv12, PixelFormat::Nv21) => nv12_to_nv21(frame),
        (PixelFormat::Nv12, PixelFormat::Rgba) => nv12_to_rgba(frame),
        (source @ (PixelFormat::Rgba | PixelFormat::Nv21), _) => {
            Err(FormatError::UnsupportedSource(source))
        }
        (_, target @ (PixelFormat::Bgra | PixelFormat::Nv12)) => {
            Err(FormatError::UnsupportedTarget(target))
        }
        (from, to) => Err(FormatError::UnsupportedConversion { from, to }),
    }
}

/// Permute B,G,R,A → R,G,B,A row by row, dropping stride padding.
fn bgra_to_rgba(frame: &Frame) -> Result<ConvertedBuffer, FormatError> {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let plane = &frame.planes()[0];
    let row_bytes = w * 4;

    let mut out = Vec::with_capacity(row_bytes * h);
    for row in 0..h {
        for px in plane.row(row, row_bytes).chunks_exact(4) {
            out.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
    }

    ConvertedBuffer::new(PixelFormat::Rgba, frame.width(), frame.height(), out)
}

/// NV12 stores chroma as Cb,Cr; NV21 as Cr,Cb. Luma is copied unchanged.
fn nv12_to_nv21(frame: &Frame) -> Result<ConvertedBuffer, FormatError> {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let luma = &frame.planes()[0];
    let chroma = &frame.planes()[1];

    let mut out = Vec::with_capacity(PixelFormat::Nv21.packed_len(w, h));
    for row in 0..h {
        out.extend_from_slice(luma.row(row, w));
    }

    // One Cb/Cr pair per 2x2 pixel block.
    for block_row in 0..h / 2 {
        for block_col in 0..w / 2 {
            let idx = block_row * chroma.stride + block_col * 2;
            let cb = chroma.data[idx];
            let cr = chroma.data[idx + 1];
            out.push(cr);
            out.push(cb);
        }
    }

    ConvertedBuffer::new(PixelFormat::Nv21, frame.width(), frame.height(), out)
}

fn nv12_to_rgba(frame: &Frame) -> Result<ConvertedBuffer, FormatError> {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let luma = &frame.planes()[0];
    let chroma = &frame.planes()[1];

    let mut out = Vec::with_capacity(w * h * 4);
    for row in 0..h {
        let y_row = luma.row(row, w);
        let c_row = chroma.row(row / 2, w);
        for (col, &y) in y_row.iter().enumerate() {
            let pair = (col / 2) * 2;
            let [r, g, b] = ycbcr_to_rgb(y, c_row[pair], c_row[pair + 1]);
            out.extend_from_slice(&[r, g, b, 255]);
        }
    }

    ConvertedBuffer::new(PixelFormat::Rgba, frame.width(), frame.height(), out)
}

/// BT.601 full-range YCbCr → RGB.
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;

    let r = y + 1.402 * cr;
    let g = y - 0.344_136 * cb - 0.714_136 * cr;
    let b = y + 1.772 * cb;

    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Plane;

    const PAD: u8 = 0xEE;

    #[test]
    fn test_converted_buffer_rejects_empty_geometry() {
        assert_eq!(
            ConvertedBuffer::new(PixelFormat::Rgba, 0, 0, vec![]).unwrap_err(),
            FormatError::EmptyFrame {
                width: 0,
                height: 0
            }
        );
        assert!(matches!(
            ConvertedBuffer::new(PixelFormat::Rgba, 4, 0, vec![]),
            Err(FormatError::EmptyFrame { .. })
        ));
        assert!(ConvertedBuffer::new(PixelFormat::Rgba, 1, 1, vec![0; 4]).is_ok());
    }

    fn bgra_2x2_padded() -> Frame {
        // Stride 12 = 8 pixel bytes + 4 padding; last row carries no padding.
        let data = vec![
            1, 2, 3, 4, 5, 6, 7, 8, PAD, PAD, PAD, PAD, //
            9, 10, 11, 12, 13, 14, 15, 16,
        ];
        Frame::new(2, 2, PixelFormat::Bgra, vec![Plane::new(data, 12)]).unwrap()
    }

    fn nv12_4x2_padded() -> Frame {
        let luma = vec![
            10, 11, 12, 13, PAD, PAD, //
            20, 21, 22, 23, PAD, PAD,
        ];
        // Two Cb/Cr pairs: (100, 200) and (101, 201).
        let chroma = vec![100, 200, 101, 201, PAD, PAD];
        Frame::new(
            4,
            2,
            PixelFormat::Nv12,
            vec![Plane::new(luma, 6), Plane::new(chroma, 6)],
        )
        .unwrap()
    }

    #[test]
    fn test_bgra_to_rgba_swaps_channels_and_skips_padding() {
        let out = convert(&bgra_2x2_padded(), PixelFormat::Rgba).unwrap();
        assert_eq!(
            out.as_bytes(),
            &[3, 2, 1, 4, 7, 6, 5, 8, 11, 10, 9, 12, 15, 14, 13, 16]
        );
        assert_eq!(out.layout(), PixelFormat::Rgba);
        assert_eq!((out.width(), out.height()), (2, 2));
    }

    #[test]
    fn test_nv12_to_nv21_transposes_chroma() {
        let out = convert(&nv12_4x2_padded(), PixelFormat::Nv21).unwrap();
        assert_eq!(
            out.as_bytes(),
            &[10, 11, 12, 13, 20, 21, 22, 23, 200, 100, 201, 101]
        );
        assert_eq!(out.len(), 4 * 2 + 4 * 2 / 2);
    }

    #[test]
    fn test_nv12_to_rgba_neutral_chroma_is_gray() {
        let luma = vec![128u8; 4];
        let chroma = vec![128u8, 128];
        let frame = Frame::new(
            2,
            2,
            PixelFormat::Nv12,
            vec![Plane::new(luma, 2), Plane::new(chroma, 2)],
        )
        .unwrap();

        let out = convert(&frame, PixelFormat::Rgba).unwrap();
        assert_eq!(out.as_bytes(), &[128, 128, 128, 255].repeat(4)[..]);
    }

    #[test]
    fn test_nv12_to_rgba_red_chroma() {
        // Y=0, Cb=128, Cr=255 → R = 1.402 * 127 ≈ 178, G and B clamp to 0.
        let frame = Frame::new(
            2,
            2,
            PixelFormat::Nv12,
            vec![Plane::new(vec![0u8; 4], 2), Plane::new(vec![128, 255], 2)],
        )
        .unwrap();

        let out = convert(&frame, PixelFormat::Rgba).unwrap();
        assert_eq!(&out.as_bytes()[..4], &[178, 0, 0, 255]);
    }

    #[test]
    fn test_output_size_ignores_stride_padding() {
        for (w, h) in [(2u32, 2u32), (6, 4), (16, 10), (64, 48)] {
            let (wu, hu) = (w as usize, h as usize);

            let bgra_stride = wu * 4 + 12;
            let bgra = Frame::new(
                w,
                h,
                PixelFormat::Bgra,
                vec![Plane::new(vec![7u8; bgra_stride * hu], bgra_stride)],
            )
            .unwrap();
            let out = convert(&bgra, PixelFormat::Rgba).unwrap();
            assert_eq!(out.len(), wu * hu * 4, "rgba {w}x{h}");
            assert!(out.as_bytes().iter().all(|&b| b == 7));

            let nv_stride = wu + 32;
            let nv12 = Frame::new(
                w,
                h,
                PixelFormat::Nv12,
                vec![
                    Plane::new(vec![16u8; nv_stride * hu], nv_stride),
                    Plane::new(vec![128u8; nv_stride * hu / 2], nv_stride),
                ],
            )
            .unwrap();
            let out = convert(&nv12, PixelFormat::Nv21).unwrap();
            assert_eq!(out.len(), wu * hu + wu * hu / 2, "nv21 {w}x{h}");
            assert!(out.as_bytes()[..wu * hu].iter().all(|&b| b == 16));
            assert!(out.as_bytes()[wu * hu..].iter().all(|&b| b == 128));

            let out = convert(&nv12, PixelFormat::Rgba).unwrap();
            assert_eq!(out.len(), wu * hu * 4, "nv12->rgba {w}x{h}");
        }
    }

    #[test]
    fn test_source_not_mutated() {
        let frame = bgra_2x2_padded();
        let before = frame.planes()[0].data.clone();
        let _ = convert(&frame, PixelFormat::Rgba).unwrap();
        assert_eq!(frame.planes()[0].data, before);
    }

    #[test]
    fn test_unsupported_source() {
        let frame = Frame::from_packed(PixelFormat::Rgba, 2, 2, vec![0u8; 16]).unwrap();
        assert_eq!(
            convert(&frame, PixelFormat::Rgba).unwrap_err(),
            FormatError::UnsupportedSource(PixelFormat::Rgba)
        );
    }

    #[test]
    fn test_unsupported_target() {
        assert_eq!(
            convert(&bgra_2x2_padded(), PixelFormat::Nv12).unwrap_err(),
            FormatError::UnsupportedTarget(PixelFormat::Nv12)
        );
    }

    #[test]
    fn test_unsupported_pair() {
        assert_eq!(
            convert(&bgra_2x2_padded(), PixelFormat::Nv21).unwrap_err(),
            FormatError::UnsupportedConversion {
                from: PixelFormat::Bgra,
                to: PixelFormat::Nv21
            }
        );
    }

    #[test]
    fn test_converted_buffer_rejects_mismatch() {
        let err = ConvertedBuffer::new(PixelFormat::Nv21, 4, 2, vec![0u8; 8]).unwrap_err();
        assert_eq!(
            err,
            FormatError::BufferSize {
                expected: 12,
                actual: 8
            }
        );
    }
}
