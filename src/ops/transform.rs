// ============================================================================
// TRANSFORM OPERATIONS - resize, crop, rotate for whole images
// ============================================================================

use std::fmt;
use image::imageops;
use rayon::prelude::*;
use crate::canvas::PixelBuffer;

/// Interpolation method for resize operations.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Interpolation {
    Nearest,
    Bilinear,
    #[default]
    Bicubic,
    Lanczos3,
}

impl Interpolation {
    pub fn label(&self) -> &'static str {
        match self {
            Interpolation::Nearest  => "Nearest Neighbor",
            Interpolation::Bilinear => "Bilinear",
            Interpolation::Bicubic  => "Bicubic",
            Interpolation::Lanczos3 => "Lanczos3",
        }
    }

    pub fn all() -> &'static [Interpolation] {
        &[
            Interpolation::Nearest,
            Interpolation::Bilinear,
            Interpolation::Bicubic,
            Interpolation::Lanczos3,
        ]
    }

    /// Parse a CLI/config name ("nearest", "bilinear", "bicubic", "lanczos3").
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "nearest"            => Some(Interpolation::Nearest),
            "bilinear"           => Some(Interpolation::Bilinear),
            "bicubic" | "cubic"  => Some(Interpolation::Bicubic),
            "lanczos3" | "lanczos" => Some(Interpolation::Lanczos3),
            _                    => None,
        }
    }

    pub fn to_filter(&self) -> imageops::FilterType {
        match self {
            Interpolation::Nearest  => imageops::FilterType::Nearest,
            Interpolation::Bilinear => imageops::FilterType::Triangle,
            Interpolation::Bicubic  => imageops::FilterType::CatmullRom,
            Interpolation::Lanczos3 => imageops::FilterType::Lanczos3,
        }
    }
}

/// Rejected transform input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// Target width or height of zero.
    DegenerateSize { width: u32, height: u32 },
    /// The source buffer has no pixels to resample.
    EmptySource,
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::DegenerateSize { width, height } => {
                write!(f, "cannot resize to {}×{}", width, height)
            }
            TransformError::EmptySource => write!(f, "source image is empty"),
        }
    }
}

impl std::error::Error for TransformError {}

// ---------------------------------------------------------------------------
//  Whole-image transforms
// ---------------------------------------------------------------------------

/// High-quality (bicubic) resample to exactly `new_w`×`new_h`.
pub fn resize(buf: &PixelBuffer, new_w: u32, new_h: u32) -> Result<PixelBuffer, TransformError> {
    resize_with(buf, new_w, new_h, Interpolation::Bicubic)
}

/// Resample with an explicit filter.  The pixel format is preserved.
pub fn resize_with(
    buf: &PixelBuffer,
    new_w: u32,
    new_h: u32,
    interp: Interpolation,
) -> Result<PixelBuffer, TransformError> {
    if new_w == 0 || new_h == 0 {
        return Err(TransformError::DegenerateSize { width: new_w, height: new_h });
    }
    if buf.is_empty() {
        return Err(TransformError::EmptySource);
    }
    // resize_exact keeps the colour type, so RGB stays RGB.
    let resized = buf.to_dynamic().resize_exact(new_w, new_h, interp.to_filter());
    Ok(PixelBuffer::from_dynamic(resized))
}

/// Crop to a rectangle, clamping instead of failing.
///
/// `x`/`y` are clamped into the image, then `w`/`h` are shrunk to fit what is
/// left (never below one pixel), so any input yields a valid buffer.
pub fn crop(buf: &PixelBuffer, x: i64, y: i64, w: i64, h: i64) -> PixelBuffer {
    if buf.is_empty() {
        return buf.clone();
    }
    let bw = buf.width() as i64;
    let bh = buf.height() as i64;

    let x = x.clamp(0, bw - 1);
    let y = y.clamp(0, bh - 1);
    let w = w.min(bw - x).max(1);
    let h = h.min(bh - y).max(1);

    let ch = buf.format().channels();
    let mut out = Vec::with_capacity((w * h) as usize * ch);
    for row in y..y + h {
        let src = buf.row(row as u32);
        out.extend_from_slice(&src[x as usize * ch..(x + w) as usize * ch]);
    }
    PixelBuffer::from_raw(w as u32, h as u32, buf.format(), out)
        .unwrap_or_else(|| buf.clone())
}

/// Rotate 90° clockwise.  Output is `height`×`width`; the source pixel at
/// (x, y) lands at (height-1-y, x).
pub fn rotate_90cw(buf: &PixelBuffer) -> PixelBuffer {
    let (w, h) = buf.dimensions();
    let ch = buf.format().channels();
    if buf.is_empty() {
        return PixelBuffer::from_raw(h, w, buf.format(), Vec::new()).unwrap_or_else(|| buf.clone());
    }

    let src = buf.samples();
    let src_w = w as usize;
    let src_h = h as usize;
    // Destination rows are src columns; each row is filled independently.
    let dst_stride = src_h * ch;
    let mut out = vec![0u8; src_w * dst_stride];
    out.par_chunks_mut(dst_stride).enumerate().for_each(|(dst_y, row)| {
        let src_x = dst_y;
        for dst_x in 0..src_h {
            let src_y = src_h - 1 - dst_x;
            let si = (src_y * src_w + src_x) * ch;
            row[dst_x * ch..dst_x * ch + ch].copy_from_slice(&src[si..si + ch]);
        }
    });

    PixelBuffer::from_raw(h, w, buf.format(), out).unwrap_or_else(|| buf.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::PixelFormat;
    use image::{Rgba, RgbaImage};

    /// Every pixel encodes its own coordinates: (x, y, x^y, 255).
    fn coordinate_image(w: u32, h: u32) -> PixelBuffer {
        let img = RgbaImage::from_fn(w, h, |x, y| Rgba([x as u8, y as u8, (x ^ y) as u8, 255]));
        PixelBuffer::from_rgba_image(img)
    }

    #[test]
    fn resize_hits_exact_dimensions_and_keeps_format() {
        let rgba = coordinate_image(80, 60);
        let out = resize(&rgba, 40, 30).unwrap();
        assert_eq!(out.dimensions(), (40, 30));
        assert_eq!(out.format(), PixelFormat::Rgba8);

        let rgb = PixelBuffer::from_raw(4, 4, PixelFormat::Rgb8, vec![128; 48]).unwrap();
        let out = resize(&rgb, 9, 3).unwrap();
        assert_eq!(out.dimensions(), (9, 3));
        assert_eq!(out.format(), PixelFormat::Rgb8);
    }

    #[test]
    fn resize_rejects_zero_dimensions() {
        let buf = coordinate_image(10, 10);
        assert_eq!(
            resize(&buf, 0, 5),
            Err(TransformError::DegenerateSize { width: 0, height: 5 })
        );
        assert!(resize(&buf, 5, 0).is_err());
    }

    #[test]
    fn crop_copies_the_requested_rectangle() {
        let buf = coordinate_image(50, 40);
        let out = crop(&buf, 10, 5, 20, 15);
        assert_eq!(out.dimensions(), (20, 15));
        assert_eq!(out.pixel(0, 0), Some(Rgba([10, 5, 10 ^ 5, 255])));
        assert_eq!(out.pixel(19, 14), Some(Rgba([29, 19, 29 ^ 19, 255])));
    }

    #[test]
    fn crop_far_outside_bounds_clamps() {
        let buf = coordinate_image(100, 80);
        let out = crop(&buf, 10_000, 10_000, 50, 50);
        assert_eq!(out.dimensions(), (1, 1));
        assert_eq!(out.pixel(0, 0), Some(Rgba([99, 79, 99 ^ 79, 255])));

        let out = crop(&buf, -20, -20, 500, 500);
        assert_eq!(out.dimensions(), (100, 80));
    }

    #[test]
    fn crop_overhanging_rectangle_is_trimmed() {
        let buf = coordinate_image(100, 80);
        let out = crop(&buf, 90, 70, 50, 50);
        assert_eq!(out.dimensions(), (10, 10));
    }

    #[test]
    fn rotate_swaps_dimensions_and_maps_pixels() {
        let buf = coordinate_image(7, 3);
        let out = rotate_90cw(&buf);
        assert_eq!(out.dimensions(), (3, 7));
        for y in 0..3u32 {
            for x in 0..7u32 {
                assert_eq!(out.pixel(3 - 1 - y, x), buf.pixel(x, y), "src ({x},{y})");
            }
        }
    }

    #[test]
    fn four_rotations_restore_the_image() {
        let buf = PixelBuffer::from_raw(3, 2, PixelFormat::Rgb8, (0..18).collect()).unwrap();
        let back = rotate_90cw(&rotate_90cw(&rotate_90cw(&rotate_90cw(&buf))));
        assert_eq!(back, buf);
    }
}
