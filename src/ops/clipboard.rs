// ============================================================================
// REGION OPERATIONS - copy out, composite back, floating clip regions
// ============================================================================

use eframe::egui;
use egui::{Pos2, Rect, Vec2};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use crate::canvas::PixelBuffer;

// ---------------------------------------------------------------------------
//  Copy / merge / paste
// ---------------------------------------------------------------------------

/// Extract a `w`×`h` RGBA region whose top-left is (x, y) in `src`.
///
/// Source pixels outside `src` read as transparent; callers that want only
/// real pixels clamp the rectangle first.
pub fn copy_region(src: &PixelBuffer, x: i64, y: i64, w: u32, h: u32) -> PixelBuffer {
    let img = RgbaImage::from_fn(w, h, |dx, dy| {
        let sx = x + dx as i64;
        let sy = y + dy as i64;
        if src.contains(sx, sy) {
            src.pixel(sx as u32, sy as u32).unwrap_or(Rgba([0, 0, 0, 0]))
        } else {
            Rgba([0, 0, 0, 0])
        }
    });
    PixelBuffer::from_rgba_image(img)
}

/// Composite `overlay` over `base` at the origin.  The result is always RGBA
/// and has `base`'s dimensions; overlay pixels beyond `base` are dropped.
pub fn merge_overlay(base: &PixelBuffer, overlay: &PixelBuffer) -> PixelBuffer {
    let mut out = base.to_rgba_image();
    composite_onto(&mut out, overlay, 0, 0);
    PixelBuffer::from_rgba_image(out)
}

/// Copy of `base` with `region` composited with its top-left at (x, y).
/// No clamping: whatever falls outside `base` is silently dropped.
/// The base's pixel format is kept.
pub fn paste_region(base: &PixelBuffer, region: &PixelBuffer, x: i64, y: i64) -> PixelBuffer {
    let mut out = base.to_rgba_image();
    composite_onto(&mut out, region, x, y);
    PixelBuffer::from_rgba_in(out, base.format())
}

/// Source-over composite of `src` onto `dst` at (ox, oy), row-parallel.
fn composite_onto(dst: &mut RgbaImage, src: &PixelBuffer, ox: i64, oy: i64) {
    let dst_w = dst.width() as i64;
    let dst_h = dst.height() as i64;
    if dst_w == 0 || dst_h == 0 || src.is_empty() {
        return;
    }
    let src_w = src.width() as i64;
    let src_h = src.height() as i64;

    // Visible span of the source in destination coordinates.
    let x0 = ox.max(0);
    let x1 = (ox + src_w).min(dst_w);
    let y0 = oy.max(0);
    let y1 = (oy + src_h).min(dst_h);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let stride = dst_w as usize * 4;
    let raw: &mut [u8] = &mut *dst;
    raw.par_chunks_mut(stride)
        .enumerate()
        .skip(y0 as usize)
        .take((y1 - y0) as usize)
        .for_each(|(dy, row)| {
            let sy = (dy as i64 - oy) as u32;
            for dx in x0..x1 {
                let sx = (dx - ox) as u32;
                let Some(s) = src.pixel(sx, sy) else { continue };
                let i = dx as usize * 4;
                let d = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                let blended = alpha_blend(d, s);
                row[i..i + 4].copy_from_slice(&blended.0);
            }
        });
}

/// Simple alpha-composite: src over dst.
pub fn alpha_blend(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    if src[3] == 0 { return dst; }
    if src[3] == 255 || dst[3] == 0 { return src; }
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a < 0.001 { return Rgba([0, 0, 0, 0]); }
    let inv = 1.0 / out_a;
    Rgba([
        ((src[0] as f32 * sa + dst[0] as f32 * da * (1.0 - sa)) * inv).round().clamp(0.0, 255.0) as u8,
        ((src[1] as f32 * sa + dst[1] as f32 * da * (1.0 - sa)) * inv).round().clamp(0.0, 255.0) as u8,
        ((src[2] as f32 * sa + dst[2] as f32 * da * (1.0 - sa)) * inv).round().clamp(0.0, 255.0) as u8,
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

// ---------------------------------------------------------------------------
//  Floating Region - detached pixels positioned before pasting
// ---------------------------------------------------------------------------

/// Pixels lifted out of the image by the scissors tool, floating above the
/// canvas until pasted back.  `offset` is the top-left in image coordinates.
#[derive(Clone, Debug)]
pub struct FloatingRegion {
    pub source: PixelBuffer,
    pub offset: Pos2,
}

impl FloatingRegion {
    pub fn new(source: PixelBuffer, offset: Pos2) -> Self {
        Self { source, offset }
    }

    /// Lift `w`×`h` pixels at (x, y) out of `image`.
    pub fn lift(image: &PixelBuffer, x: i64, y: i64, w: u32, h: u32) -> Self {
        Self::new(copy_region(image, x, y, w, h), Pos2::new(x as f32, y as f32))
    }

    /// Bounds in image coordinates.
    pub fn rect(&self) -> Rect {
        Rect::from_min_size(self.offset, self.source.size_vec2())
    }

    /// Edges count as inside so a press on the border still grabs the region.
    pub fn contains(&self, p: Pos2) -> bool {
        let r = self.rect();
        p.x >= r.min.x && p.x <= r.max.x && p.y >= r.min.y && p.y <= r.max.y
    }

    pub fn translate(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    /// Whole-pixel paste position.
    pub fn paste_position(&self) -> (i64, i64) {
        (self.offset.x.floor() as i64, self.offset.y.floor() as i64)
    }

    /// `base` with this region composited at its current position.
    pub fn paste_onto(&self, base: &PixelBuffer) -> PixelBuffer {
        let (x, y) = self.paste_position();
        paste_region(base, &self.source, x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::PixelFormat;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

    #[test]
    fn copy_region_reads_outside_as_transparent() {
        let src = PixelBuffer::filled(10, 10, RED);
        let region = copy_region(&src, 8, 8, 4, 4);
        assert_eq!(region.dimensions(), (4, 4));
        assert_eq!(region.format(), PixelFormat::Rgba8);
        assert_eq!(region.pixel(0, 0), Some(RED));
        assert_eq!(region.pixel(1, 1), Some(RED));
        assert_eq!(region.pixel(2, 0), Some(CLEAR));
        assert_eq!(region.pixel(3, 3), Some(CLEAR));
    }

    #[test]
    fn merge_overlay_is_rgba_and_base_sized() {
        let base = PixelBuffer::from_raw(4, 3, PixelFormat::Rgb8, vec![255; 36]).unwrap();
        let mut overlay = RgbaImage::new(6, 6);
        overlay.put_pixel(1, 1, BLUE);
        overlay.put_pixel(5, 5, BLUE);
        let merged = merge_overlay(&base, &PixelBuffer::from_rgba_image(overlay));
        assert_eq!(merged.dimensions(), (4, 3));
        assert_eq!(merged.format(), PixelFormat::Rgba8);
        assert_eq!(merged.pixel(1, 1), Some(BLUE));
        assert_eq!(merged.pixel(0, 0), Some(Rgba([255, 255, 255, 255])));
    }

    #[test]
    fn transparent_overlay_changes_nothing() {
        let base = PixelBuffer::filled(5, 5, RED);
        let merged = merge_overlay(&base, &PixelBuffer::transparent(5, 5));
        assert_eq!(merged, base);
    }

    #[test]
    fn paste_region_drops_pixels_outside_base() {
        let base = PixelBuffer::filled(6, 6, RED);
        let region = PixelBuffer::filled(4, 4, BLUE);
        let out = paste_region(&base, &region, -2, 4);
        assert_eq!(out.dimensions(), (6, 6));
        assert_eq!(out.pixel(0, 4), Some(BLUE));
        assert_eq!(out.pixel(1, 5), Some(BLUE));
        assert_eq!(out.pixel(2, 4), Some(RED));
        assert_eq!(out.pixel(0, 3), Some(RED));
        // base is untouched
        assert_eq!(base.pixel(0, 4), Some(RED));
    }

    #[test]
    fn paste_region_keeps_rgb_base_format() {
        let base = PixelBuffer::from_raw(3, 3, PixelFormat::Rgb8, vec![0; 27]).unwrap();
        let out = paste_region(&base, &PixelBuffer::filled(1, 1, BLUE), 1, 1);
        assert_eq!(out.format(), PixelFormat::Rgb8);
        assert_eq!(out.pixel(1, 1), Some(BLUE));
    }

    #[test]
    fn paste_entirely_off_canvas_is_identity() {
        let base = PixelBuffer::filled(3, 3, RED);
        let out = paste_region(&base, &PixelBuffer::filled(2, 2, BLUE), 50, -50);
        assert_eq!(out, base);
    }

    #[test]
    fn half_transparent_blend() {
        let out = alpha_blend(Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 128]));
        assert_eq!(out[3], 255);
        assert!((out[0] as i32 - 128).abs() <= 1);
    }

    #[test]
    fn floating_region_hit_test_and_drag() {
        let image = PixelBuffer::filled(20, 20, RED);
        let mut region = FloatingRegion::lift(&image, 5, 5, 4, 3);
        assert!(region.contains(Pos2::new(5.0, 5.0)));
        assert!(region.contains(Pos2::new(9.0, 8.0)));
        assert!(!region.contains(Pos2::new(9.5, 8.0)));
        region.translate(Vec2::new(2.5, -1.0));
        assert_eq!(region.paste_position(), (7, 4));
    }
}
