use std::fmt;
use std::sync::Arc;
use eframe::egui;
use egui::{Pos2, Rect, Vec2};
use image::{DynamicImage, Rgba, RgbImage, RgbaImage};

// ============================================================================
// PIXEL BUFFER – immutable RGB/RGBA raster shared by reference
// ============================================================================

/// Sample layout of a [`PixelBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PixelFormat {
    Rgb8,
    #[default]
    Rgba8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        self == PixelFormat::Rgba8
    }
}

/// A 2-D raster that never changes after construction.
///
/// Samples live behind an `Arc<[u8]>`, so `clone()` only bumps a reference
/// count.  Every transform in `ops` builds a fresh buffer instead of writing
/// into an existing one, which is what lets the undo stack hold snapshots
/// without copying pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    samples: Arc<[u8]>,
}

impl PixelBuffer {
    // ---- construction -------------------------------------------------------

    /// Wrap raw samples.  Returns `None` when the sample count does not match
    /// `width * height * channels`.
    pub fn from_raw(width: u32, height: u32, format: PixelFormat, samples: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(format.channels())?;
        if samples.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            format,
            samples: samples.into(),
        })
    }

    /// Fully transparent RGBA buffer (the freehand scratch layer starts as one).
    pub fn transparent(width: u32, height: u32) -> Self {
        Self::filled(width, height, Rgba([0, 0, 0, 0]))
    }

    /// RGBA buffer where every pixel is `color`.
    pub fn filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        Self::from_rgba_image(RgbaImage::from_pixel(width, height, color))
    }

    pub fn from_rgba_image(img: RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            samples: img.into_raw().into(),
        }
    }

    pub fn from_rgb_image(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format: PixelFormat::Rgb8,
            samples: img.into_raw().into(),
        }
    }

    /// Build from an RGBA working image, dropping alpha when `format` is RGB.
    pub fn from_rgba_in(img: RgbaImage, format: PixelFormat) -> Self {
        match format {
            PixelFormat::Rgba8 => Self::from_rgba_image(img),
            PixelFormat::Rgb8 => Self::from_rgb_image(DynamicImage::ImageRgba8(img).to_rgb8()),
        }
    }

    /// Keep alpha only when the decoded image actually carries it.
    pub fn from_dynamic(img: DynamicImage) -> Self {
        if img.color().has_alpha() {
            Self::from_rgba_image(img.into_rgba8())
        } else {
            Self::from_rgb_image(img.into_rgb8())
        }
    }

    // ---- accessors ----------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn size_vec2(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64
    }

    /// Pixel at (x, y) widened to RGBA.  RGB pixels report alpha 255.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let ch = self.format.channels();
        let i = (y as usize * self.width as usize + x as usize) * ch;
        let s = &self.samples[i..i + ch];
        Some(match self.format {
            PixelFormat::Rgb8 => Rgba([s[0], s[1], s[2], 255]),
            PixelFormat::Rgba8 => Rgba([s[0], s[1], s[2], s[3]]),
        })
    }

    /// One row of raw samples.
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.width as usize * self.format.channels();
        let start = y as usize * stride;
        &self.samples[start..start + stride]
    }

    /// Copy out as an RGBA working image.
    pub fn to_rgba_image(&self) -> RgbaImage {
        match self.format {
            PixelFormat::Rgba8 => RgbaImage::from_raw(self.width, self.height, self.samples.to_vec())
                .unwrap_or_else(|| RgbaImage::new(self.width, self.height)),
            PixelFormat::Rgb8 => {
                let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 4);
                for px in self.samples.chunks_exact(3) {
                    out.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
                RgbaImage::from_raw(self.width, self.height, out)
                    .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
            }
        }
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        match self.format {
            PixelFormat::Rgba8 => DynamicImage::ImageRgba8(self.to_rgba_image()),
            PixelFormat::Rgb8 => match RgbImage::from_raw(self.width, self.height, self.samples.to_vec()) {
                Some(img) => DynamicImage::ImageRgb8(img),
                None => DynamicImage::ImageRgba8(self.to_rgba_image()),
            },
        }
    }

    /// Bytes held by this buffer's sample storage.
    pub fn memory_bytes(&self) -> usize {
        self.samples.len()
    }

    /// True when both buffers point at the same sample storage.
    pub fn shares_storage(&self, other: &PixelBuffer) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }

    /// Copy into an egui image for texture upload.
    pub fn to_color_image(&self) -> egui::ColorImage {
        let size = [self.width as usize, self.height as usize];
        match self.format {
            PixelFormat::Rgb8 => egui::ColorImage::from_rgb(size, &self.samples),
            PixelFormat::Rgba8 => egui::ColorImage::from_rgba_unmultiplied(size, &self.samples),
        }
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// VIEWPORT – screen <-> image mapping for zoom and pan
// ============================================================================

pub const MIN_ZOOM: f32 = 0.1;
pub const MAX_ZOOM: f32 = 5.0;
/// Multiplier applied per zoom step (mouse wheel notch, menu, shortcut).
pub const ZOOM_STEP: f32 = 1.2;
/// Scroll distance egui reports for one wheel line.
pub const WHEEL_NOTCH: f32 = 50.0;
/// Fit-to-window leaves a 10% margin around the image.
const FIT_PADDING: f32 = 0.9;

/// Zoom / pan state of the canvas.  The image is drawn centred in the canvas
/// and then shifted by `pan`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    zoom: f32,
    pan: Vec2,
    canvas_size: Vec2,
    /// Scroll not yet turned into a whole zoom step (touchpads send fractions).
    wheel: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new()
    }
}

impl Viewport {
    pub fn new() -> Self {
        Self {
            zoom: 1.0,
            pan: Vec2::ZERO,
            canvas_size: Vec2::ZERO,
            wheel: 0.0,
        }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn pan(&self) -> Vec2 {
        self.pan
    }

    pub fn canvas_size(&self) -> Vec2 {
        self.canvas_size
    }

    /// Record the last-known canvas size (called every frame by the UI).
    pub fn set_canvas_size(&mut self, size: Vec2) {
        self.canvas_size = size;
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = if zoom.is_finite() {
            zoom.clamp(MIN_ZOOM, MAX_ZOOM)
        } else {
            1.0
        };
    }

    pub fn zoom_in(&mut self) {
        self.set_zoom(self.zoom * ZOOM_STEP);
    }

    pub fn zoom_out(&mut self) {
        self.set_zoom(self.zoom / ZOOM_STEP);
    }

    /// Turn vertical scroll into whole zoom steps, one per `WHEEL_NOTCH`.
    /// Returns the number of steps taken (negative when zooming out).
    pub fn zoom_by_wheel(&mut self, scroll_y: f32) -> i32 {
        if !scroll_y.is_finite() {
            return 0;
        }
        self.wheel += scroll_y;
        let steps = (self.wheel / WHEEL_NOTCH).trunc();
        self.wheel -= steps * WHEEL_NOTCH;
        let steps = steps as i32;
        for _ in 0..steps.unsigned_abs() {
            if steps > 0 { self.zoom_in() } else { self.zoom_out() }
        }
        steps
    }

    pub fn reset_zoom(&mut self) {
        self.zoom = 1.0;
        self.pan = Vec2::ZERO;
    }

    /// Scale so the whole image fits with padding, and recentre.
    /// Does nothing for an empty image or before the canvas size is known.
    pub fn fit_to_window(&mut self, image_w: u32, image_h: u32) {
        if image_w == 0 || image_h == 0 || self.canvas_size.x <= 0.0 || self.canvas_size.y <= 0.0 {
            return;
        }
        let scale_x = self.canvas_size.x / image_w as f32;
        let scale_y = self.canvas_size.y / image_h as f32;
        self.set_zoom(scale_x.min(scale_y) * FIT_PADDING);
        self.pan = Vec2::ZERO;
    }

    /// Pan the viewport by a screen-space delta.  Unclamped.
    pub fn pan_by(&mut self, delta: Vec2) {
        self.pan += delta;
    }

    /// Screen position of the image's top-left corner, relative to the canvas.
    pub fn image_origin(&self, image_size: Vec2) -> Pos2 {
        Pos2::new(
            (self.canvas_size.x - image_size.x * self.zoom) / 2.0 + self.pan.x,
            (self.canvas_size.y - image_size.y * self.zoom) / 2.0 + self.pan.y,
        )
    }

    pub fn screen_to_image(&self, screen: Pos2, image_size: Vec2) -> Pos2 {
        let origin = self.image_origin(image_size);
        Pos2::new(
            (screen.x - origin.x) / self.zoom,
            (screen.y - origin.y) / self.zoom,
        )
    }

    pub fn image_to_screen(&self, image: Pos2, image_size: Vec2) -> Pos2 {
        let origin = self.image_origin(image_size);
        Pos2::new(origin.x + image.x * self.zoom, origin.y + image.y * self.zoom)
    }

    /// Canvas-relative rectangle covered by the zoomed image.
    pub fn image_rect(&self, image_size: Vec2) -> Rect {
        Rect::from_min_size(self.image_origin(image_size), image_size * self.zoom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_rejects_wrong_sample_count() {
        assert!(PixelBuffer::from_raw(2, 2, PixelFormat::Rgb8, vec![0; 11]).is_none());
        assert!(PixelBuffer::from_raw(2, 2, PixelFormat::Rgb8, vec![0; 12]).is_some());
        assert!(PixelBuffer::from_raw(2, 2, PixelFormat::Rgba8, vec![0; 12]).is_none());
    }

    #[test]
    fn rgb_pixels_read_as_opaque() {
        let buf = PixelBuffer::from_raw(1, 1, PixelFormat::Rgb8, vec![10, 20, 30]).unwrap();
        assert_eq!(buf.pixel(0, 0), Some(Rgba([10, 20, 30, 255])));
        assert_eq!(buf.pixel(1, 0), None);
        assert_eq!(buf.to_rgba_image().get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn color_image_keeps_size_and_pixels() {
        let rgb = PixelBuffer::from_raw(2, 1, PixelFormat::Rgb8, vec![10, 20, 30, 40, 50, 60]).unwrap();
        let img = rgb.to_color_image();
        assert_eq!(img.size, [2, 1]);
        assert_eq!(img.pixels[1], egui::Color32::from_rgb(40, 50, 60));
    }

    #[test]
    fn clones_share_samples() {
        let a = PixelBuffer::filled(4, 4, Rgba([1, 2, 3, 4]));
        let b = a.clone();
        assert!(a.shares_storage(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn from_dynamic_keeps_alpha_only_when_present() {
        let rgb = DynamicImage::ImageRgb8(RgbImage::new(3, 2));
        assert_eq!(PixelBuffer::from_dynamic(rgb).format(), PixelFormat::Rgb8);
        let rgba = DynamicImage::ImageRgba8(RgbaImage::new(3, 2));
        assert_eq!(PixelBuffer::from_dynamic(rgba).format(), PixelFormat::Rgba8);
    }

    #[test]
    fn zoom_stays_clamped_under_repeated_steps() {
        let mut vp = Viewport::new();
        for _ in 0..100 {
            vp.zoom_in();
        }
        assert_eq!(vp.zoom(), MAX_ZOOM);
        for _ in 0..200 {
            vp.zoom_out();
        }
        assert_eq!(vp.zoom(), MIN_ZOOM);
        for i in 0..57 {
            if i % 3 == 0 { vp.zoom_out() } else { vp.zoom_in() }
            assert!(vp.zoom() >= MIN_ZOOM && vp.zoom() <= MAX_ZOOM);
        }
    }

    #[test]
    fn zoom_steps_leave_pan_alone() {
        let mut vp = Viewport::new();
        vp.pan_by(Vec2::new(13.0, -7.0));
        vp.zoom_in();
        vp.zoom_out();
        assert_eq!(vp.pan(), Vec2::new(13.0, -7.0));
    }

    #[test]
    fn origin_centres_image_then_applies_pan() {
        let mut vp = Viewport::new();
        vp.set_canvas_size(Vec2::new(1000.0, 800.0));
        vp.set_zoom(2.0);
        let origin = vp.image_origin(Vec2::new(100.0, 50.0));
        assert_eq!(origin, Pos2::new(400.0, 350.0));
        vp.pan_by(Vec2::new(-30.0, 20.0));
        assert_eq!(vp.image_origin(Vec2::new(100.0, 50.0)), Pos2::new(370.0, 370.0));
    }

    #[test]
    fn screen_image_round_trip() {
        let image_size = Vec2::new(800.0, 600.0);
        let points = [Pos2::new(0.0, 0.0), Pos2::new(799.0, 599.0), Pos2::new(-40.5, 1234.25)];
        let pans = [Vec2::ZERO, Vec2::new(250.0, -90.0), Vec2::new(-3000.0, 4000.0)];
        let mut zoom = MIN_ZOOM;
        while zoom <= MAX_ZOOM {
            for pan in pans {
                let mut vp = Viewport::new();
                vp.set_canvas_size(Vec2::new(1280.0, 720.0));
                vp.set_zoom(zoom);
                vp.pan_by(pan);
                for p in points {
                    let back = vp.screen_to_image(vp.image_to_screen(p, image_size), image_size);
                    assert!((back.x - p.x).abs() < 1e-2, "x drift at zoom {zoom}: {back:?} vs {p:?}");
                    assert!((back.y - p.y).abs() < 1e-2, "y drift at zoom {zoom}: {back:?} vs {p:?}");
                }
            }
            zoom += 0.35;
        }
    }

    #[test]
    fn fit_to_window_scales_and_recentres() {
        let mut vp = Viewport::new();
        vp.set_canvas_size(Vec2::new(1000.0, 500.0));
        vp.pan_by(Vec2::new(50.0, 50.0));
        vp.fit_to_window(2000, 500);
        assert!((vp.zoom() - 0.45).abs() < 1e-6);
        assert_eq!(vp.pan(), Vec2::ZERO);
    }

    #[test]
    fn fit_to_window_ignores_unknown_canvas() {
        let mut vp = Viewport::new();
        vp.set_zoom(2.0);
        vp.fit_to_window(100, 100);
        assert_eq!(vp.zoom(), 2.0);
    }

    #[test]
    fn wheel_notches_match_menu_steps() {
        let mut wheel = Viewport::new();
        let mut menu = Viewport::new();
        assert_eq!(wheel.zoom_by_wheel(WHEEL_NOTCH), 1);
        menu.zoom_in();
        assert_eq!(wheel.zoom(), menu.zoom());

        assert_eq!(wheel.zoom_by_wheel(-2.0 * WHEEL_NOTCH), -2);
        menu.zoom_out();
        menu.zoom_out();
        assert_eq!(wheel.zoom(), menu.zoom());
    }

    #[test]
    fn small_scrolls_accumulate_into_one_step() {
        let mut vp = Viewport::new();
        for _ in 0..4 {
            assert_eq!(vp.zoom_by_wheel(WHEEL_NOTCH / 5.0), 0);
        }
        assert_eq!(vp.zoom(), 1.0);
        assert_eq!(vp.zoom_by_wheel(WHEEL_NOTCH / 5.0 + 0.01), 1);
        assert!((vp.zoom() - ZOOM_STEP).abs() < 1e-6);
        assert_eq!(vp.zoom_by_wheel(f32::NAN), 0);
    }
}
