use eframe::egui;
use egui::{Pos2, Rect};
use image::{Rgba, RgbaImage};

use crate::canvas::PixelBuffer;
use crate::ops::clipboard::{FloatingRegion, alpha_blend};
use crate::session::ImageSession;
use crate::log_info;

pub const MIN_PEN_WIDTH: f32 = 1.0;
pub const MAX_PEN_WIDTH: f32 = 50.0;
pub const DEFAULT_PEN_WIDTH: f32 = 3.0;
pub const DEFAULT_PEN_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

// ============================================================================
// TOOL KIND + OVERLAY SINK
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolKind {
    #[default]
    Pointer,
    Select,
    Scissors,
    Pencil,
}

impl ToolKind {
    pub fn label(&self) -> &'static str {
        match self {
            ToolKind::Pointer => "Pointer",
            ToolKind::Select => "Select",
            ToolKind::Scissors => "Scissors",
            ToolKind::Pencil => "Pencil",
        }
    }

    pub fn all() -> &'static [ToolKind] {
        &[ToolKind::Pointer, ToolKind::Select, ToolKind::Scissors, ToolKind::Pencil]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutlineStyle {
    Selection,
    Floating,
}

/// Which transient layer a [`OverlayCanvas::draw_rgba`] call refers to, so
/// the painter can keep one texture per layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OverlayLayer {
    Floating,
    Freehand,
}

/// Where tools draw their transient feedback.  Every coordinate is in image
/// space; the implementor maps it to the screen.
pub trait OverlayCanvas {
    fn stroke_rect(&mut self, rect: Rect, style: OutlineStyle);

    /// Unmultiplied RGBA pixels of `size` placed with their top-left at
    /// `origin`.  `generation` changes whenever the pixels do.
    fn draw_rgba(&mut self, layer: OverlayLayer, rgba: &[u8], size: [u32; 2], origin: Pos2, generation: u64);
}

// ============================================================================
// RECTANGLE DRAG - shared by selection and scissors
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Active,
    Committed,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DragRect {
    anchor: Pos2,
    cursor: Pos2,
    phase: Phase,
}

impl DragRect {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn press(&mut self, p: Pos2) {
        self.anchor = p;
        self.cursor = p;
        self.phase = Phase::Active;
    }

    fn drag(&mut self, p: Pos2) {
        if self.phase == Phase::Active {
            self.cursor = p;
        }
    }

    fn release(&mut self, p: Pos2) {
        if self.phase == Phase::Active {
            self.cursor = p;
            self.phase = Phase::Committed;
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    /// Outline in image coordinates, `None` while idle.
    pub fn rect(&self) -> Option<Rect> {
        (self.phase != Phase::Idle).then(|| Rect::from_two_pos(self.anchor, self.cursor))
    }

    /// Whole-pixel (x, y, w, h).  Width and height may be zero.
    pub fn pixel_rect(&self) -> Option<(i64, i64, i64, i64)> {
        let r = self.rect()?;
        let x0 = r.min.x.floor() as i64;
        let y0 = r.min.y.floor() as i64;
        let x1 = r.max.x.floor() as i64;
        let y1 = r.max.y.floor() as i64;
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

// ============================================================================
// SELECTION
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct SelectionTool {
    pub drag: DragRect,
}

impl SelectionTool {
    pub fn on_press(&mut self, p: Pos2) {
        self.drag.press(p);
    }

    pub fn on_drag(&mut self, p: Pos2) {
        self.drag.drag(p);
    }

    pub fn on_release(&mut self, p: Pos2) {
        self.drag.release(p);
    }

    pub fn render(&self, canvas: &mut dyn OverlayCanvas) {
        if let Some(rect) = self.drag.rect() {
            canvas.stroke_rect(rect, OutlineStyle::Selection);
        }
    }

    pub fn reset(&mut self) {
        self.drag.reset();
    }

    /// Crop the image to the committed rectangle.  Zero-area rectangles are
    /// ignored; after a crop the tool starts over.
    pub fn crop(&mut self, session: &mut ImageSession) -> bool {
        if self.drag.phase() != Phase::Committed {
            return false;
        }
        let Some((x, y, w, h)) = self.drag.pixel_rect() else {
            return false;
        };
        if w <= 0 || h <= 0 {
            return false;
        }
        let cropped = session.crop(x, y, w, h);
        if cropped {
            self.reset();
        }
        cropped
    }
}

// ============================================================================
// CLIP REGION (scissors) - lift, drag, paste
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct ClipRegionTool {
    pub drag: DragRect,
    floating: Option<FloatingRegion>,
    /// Last pointer position while the floating region is being dragged.
    dragging: Option<Pos2>,
    generation: u64,
}

impl ClipRegionTool {
    pub fn floating(&self) -> Option<&FloatingRegion> {
        self.floating.as_ref()
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging.is_some()
    }

    pub fn on_press(&mut self, p: Pos2) {
        if self.floating.as_ref().is_some_and(|f| f.contains(p)) {
            self.dragging = Some(p);
        } else {
            self.drag.press(p);
        }
    }

    pub fn on_drag(&mut self, p: Pos2) {
        if let Some(last) = self.dragging {
            if let Some(floating) = self.floating.as_mut() {
                floating.translate(p - last);
            }
            self.dragging = Some(p);
        } else {
            self.drag.drag(p);
        }
    }

    /// Finishes a drag, or commits the rectangle by lifting the pixels it
    /// covers out of `image` (clipped to the image bounds).
    pub fn on_release(&mut self, p: Pos2, image: Option<&PixelBuffer>) {
        if self.dragging.take().is_some() {
            return;
        }
        self.drag.release(p);
        let (Some(image), Some((x, y, w, h))) = (image, self.drag.pixel_rect()) else {
            return;
        };
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + w).min(image.width() as i64);
        let y1 = (y + h).min(image.height() as i64);
        if x1 <= x0 || y1 <= y0 {
            return;
        }
        self.floating = Some(FloatingRegion::lift(image, x0, y0, (x1 - x0) as u32, (y1 - y0) as u32));
        self.generation = self.generation.wrapping_add(1);
        self.drag.reset();
        log_info!("Lifted {}x{} region at ({}, {})", x1 - x0, y1 - y0, x0, y0);
    }

    pub fn render(&self, canvas: &mut dyn OverlayCanvas) {
        if let Some(floating) = &self.floating {
            let (w, h) = floating.source.dimensions();
            canvas.draw_rgba(OverlayLayer::Floating, floating.source.samples(), [w, h], floating.offset, self.generation);
            canvas.stroke_rect(floating.rect(), OutlineStyle::Floating);
        }
        if let Some(rect) = self.drag.rect() {
            canvas.stroke_rect(rect, OutlineStyle::Selection);
        }
    }

    pub fn reset(&mut self) {
        self.drag.reset();
        self.floating = None;
        self.dragging = None;
    }

    /// Paste the floating region at its current offset and drop it.
    pub fn paste(&mut self, session: &mut ImageSession) -> bool {
        let Some(floating) = self.floating.take() else {
            return false;
        };
        self.dragging = None;
        let (x, y) = floating.paste_position();
        session.paste_region(&floating.source, x, y)
    }

    /// Paste but keep the floating region for another stamp.
    pub fn stamp(&mut self, session: &mut ImageSession) -> bool {
        let Some(floating) = self.floating.as_ref() else {
            return false;
        };
        let (x, y) = floating.paste_position();
        session.paste_region(&floating.source, x, y)
    }
}

// ============================================================================
// FREEHAND DRAW - strokes accumulate on a scratch overlay
// ============================================================================

#[derive(Clone, Debug)]
pub struct FreehandTool {
    overlay: Option<RgbaImage>,
    last: Option<Pos2>,
    color: Rgba<u8>,
    width: f32,
    generation: u64,
}

impl Default for FreehandTool {
    fn default() -> Self {
        Self::new(DEFAULT_PEN_COLOR, DEFAULT_PEN_WIDTH)
    }
}

impl FreehandTool {
    pub fn new(color: Rgba<u8>, width: f32) -> Self {
        Self {
            overlay: None,
            last: None,
            color,
            width: clamp_pen_width(width),
            generation: 0,
        }
    }

    pub fn color(&self) -> Rgba<u8> {
        self.color
    }

    pub fn set_color(&mut self, color: Rgba<u8>) {
        self.color = color;
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn set_width(&mut self, width: f32) {
        self.width = clamp_pen_width(width);
    }

    pub fn has_pending(&self) -> bool {
        self.overlay.is_some()
    }

    /// Starts a stroke.  The overlay is created on first use at the size of
    /// `image`; without an image nothing is drawn.
    pub fn on_press(&mut self, p: Pos2, image: Option<&PixelBuffer>) {
        if self.overlay.is_none() {
            let Some(image) = image else { return };
            self.overlay = Some(RgbaImage::new(image.width(), image.height()));
        }
        self.stroke_to(p, p);
        self.last = Some(p);
    }

    pub fn on_drag(&mut self, p: Pos2) {
        let Some(last) = self.last else { return };
        self.stroke_to(last, p);
        self.last = Some(p);
    }

    pub fn on_release(&mut self) {
        self.last = None;
    }

    fn stroke_to(&mut self, from: Pos2, to: Pos2) {
        if let Some(overlay) = self.overlay.as_mut() {
            draw_capsule(overlay, from, to, self.width / 2.0, self.color);
            self.generation = self.generation.wrapping_add(1);
        }
    }

    pub fn render(&self, canvas: &mut dyn OverlayCanvas) {
        if let Some(overlay) = &self.overlay {
            let (w, h) = overlay.dimensions();
            canvas.draw_rgba(OverlayLayer::Freehand, overlay.as_raw(), [w, h], Pos2::ZERO, self.generation);
        }
    }

    pub fn reset(&mut self) {
        self.overlay = None;
        self.last = None;
    }

    /// Merge the pending overlay into the session exactly once.
    /// Without a pending overlay this is a no-op.
    pub fn commit(&mut self, session: &mut ImageSession) -> bool {
        self.last = None;
        let Some(overlay) = self.overlay.take() else {
            return false;
        };
        let merged = session.apply_drawing(&PixelBuffer::from_rgba_image(overlay));
        if merged {
            log_info!("Committed freehand drawing");
        }
        merged
    }
}

pub fn clamp_pen_width(width: f32) -> f32 {
    if width.is_finite() {
        width.clamp(MIN_PEN_WIDTH, MAX_PEN_WIDTH)
    } else {
        DEFAULT_PEN_WIDTH
    }
}

/// Rasterise a round-capped segment of `radius` with one pixel of edge
/// anti-aliasing.  Consecutive segments share endpoints, which gives round
/// joins for free.
fn draw_capsule(img: &mut RgbaImage, a: Pos2, b: Pos2, radius: f32, color: Rgba<u8>) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let reach = radius + 1.0;
    let min_x = (a.x.min(b.x) - reach).floor().max(0.0) as u32;
    let min_y = (a.y.min(b.y) - reach).floor().max(0.0) as u32;
    let max_x = (a.x.max(b.x) + reach).ceil().min(w as f32 - 1.0);
    let max_y = (a.y.max(b.y) + reach).ceil().min(h as f32 - 1.0);
    if max_x < 0.0 || max_y < 0.0 {
        return;
    }
    let (max_x, max_y) = (max_x as u32, max_y as u32);

    let ab = b - a;
    let len_sq = ab.length_sq();
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let p = Pos2::new(x as f32 + 0.5, y as f32 + 0.5);
            let t = if len_sq > 0.0 { ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0) } else { 0.0 };
            let closest = a + ab * t;
            let dist = (p - closest).length();
            let coverage = (radius + 0.5 - dist).clamp(0.0, 1.0);
            if coverage <= 0.0 {
                continue;
            }
            let alpha = (color[3] as f32 * coverage).round() as u8;
            let dst = *img.get_pixel(x, y);
            let out = if dst[0] == color[0] && dst[1] == color[1] && dst[2] == color[2] {
                // same ink: overlapping segments must not darken their seams
                Rgba([color[0], color[1], color[2], dst[3].max(alpha)])
            } else {
                alpha_blend(dst, Rgba([color[0], color[1], color[2], alpha]))
            };
            img.put_pixel(x, y, out);
        }
    }
}

// ============================================================================
// TOOL STATE + TOOLBOX
// ============================================================================

/// The one active tool and its in-progress state.
#[derive(Clone, Debug, Default)]
pub enum ToolState {
    #[default]
    None,
    Selection(SelectionTool),
    ClipRegion(ClipRegionTool),
    Freehand(FreehandTool),
}

impl ToolState {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolState::None => ToolKind::Pointer,
            ToolState::Selection(_) => ToolKind::Select,
            ToolState::ClipRegion(_) => ToolKind::Scissors,
            ToolState::Freehand(_) => ToolKind::Pencil,
        }
    }

    pub fn render(&self, canvas: &mut dyn OverlayCanvas) {
        match self {
            ToolState::None => {}
            ToolState::Selection(t) => t.render(canvas),
            ToolState::ClipRegion(t) => t.render(canvas),
            ToolState::Freehand(t) => t.render(canvas),
        }
    }

    pub fn reset(&mut self) {
        match self {
            ToolState::None => {}
            ToolState::Selection(t) => t.reset(),
            ToolState::ClipRegion(t) => t.reset(),
            ToolState::Freehand(t) => t.reset(),
        }
    }
}

/// Routes image-space pointer events to the active tool and owns the pen
/// settings that outlive any single pencil activation.
pub struct ToolBox {
    state: ToolState,
    pen_color: Rgba<u8>,
    pen_width: f32,
}

impl Default for ToolBox {
    fn default() -> Self {
        Self::new(DEFAULT_PEN_COLOR, DEFAULT_PEN_WIDTH)
    }
}

impl ToolBox {
    pub fn new(pen_color: Rgba<u8>, pen_width: f32) -> Self {
        Self {
            state: ToolState::None,
            pen_color,
            pen_width: clamp_pen_width(pen_width),
        }
    }

    pub fn state(&self) -> &ToolState {
        &self.state
    }

    pub fn active(&self) -> ToolKind {
        self.state.kind()
    }

    /// Switch tools.  A pending freehand drawing is merged first.
    pub fn activate(&mut self, kind: ToolKind, session: &mut ImageSession) {
        if kind == self.active() {
            return;
        }
        if let ToolState::Freehand(pencil) = &mut self.state {
            pencil.commit(session);
        }
        self.state = match kind {
            ToolKind::Pointer => ToolState::None,
            ToolKind::Select => ToolState::Selection(SelectionTool::default()),
            ToolKind::Scissors => ToolState::ClipRegion(ClipRegionTool::default()),
            ToolKind::Pencil => ToolState::Freehand(FreehandTool::new(self.pen_color, self.pen_width)),
        };
    }

    pub fn on_press(&mut self, p: Pos2, session: &ImageSession) {
        match &mut self.state {
            ToolState::None => {}
            ToolState::Selection(t) => t.on_press(p),
            ToolState::ClipRegion(t) => t.on_press(p),
            ToolState::Freehand(t) => t.on_press(p, session.image()),
        }
    }

    pub fn on_drag(&mut self, p: Pos2) {
        match &mut self.state {
            ToolState::None => {}
            ToolState::Selection(t) => t.on_drag(p),
            ToolState::ClipRegion(t) => t.on_drag(p),
            ToolState::Freehand(t) => t.on_drag(p),
        }
    }

    pub fn on_release(&mut self, p: Pos2, session: &ImageSession) {
        match &mut self.state {
            ToolState::None => {}
            ToolState::Selection(t) => t.on_release(p),
            ToolState::ClipRegion(t) => t.on_release(p, session.image()),
            ToolState::Freehand(t) => t.on_release(),
        }
    }

    pub fn render(&self, canvas: &mut dyn OverlayCanvas) {
        self.state.render(canvas);
    }

    /// Drop in-progress state (after the image changes underneath it).
    pub fn reset(&mut self) {
        self.state.reset();
    }

    // ---- actions -----------------------------------------------------------

    pub fn has_selection(&self) -> bool {
        matches!(&self.state, ToolState::Selection(t) if t.drag.phase() == Phase::Committed)
    }

    pub fn has_floating(&self) -> bool {
        matches!(&self.state, ToolState::ClipRegion(t) if t.floating().is_some())
    }

    pub fn has_pending_drawing(&self) -> bool {
        matches!(&self.state, ToolState::Freehand(t) if t.has_pending())
    }

    pub fn crop_to_selection(&mut self, session: &mut ImageSession) -> bool {
        match &mut self.state {
            ToolState::Selection(t) => t.crop(session),
            _ => false,
        }
    }

    pub fn paste_floating(&mut self, session: &mut ImageSession) -> bool {
        match &mut self.state {
            ToolState::ClipRegion(t) => t.paste(session),
            _ => false,
        }
    }

    pub fn stamp_floating(&mut self, session: &mut ImageSession) -> bool {
        match &mut self.state {
            ToolState::ClipRegion(t) => t.stamp(session),
            _ => false,
        }
    }

    pub fn commit_drawing(&mut self, session: &mut ImageSession) -> bool {
        match &mut self.state {
            ToolState::Freehand(t) => t.commit(session),
            _ => false,
        }
    }

    // ---- pen settings ------------------------------------------------------

    pub fn pen_color(&self) -> Rgba<u8> {
        self.pen_color
    }

    pub fn pen_width(&self) -> f32 {
        self.pen_width
    }

    pub fn set_pen_color(&mut self, color: Rgba<u8>) {
        self.pen_color = color;
        if let ToolState::Freehand(t) = &mut self.state {
            t.set_color(color);
        }
    }

    pub fn set_pen_width(&mut self, width: f32) {
        self.pen_width = clamp_pen_width(width);
        if let ToolState::Freehand(t) = &mut self.state {
            t.set_width(width);
        }
    }
}
