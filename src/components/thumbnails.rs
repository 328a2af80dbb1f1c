use eframe::egui;
use egui::{Color32, TextureHandle, Vec2};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::canvas::PixelBuffer;
use crate::io;
use crate::log_warn;
use crate::session::ImageSession;

/// Longest edge of a decoded thumbnail, in pixels.
pub const THUMBNAIL_EDGE: u32 = 96;

const SLOT_SIZE: Vec2 = Vec2::new(110.0, 110.0);
const CURRENT_OUTLINE: Color32 = Color32::from_rgb(70, 150, 255);

// ============================================================================
// THUMBNAIL CACHE - background decode of neighbouring files
// ============================================================================

#[derive(Debug)]
pub enum Thumbnail {
    Loading,
    Ready(PixelBuffer),
    Failed,
}

struct Decoded {
    path: PathBuf,
    result: Result<PixelBuffer, io::IoError>,
}

/// Downscaled copies of files on disk, keyed by path.  Decoding runs on the
/// rayon pool and results are picked up by [`ThumbnailCache::poll`].
pub struct ThumbnailCache {
    entries: HashMap<PathBuf, Thumbnail>,
    max_edge: u32,
    tx: Sender<Decoded>,
    rx: Receiver<Decoded>,
}

impl Default for ThumbnailCache {
    fn default() -> Self {
        Self::new(THUMBNAIL_EDGE)
    }
}

impl ThumbnailCache {
    pub fn new(max_edge: u32) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            entries: HashMap::new(),
            max_edge,
            tx,
            rx,
        }
    }

    pub fn get(&self, path: &Path) -> Option<&Thumbnail> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.entries.values().any(|t| matches!(t, Thumbnail::Loading))
    }

    /// Start decoding `path` unless it is cached or already in flight.
    /// Returns true when a decode was started.
    pub fn request(&mut self, path: &Path) -> bool {
        if self.entries.contains_key(path) {
            return false;
        }
        self.entries.insert(path.to_path_buf(), Thumbnail::Loading);
        let tx = self.tx.clone();
        let path = path.to_path_buf();
        let max_edge = self.max_edge;
        rayon::spawn(move || {
            let result = io::decode_thumbnail(&path, max_edge);
            let _ = tx.send(Decoded { path, result });
        });
        true
    }

    /// Store finished decodes.  Results for paths dropped in the meantime are
    /// discarded.  Returns how many entries became ready or failed.
    pub fn poll(&mut self) -> usize {
        let mut updated = 0;
        while let Ok(decoded) = self.rx.try_recv() {
            let Some(slot) = self.entries.get_mut(&decoded.path) else {
                continue;
            };
            if !matches!(slot, Thumbnail::Loading) {
                continue;
            }
            *slot = match decoded.result {
                Ok(buf) => Thumbnail::Ready(buf),
                Err(e) => {
                    log_warn!("Thumbnail failed: {}", e);
                    Thumbnail::Failed
                }
            };
            updated += 1;
        }
        updated
    }

    /// Forget a cached entry, e.g. after the file was overwritten.
    pub fn invalidate(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    /// Drop every entry not in `keep`.
    pub fn retain(&mut self, keep: &[&Path]) {
        self.entries.retain(|p, _| keep.contains(&p.as_path()));
    }
}

// ============================================================================
// THUMBNAIL STRIP - previous / current / next files of the folder
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StripClick {
    Previous,
    Next,
}

#[derive(Default)]
pub struct ThumbnailStrip {
    cache: ThumbnailCache,
    textures: HashMap<PathBuf, TextureHandle>,
}

impl ThumbnailStrip {
    pub fn poll(&mut self) -> usize {
        self.cache.poll()
    }

    pub fn is_loading(&self) -> bool {
        self.cache.is_loading()
    }

    pub fn invalidate(&mut self, path: &Path) {
        self.cache.invalidate(path);
        self.textures.remove(path);
    }

    /// Draw the three slots.  Returns which neighbour was clicked, if any.
    pub fn show(&mut self, ui: &mut egui::Ui, session: &ImageSession) -> Option<StripClick> {
        let slots = [
            (session.previous_file(), Some(StripClick::Previous)),
            (session.current_file(), None),
            (session.next_file(), Some(StripClick::Next)),
        ];
        let wanted: Vec<&Path> = slots.iter().filter_map(|(p, _)| *p).collect();
        self.cache.retain(&wanted);
        self.textures.retain(|p, _| wanted.contains(&p.as_path()));
        for path in &wanted {
            self.cache.request(path);
        }

        let mut clicked = None;
        ui.horizontal_centered(|ui| {
            for (path, click) in slots {
                if self.slot(ui, path, click.is_none()).clicked() {
                    clicked = click;
                }
            }
        });
        clicked
    }

    fn slot(&mut self, ui: &mut egui::Ui, path: Option<&Path>, current: bool) -> egui::Response {
        let (rect, response) = ui.allocate_exact_size(SLOT_SIZE, egui::Sense::click());
        let painter = ui.painter_at(rect);
        painter.rect_filled(rect, 4.0, ui.visuals().extreme_bg_color);
        if current {
            painter.rect_stroke(rect, 4.0, egui::Stroke::new(2.0, CURRENT_OUTLINE));
        }
        let Some(path) = path else {
            return response;
        };

        match self.cache.get(path) {
            Some(Thumbnail::Ready(buf)) => {
                let handle = self.textures.entry(path.to_path_buf()).or_insert_with(|| {
                    let name = format!("photofe_thumb_{}", path.display());
                    ui.ctx().load_texture(name, buf.to_color_image(), egui::TextureOptions::LINEAR)
                });
                let size = buf.size_vec2();
                let scale = ((SLOT_SIZE.x - 8.0) / size.x).min((SLOT_SIZE.y - 8.0) / size.y).min(1.0);
                let image_rect = egui::Rect::from_center_size(rect.center(), size * scale);
                let uv = egui::Rect::from_min_max(egui::Pos2::ZERO, egui::Pos2::new(1.0, 1.0));
                painter.image(handle.id(), image_rect, uv, Color32::WHITE);
            }
            Some(Thumbnail::Failed) => {
                painter.text(
                    rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "?",
                    egui::FontId::proportional(24.0),
                    Color32::GRAY,
                );
            }
            Some(Thumbnail::Loading) | None => {
                painter.text(
                    rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "…",
                    egui::FontId::proportional(18.0),
                    Color32::GRAY,
                );
            }
        }

        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        response.on_hover_text(name)
    }
}
