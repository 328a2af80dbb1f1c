use std::collections::HashMap;
use std::path::PathBuf;

use eframe::egui;
use egui::{Color32, PointerButton, Pos2, Rect, Stroke, TextureHandle, Vec2};
use image::Rgba;

use crate::canvas::{PixelBuffer, Viewport};
use crate::components::history::HistoryPanel;
use crate::components::thumbnails::{StripClick, ThumbnailStrip};
use crate::components::tools::{
    MAX_PEN_WIDTH, MIN_PEN_WIDTH, OutlineStyle, OverlayCanvas, OverlayLayer, ToolBox, ToolKind,
};
use crate::io;
use crate::ops::ai::{AiChat, AiProvider, Speaker};
use crate::ops::transform::{self, Interpolation};
use crate::session::ImageSession;
use crate::settings::AppSettings;
use crate::{log_info, log_warn};

const CANVAS_BG: Color32 = Color32::from_rgb(38, 38, 42);
const IMAGE_BACKDROP: Color32 = Color32::from_rgb(200, 200, 200);
const SELECTION_STROKE: Color32 = Color32::from_rgb(240, 240, 240);
const FLOATING_STROKE: Color32 = Color32::from_rgb(70, 150, 255);

// ============================================================================
// TEXTURE CACHE
// ============================================================================

struct ImageTexture {
    source: PixelBuffer,
    handle: TextureHandle,
}

/// Upload the image only when its sample storage changed.
fn image_texture(cache: &mut Option<ImageTexture>, ctx: &egui::Context, image: &PixelBuffer) -> egui::TextureId {
    match cache {
        Some(tex) if tex.source.shares_storage(image) => tex.handle.id(),
        _ => {
            let handle = ctx.load_texture("photofe_image", image.to_color_image(), egui::TextureOptions::NEAREST);
            let id = handle.id();
            *cache = Some(ImageTexture {
                source: image.clone(),
                handle,
            });
            id
        }
    }
}

// ============================================================================
// CANVAS PAINTER - tool overlays mapped through the viewport
// ============================================================================

struct CanvasPainter<'a> {
    ctx: &'a egui::Context,
    painter: &'a egui::Painter,
    viewport: &'a Viewport,
    canvas_min: Pos2,
    image_size: Vec2,
    overlays: &'a mut HashMap<OverlayLayer, (u64, TextureHandle)>,
}

impl CanvasPainter<'_> {
    fn to_screen(&self, p: Pos2) -> Pos2 {
        self.canvas_min + self.viewport.image_to_screen(p, self.image_size).to_vec2()
    }
}

impl OverlayCanvas for CanvasPainter<'_> {
    fn stroke_rect(&mut self, rect: Rect, style: OutlineStyle) {
        let screen = Rect::from_two_pos(self.to_screen(rect.min), self.to_screen(rect.max));
        match style {
            OutlineStyle::Selection => {
                self.painter.rect_stroke(screen, 0.0, Stroke::new(3.0, Color32::BLACK));
                self.painter.rect_stroke(screen, 0.0, Stroke::new(1.0, SELECTION_STROKE));
            }
            OutlineStyle::Floating => {
                self.painter.rect_stroke(screen, 0.0, Stroke::new(2.0, FLOATING_STROKE));
            }
        }
    }

    fn draw_rgba(&mut self, layer: OverlayLayer, rgba: &[u8], size: [u32; 2], origin: Pos2, generation: u64) {
        let stale = self.overlays.get(&layer).is_none_or(|(g, _)| *g != generation);
        if stale {
            let image = egui::ColorImage::from_rgba_unmultiplied([size[0] as usize, size[1] as usize], rgba);
            let name = format!("photofe_overlay_{:?}", layer);
            let handle = self.ctx.load_texture(name, image, egui::TextureOptions::NEAREST);
            self.overlays.insert(layer, (generation, handle));
        }
        let Some((_, handle)) = self.overlays.get(&layer) else {
            return;
        };
        let max = origin + Vec2::new(size[0] as f32, size[1] as f32);
        let screen = Rect::from_two_pos(self.to_screen(origin), self.to_screen(max));
        let uv = Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0));
        self.painter.image(handle.id(), screen, uv, Color32::WHITE);
    }
}

// ============================================================================
// RESIZE DIALOG
// ============================================================================

struct ResizeDialog {
    open: bool,
    width: u32,
    height: u32,
    keep_aspect: bool,
    aspect: f32,
    interpolation: Interpolation,
}

impl Default for ResizeDialog {
    fn default() -> Self {
        Self {
            open: false,
            width: 1,
            height: 1,
            keep_aspect: true,
            aspect: 1.0,
            interpolation: Interpolation::default(),
        }
    }
}

impl ResizeDialog {
    fn open_for(&mut self, image: &PixelBuffer) {
        self.width = image.width();
        self.height = image.height();
        self.aspect = image.width() as f32 / image.height().max(1) as f32;
        self.open = true;
    }
}

// ============================================================================
// APP
// ============================================================================

pub struct PhotoFEApp {
    session: ImageSession,
    viewport: Viewport,
    tools: ToolBox,
    settings: AppSettings,
    chat: AiChat,
    history_panel: HistoryPanel,
    thumbnails: ThumbnailStrip,

    image_texture: Option<ImageTexture>,
    overlay_textures: HashMap<OverlayLayer, (u64, TextureHandle)>,

    resize_dialog: ResizeDialog,
    settings_open: bool,
    chat_open: bool,
    history_open: bool,
    thumbnails_open: bool,
    chat_input: String,
    attach_image: bool,

    /// Primary-button drag currently feeding the active tool.
    stroke_active: bool,
    last_pointer: Pos2,
    fit_pending: bool,
    status: String,
    window_title: String,
}

impl PhotoFEApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, startup_file: Option<PathBuf>) -> Self {
        let mut app = Self::with_settings(AppSettings::load());
        if let Some(path) = startup_file {
            app.open_path(path);
        }
        app
    }

    fn with_settings(settings: AppSettings) -> Self {
        let tools = ToolBox::new(settings.pen_color, settings.pen_width);
        Self {
            session: ImageSession::new(),
            viewport: Viewport::new(),
            tools,
            settings,
            chat: AiChat::new(),
            history_panel: HistoryPanel::default(),
            thumbnails: ThumbnailStrip::default(),
            image_texture: None,
            overlay_textures: HashMap::new(),
            resize_dialog: ResizeDialog::default(),
            settings_open: false,
            chat_open: true,
            history_open: false,
            thumbnails_open: true,
            chat_input: String::new(),
            attach_image: true,
            stroke_active: false,
            last_pointer: Pos2::ZERO,
            fit_pending: false,
            status: "Ready".to_string(),
            window_title: String::new(),
        }
    }

    // ------------------------------------------------------------------
    // File actions
    // ------------------------------------------------------------------

    fn handle_open_file(&mut self) {
        if let Some(path) = io::pick_open_path() {
            self.open_path(path);
        }
    }

    fn open_path(&mut self, path: PathBuf) {
        if self.drawing_blocks_switch() {
            return;
        }
        match self.session.load(&path, true) {
            Ok(()) => self.after_load(),
            Err(e) => self.status = e.to_string(),
        }
    }

    /// An uncommitted drawing has no history entry, so loading would lose it.
    fn drawing_blocks_switch(&mut self) -> bool {
        if !self.tools.has_pending_drawing() {
            return false;
        }
        log_warn!("Image switch refused: drawing not applied");
        self.status = "Apply (Enter) or discard (Esc) the drawing before switching images".to_string();
        true
    }

    fn after_load(&mut self) {
        self.tools.reset();
        self.stroke_active = false;
        self.fit_pending = self.settings.fit_on_open;
        self.status = self.session.title();
    }

    fn handle_save(&mut self) {
        if self.session.current_file().is_none() {
            self.handle_save_as();
            return;
        }
        self.flush_drawing();
        match self.session.save(None) {
            Ok(path) => self.after_save(path),
            Err(e) => self.status = e.to_string(),
        }
    }

    fn handle_save_as(&mut self) {
        if self.session.image().is_none() {
            return;
        }
        let Some(path) = io::pick_save_path(self.session.current_file()) else {
            return;
        };
        self.flush_drawing();
        match self.session.save(Some(&path)) {
            Ok(path) => self.after_save(path),
            Err(e) => self.status = e.to_string(),
        }
    }

    fn after_save(&mut self, path: PathBuf) {
        self.thumbnails.invalidate(&path);
        self.status = format!("Saved {}", path.display());
    }

    fn navigate(&mut self, forward: bool) {
        if self.drawing_blocks_switch() {
            return;
        }
        let result = if forward {
            self.session.next()
        } else {
            self.session.previous()
        };
        match result {
            Ok(true) => self.after_load(),
            Ok(false) => {}
            Err(e) => self.status = e.to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Edit actions
    // ------------------------------------------------------------------

    fn flush_drawing(&mut self) {
        if self.tools.commit_drawing(&mut self.session) {
            self.status = "Drawing applied".to_string();
        }
    }

    fn handle_undo(&mut self) {
        // An uncommitted drawing is the most recent change.
        if self.tools.has_pending_drawing() {
            self.tools.reset();
            return;
        }
        if self.session.undo() {
            self.tools.reset();
            self.status = "Undo".to_string();
        }
    }

    fn handle_redo(&mut self) {
        // Applying the drawing is a new edit, which clears the redo stack.
        self.flush_drawing();
        if self.session.redo() {
            self.tools.reset();
            self.status = "Redo".to_string();
        }
    }

    fn rotate_right(&mut self) {
        self.flush_drawing();
        if self.session.rotate_right() {
            self.tools.reset();
        }
    }

    fn crop_to_selection(&mut self) {
        if self.tools.crop_to_selection(&mut self.session) {
            self.status = "Cropped".to_string();
        }
    }

    fn apply_resize(&mut self) {
        let (w, h, interp) = (
            self.resize_dialog.width,
            self.resize_dialog.height,
            self.resize_dialog.interpolation,
        );
        self.flush_drawing();
        match self
            .session
            .try_mutate("Resize", |img| transform::resize_with(img, w, h, interp))
        {
            Ok(true) => {
                self.tools.reset();
                self.status = format!("Resized to {}x{}", w, h);
                log_info!("Resized to {}x{} ({})", w, h, interp.label());
            }
            Ok(false) => {}
            Err(e) => self.status = e.to_string(),
        }
    }

    fn select_tool(&mut self, kind: ToolKind) {
        self.tools.activate(kind, &mut self.session);
    }

    fn set_pen_color(&mut self, color: Color32) {
        let rgba = Rgba(color.to_srgba_unmultiplied());
        self.tools.set_pen_color(rgba);
        self.settings.pen_color = rgba;
    }

    fn set_pen_width(&mut self, width: f32) {
        self.tools.set_pen_width(width);
        self.settings.pen_width = self.tools.pen_width();
    }

    fn send_chat(&mut self) {
        let prompt = std::mem::take(&mut self.chat_input);
        let image = if self.attach_image {
            match self.session.encoded_png() {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    log_warn!("Not attaching image: {}", e);
                    None
                }
            }
        } else {
            None
        };
        let config = self.settings.provider_config();
        self.chat.send(&prompt, &config, image);
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let cmd = egui::Modifiers::COMMAND;
        let pressed = |m: egui::Modifiers, k: egui::Key| ctx.input_mut(|i| i.consume_key(m, k));

        if pressed(cmd, egui::Key::O) {
            self.handle_open_file();
        }
        if pressed(egui::Modifiers { shift: true, ..cmd }, egui::Key::S) {
            self.handle_save_as();
        }
        if pressed(cmd, egui::Key::S) {
            self.handle_save();
        }
        if pressed(cmd, egui::Key::Z) {
            self.handle_undo();
        }
        if pressed(cmd, egui::Key::Y) {
            self.handle_redo();
        }
        if pressed(cmd, egui::Key::R) {
            self.rotate_right();
        }
        if pressed(cmd, egui::Key::PlusEquals) {
            self.viewport.zoom_in();
        }
        if pressed(cmd, egui::Key::Minus) {
            self.viewport.zoom_out();
        }
        if pressed(cmd, egui::Key::Num0) {
            self.fit_pending = true;
        }
        if pressed(egui::Modifiers::NONE, egui::Key::ArrowRight) {
            self.navigate(true);
        }
        if pressed(egui::Modifiers::NONE, egui::Key::ArrowLeft) {
            self.navigate(false);
        }
        if pressed(egui::Modifiers::NONE, egui::Key::Enter) {
            if self.tools.has_selection() {
                self.crop_to_selection();
            } else if self.tools.paste_floating(&mut self.session) {
                self.status = "Pasted".to_string();
            } else {
                self.flush_drawing();
            }
        }
        if pressed(egui::Modifiers::NONE, egui::Key::Escape) {
            self.tools.reset();
        }
        for (key, kind) in [
            (egui::Key::V, ToolKind::Pointer),
            (egui::Key::M, ToolKind::Select),
            (egui::Key::X, ToolKind::Scissors),
            (egui::Key::P, ToolKind::Pencil),
        ] {
            if pressed(egui::Modifiers::NONE, key) {
                self.select_tool(kind);
            }
        }
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped: Vec<PathBuf> = ctx.input(|i| i.raw.dropped_files.iter().filter_map(|f| f.path.clone()).collect());
        if let Some(path) = dropped.into_iter().find(|p| io::is_supported_extension(p)) {
            self.open_path(path);
        }
    }

    fn handle_canvas_input(&mut self, ctx: &egui::Context, response: &egui::Response, canvas: Rect, image_size: Vec2) {
        let to_image = |viewport: &Viewport, p: Pos2| viewport.screen_to_image(p - canvas.min.to_vec2(), image_size);

        if response.hovered() {
            let scroll = ctx.input(|i| i.scroll_delta.y);
            self.viewport.zoom_by_wheel(scroll);
        }

        let panning_mod = ctx.input(|i| i.modifiers.command);
        if response.dragged_by(PointerButton::Middle)
            || (!self.stroke_active && panning_mod && response.dragged_by(PointerButton::Primary))
        {
            self.viewport.pan_by(response.drag_delta());
            return;
        }

        if let Some(p) = response.interact_pointer_pos() {
            self.last_pointer = to_image(&self.viewport, p);
        }

        if response.drag_started_by(PointerButton::Primary) && !panning_mod {
            self.tools.on_press(self.last_pointer, &self.session);
            self.stroke_active = true;
        } else if self.stroke_active && response.dragged_by(PointerButton::Primary) {
            self.tools.on_drag(self.last_pointer);
        }

        if self.stroke_active && response.drag_released() {
            self.tools.on_release(self.last_pointer, &self.session);
            self.stroke_active = false;
        }
    }

    // ------------------------------------------------------------------
    // Panels
    // ------------------------------------------------------------------

    fn show_menu_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                let has_image = self.session.image().is_some();
                ui.menu_button("File", |ui| {
                    if ui.add(egui::Button::new("Open…").shortcut_text("Ctrl+O")).clicked() {
                        self.handle_open_file();
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui.add_enabled(has_image, egui::Button::new("Save").shortcut_text("Ctrl+S")).clicked() {
                        self.handle_save();
                        ui.close_menu();
                    }
                    if ui
                        .add_enabled(has_image, egui::Button::new("Save As…").shortcut_text("Ctrl+Shift+S"))
                        .clicked()
                    {
                        self.handle_save_as();
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui
                        .add_enabled(self.session.has_previous(), egui::Button::new("Previous Image").shortcut_text("←"))
                        .clicked()
                    {
                        self.navigate(false);
                        ui.close_menu();
                    }
                    if ui
                        .add_enabled(self.session.has_next(), egui::Button::new("Next Image").shortcut_text("→"))
                        .clicked()
                    {
                        self.navigate(true);
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui.button("Settings…").clicked() {
                        self.settings_open = true;
                        ui.close_menu();
                    }
                });

                ui.menu_button("Edit", |ui| {
                    let undo_label = match self.session.history().undo_description() {
                        Some(d) => format!("Undo {}", d),
                        None => "Undo".to_string(),
                    };
                    let can_undo = self.session.can_undo() || self.tools.has_pending_drawing();
                    if ui.add_enabled(can_undo, egui::Button::new(undo_label).shortcut_text("Ctrl+Z")).clicked() {
                        self.handle_undo();
                        ui.close_menu();
                    }
                    let redo_label = match self.session.history().redo_description() {
                        Some(d) => format!("Redo {}", d),
                        None => "Redo".to_string(),
                    };
                    let can_redo = self.session.can_redo() && !self.tools.has_pending_drawing();
                    if ui
                        .add_enabled(can_redo, egui::Button::new(redo_label).shortcut_text("Ctrl+Y"))
                        .clicked()
                    {
                        self.handle_redo();
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui
                        .add_enabled(self.tools.has_floating(), egui::Button::new("Paste Region").shortcut_text("Enter"))
                        .clicked()
                    {
                        self.tools.paste_floating(&mut self.session);
                        ui.close_menu();
                    }
                    if ui.add_enabled(self.tools.has_floating(), egui::Button::new("Stamp Region")).clicked() {
                        self.tools.stamp_floating(&mut self.session);
                        ui.close_menu();
                    }
                    if ui
                        .add_enabled(self.tools.has_pending_drawing(), egui::Button::new("Apply Drawing"))
                        .clicked()
                    {
                        self.flush_drawing();
                        ui.close_menu();
                    }
                });

                ui.menu_button("Image", |ui| {
                    if ui.add_enabled(has_image, egui::Button::new("Resize…")).clicked() {
                        if let Some(image) = self.session.image() {
                            self.resize_dialog.open_for(image);
                        }
                        ui.close_menu();
                    }
                    if ui
                        .add_enabled(has_image, egui::Button::new("Rotate Right").shortcut_text("Ctrl+R"))
                        .clicked()
                    {
                        self.rotate_right();
                        ui.close_menu();
                    }
                    if ui
                        .add_enabled(self.tools.has_selection(), egui::Button::new("Crop to Selection").shortcut_text("Enter"))
                        .clicked()
                    {
                        self.crop_to_selection();
                        ui.close_menu();
                    }
                });

                ui.menu_button("View", |ui| {
                    if ui.add(egui::Button::new("Zoom In").shortcut_text("Ctrl++")).clicked() {
                        self.viewport.zoom_in();
                    }
                    if ui.add(egui::Button::new("Zoom Out").shortcut_text("Ctrl+-")).clicked() {
                        self.viewport.zoom_out();
                    }
                    if ui.add(egui::Button::new("Fit to Window").shortcut_text("Ctrl+0")).clicked() {
                        self.fit_pending = true;
                        ui.close_menu();
                    }
                    if ui.button("Actual Size").clicked() {
                        self.viewport.reset_zoom();
                        ui.close_menu();
                    }
                    ui.separator();
                    ui.checkbox(&mut self.history_open, "History");
                    ui.checkbox(&mut self.thumbnails_open, "Thumbnails");
                    ui.checkbox(&mut self.chat_open, "AI Assistant");
                });
            });
        });
    }

    fn show_tool_strip(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("tool_strip").show(ctx, |ui| {
            ui.horizontal(|ui| {
                let active = self.tools.active();
                for &kind in ToolKind::all() {
                    if ui.selectable_label(active == kind, kind.label()).clicked() {
                        self.select_tool(kind);
                    }
                }
                ui.separator();

                let [r, g, b, a] = self.tools.pen_color().0;
                let mut color = Color32::from_rgba_unmultiplied(r, g, b, a);
                if egui::color_picker::color_edit_button_srgba(ui, &mut color, egui::color_picker::Alpha::OnlyBlend)
                    .changed()
                {
                    self.set_pen_color(color);
                    self.settings.save();
                }

                let mut width = self.tools.pen_width();
                let resp = ui.add(egui::Slider::new(&mut width, MIN_PEN_WIDTH..=MAX_PEN_WIDTH).text("Width"));
                if resp.changed() {
                    self.set_pen_width(width);
                }
                if resp.drag_released() || resp.lost_focus() {
                    self.settings.save();
                }

                if let Some(image) = self.session.image() {
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        ui.label(format!(
                            "{}×{}  {:.0}%",
                            image.width(),
                            image.height(),
                            self.viewport.zoom() * 100.0
                        ));
                    });
                }
            });
        });
    }

    fn show_status_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(&self.status);
            });
        });
    }

    fn show_chat_panel(&mut self, ctx: &egui::Context) {
        if !self.chat_open {
            return;
        }
        egui::SidePanel::right("ai_chat").default_width(300.0).show(ctx, |ui| {
            ui.heading("AI Assistant");
            ui.label(format!("Provider: {}", self.settings.ai_provider.label()));
            ui.separator();

            let input_height = 70.0;
            egui::ScrollArea::vertical()
                .stick_to_bottom(true)
                .max_height(ui.available_height() - input_height)
                .show(ui, |ui| {
                    for entry in self.chat.transcript() {
                        let color = match entry.speaker {
                            Speaker::You => ui.visuals().strong_text_color(),
                            Speaker::Ai => Color32::from_rgb(120, 190, 255),
                            Speaker::System => Color32::from_rgb(230, 190, 90),
                            Speaker::Error => Color32::from_rgb(240, 100, 100),
                        };
                        ui.label(egui::RichText::new(format!("[{}] {}:", entry.time, entry.speaker.label())).color(color));
                        ui.label(&entry.text);
                        ui.add_space(4.0);
                    }
                    if self.chat.is_pending() {
                        ui.horizontal(|ui| {
                            ui.spinner();
                            ui.weak("Waiting for reply…");
                        });
                    }
                });

            ui.separator();
            ui.checkbox(&mut self.attach_image, "Attach current image");
            ui.horizontal(|ui| {
                let edit = ui.add(
                    egui::TextEdit::singleline(&mut self.chat_input)
                        .hint_text("Ask about the image…")
                        .desired_width(ui.available_width() - 60.0),
                );
                let enter = edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                if ui.button("Send").clicked() || enter {
                    self.send_chat();
                    edit.request_focus();
                }
            });
        });
    }

    /// Returns true when the window was drawn this frame.
    fn show_history_window(&mut self, ctx: &egui::Context) -> bool {
        if !self.history_open {
            return false;
        }
        let mut open = true;
        let shown = egui::Window::new("History")
            .open(&mut open)
            .default_pos(egui::pos2(16.0, 96.0))
            .resizable(false)
            .show(ctx, |ui| {
                self.history_panel.show(ui, self.session.history());
            })
            .is_some();
        if !open {
            self.history_open = false;
        }
        shown
    }

    fn show_thumbnail_strip(&mut self, ctx: &egui::Context) {
        if !self.thumbnails_open || self.session.current_file().is_none() {
            return;
        }
        let mut clicked = None;
        egui::TopBottomPanel::bottom("thumbnails")
            .resizable(false)
            .exact_height(124.0)
            .show(ctx, |ui| {
                clicked = self.thumbnails.show(ui, &self.session);
            });
        match clicked {
            Some(StripClick::Previous) => self.navigate(false),
            Some(StripClick::Next) => self.navigate(true),
            None => {}
        }
    }

    fn show_resize_dialog(&mut self, ctx: &egui::Context) {
        if !self.resize_dialog.open {
            return;
        }
        let mut open = true;
        let mut apply = false;
        egui::Window::new("Resize Image")
            .open(&mut open)
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                let dlg = &mut self.resize_dialog;
                egui::Grid::new("resize_grid").num_columns(2).show(ui, |ui| {
                    ui.label("Width");
                    if ui.add(egui::DragValue::new(&mut dlg.width).clamp_range(1..=20_000)).changed() && dlg.keep_aspect {
                        dlg.height = ((dlg.width as f32 / dlg.aspect).round() as u32).max(1);
                    }
                    ui.end_row();
                    ui.label("Height");
                    if ui.add(egui::DragValue::new(&mut dlg.height).clamp_range(1..=20_000)).changed() && dlg.keep_aspect {
                        dlg.width = ((dlg.height as f32 * dlg.aspect).round() as u32).max(1);
                    }
                    ui.end_row();
                    ui.label("Filter");
                    egui::ComboBox::from_id_source("resize_filter")
                        .selected_text(dlg.interpolation.label())
                        .show_ui(ui, |ui| {
                            for &interp in Interpolation::all() {
                                ui.selectable_value(&mut dlg.interpolation, interp, interp.label());
                            }
                        });
                    ui.end_row();
                });
                ui.checkbox(&mut dlg.keep_aspect, "Keep aspect ratio");
                ui.separator();
                ui.horizontal(|ui| {
                    if ui.button("Apply").clicked() {
                        apply = true;
                    }
                    if ui.button("Cancel").clicked() {
                        dlg.open = false;
                    }
                });
            });
        if apply {
            self.apply_resize();
            self.resize_dialog.open = false;
        }
        if !open {
            self.resize_dialog.open = false;
        }
    }

    fn show_settings_window(&mut self, ctx: &egui::Context) {
        if !self.settings_open {
            return;
        }
        let mut open = true;
        let mut save = false;
        egui::Window::new("Settings")
            .open(&mut open)
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                let s = &mut self.settings;
                ui.heading("AI");
                egui::Grid::new("settings_grid").num_columns(2).show(ui, |ui| {
                    ui.label("Provider");
                    egui::ComboBox::from_id_source("ai_provider")
                        .selected_text(s.ai_provider.label())
                        .show_ui(ui, |ui| {
                            for &p in AiProvider::all() {
                                ui.selectable_value(&mut s.ai_provider, p, p.label());
                            }
                        });
                    ui.end_row();
                    ui.label("API key");
                    let provider = s.ai_provider;
                    ui.add(egui::TextEdit::singleline(s.api_key_mut(provider)).password(true));
                    ui.end_row();
                    ui.label("Timeout (s, 0 = none)");
                    ui.add(egui::DragValue::new(&mut s.ai_timeout_secs).clamp_range(0..=600));
                    ui.end_row();
                });
                ui.separator();
                ui.heading("View");
                ui.checkbox(&mut s.fit_on_open, "Fit image to window on open");
                ui.separator();
                if ui.button("Save").clicked() {
                    save = true;
                }
            });
        if save {
            self.settings.save();
            self.settings_open = false;
        }
        if !open {
            self.settings_open = false;
        }
    }

    fn show_canvas(&mut self, ui: &mut egui::Ui) {
        let (rect, response) = ui.allocate_exact_size(ui.available_size(), egui::Sense::click_and_drag());
        self.viewport.set_canvas_size(rect.size());

        let Some(image_size) = self.session.image().map(|img| img.size_vec2()) else {
            ui.painter_at(rect).text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                "Open an image (Ctrl+O) or drop one here",
                egui::FontId::proportional(16.0),
                Color32::GRAY,
            );
            return;
        };

        if self.fit_pending {
            self.viewport.fit_to_window(image_size.x as u32, image_size.y as u32);
            self.fit_pending = false;
        }

        self.handle_canvas_input(ui.ctx(), &response, rect, image_size);

        let ctx = ui.ctx().clone();
        let painter = ui.painter_at(rect);
        let Some(image) = self.session.image() else {
            return;
        };
        let image_size = image.size_vec2();
        let texture = image_texture(&mut self.image_texture, &ctx, image);
        let screen_rect = self.viewport.image_rect(image_size).translate(rect.min.to_vec2());
        painter.rect_filled(screen_rect, 0.0, IMAGE_BACKDROP);
        painter.image(
            texture,
            screen_rect,
            Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
            Color32::WHITE,
        );

        let mut overlay = CanvasPainter {
            ctx: &ctx,
            painter: &painter,
            viewport: &self.viewport,
            canvas_min: rect.min,
            image_size,
            overlays: &mut self.overlay_textures,
        };
        self.tools.render(&mut overlay);
    }

    fn sync_title(&mut self, ctx: &egui::Context) {
        let title = if self.session.image().is_some() {
            format!("{} - PhotoFE", self.session.title())
        } else {
            "PhotoFE".to_string()
        };
        if title != self.window_title {
            ctx.send_viewport_cmd(egui::ViewportCommand::Title(title.clone()));
            self.window_title = title;
        }
    }
}

impl eframe::App for PhotoFEApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.chat.poll() > 0 {
            ctx.request_repaint();
        }
        if self.thumbnails.poll() > 0 {
            ctx.request_repaint();
        }
        if self.chat.is_pending() || self.thumbnails.is_loading() {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }

        self.handle_dropped_files(ctx);
        self.handle_shortcuts(ctx);

        self.show_menu_bar(ctx);
        self.show_tool_strip(ctx);
        self.show_status_bar(ctx);
        self.show_thumbnail_strip(ctx);
        self.show_chat_panel(ctx);
        self.show_history_window(ctx);
        self.show_resize_dialog(ctx);
        self.show_settings_window(ctx);

        egui::CentralPanel::default()
            .frame(egui::Frame {
                fill: CANVAS_BG,
                ..Default::default()
            })
            .show(ctx, |ui| self.show_canvas(ui));

        self.sync_title(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::ZOOM_STEP;
    use crate::io::SaveFormat;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn app_with(image: PixelBuffer) -> PhotoFEApp {
        let mut app = PhotoFEApp::with_settings(AppSettings::default());
        app.session = ImageSession::from_buffer(image);
        app
    }

    fn draw_across(app: &mut PhotoFEApp, y: f32) {
        app.select_tool(ToolKind::Pencil);
        app.tools.on_press(Pos2::new(2.0, y), &app.session);
        app.tools.on_drag(Pos2::new(17.0, y));
        app.tools.on_release(Pos2::new(17.0, y), &app.session);
        assert!(app.tools.has_pending_drawing());
    }

    #[test]
    fn redo_applies_the_pending_drawing_first() {
        let mut app = app_with(PixelBuffer::filled(20, 20, WHITE));
        app.session.rotate_right();
        app.session.undo();
        assert!(app.session.can_redo());

        draw_across(&mut app, 10.0);
        app.handle_redo();

        assert!(!app.tools.has_pending_drawing());
        assert_eq!(app.session.image().unwrap().pixel(10, 10), Some(app.tools.pen_color()));
        assert!(!app.session.can_redo(), "the applied drawing is the newest edit");
        assert_eq!(app.session.history().undo_count(), 1);
    }

    #[test]
    fn switching_images_keeps_the_pending_drawing() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        for p in [&a, &b] {
            io::encode_and_write(&PixelBuffer::filled(20, 20, WHITE), p, SaveFormat::Png).unwrap();
        }

        let mut app = PhotoFEApp::with_settings(AppSettings::default());
        app.open_path(a.clone());
        draw_across(&mut app, 5.0);

        app.navigate(true);
        assert_eq!(app.session.current_file(), Some(a.as_path()));
        assert!(app.tools.has_pending_drawing());
        assert!(app.status.contains("drawing"));

        app.open_path(b.clone());
        assert_eq!(app.session.current_file(), Some(a.as_path()));
        assert!(app.tools.has_pending_drawing());

        app.flush_drawing();
        app.navigate(true);
        assert_eq!(app.session.current_file(), Some(b.as_path()));
        assert!(!app.tools.has_pending_drawing());
    }

    fn press(ctx: &egui::Context, app: &mut PhotoFEApp, key: egui::Key) {
        let input = egui::RawInput {
            events: vec![egui::Event::Key {
                key,
                pressed: true,
                repeat: false,
                modifiers: egui::Modifiers {
                    ctrl: true,
                    command: true,
                    ..Default::default()
                },
            }],
            ..Default::default()
        };
        let _ = ctx.run(input, |ctx| app.handle_shortcuts(ctx));
    }

    #[test]
    fn ctrl_plus_equals_and_minus_step_the_zoom() {
        let mut app = app_with(PixelBuffer::filled(4, 4, WHITE));
        let ctx = egui::Context::default();
        press(&ctx, &mut app, egui::Key::PlusEquals);
        assert!((app.viewport.zoom() - ZOOM_STEP).abs() < 1e-6);
        press(&ctx, &mut app, egui::Key::Minus);
        assert!((app.viewport.zoom() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn history_window_does_not_need_the_chat_panel() {
        let mut app = app_with(PixelBuffer::filled(4, 4, WHITE));
        app.chat_open = false;
        app.history_open = true;
        let ctx = egui::Context::default();
        let mut shown = false;
        let _ = ctx.run(egui::RawInput::default(), |ctx| {
            app.show_chat_panel(ctx);
            shown = app.show_history_window(ctx);
        });
        assert!(shown);

        app.history_open = false;
        let _ = ctx.run(egui::RawInput::default(), |ctx| {
            shown = app.show_history_window(ctx);
        });
        assert!(!shown);
    }
}
