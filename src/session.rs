use std::path::{Path, PathBuf};

use crate::canvas::PixelBuffer;
use crate::components::history::{HistoryManager, UNDO_CAPACITY};
use crate::io::{self, IoError, SaveFormat};
use crate::ops::clipboard;
use crate::ops::transform::{self, TransformError};
use crate::{log_err, log_info};

/// The single open image: current pixels, where they came from, the folder
/// they live in, and bounded undo/redo.
///
/// Every edit goes through [`mutate`](Self::mutate) or
/// [`try_mutate`](Self::try_mutate), which snapshot the current buffer first.
pub struct ImageSession {
    image: Option<PixelBuffer>,
    current_file: Option<PathBuf>,
    history: HistoryManager,
    siblings: Vec<PathBuf>,
    sibling_index: Option<usize>,
}

impl Default for ImageSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageSession {
    pub fn new() -> Self {
        Self {
            image: None,
            current_file: None,
            history: HistoryManager::new(UNDO_CAPACITY),
            siblings: Vec::new(),
            sibling_index: None,
        }
    }

    /// Session over an in-memory buffer with no backing file.
    pub fn from_buffer(image: PixelBuffer) -> Self {
        Self {
            image: Some(image),
            ..Self::new()
        }
    }

    // ------------------------------------------------------------------
    // File operations
    // ------------------------------------------------------------------

    /// Decode `path` and make it the current image.
    ///
    /// On failure nothing changes, sibling list and index included.  With
    /// `reset_history` both stacks are cleared; otherwise the outgoing image
    /// becomes an undo step.
    pub fn load(&mut self, path: &Path, reset_history: bool) -> Result<(), IoError> {
        let decoded = match io::decode_image(path) {
            Ok(buf) => buf,
            Err(e) => {
                log_err!("Load failed: {}", e);
                return Err(e);
            }
        };

        if reset_history {
            self.history.clear();
        } else if let Some(prev) = self.image.take() {
            // record() also clears redo
            self.history.record("Open", prev);
        }

        log_info!(
            "Loaded {} ({}x{}, {:?})",
            path.display(),
            decoded.width(),
            decoded.height(),
            decoded.format()
        );
        self.image = Some(decoded);
        self.set_current_file(path);
        Ok(())
    }

    /// Encode the current image to `path`, or back to the current file when
    /// `path` is `None`.  The format follows the destination extension.
    /// Returns the path written.
    pub fn save(&mut self, path: Option<&Path>) -> Result<PathBuf, IoError> {
        let image = self.image.as_ref().ok_or(IoError::NoImage)?;
        let dest = match (path, &self.current_file) {
            (Some(p), _) => p.to_path_buf(),
            (None, Some(current)) => current.clone(),
            (None, None) => return Err(IoError::NoDestination),
        };

        let format = SaveFormat::from_path(&dest);
        if let Err(e) = io::encode_and_write(image, &dest, format) {
            log_err!("Save to {} failed: {}", dest.display(), e);
            return Err(e);
        }
        log_info!("Saved {} as {:?}", dest.display(), format);

        if path.is_some() {
            self.set_current_file(&dest);
        }
        Ok(dest)
    }

    fn set_current_file(&mut self, path: &Path) {
        let (siblings, index) = io::scan_siblings(path);
        self.current_file = Some(path.to_path_buf());
        self.siblings = siblings;
        self.sibling_index = index;
    }

    // ------------------------------------------------------------------
    // Mutation gateway
    // ------------------------------------------------------------------

    /// Replace the current image with `f(current)`, recording an undo step.
    /// Returns `false` (and does nothing) when no image is loaded.
    pub fn mutate<F>(&mut self, description: &str, f: F) -> bool
    where
        F: FnOnce(&PixelBuffer) -> PixelBuffer,
    {
        let Some(current) = self.image.take() else {
            return false;
        };
        let next = f(&current);
        self.history.record(description, current);
        self.image = Some(next);
        true
    }

    /// Fallible [`mutate`](Self::mutate): on `Err` the image and both stacks
    /// are left exactly as they were.
    pub fn try_mutate<F, E>(&mut self, description: &str, f: F) -> Result<bool, E>
    where
        F: FnOnce(&PixelBuffer) -> Result<PixelBuffer, E>,
    {
        let Some(current) = self.image.as_ref() else {
            return Ok(false);
        };
        let next = f(current)?;
        Ok(self.mutate(description, |_| next))
    }

    pub fn undo(&mut self) -> bool {
        let Some(current) = self.image.clone() else {
            return false;
        };
        match self.history.step_back(current) {
            Some(prev) => {
                self.image = Some(prev);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        let Some(current) = self.image.clone() else {
            return false;
        };
        match self.history.step_forward(current) {
            Some(next) => {
                self.image = Some(next);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Folder navigation
    // ------------------------------------------------------------------

    /// The folder entry after the current one, if any.
    pub fn next_file(&self) -> Option<&Path> {
        let i = self.sibling_index?;
        self.siblings.get(i + 1).map(PathBuf::as_path)
    }

    /// The folder entry before the current one, if any.
    pub fn previous_file(&self) -> Option<&Path> {
        let i = self.sibling_index?.checked_sub(1)?;
        self.siblings.get(i).map(PathBuf::as_path)
    }

    pub fn has_next(&self) -> bool {
        self.next_file().is_some()
    }

    pub fn has_previous(&self) -> bool {
        self.previous_file().is_some()
    }

    /// Open the next image in the folder with fresh history.
    /// `Ok(false)` at the end of the list or when the position is unknown.
    pub fn next(&mut self) -> Result<bool, IoError> {
        let Some(target) = self.next_file().map(Path::to_path_buf) else {
            return Ok(false);
        };
        self.load(&target, true).map(|_| true)
    }

    pub fn previous(&mut self) -> Result<bool, IoError> {
        let Some(target) = self.previous_file().map(Path::to_path_buf) else {
            return Ok(false);
        };
        self.load(&target, true).map(|_| true)
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool, TransformError> {
        let applied = self.try_mutate("Resize", |img| transform::resize(img, width, height))?;
        if applied {
            log_info!("Resized to {}x{}", width, height);
        }
        Ok(applied)
    }

    pub fn crop(&mut self, x: i64, y: i64, width: i64, height: i64) -> bool {
        let applied = self.mutate("Crop", |img| transform::crop(img, x, y, width, height));
        if applied {
            log_info!("Cropped to {}x{} at ({}, {})", width, height, x, y);
        }
        applied
    }

    pub fn rotate_right(&mut self) -> bool {
        self.mutate("Rotate 90° CW", transform::rotate_90cw)
    }

    /// Merge a finished freehand overlay into the image.
    pub fn apply_drawing(&mut self, overlay: &PixelBuffer) -> bool {
        self.mutate("Draw", |img| clipboard::merge_overlay(img, overlay))
    }

    pub fn paste_region(&mut self, region: &PixelBuffer, x: i64, y: i64) -> bool {
        self.mutate("Paste", |img| clipboard::paste_region(img, region, x, y))
    }

    /// Current image as PNG bytes, for attaching to an AI request.
    pub fn encoded_png(&self) -> Result<Vec<u8>, IoError> {
        let image = self.image.as_ref().ok_or(IoError::NoImage)?;
        io::encode_png_bytes(image)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn image(&self) -> Option<&PixelBuffer> {
        self.image.as_ref()
    }

    pub fn current_file(&self) -> Option<&Path> {
        self.current_file.as_deref()
    }

    pub fn siblings(&self) -> &[PathBuf] {
        &self.siblings
    }

    pub fn sibling_index(&self) -> Option<usize> {
        self.sibling_index
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn can_undo(&self) -> bool {
        self.image.is_some() && self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.image.is_some() && self.history.can_redo()
    }

    /// Window title: file name plus folder position when known.
    pub fn title(&self) -> String {
        let name = self
            .current_file
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Untitled".to_string());
        match self.sibling_index {
            Some(i) => format!("{} ({}/{})", name, i + 1, self.siblings.len()),
            None => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::PixelFormat;
    use image::{Rgba, RgbaImage};
    use std::fs;
    use tempfile::TempDir;

    fn gradient(w: u32, h: u32) -> PixelBuffer {
        PixelBuffer::from_rgba_image(RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
        }))
    }

    fn write_png(dir: &TempDir, name: &str, buf: &PixelBuffer) -> PathBuf {
        let path = dir.path().join(name);
        io::encode_and_write(buf, &path, SaveFormat::Png).unwrap();
        path
    }

    #[test]
    fn undo_restores_previous_buffer_exactly() {
        let original = gradient(13, 7);
        let mut session = ImageSession::from_buffer(original.clone());
        assert!(session.rotate_right());
        assert_eq!(session.image().unwrap().dimensions(), (7, 13));
        assert!(session.undo());
        let restored = session.image().unwrap();
        assert_eq!(restored.samples(), original.samples());
        assert_eq!(restored.dimensions(), original.dimensions());
    }

    #[test]
    fn redo_after_undo_is_identity() {
        let mut session = ImageSession::from_buffer(gradient(10, 10));
        session.crop(2, 2, 5, 5);
        let edited = session.image().unwrap().clone();
        session.undo();
        assert!(session.redo());
        assert_eq!(session.image().unwrap(), &edited);
        assert!(!session.can_redo());
    }

    #[test]
    fn mutation_clears_redo() {
        let mut session = ImageSession::from_buffer(gradient(10, 10));
        session.rotate_right();
        session.undo();
        assert!(session.can_redo());
        session.crop(0, 0, 3, 3);
        assert!(!session.can_redo());
        assert!(!session.redo());
    }

    #[test]
    fn undo_depth_is_bounded() {
        let mut session = ImageSession::from_buffer(gradient(4, 4));
        for _ in 0..(UNDO_CAPACITY + 5) {
            session.rotate_right();
        }
        assert_eq!(session.history().undo_count(), UNDO_CAPACITY);
        let mut undone = 0;
        while session.undo() {
            undone += 1;
        }
        assert_eq!(undone, UNDO_CAPACITY);
    }

    #[test]
    fn empty_session_ignores_edits() {
        let mut session = ImageSession::new();
        assert!(!session.rotate_right());
        assert!(!session.undo());
        assert!(!session.redo());
        assert_eq!(session.resize(10, 10), Ok(false));
        assert!(matches!(session.save(Some(Path::new("x.png"))), Err(IoError::NoImage)));
        assert!(matches!(session.encoded_png(), Err(IoError::NoImage)));
    }

    #[test]
    fn resize_undo_redo_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "photo.png", &gradient(800, 600));
        let mut session = ImageSession::new();
        session.load(&path, true).unwrap();

        assert_eq!(session.resize(400, 300), Ok(true));
        assert_eq!(session.image().unwrap().dimensions(), (400, 300));
        assert!(session.undo());
        assert_eq!(session.image().unwrap().dimensions(), (800, 600));
        assert!(session.redo());
        assert_eq!(session.image().unwrap().dimensions(), (400, 300));
    }

    #[test]
    fn degenerate_resize_changes_nothing() {
        let mut session = ImageSession::from_buffer(gradient(10, 10));
        assert!(session.resize(0, 10).is_err());
        assert_eq!(session.image().unwrap().dimensions(), (10, 10));
        assert!(!session.can_undo());
    }

    #[test]
    fn load_without_reset_keeps_previous_as_undo() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(&dir, "a.png", &gradient(3, 3));
        let b = write_png(&dir, "b.png", &gradient(5, 5));
        let mut session = ImageSession::new();
        session.load(&a, true).unwrap();
        session.load(&b, false).unwrap();
        assert_eq!(session.image().unwrap().dimensions(), (5, 5));
        assert!(session.undo());
        assert_eq!(session.image().unwrap().dimensions(), (3, 3));

        session.load(&a, true).unwrap();
        assert!(!session.can_undo());
        assert!(!session.can_redo());
    }

    #[test]
    fn next_and_previous_respect_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(&dir, "a.png", &gradient(1, 1));
        write_png(&dir, "b.png", &gradient(2, 2));
        write_png(&dir, "c.png", &gradient(3, 3));
        fs::write(dir.path().join("readme.txt"), b"skip").unwrap();

        let mut session = ImageSession::new();
        session.load(&a, true).unwrap();
        assert_eq!(session.siblings().len(), 3);
        assert_eq!(session.sibling_index(), Some(0));

        assert_eq!(session.previous().unwrap(), false);
        assert_eq!(session.current_file(), Some(a.as_path()));

        session.rotate_right();
        assert!(session.next().unwrap());
        assert_eq!(session.sibling_index(), Some(1));
        assert!(!session.can_undo(), "navigation resets history");
        assert!(session.next().unwrap());
        assert_eq!(session.image().unwrap().dimensions(), (3, 3));
        assert_eq!(session.next().unwrap(), false);
        assert_eq!(session.sibling_index(), Some(2));
        assert!(session.previous().unwrap());
        assert_eq!(session.sibling_index(), Some(1));
        assert_eq!(session.title(), "b.png (2/3)");
    }

    #[test]
    fn neighbour_paths_follow_the_folder_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(&dir, "a.png", &gradient(1, 1));
        let b = write_png(&dir, "b.png", &gradient(1, 1));
        let c = write_png(&dir, "c.png", &gradient(1, 1));

        let mut session = ImageSession::new();
        assert_eq!(session.previous_file(), None);
        assert_eq!(session.next_file(), None);

        session.load(&a, true).unwrap();
        assert_eq!(session.previous_file(), None);
        assert_eq!(session.next_file(), Some(b.as_path()));

        session.next().unwrap();
        assert_eq!(session.previous_file(), Some(a.as_path()));
        assert_eq!(session.next_file(), Some(c.as_path()));

        session.next().unwrap();
        assert_eq!(session.previous_file(), Some(b.as_path()));
        assert_eq!(session.next_file(), None);
    }

    #[test]
    fn single_image_folder_does_not_navigate() {
        let dir = tempfile::tempdir().unwrap();
        let only = write_png(&dir, "only.png", &gradient(2, 2));
        let mut session = ImageSession::new();
        session.load(&only, true).unwrap();
        assert_eq!(session.previous_file(), None);
        assert_eq!(session.next_file(), None);
        assert_eq!(session.next().unwrap(), false);
        assert_eq!(session.previous().unwrap(), false);
    }

    #[test]
    fn failed_load_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(&dir, "a.png", &gradient(4, 4));
        write_png(&dir, "b.png", &gradient(4, 4));
        let other = tempfile::tempdir().unwrap();
        let broken = other.path().join("broken.png");
        fs::write(&broken, b"definitely not a png").unwrap();

        let mut session = ImageSession::new();
        session.load(&a, true).unwrap();
        session.rotate_right();
        let before = session.image().unwrap().clone();

        assert!(matches!(session.load(&broken, false), Err(IoError::Decode(_))));
        assert_eq!(session.image().unwrap(), &before);
        assert_eq!(session.current_file(), Some(a.as_path()));
        assert_eq!(session.siblings().len(), 2);
        assert_eq!(session.sibling_index(), Some(0));
        assert_eq!(session.history().undo_count(), 1);
    }

    #[test]
    fn save_picks_format_from_extension_and_adopts_path() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_png(&dir, "src.png", &gradient(6, 6));
        let mut session = ImageSession::new();
        session.load(&src, true).unwrap();
        session.rotate_right();

        let jpg = dir.path().join("copy.jpg");
        assert_eq!(session.save(Some(&jpg)).unwrap(), jpg);
        assert_eq!(io::decode_image(&jpg).unwrap().format(), PixelFormat::Rgb8);
        assert_eq!(session.current_file(), Some(jpg.as_path()));
        assert_eq!(session.siblings().len(), 2);
        assert!(session.can_undo(), "saving keeps history");

        // back to the adopted file
        assert_eq!(session.save(None).unwrap(), jpg);
    }

    #[test]
    fn failed_save_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(&dir, "a.png", &gradient(4, 4));
        write_png(&dir, "b.png", &gradient(4, 4));

        let mut session = ImageSession::new();
        session.load(&a, true).unwrap();
        session.rotate_right();
        session.rotate_right();
        session.undo();
        let siblings = session.siblings().to_vec();

        let unwritable = dir.path().join("missing").join("out.png");
        assert!(matches!(session.save(Some(&unwritable)), Err(IoError::Encode(_))));
        assert!(!unwritable.exists());
        assert_eq!(session.current_file(), Some(a.as_path()));
        assert_eq!(session.siblings(), siblings.as_slice());
        assert_eq!(session.sibling_index(), Some(0));
        assert_eq!(session.history().undo_count(), 1);
        assert_eq!(session.history().redo_count(), 1);
    }

    #[test]
    fn save_without_any_destination() {
        let mut session = ImageSession::from_buffer(gradient(2, 2));
        assert!(matches!(session.save(None), Err(IoError::NoDestination)));
    }

    #[test]
    fn encoded_png_decodes_to_current_image() {
        let session = ImageSession::from_buffer(gradient(9, 4));
        let bytes = session.encoded_png().unwrap();
        let decoded = PixelBuffer::from_dynamic(image::load_from_memory(&bytes).unwrap());
        assert_eq!(&decoded, session.image().unwrap());
    }
}
