use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, ImageError};
use rfd::FileDialog;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::canvas::{PixelBuffer, PixelFormat};

/// Extensions picked up by the sibling scan (compared lowercase).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// JPEG quality used for every save.
const JPEG_QUALITY: u8 = 90;

// ============================================================================
// ERRORS
// ============================================================================

/// Error type for image file operations
#[derive(Debug)]
pub enum IoError {
    /// The file could not be read or is not a decodable image.
    Decode(String),
    /// Encoding or writing the output failed.
    Encode(String),
    /// Save was requested with no explicit path and no current file.
    NoDestination,
    /// Save was requested with nothing loaded.
    NoImage,
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::Decode(e) => write!(f, "Decode error: {}", e),
            IoError::Encode(e) => write!(f, "Encode error: {}", e),
            IoError::NoDestination => write!(f, "No destination: use Save As to pick a file"),
            IoError::NoImage => write!(f, "No image loaded"),
        }
    }
}

impl std::error::Error for IoError {}

// The `From` conversions cover the write path; decode errors are mapped
// explicitly so the path ends up in the message.
impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        IoError::Encode(e.to_string())
    }
}

impl From<ImageError> for IoError {
    fn from(e: ImageError) -> Self {
        IoError::Encode(e.to_string())
    }
}

// ============================================================================
// SAVE FORMAT
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Png,
    Jpeg,
    Bmp,
}

impl SaveFormat {
    /// Format implied by a file extension; anything unrecognised is PNG.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => SaveFormat::Jpeg,
            "bmp" => SaveFormat::Bmp,
            _ => SaveFormat::Png,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or_default()
    }

    /// Strict name lookup for the CLI `--format` flag.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "png" => Some(SaveFormat::Png),
            "jpg" | "jpeg" => Some(SaveFormat::Jpeg),
            "bmp" => Some(SaveFormat::Bmp),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Bmp => "bmp",
        }
    }
}

// ============================================================================
// DECODE / ENCODE
// ============================================================================

/// Decode any raster format the `image` crate understands.
pub fn decode_image(path: &Path) -> Result<PixelBuffer, IoError> {
    let img = image::open(path).map_err(|e| IoError::Decode(format!("{}: {}", path.display(), e)))?;
    Ok(PixelBuffer::from_dynamic(img))
}

/// Decode and shrink so the longer edge is at most `max_edge`.  Images that
/// already fit are returned at full size.
pub fn decode_thumbnail(path: &Path, max_edge: u32) -> Result<PixelBuffer, IoError> {
    let img = image::open(path).map_err(|e| IoError::Decode(format!("{}: {}", path.display(), e)))?;
    let max_edge = max_edge.max(1);
    if img.width() <= max_edge && img.height() <= max_edge {
        return Ok(PixelBuffer::from_dynamic(img));
    }
    Ok(PixelBuffer::from_dynamic(img.thumbnail(max_edge, max_edge)))
}

fn color_type(format: PixelFormat) -> ColorType {
    match format {
        PixelFormat::Rgb8 => ColorType::Rgb8,
        PixelFormat::Rgba8 => ColorType::Rgba8,
    }
}

/// Encode `buf` into any writer.  JPEG has no alpha channel, so RGBA input is
/// flattened to RGB first.
pub fn encode_to<W: Write>(buf: &PixelBuffer, writer: W, format: SaveFormat) -> Result<(), IoError> {
    let (w, h) = buf.dimensions();
    match format {
        SaveFormat::Png => {
            PngEncoder::new(writer).write_image(buf.samples(), w, h, color_type(buf.format()))?;
        }
        SaveFormat::Jpeg => {
            let mut writer = writer;
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
            match buf.format() {
                PixelFormat::Rgb8 => encoder.encode(buf.samples(), w, h, ColorType::Rgb8)?,
                PixelFormat::Rgba8 => {
                    let rgb = buf.to_dynamic().to_rgb8();
                    encoder.encode(rgb.as_raw(), w, h, ColorType::Rgb8)?;
                }
            }
        }
        SaveFormat::Bmp => {
            let mut writer = writer;
            let mut encoder = BmpEncoder::new(&mut writer);
            encoder.encode(buf.samples(), w, h, color_type(buf.format()))?;
        }
    }
    Ok(())
}

/// Create `path` and write `buf` into it.
pub fn encode_and_write(buf: &PixelBuffer, path: &Path, format: SaveFormat) -> Result<(), IoError> {
    if buf.is_empty() {
        return Err(IoError::Encode(format!("{}: image has no pixels", path.display())));
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    encode_to(buf, &mut writer, format)?;
    writer.flush()?;
    Ok(())
}

/// PNG bytes held in memory (image context for the AI assistant).
pub fn encode_png_bytes(buf: &PixelBuffer) -> Result<Vec<u8>, IoError> {
    let mut out = Vec::new();
    encode_to(buf, &mut out, SaveFormat::Png)?;
    Ok(out)
}

// ============================================================================
// SIBLING SCAN
// ============================================================================

pub fn is_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files next to `path`, sorted, plus the index of `path` itself.
///
/// An unreadable directory yields an empty list and no index.  Entries are
/// built by joining onto `path`'s own parent so they compare equal to paths
/// the caller passes in.
pub fn scan_siblings(path: &Path) -> (Vec<PathBuf>, Option<usize>) {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let read_from = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };

    let entries = match fs::read_dir(read_from) {
        Ok(entries) => entries,
        Err(_) => return (Vec::new(), None),
    };

    let mut siblings: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| parent.join(e.file_name()))
        .filter(|p| is_supported_extension(p))
        .collect();
    siblings.sort();

    let index = path
        .file_name()
        .and_then(|name| siblings.iter().position(|p| p.file_name() == Some(name)));
    (siblings, index)
}

// ============================================================================
// NATIVE DIALOGS
// ============================================================================

pub fn pick_open_path() -> Option<PathBuf> {
    FileDialog::new()
        .add_filter("Images", SUPPORTED_EXTENSIONS)
        .add_filter("All Files", &["*"])
        .pick_file()
}

pub fn pick_save_path(current: Option<&Path>) -> Option<PathBuf> {
    let mut dialog = FileDialog::new()
        .add_filter("PNG", &["png"])
        .add_filter("JPEG", &["jpg", "jpeg"])
        .add_filter("BMP", &["bmp"]);
    if let Some(current) = current {
        if let Some(dir) = current.parent() {
            dialog = dialog.set_directory(dir);
        }
        if let Some(name) = current.file_name().and_then(|n| n.to_str()) {
            dialog = dialog.set_file_name(name);
        }
    }
    dialog.save_file()
}
