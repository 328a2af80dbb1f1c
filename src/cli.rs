// ============================================================================
// PhotoFE CLI - headless batch editing via command-line arguments
// ============================================================================
//
// Usage examples:
//   photofe --input photo.png --resize 400x300 --output small.png
//   photofe -i scan.jpg --crop 10,10,640,480 --rotate 1 -o scan_fixed.jpg
//   photofe -i "shots/*.jpg" --resize 1280x720 --output-dir out/ --format png
//
// No window is opened in CLI mode.  Each file is loaded into its own
// `ImageSession` and edited through the same operations the GUI uses.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::io::SaveFormat;
use crate::logger;
use crate::session::ImageSession;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// PhotoFE headless image editor.
#[derive(Parser, Debug)]
#[command(
    name = "photofe",
    about = "PhotoFE headless batch image editor",
    long_about = "Crop, resize and rotate image files without opening the GUI.\n\
                  Edits run in the order crop, resize, rotate.\n\n\
                  Example:\n  \
                  photofe --input photo.png --resize 400x300 --output small.png\n  \
                  photofe -i *.jpg --rotate 1 --output-dir out/ --format png"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Resize to WIDTHxHEIGHT (bicubic).
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    pub resize: Option<(u32, u32)>,

    /// Crop to X,Y,WIDTH,HEIGHT. The rectangle is clamped to the image.
    #[arg(long, value_name = "X,Y,W,H", value_parser = parse_crop)]
    pub crop: Option<[i64; 4]>,

    /// Rotate N quarter turns clockwise.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub rotate: u32,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    /// Files keep their stem and get the target format's extension.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, jpeg, bmp.
    /// When omitted the format is inferred from --output, defaulting to png.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Echo the session log to stderr and print per-file timing.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Returns `true` when any CLI-mode flag is present in the real process arguments.
    /// Used by `main()` to route before creating an eframe window.
    pub fn is_cli_mode() -> bool {
        std::env::args().any(|a| a == "--input" || a == "-i" || a.starts_with("--input="))
    }
}

/// Edits applied to every input, in order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EditPlan {
    pub crop: Option<[i64; 4]>,
    pub resize: Option<(u32, u32)>,
    pub quarter_turns: u32,
}

impl EditPlan {
    pub fn from_args(args: &CliArgs) -> Self {
        Self {
            crop: args.crop,
            resize: args.resize,
            quarter_turns: args.rotate % 4,
        }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    logger::set_echo(args.verbose);

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let save_format = match parse_format(args.format.as_deref(), args.output.as_deref()) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let plan = EditPlan::from_args(&args);
    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }

        let file_start = Instant::now();

        let Some(output_path) = build_output_path(
            input_path,
            args.output.as_deref(),
            args.output_dir.as_deref(),
            save_format,
        ) else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        match run_one(input_path, &output_path, &plan) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  -> {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(input: &Path, output: &Path, plan: &EditPlan) -> Result<(), String> {
    let mut session = ImageSession::new();
    session
        .load(input, true)
        .map_err(|e| format!("load failed: {}", e))?;

    if let Some([x, y, w, h]) = plan.crop {
        session.crop(x, y, w, h);
    }

    if let Some((w, h)) = plan.resize {
        session
            .resize(w, h)
            .map_err(|e| format!("resize failed: {}", e))?;
    }

    for _ in 0..plan.quarter_turns {
        session.rotate_right();
    }

    session
        .save(Some(output))
        .map_err(|e| format!("save failed: {}", e))?;
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// `--resize` value: `800x600` (an `X` or `*` separator is accepted too).
fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X', '*'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let w: u32 = w.trim().parse().map_err(|_| format!("bad width '{}'", w))?;
    let h: u32 = h.trim().parse().map_err(|_| format!("bad height '{}'", h))?;
    if w == 0 || h == 0 {
        return Err("width and height must be at least 1".to_string());
    }
    Ok((w, h))
}

/// `--crop` value: `X,Y,W,H`.
fn parse_crop(s: &str) -> Result<[i64; 4], String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 4 {
        return Err(format!("expected X,Y,W,H, got '{}'", s));
    }
    let mut out = [0i64; 4];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|_| format!("bad crop component '{}'", part))?;
    }
    Ok(out)
}

/// Choose the [`SaveFormat`] from `--format` or infer it from the output
/// extension.  An explicit `--format` that contradicts `--output` is an error,
/// since the session always encodes by extension.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> Result<SaveFormat, String> {
    let from_output = output.map(SaveFormat::from_path);
    match format_arg {
        Some(name) => {
            let format = SaveFormat::from_name(name)
                .ok_or_else(|| format!("unknown format '{}' (expected png, jpeg or bmp)", name))?;
            match from_output {
                Some(out) if out != format => Err(format!(
                    "--format {} does not match the --output extension",
                    name
                )),
                _ => Ok(format),
            }
        }
        None => Ok(from_output.unwrap_or_default()),
    }
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem)
/// 3. Fallback: same directory as input, same stem, new extension
///    (appends `_out` to stem if it would collide with the input path)
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    format: SaveFormat,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let ext = format.extension();
    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.{}", stem, ext)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    let candidate = parent.join(format!("{}.{}", stem, ext));

    if candidate == input {
        Some(parent.join(format!("{}_out.{}", stem, ext)))
    } else {
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn size_and_crop_arguments() {
        assert_eq!(parse_size("800x600"), Ok((800, 600)));
        assert_eq!(parse_size("32X16"), Ok((32, 16)));
        assert!(parse_size("800").is_err());
        assert!(parse_size("0x10").is_err());
        assert_eq!(parse_crop("10, 20,30,40"), Ok([10, 20, 30, 40]));
        assert_eq!(parse_crop("-5,0,10,10"), Ok([-5, 0, 10, 10]));
        assert!(parse_crop("1,2,3").is_err());
        assert!(parse_crop("a,2,3,4").is_err());
    }

    #[test]
    fn format_follows_flag_or_output_extension() {
        assert_eq!(parse_format(None, None), Ok(SaveFormat::Png));
        assert_eq!(parse_format(None, Some(Path::new("a.JPG"))), Ok(SaveFormat::Jpeg));
        assert_eq!(parse_format(Some("bmp"), None), Ok(SaveFormat::Bmp));
        assert!(parse_format(Some("tiff"), None).is_err());
        assert!(parse_format(Some("png"), Some(Path::new("a.jpg"))).is_err());
    }

    #[test]
    fn output_paths() {
        let input = Path::new("shots/cat.png");
        assert_eq!(
            build_output_path(input, Some(Path::new("x.bmp")), None, SaveFormat::Bmp),
            Some(PathBuf::from("x.bmp"))
        );
        assert_eq!(
            build_output_path(input, None, Some(Path::new("out")), SaveFormat::Jpeg),
            Some(PathBuf::from("out/cat.jpg"))
        );
        assert_eq!(
            build_output_path(input, None, None, SaveFormat::Png),
            Some(PathBuf::from("shots/cat_out.png"))
        );
        assert_eq!(
            build_output_path(input, None, None, SaveFormat::Bmp),
            Some(PathBuf::from("shots/cat.bmp"))
        );
    }

    #[test]
    fn clap_parses_a_full_command_line() {
        let args = CliArgs::try_parse_from([
            "photofe", "-i", "a.png", "--resize", "40x30", "--crop", "0,0,10,10", "--rotate", "5",
            "--format", "bmp", "-v",
        ])
        .unwrap();
        let plan = EditPlan::from_args(&args);
        assert_eq!(plan.resize, Some((40, 30)));
        assert_eq!(plan.crop, Some([0, 0, 10, 10]));
        assert_eq!(plan.quarter_turns, 1);
        assert!(args.verbose);
        assert!(CliArgs::try_parse_from(["photofe", "-i", "a.png", "--resize", "big"]).is_err());
    }

    #[test]
    fn pipeline_crops_resizes_and_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        RgbaImage::from_pixel(80, 60, Rgba([10, 20, 30, 255])).save(&input).unwrap();
        let output = dir.path().join("out.png");

        let plan = EditPlan {
            crop: Some([0, 0, 40, 60]),
            resize: Some((20, 30)),
            quarter_turns: 1,
        };
        run_one(&input, &output, &plan).unwrap();

        let written = image::open(&output).unwrap();
        assert_eq!((written.width(), written.height()), (30, 20));
    }

    #[test]
    fn pipeline_reports_unreadable_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.png");
        std::fs::write(&input, b"not a png").unwrap();
        let err = run_one(&input, &dir.path().join("o.png"), &EditPlan::default()).unwrap_err();
        assert!(err.starts_with("load failed"));
    }
}
