//! retouch: replay a scripted masking session through the edit pipeline.
//!
//! Loads a photo, replays recorded editor gestures to build the zone
//! masks, then runs the full pipeline against recorded generation
//! responses. Useful for:
//!
//! - Reproducing a user session without a UI
//! - Checking failure isolation with hand-made failing responses
//! - Inspecting the exact masks and requests a run produces
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin retouch -- [OPTIONS] --script <SCRIPT> --responses <DIR> -o <OUT> <PHOTO>
//! ```
//!
//! Press Ctrl-C to abandon a run; nothing is written in that case.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod replay;
mod script;

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use image::{DynamicImage, ImageFormat};
use retouch_pipeline::composite::binarize;
use retouch_pipeline::types::RgbaImage;
use retouch_pipeline::{
    EditSession, GenerationStrategy, Photo, PipelineConfig, RunDiagnostics, RunReport,
    SessionError, ZoneOrdering,
};
use serde::Serialize;

use crate::replay::ReplayGateway;
use crate::script::Script;

/// Replay a scripted masking session through the retouch pipeline.
///
/// Builds zone masks from the script's gestures, then edits the photo
/// zone by zone using recorded responses and writes the final image.
#[derive(Parser)]
#[command(name = "retouch", version)]
struct Cli {
    /// Path to the input photo (PNG, JPEG, BMP, WebP).
    photo: PathBuf,

    /// Session script (JSON): viewport, instructions, and gestures.
    #[arg(long)]
    script: PathBuf,

    /// Directory of recorded responses (`001.png`, `002.json`, ...).
    #[arg(long)]
    responses: PathBuf,

    /// Where to write the final image. The format follows the extension.
    #[arg(short, long)]
    output: PathBuf,

    /// Write each zone mask and the composite mask as PNG here.
    #[arg(long)]
    masks_dir: Option<PathBuf>,

    /// Record every outgoing request as JSON here.
    #[arg(long)]
    requests_dir: Option<PathBuf>,

    /// Write the session snapshot (JSON) here after the run.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Refinement instruction applied after the run; repeatable.
    #[arg(long = "refine")]
    refinements: Vec<String>,

    /// Print the report and diagnostics as JSON.
    #[arg(long)]
    json: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Attempts per zone before it is left unmodified.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MAX_ATTEMPTS, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    max_attempts: u32,

    /// Per-call timeout in seconds.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CALL_TIMEOUT.as_secs_f64())]
    timeout_secs: f64,

    /// Zone processing order.
    #[arg(long, value_enum, default_value_t = Order::Length)]
    ordering: Order,

    /// Whether zone masks are sent with zone edits.
    #[arg(long, value_enum, default_value_t = Strategy::MaskGuided)]
    strategy: Strategy,
}

/// Zone ordering selection.
#[derive(Clone, Copy, ValueEnum)]
enum Order {
    /// Shortest instruction first.
    Length,
    /// Smallest painted area first.
    Area,
}

/// Generation strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    /// Send the zone mask with each zone edit.
    MaskGuided,
    /// Send the instruction only.
    TextOnly,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let call_timeout = Duration::try_from_secs_f64(cli.timeout_secs)
        .map_err(|e| format!("Invalid --timeout-secs {}: {e}", cli.timeout_secs))?;
    Ok(PipelineConfig {
        max_attempts: cli.max_attempts,
        call_timeout,
        ordering: match cli.ordering {
            Order::Length => ZoneOrdering::InstructionLength,
            Order::Area => ZoneOrdering::MaskArea,
        },
        strategy: match cli.strategy {
            Strategy::MaskGuided => GenerationStrategy::MaskGuided,
            Strategy::TextOnly => GenerationStrategy::TextOnly,
        },
        ..PipelineConfig::default()
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), String> {
    let config = config_from_cli(cli)?;
    let jpeg_quality = config.jpeg_quality;

    let photo_bytes = read(&cli.photo).await?;
    let photo = Photo::decode(&photo_bytes, config.display_max_dimension)
        .map_err(|e| format!("Error decoding {}: {e}", cli.photo.display()))?;
    let script: Script = serde_json::from_slice(&read(&cli.script).await?)
        .map_err(|e| format!("Error parsing {}: {e}", cli.script.display()))?;

    eprintln!(
        "Photo: {} ({}, {} bytes)",
        cli.photo.display(),
        photo.dimensions(),
        photo_bytes.len(),
    );

    let mut session = EditSession::new(config).map_err(|e| e.to_string())?;
    session.load_photo(photo, script.viewport);
    let editor = session.editor_mut().map_err(|e| e.to_string())?;
    script.apply(editor);

    if let Some(ref dir) = cli.masks_dir {
        write_masks(&session, dir).await?;
    }

    // Ctrl-C abandons whatever call is in flight.
    let handle = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupted");
            handle.cancel();
        }
    });

    let gateway = ReplayGateway::new(cli.responses.clone(), cli.requests_dir.clone(), jpeg_quality);
    let report = session
        .submit(&gateway)
        .await
        .map_err(|e| format!("Pipeline error: {e}"))?;
    eprintln!("{}", report.status_line());

    for instruction in &cli.refinements {
        match session.refine(&gateway, instruction).await {
            Ok(_) => eprintln!("Refinement \"{instruction}\" applied"),
            Err(SessionError::RefinementFailed(reason)) => {
                eprintln!("Refinement \"{instruction}\" rolled back: {reason}");
            }
            Err(e) => return Err(format!("Refinement error: {e}")),
        }
    }
    // Includes the refinement log, rolled back entries too.
    let report = session.report().unwrap_or(report);

    write_image(&report.image, &cli.output).await?;
    eprintln!("Image written to {}", cli.output.display());

    if let Some(ref path) = cli.snapshot {
        let json = serde_json::to_vec_pretty(&session.snapshot())
            .map_err(|e| format!("Error serializing snapshot: {e}"))?;
        write(path, json).await?;
    }

    if cli.json {
        let out = Output {
            report: &report,
            diagnostics: session.diagnostics(),
        };
        let text = serde_json::to_string_pretty(&out)
            .map_err(|e| format!("Error serializing report: {e}"))?;
        println!("{text}");
    } else {
        println!("{}", session.diagnostics().report());
        println!();
        println!("{}", report.status_line());
        if !report.summary.is_empty() {
            println!("{}", report.summary);
        }
    }

    Ok(())
}

/// Everything `--json` prints.
#[derive(Serialize)]
struct Output<'a> {
    report: &'a RunReport,
    diagnostics: &'a RunDiagnostics,
}

/// Write every zone mask as `<color>.png` plus `composite.png`, pure
/// black and white.
async fn write_masks(session: &EditSession, dir: &Path) -> Result<(), String> {
    let Some(editor) = session.editor() else {
        return Ok(());
    };
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| format!("Error creating {}: {e}", dir.display()))?;
    let threshold = session.config().mask_threshold;
    let masks = editor
        .masks()
        .map(|(color, mask)| (color.name().to_string(), binarize(mask, threshold)))
        .chain(std::iter::once((
            "composite".to_string(),
            editor.composite_mask().clone(),
        )));
    for (name, mask) in masks {
        let png = mask
            .to_png()
            .map_err(|e| format!("Error encoding {name} mask: {e}"))?;
        write(&dir.join(format!("{name}.png")), png).await?;
    }
    Ok(())
}

async fn write_image(image: &RgbaImage, path: &Path) -> Result<(), String> {
    let format = ImageFormat::from_path(path)
        .map_err(|e| format!("Unsupported output format {}: {e}", path.display()))?;
    let image = DynamicImage::ImageRgba8(image.clone());
    // JPEG has no alpha channel.
    let image = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(image.to_rgb8())
    } else {
        image
    };
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .map_err(|e| format!("Error encoding {}: {e}", path.display()))?;
    write(path, bytes).await
}

async fn read(path: &Path) -> Result<Vec<u8>, String> {
    tokio::fs::read(path)
        .await
        .map_err(|e| format!("Error reading {}: {e}", path.display()))
}

async fn write(path: &Path, bytes: Vec<u8>) -> Result<(), String> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| format!("Error writing {}: {e}", path.display()))
}
