use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;

use glyphcast::compositor::FrameCompositor;
use glyphcast::config::{load_config, ConverterConfig};
use glyphcast::decoding::probe_video;
use glyphcast::display::HeadlessDisplay;
use glyphcast::errors::{envelope_for, error_kind};
use glyphcast::glyph::{resolve_font_path, FontRasterizer};
use glyphcast::palette::expected_entries;
use glyphcast::pipeline::{PipelineDriver, RunSummary, StopReason};
use glyphcast::quantize::{ColorLevels, GlyphRamp, Quantizer};
use glyphcast::source::{
    is_still_image_path, open_source, FrameSource, ImageSource, SourceKind, SourceMode,
};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GLYPHCAST_GIT_HASH"), ")");

#[derive(Debug, Parser)]
#[command(name = "glyphcast", version = VERSION)]
#[command(about = "Live colored ASCII-art rendering of still images and video")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Print results and failures as JSON.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render a still image.
    Image(RenderArgs),
    /// Render a video file, decoded with ffmpeg.
    Video(RenderArgs),
    /// Render a file, choosing image or video mode from its extension.
    Play(RenderArgs),
    /// Open a source and report what rendering it would cost, without a font or window.
    Probe(ProbeArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// YAML file with converter settings; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    font_size: Option<u32>,
    #[arg(long)]
    color_levels: Option<u32>,
    /// Target frame rate for video sources.
    #[arg(long)]
    fps: Option<u32>,
    /// TrueType/OpenType font; defaults to the first monospace bold system font found.
    #[arg(long)]
    font: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RenderArgs {
    path: PathBuf,
    #[command(flatten)]
    config: ConfigArgs,
    /// Render without a window, as fast as frames decode.
    #[arg(long)]
    headless: bool,
    /// Stop after presenting this many frames. Still images default to one.
    #[arg(long, requires = "headless")]
    max_frames: Option<u64>,
    /// Write the last presented frame to this image file.
    #[arg(long, requires = "headless")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ProbeArgs {
    path: PathBuf,
    #[command(flatten)]
    config: ConfigArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = match cli.command {
        Commands::Image(args) => run_render(args, SourceMode::Image, cli.json),
        Commands::Video(args) => run_render(args, SourceMode::Video, cli.json),
        Commands::Play(args) => run_render(args, SourceMode::Auto, cli.json),
        Commands::Probe(args) => run_probe(args, cli.json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if cli.json {
                match serde_json::to_string(&envelope_for(&error)) {
                    Ok(envelope) => eprintln!("{envelope}"),
                    Err(_) => eprintln!("error: {error:#}"),
                }
            } else {
                eprintln!("error: {error:#}");
            }
            let status = error_kind(&error).map_or(1, |kind| kind.exit_code());
            ExitCode::from(status as u8)
        }
    }
}

fn resolve_config(args: &ConfigArgs) -> Result<ConverterConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ConverterConfig::default(),
    };
    if let Some(font_size) = args.font_size {
        config.font_size = font_size;
    }
    if let Some(color_levels) = args.color_levels {
        config.color_levels = color_levels;
    }
    if let Some(fps) = args.fps {
        config.target_fps = fps;
    }
    if let Some(font) = &args.font {
        config.font_path = Some(font.clone());
    }
    config.validate()?;
    Ok(config)
}

fn run_render(args: RenderArgs, mode: SourceMode, json_output: bool) -> Result<()> {
    let config = resolve_config(&args.config)?;
    let mut driver = PipelineDriver::<Box<dyn FrameSource>>::new(&config)?;
    driver.set_paced(!args.headless);
    driver.open(
        || open_source(&args.path, mode),
        |config| {
            let font_path = resolve_font_path(config.font_path.as_deref())?;
            FontRasterizer::from_path(&font_path)
        },
    )?;

    let summary = if args.headless {
        let quit_after = args.max_frames.or(match driver.source_kind() {
            Some(SourceKind::Still) => Some(1),
            _ => None,
        });
        let mut display = HeadlessDisplay::new(quit_after);
        let summary = driver.run(&mut display)?;
        if let Some(output) = &args.output {
            display.save_last_frame(output)?;
        }
        summary
    } else {
        let (width, height) = driver
            .dimensions()
            .ok_or_else(|| anyhow!("pipeline opened without a source"))?;
        run_windowed(&mut driver, &args.path, width, height)?
    };

    report_summary(&args.path, &summary, json_output);
    Ok(())
}

#[cfg(feature = "window")]
fn run_windowed(
    driver: &mut PipelineDriver<Box<dyn FrameSource>>,
    path: &Path,
    width: u32,
    height: u32,
) -> Result<RunSummary> {
    let title = format!("glyphcast - {}", path.display());
    let mut display = glyphcast::window::WindowDisplay::new(&title, width, height)?;
    driver.run(&mut display)
}

#[cfg(not(feature = "window"))]
fn run_windowed(
    _driver: &mut PipelineDriver<Box<dyn FrameSource>>,
    _path: &Path,
    _width: u32,
    _height: u32,
) -> Result<RunSummary> {
    Err(glyphcast::errors::CodedError::configuration(
        "this build has no window support; pass --headless",
    )
    .into())
}

fn report_summary(path: &Path, summary: &RunSummary, json_output: bool) {
    let end = match summary.end {
        StopReason::EndOfStream => "end_of_stream",
        StopReason::QuitRequested => "quit_requested",
    };
    if json_output {
        println!(
            "{}",
            json!({
                "ok": true,
                "path": path.display().to_string(),
                "frames_composited": summary.frames_composited,
                "frames_presented": summary.frames_presented,
                "end": end,
            })
        );
    } else {
        println!(
            "Rendered {}: {} frame(s) composited, {} presented ({})",
            path.display(),
            summary.frames_composited,
            summary.frames_presented,
            end
        );
    }
}

fn run_probe(args: ProbeArgs, json_output: bool) -> Result<()> {
    let config = resolve_config(&args.config)?;
    let (kind, (width, height), fps) = if is_still_image_path(&args.path) {
        let source = ImageSource::open(&args.path)?;
        (source.kind(), source.dimensions(), None)
    } else {
        let probe = probe_video(&args.path)?;
        (SourceKind::Stream, (probe.width, probe.height), probe.fps)
    };

    let ramp = GlyphRamp::default();
    let levels = ColorLevels::new(config.color_levels)?;
    let palette_entries = expected_entries(&ramp, &levels);
    let compositor = FrameCompositor::new(
        ramp.clone(),
        Quantizer::new(&ramp, levels),
        config.char_step(),
        config.background,
    );
    let (columns, rows) = compositor.grid_size(width, height);

    if json_output {
        println!(
            "{}",
            json!({
                "ok": true,
                "path": args.path.display().to_string(),
                "kind": kind.as_str(),
                "width": width,
                "height": height,
                "fps": fps,
                "char_step": compositor.char_step(),
                "grid": [columns, rows],
                "palette_entries": palette_entries,
                "rasterizer_calls": palette_entries,
            })
        );
        return Ok(());
    }

    println!(
        "OK: {} ({}x{}, {})",
        args.path.display(),
        width,
        height,
        kind.as_str()
    );
    if let Some(fps) = fps {
        println!("Source fps: {fps:.3}");
    }
    println!(
        "Grid: {}x{} cells, step {}px",
        columns,
        rows,
        compositor.char_step()
    );
    println!(
        "Palette: {} glyphs x {} levels^3 = {} bitmaps ({} rasterizer calls)",
        ramp.len(),
        config.color_levels,
        palette_entries,
        palette_entries
    );
    Ok(())
}
