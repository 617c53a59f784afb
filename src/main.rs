use clap::Parser;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::Level;
use scene_sheet::{
    process_video, CliOverrides, ConfigLoader, FramesPerScene, LayoutMode, YtDlp,
};

/// Scene contact sheets - detect the scenes of a video and lay out their key frames on one image
#[derive(Parser, Debug)]
#[command(name = "scene-sheet")]
#[command(about = "Detect scenes in a video and compose a contact sheet of their key frames", long_about = None)]
struct Args {
    /// Local video file or URL
    input: String,

    /// Content threshold for cut detection, lower cuts more often (default 30)
    /// Also settable via SCENE_SHEET_THRESHOLD or the config file
    threshold: Option<f64>,

    /// Config file (.ini)
    /// Priority: command line > environment > config file > defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Minimum scene length in frames
    #[arg(long)]
    min_scene_len: Option<u64>,

    /// Frames extracted per scene: 1 or 3
    #[arg(long)]
    frames_per_scene: Option<FramesPerScene>,

    /// Sheet layout: rows or grid
    #[arg(long)]
    layout: Option<LayoutMode>,

    /// Columns in grid layout
    #[arg(long)]
    columns: Option<u32>,

    /// Thumbnail width in pixels
    #[arg(long)]
    thumb_width: Option<u32>,

    /// Directory for the sheet (default: current directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// TrueType font for labels
    #[arg(long)]
    font: Option<PathBuf>,

    /// Also write a JSON sidecar describing the sheet
    #[arg(long)]
    metadata: bool,

    /// Log level: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            threshold: self.threshold,
            min_scene_len: self.min_scene_len,
            frames_per_scene: self.frames_per_scene,
            layout: self.layout,
            columns: self.columns,
            thumb_width: self.thumb_width,
            output_dir: self.output_dir.clone(),
            font_path: self.font.clone(),
            // a bare flag can only switch the sidecar on
            write_metadata: self.metadata.then_some(true),
            log_level: self.log_level.clone(),
        }
    }
}

fn init_logging(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::load_config(args.config.as_deref(), &args.overrides())
        .context("failed to load configuration")?;

    init_logging(&config.log_level);

    let process = &config.process;
    println!(
        "Using config: threshold={:.1}, min_scene_len={} frames, frames_per_scene={}, layout={}",
        process.threshold, process.min_scene_len, process.frames_per_scene, process.layout.mode
    );

    let downloader = YtDlp::new(process.downloader.clone());
    let output = process_video(&args.input, process, &downloader).context("failed to process video")?;

    match &output.sheet_path {
        Some(sheet) => println!(
            "Contact sheet: {} ({} of {} scenes)",
            sheet.display(),
            output.scene_count,
            output.detected_scenes
        ),
        None => println!("No contact sheet written: no frames could be extracted"),
    }
    if let Some(metadata) = &output.metadata_path {
        println!("Metadata: {}", metadata.display());
    }

    Ok(())
}
