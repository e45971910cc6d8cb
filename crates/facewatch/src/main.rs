mod config;
mod display;
mod engine;
mod recorder;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{Config, DEFAULT_CAMERA, DEFAULT_STREAM_URL, FALLBACK_HEIGHT, FALLBACK_WIDTH};
use display::PreviewWindow;
use facewatch_core::{Annotator, FaceDetector, FaceRecognizer, Gallery, GalleryMatcher, Painter};
use facewatch_hw::{FrameSource, SourceLocator};
use recorder::{FfmpegWriter, VideoParams};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "facewatch",
    about = "Live face surveillance against a folder of reference images"
)]
struct Cli {
    /// Directory of reference face images
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    models: Option<PathBuf>,
    /// Cosine similarity required for a match
    #[arg(long, global = true)]
    threshold: Option<f32>,
    /// TrueType font used for labels
    #[arg(long, global = true)]
    font: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the annotated camera feed until `q` is pressed
    Watch {
        /// Camera index, device path or stream URL (default: camera 0)
        #[arg(short, long)]
        source: Option<String>,
    },
    /// Show and record the annotated feed to video_<timestamp>.avi
    Record {
        /// Camera index, device path or stream URL (default: the network camera)
        #[arg(short, long)]
        source: Option<String>,
        /// Recording length in seconds
        #[arg(short, long)]
        duration: Option<u64>,
        /// Directory for the recorded video
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// List the identities enrolled from the reference directory
    Gallery,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(db) = &self.db {
            config.db_dir = db.clone();
        }
        if let Some(models) = &self.models {
            config.model_dir = models.clone();
        }
        if let Some(threshold) = self.threshold {
            config.similarity_threshold = threshold;
        }
        if let Some(font) = &self.font {
            config.font_path = font.clone();
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    cli.apply(&mut config);

    match cli.command {
        Commands::Watch { source } => {
            let locator = source.or(config.source.clone());
            watch(&config, locator.as_deref().unwrap_or(DEFAULT_CAMERA))
        }
        Commands::Record {
            source,
            duration,
            output_dir,
        } => {
            if let Some(secs) = duration {
                config.duration_secs = secs;
            }
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            let locator = source.or(config.source.clone());
            record(&config, locator.as_deref().unwrap_or(DEFAULT_STREAM_URL))
        }
        Commands::Gallery => list_gallery(&config),
    }
}

fn load_models(config: &Config) -> Result<(FaceDetector, FaceRecognizer)> {
    let scrfd_path = config.scrfd_model_path();
    let detector = FaceDetector::load(&scrfd_path)
        .with_context(|| format!("loading detection model {scrfd_path}"))?;
    tracing::info!(path = %scrfd_path, "SCRFD detector loaded");

    let arcface_path = config.arcface_model_path();
    let recognizer = FaceRecognizer::load(&arcface_path)
        .with_context(|| format!("loading recognition model {arcface_path}"))?;
    tracing::info!(path = %arcface_path, "ArcFace recognizer loaded");

    Ok((detector, recognizer))
}

/// Load models and the reference database, ready to annotate frames.
fn build_annotator(config: &Config) -> Result<Annotator<FaceDetector, GalleryMatcher>> {
    let (mut detector, mut recognizer) = load_models(config)?;
    let gallery = Gallery::load(&config.db_dir, &mut detector, &mut recognizer)
        .with_context(|| format!("loading reference images from {}", config.db_dir.display()))?;
    let matcher = GalleryMatcher::new(recognizer, gallery, config.similarity_threshold);
    let painter = Painter::load_or_boxes_only(&config.font_path);
    Ok(Annotator::new(detector, matcher, painter))
}

fn open_source(locator: &str) -> Result<Box<dyn FrameSource>> {
    let parsed = SourceLocator::parse(locator)?;
    let source = parsed
        .open(FALLBACK_WIDTH, FALLBACK_HEIGHT)
        .with_context(|| format!("opening video source {parsed}"))?;
    let props = source.properties();
    tracing::info!(
        source = %parsed,
        fps = ?props.fps,
        width = ?props.width,
        height = ?props.height,
        "video source opened"
    );
    Ok(source)
}

fn watch(config: &Config, locator: &str) -> Result<()> {
    let mut annotator = build_annotator(config)?;
    let mut source = open_source(locator)?;
    let mut window = PreviewWindow::new("facewatch");

    let report = engine::run_watch(source.as_mut(), &mut annotator, &mut window);
    println!(
        "{} frames, {} known, {} intruders",
        report.counts.frames, report.counts.known, report.counts.intruders
    );
    Ok(())
}

fn record(config: &Config, locator: &str) -> Result<()> {
    let mut annotator = build_annotator(config)?;
    let mut source = open_source(locator)?;
    let params = VideoParams::from_properties(source.properties());

    let now = chrono::Local::now().naive_local();
    let path = recorder::output_path(&config.output_dir, &now);
    let mut writer = FfmpegWriter::new();
    let mut window = PreviewWindow::new("facewatch (recording)");

    let report = engine::run_record(
        source.as_mut(),
        &mut annotator,
        &mut window,
        &mut writer,
        &path,
        &params,
        config.duration(),
    )
    .with_context(|| format!("recording to {}", path.display()))?;

    println!(
        "{} ({} frames, {} known, {} intruders)",
        path.display(),
        report.counts.frames,
        report.counts.known,
        report.counts.intruders
    );
    Ok(())
}

fn list_gallery(config: &Config) -> Result<()> {
    let (mut detector, mut recognizer) = load_models(config)?;
    let gallery = Gallery::load(&config.db_dir, &mut detector, &mut recognizer)
        .with_context(|| format!("loading reference images from {}", config.db_dir.display()))?;

    if gallery.is_empty() {
        println!("No reference faces in {}", config.db_dir.display());
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(gallery.entries())?);
    Ok(())
}
