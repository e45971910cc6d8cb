use facewatch_core::DEFAULT_SIMILARITY_THRESHOLD;
use std::path::PathBuf;
use std::time::Duration;

/// Camera index used by `watch` when no source is given.
pub const DEFAULT_CAMERA: &str = "0";
/// Network stream used by `record` when no source is given.
pub const DEFAULT_STREAM_URL: &str = "http://192.168.2.200:81/stream";
pub const DEFAULT_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

/// Frame rate and size used when the source does not report them.
pub const FALLBACK_FPS: f64 = 5.0;
pub const FALLBACK_WIDTH: u32 = 640;
pub const FALLBACK_HEIGHT: u32 = 480;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Camera index, device path or stream URL. `None` picks the command default.
    pub source: Option<String>,
    /// Directory of reference face images.
    pub db_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// TrueType font for labels.
    pub font_path: PathBuf,
    /// Directory for recorded videos.
    pub output_dir: PathBuf,
    /// Recording length in seconds.
    pub duration_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: None,
            db_dir: PathBuf::from("db"),
            model_dir: PathBuf::from("models"),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            font_path: PathBuf::from(DEFAULT_FONT),
            output_dir: PathBuf::from("."),
            duration_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from `FACEWATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or unparsable values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            source: lookup("FACEWATCH_SOURCE").filter(|s| !s.trim().is_empty()),
            db_dir: lookup("FACEWATCH_DB_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_dir),
            model_dir: lookup("FACEWATCH_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            similarity_threshold: parsed(
                &lookup,
                "FACEWATCH_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            ),
            font_path: lookup("FACEWATCH_FONT")
                .map(PathBuf::from)
                .unwrap_or(defaults.font_path),
            output_dir: lookup("FACEWATCH_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            duration_secs: parsed(&lookup, "FACEWATCH_DURATION_SECS", defaults.duration_secs),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
