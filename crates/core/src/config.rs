use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub videos: VideoConfig,
    pub workspace: WorkspaceConfig,
    pub frames: FrameConfig,
    pub embeddings: EmbeddingConfig,
    pub segmentation: SegmentationConfig,
    pub classes: ClassConfig,
    pub artifacts: ArtifactConfig,
}

/// Which of the two videos a stage works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Baseline,
    Followup,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Baseline, Side::Followup];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Baseline => "baseline",
            Side::Followup => "followup",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub baseline: Option<String>,
    pub followup: Option<String>,
    pub baseline_label: String,
    pub followup_label: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            baseline: None,
            followup: None,
            baseline_label: "video_01".into(),
            followup_label: "video_02".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Extracted frames land in `{frames_dir}/{video label}`.
    pub frames_dir: String,
    /// Segmentation runs land in `{runs_dir}/{video label}`.
    pub runs_dir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            frames_dir: "dataset/image_extraction".into(),
            runs_dir: "runs/segment".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Frames are scaled to this size at extraction; label coordinates are
    /// scaled back with the same values.
    pub width: u32,
    pub height: u32,
    pub pattern: String,
    /// Frame rate of the rendered prediction video.
    pub fps_out: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            pattern: "frame_*.jpg".into(),
            fps_out: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub batch_size: usize,
    pub input_size: u32,
    /// Cells per side for the built-in grid provider.
    pub grid: u32,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "grid".into(),
            model: "efficientnet-b4".into(),
            batch_size: 4,
            input_size: 380,
            grid: 8,
            base_url: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Program and arguments; `{source}`, `{project}` and `{name}` are expanded.
    pub command: Vec<String>,
    /// Use existing label directories instead of running a command.
    pub labels_baseline: Option<String>,
    pub labels_followup: Option<String>,
    /// Encode the rendered prediction frames into `{run}/{name}.mp4`.
    pub render_video: bool,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            labels_baseline: None,
            labels_followup: None,
            render_video: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassConfig {
    pub names: Vec<String>,
}

impl Default for ClassConfig {
    fn default() -> Self {
        Self {
            names: vec![
                "reinforcement".into(),
                "white_bleeding".into(),
                "red_bleeding".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub dir: String,
    pub checkpoint_every: usize,
    pub report: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: "dataset/result_txt".into(),
            checkpoint_every: 25,
            report: "results/final_report.txt".into(),
        }
    }
}

impl AppConfig {
    pub fn video_label(&self, side: Side) -> &str {
        match side {
            Side::Baseline => &self.videos.baseline_label,
            Side::Followup => &self.videos.followup_label,
        }
    }

    pub fn video_path(&self, side: Side) -> Option<&str> {
        match side {
            Side::Baseline => self.videos.baseline.as_deref(),
            Side::Followup => self.videos.followup.as_deref(),
        }
    }

    pub fn frames_dir(&self, side: Side) -> PathBuf {
        PathBuf::from(&self.workspace.frames_dir).join(self.video_label(side))
    }

    pub fn existing_labels(&self, side: Side) -> Option<PathBuf> {
        match side {
            Side::Baseline => self.segmentation.labels_baseline.as_ref(),
            Side::Followup => self.segmentation.labels_followup.as_ref(),
        }
        .map(PathBuf::from)
    }

    pub fn class_count(&self) -> usize {
        self.classes.names.len()
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(config::Environment::with_prefix("SEGCOMPARE").separator("__"));
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
