use crate::areas::{AreaAggregator, RunAreaReport, StoreCheckpoint, AREA_REPORT_KIND};
use crate::config::{AppConfig, Side};
use crate::features::{FeatureIndex, IndexOptions};
use crate::frames::{FrameList, FRAME_PREFIX, LABEL_EXT};
use crate::matcher::{self, FramePairing};
use crate::media::{
    self, CommandSegmenter, ExistingLabels, FfmpegExtractor, FrameExtractor,
    SegmentationInferencer,
};
use crate::report;
use anyhow::{bail, Context};
use providers::grid::GridPoolProvider;
use providers::remote::{RemoteConfig, RemoteProvider};
use providers::{EmbeddingProvider, ProviderRegistry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::ArtifactStore;
use tracing::{info, warn};

pub const FRAME_LIST_KIND: &str = "frame_list";
pub const LABEL_RUN_KIND: &str = "label_run";
pub const PAIRING_KIND: &str = "frame_pairing";
pub const PAIRING_ARTIFACT: &str = "pairing.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    Extract,
    Segment,
    Match,
    Measure,
    Report,
    All,
}

impl PipelineMode {
    fn includes(self, stage: PipelineMode) -> bool {
        self == stage || self == PipelineMode::All
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSummary {
    pub frames_baseline: usize,
    pub frames_followup: usize,
    pub labeled_baseline: usize,
    pub pairs: usize,
    pub measured_baseline: usize,
    pub measured_followup: usize,
    pub report_lines: Vec<String>,
}

/// Output of the segmentation stage for one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRun {
    pub side: Side,
    pub labels_dir: PathBuf,
    /// Frames that have a label file, in canonical order.
    pub labeled: FrameList,
}

pub fn frames_artifact(side: Side) -> String {
    format!("frames_{}.json", side.as_str())
}

pub fn labels_artifact(side: Side) -> String {
    format!("labels_{}.json", side.as_str())
}

pub fn areas_artifact(side: Side) -> String {
    format!("areas_{}.json", side.as_str())
}

pub async fn run_with_mode(config: AppConfig, mode: PipelineMode) -> anyhow::Result<()> {
    let _ = run_with_mode_summary(config, mode).await?;
    Ok(())
}

pub async fn run_with_mode_summary(
    config: AppConfig,
    mode: PipelineMode,
) -> anyhow::Result<PipelineSummary> {
    let store = ArtifactStore::open(&config.artifacts.dir).context("open artifact store")?;
    let mut summary = PipelineSummary::default();

    if mode.includes(PipelineMode::Extract) {
        info!("Starting extract stage...");
        let extractor = FfmpegExtractor::new(config.frames.width, config.frames.height);
        summary.frames_baseline = extract(&config, &store, &extractor, Side::Baseline).await?.len();
        summary.frames_followup = extract(&config, &store, &extractor, Side::Followup).await?.len();
        info!("Extract complete.");
    }

    if mode.includes(PipelineMode::Segment) {
        info!("Starting segment stage...");
        for side in Side::BOTH {
            let segmenter = build_segmenter(&config, side);
            let run = segment(&config, &store, segmenter.as_ref(), side).await?;
            if side == Side::Baseline {
                summary.labeled_baseline = run.labeled.len();
            }
        }
        info!("Segment complete.");
    }

    if mode.includes(PipelineMode::Match) {
        info!("Starting match stage...");
        let registry = build_registry(&config);
        let provider = registry
            .embedding(None)
            .context("select embedding provider")?;
        summary.pairs = match_stage(&config, &store, provider.as_ref()).await?.len();
        info!("Match complete.");
    }

    if mode.includes(PipelineMode::Measure) {
        info!("Starting measure stage...");
        let (baseline, followup) = measure(&config, &store)?;
        summary.measured_baseline = baseline.len();
        summary.measured_followup = followup.len();
        info!("Measure complete.");
    }

    if mode.includes(PipelineMode::Report) {
        info!("Starting report stage...");
        summary.report_lines = report_stage(&config, &store)?;
        summary.pairs = summary.report_lines.len();
        info!("Report complete.");
    }

    Ok(summary)
}

/// Decodes one video into `{frames_dir}/{label}` and records its frame list.
pub async fn extract(
    config: &AppConfig,
    store: &ArtifactStore,
    extractor: &dyn FrameExtractor,
    side: Side,
) -> anyhow::Result<FrameList> {
    let Some(video) = config.video_path(side) else {
        bail!("no {} video configured (videos.{})", side.as_str(), side.as_str());
    };
    let out = config.frames_dir(side);
    let frames = extractor
        .extract(Path::new(video), &out)
        .await
        .with_context(|| format!("extract frames from {video}"))?;
    store.write(FRAME_LIST_KIND, &frames_artifact(side), &frames)?;
    Ok(frames)
}

/// Runs segmentation over one video's frames and records which frames got
/// labels. The baseline's labeled frames are the query set for matching.
pub async fn segment(
    config: &AppConfig,
    store: &ArtifactStore,
    segmenter: &dyn SegmentationInferencer,
    side: Side,
) -> anyhow::Result<LabelRun> {
    let label = config.video_label(side);
    let images = config.frames_dir(side);
    let labels_dir = segmenter
        .infer(&images, label)
        .await
        .with_context(|| format!("segment {}", images.display()))?;

    let labeled = if labels_dir.is_dir() {
        FrameList::scan_dir(&labels_dir, &format!("{FRAME_PREFIX}*.{LABEL_EXT}"))?
    } else {
        warn!(dir = %labels_dir.display(), "label directory missing, no frames labeled");
        FrameList::default()
    };
    info!(run = label, labeled = labeled.len(), "labels collected");

    if config.segmentation.render_video {
        if let Some(run_dir) = labels_dir.parent() {
            let rendered = FrameList::scan_dir(run_dir, &config.frames.pattern)?;
            let out = run_dir.join(format!("{label}.mp4"));
            media::compose_video(run_dir, &rendered, config.frames.fps_out, &out).await?;
        }
    }

    let run = LabelRun {
        side,
        labels_dir,
        labeled,
    };
    store.write(LABEL_RUN_KIND, &labels_artifact(side), &run)?;
    Ok(run)
}

/// Pairs every labeled baseline frame with its nearest followup frame.
pub async fn match_stage(
    config: &AppConfig,
    store: &ArtifactStore,
    provider: &dyn EmbeddingProvider,
) -> anyhow::Result<FramePairing> {
    let baseline: LabelRun = store
        .read(LABEL_RUN_KIND, &labels_artifact(Side::Baseline))
        .context("baseline labels (run the segment stage first)")?;
    let opts = IndexOptions {
        batch_size: config.embeddings.batch_size,
        pattern: config.frames.pattern.clone(),
    };

    let query = FeatureIndex::build(
        &config.frames_dir(Side::Baseline),
        Some(&baseline.labeled),
        provider,
        &opts,
    )
    .await
    .context("embed baseline frames")?;
    let search = FeatureIndex::build(&config.frames_dir(Side::Followup), None, provider, &opts)
        .await
        .context("embed followup frames")?;

    let pairing = matcher::match_frames(&query, &search)?;
    store.write(PAIRING_KIND, PAIRING_ARTIFACT, &pairing)?;
    Ok(pairing)
}

/// Measures baseline areas over the labeled baseline frames and followup
/// areas over the distinct matched frames.
pub fn measure(
    config: &AppConfig,
    store: &ArtifactStore,
) -> anyhow::Result<(RunAreaReport, RunAreaReport)> {
    let pairing: FramePairing = store
        .read(PAIRING_KIND, PAIRING_ARTIFACT)
        .context("frame pairing (run the match stage first)")?;
    let aggregator = AreaAggregator::new(config.frames.width, config.frames.height, config.class_count())
        .with_checkpoint_every(config.artifacts.checkpoint_every);

    let baseline_run: LabelRun = store.read(LABEL_RUN_KIND, &labels_artifact(Side::Baseline))?;
    let followup_run: LabelRun = store.read(LABEL_RUN_KIND, &labels_artifact(Side::Followup))?;
    let matched = FrameList::canonical(pairing.iter().map(|p| p.matched.clone()));

    let mut reports = Vec::with_capacity(2);
    for (side, run, order) in [
        (Side::Baseline, &baseline_run, &baseline_run.labeled),
        (Side::Followup, &followup_run, &matched),
    ] {
        let name = areas_artifact(side);
        let mut checkpoint = StoreCheckpoint::new(store, name.as_str());
        let report = aggregator.aggregate(
            config.video_label(side),
            &run.labels_dir,
            order,
            &mut checkpoint,
        )?;
        reports.push(report);
    }
    let followup = reports.pop().unwrap_or_default();
    let baseline = reports.pop().unwrap_or_default();
    Ok((baseline, followup))
}

/// Writes the comparison lines to the configured report file and returns them.
pub fn report_stage(config: &AppConfig, store: &ArtifactStore) -> anyhow::Result<Vec<String>> {
    let pairing: FramePairing = store.read(PAIRING_KIND, PAIRING_ARTIFACT)?;
    let baseline: RunAreaReport = store
        .read(AREA_REPORT_KIND, &areas_artifact(Side::Baseline))
        .context("baseline areas (run the measure stage first)")?;
    let followup: RunAreaReport = store.read(AREA_REPORT_KIND, &areas_artifact(Side::Followup))?;

    let comparisons = report::compare(&baseline, &followup, &pairing, config.class_count());
    let lines = report::render_lines(
        &comparisons,
        config.video_label(Side::Followup),
        &config.classes.names,
    );

    let path = PathBuf::from(&config.artifacts.report);
    let (dir, file) = split_report_path(&path)?;
    ArtifactStore::open(dir)?.write_lines(&file, &lines)?;
    info!(path = %path.display(), lines = lines.len(), "report written");
    Ok(lines)
}

fn split_report_path(path: &Path) -> anyhow::Result<(PathBuf, String)> {
    let file = path
        .file_name()
        .and_then(|f| f.to_str())
        .with_context(|| format!("invalid report path {}", path.display()))?
        .to_string();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file))
}

pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let emb = &config.embeddings;
    let grid = GridPoolProvider::new(emb.grid, emb.input_size);
    let mut reg = ProviderRegistry::new().with_embedding("grid", Arc::new(grid));

    let base_url = std::env::var("EMBEDDING_BASE_URL")
        .ok()
        .or_else(|| emb.base_url.clone());
    if let Some(base_url) = base_url {
        let api_key = std::env::var("EMBEDDING_API_KEY")
            .ok()
            .or_else(|| emb.api_key.clone());
        let provider = RemoteProvider::new(RemoteConfig {
            base_url,
            api_key,
            model: emb.model.clone(),
            input_size: emb.input_size,
        });
        reg = reg.with_embedding("remote", Arc::new(provider));
    }

    reg.set_preferred_embedding(&emb.provider)
}

/// Existing label directories win over a configured command.
pub fn build_segmenter(config: &AppConfig, side: Side) -> Box<dyn SegmentationInferencer> {
    match config.existing_labels(side) {
        Some(dir) => Box::new(ExistingLabels(dir)),
        None => Box::new(CommandSegmenter::new(
            config.segmentation.command.clone(),
            &config.workspace.runs_dir,
        )),
    }
}
