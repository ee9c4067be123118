//! ffmpeg / segmentation subprocess adapters.

use crate::error::MediaError;
use crate::frames::{FrameId, FrameList, IMAGE_EXT};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Decodes every frame of `video` into `out_dir` as `frame_<t>s.jpg`.
    async fn extract(&self, video: &Path, out_dir: &Path) -> Result<FrameList, MediaError>;
}

#[async_trait]
pub trait SegmentationInferencer: Send + Sync {
    /// Runs instance segmentation over `images_dir` and returns the directory
    /// holding one label file per frame with detections.
    async fn infer(&self, images_dir: &Path, run_name: &str) -> Result<PathBuf, MediaError>;
}

pub fn require_tool(name: &str) -> Result<PathBuf, MediaError> {
    which::which(name).map_err(|_| MediaError::ToolNotFound(name.to_string()))
}

async fn run(program: &Path, args: &[OsString]) -> Result<(), MediaError> {
    debug!(program = %program.display(), ?args, "running");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;
    if !output.status.success() {
        return Err(MediaError::CommandFailed {
            program: program.display().to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

/// Parses ffprobe rates such as `30/1`, `30000/1001` or `25`.
pub fn parse_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Frame rate of the first video stream.
pub async fn probe_fps(video: &Path) -> Result<f64, MediaError> {
    let ffprobe = require_tool("ffprobe")?;
    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_streams"])
        .arg(video)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;
    if !output.status.success() {
        return Err(MediaError::CommandFailed {
            program: "ffprobe".into(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    let probe: ProbeOutput = serde_json::from_slice(&output.stdout)?;
    probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("video"))
        .find_map(|s| {
            s.avg_frame_rate
                .as_deref()
                .and_then(parse_rate)
                .or_else(|| s.r_frame_rate.as_deref().and_then(parse_rate))
        })
        .ok_or_else(|| MediaError::UnknownFrameRate(video.to_path_buf()))
}

/// Renames numbered decoder output (`00000001.jpg`, ...) in `decoded` to
/// timestamped frames in `out_dir`. Frame `n` (1-based) is named after
/// `n / fps` seconds. Frames that land on an already used millisecond are
/// dropped.
pub fn name_decoded_frames(decoded: &Path, out_dir: &Path, fps: f64) -> Result<FrameList, MediaError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(decoded)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(IMAGE_EXT))
        .collect();
    files.sort();

    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(files.len());
    for (idx, file) in files.iter().enumerate() {
        let id = FrameId::from_seconds((idx + 1) as f64 / fps);
        if !seen.insert(id.key()) {
            warn!(frame = %id, source = %file.display(), "timestamp collision, dropping frame");
            continue;
        }
        std::fs::rename(file, out_dir.join(id.image_file()))?;
        ids.push(id);
    }
    Ok(FrameList::canonical(ids))
}

/// Decodes with ffmpeg, scaling every frame to a fixed size.
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    width: u32,
    height: u32,
}

impl FfmpegExtractor {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract(&self, video: &Path, out_dir: &Path) -> Result<FrameList, MediaError> {
        let ffmpeg = require_tool("ffmpeg")?;
        let fps = probe_fps(video).await?;
        info!(video = %video.display(), fps, "extracting frames");

        std::fs::create_dir_all(out_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix(".decode")
            .tempdir_in(out_dir)?;
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-i".into(),
            video.into(),
            "-vf".into(),
            format!("scale={}:{}", self.width, self.height).into(),
            "-q:v".into(),
            "2".into(),
            scratch.path().join(format!("%08d.{IMAGE_EXT}")).into(),
        ];
        run(&ffmpeg, &args).await?;

        let frames = name_decoded_frames(scratch.path(), out_dir, fps)?;
        info!(video = %video.display(), frames = frames.len(), "frames extracted");
        Ok(frames)
    }
}

/// Runs an external segmentation program.
///
/// Every argument has `{source}`, `{project}` and `{name}` replaced; the
/// program is expected to write labels to `{project}/{name}/labels`.
#[derive(Debug, Clone)]
pub struct CommandSegmenter {
    command: Vec<String>,
    project: PathBuf,
}

impl CommandSegmenter {
    pub fn new(command: Vec<String>, project: impl Into<PathBuf>) -> Self {
        Self {
            command,
            project: project.into(),
        }
    }

    pub fn expand(&self, images_dir: &Path, run_name: &str) -> Vec<String> {
        let source = images_dir.display().to_string();
        let project = self.project.display().to_string();
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{source}", &source)
                    .replace("{project}", &project)
                    .replace("{name}", run_name)
            })
            .collect()
    }

    pub fn run_dir(&self, run_name: &str) -> PathBuf {
        self.project.join(run_name)
    }
}

#[async_trait]
impl SegmentationInferencer for CommandSegmenter {
    async fn infer(&self, images_dir: &Path, run_name: &str) -> Result<PathBuf, MediaError> {
        let expanded = self.expand(images_dir, run_name);
        let (program, args) = expanded.split_first().ok_or(MediaError::NoSegmenter)?;
        let program = require_tool(program)?;
        info!(images = %images_dir.display(), run = run_name, "running segmentation");
        let args: Vec<OsString> = args.iter().map(OsString::from).collect();
        run(&program, &args).await?;

        let labels = self.run_dir(run_name).join("labels");
        if !labels.is_dir() {
            warn!(dir = %labels.display(), "segmenter wrote no labels");
        }
        Ok(labels)
    }
}

/// Labels produced earlier, outside the pipeline.
#[derive(Debug, Clone)]
pub struct ExistingLabels(pub PathBuf);

#[async_trait]
impl SegmentationInferencer for ExistingLabels {
    async fn infer(&self, _images_dir: &Path, run_name: &str) -> Result<PathBuf, MediaError> {
        debug!(run = run_name, dir = %self.0.display(), "using existing labels");
        Ok(self.0.clone())
    }
}

/// ffmpeg concat-demuxer input showing each image for one frame period.
pub fn concat_list(images: &[PathBuf], fps: u32) -> String {
    let period = 1.0 / fps.max(1) as f64;
    let mut list = String::from("ffconcat version 1.0\n");
    for path in images {
        let escaped = path.display().to_string().replace('\'', r"'\''");
        let _ = writeln!(list, "file '{escaped}'");
        let _ = writeln!(list, "duration {period:.6}");
    }
    list
}

/// Encodes the images of `frames` (canonical order) found in `images_dir`
/// into an mp4 at `fps`.
pub async fn compose_video(
    images_dir: &Path,
    frames: &FrameList,
    fps: u32,
    out: &Path,
) -> Result<(), MediaError> {
    let ffmpeg = require_tool("ffmpeg")?;
    let images: Vec<PathBuf> = frames
        .iter()
        .map(|f| images_dir.join(f.image_file()))
        .filter(|p| p.is_file())
        .map(|p| std::path::absolute(&p).unwrap_or(p))
        .collect();
    if images.len() < frames.len() {
        warn!(
            missing = frames.len() - images.len(),
            dir = %images_dir.display(),
            "rendered frames missing from video"
        );
    }

    let dir = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let list = tempfile::Builder::new().suffix(".txt").tempfile_in(dir)?;
    std::fs::write(list.path(), concat_list(&images, fps))?;

    let args: Vec<OsString> = vec![
        "-y".into(),
        "-v".into(),
        "error".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.path().into(),
        "-r".into(),
        fps.to_string().into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        out.into(),
    ];
    run(&ffmpeg, &args).await?;
    info!(out = %out.display(), frames = images.len(), fps, "video written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frame_rates() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert_eq!(parse_rate("25"), Some(25.0));
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("n/a"), None);
    }

    #[test]
    fn decoded_frames_are_named_by_elapsed_time() {
        let temp = tempfile::tempdir().unwrap();
        let decoded = temp.path().join("decoded");
        let out = temp.path().join("out");
        std::fs::create_dir_all(&decoded).unwrap();
        std::fs::create_dir_all(&out).unwrap();
        for n in 1..=4 {
            std::fs::write(decoded.join(format!("{n:08}.jpg")), b"x").unwrap();
        }

        let frames = name_decoded_frames(&decoded, &out, 4.0).unwrap();
        let stems: Vec<&str> = frames.iter().map(|f| f.stem()).collect();
        assert_eq!(stems, ["frame_0.250s", "frame_0.500s", "frame_0.750s", "frame_1.000s"]);
        assert!(out.join("frame_0.250s.jpg").is_file());
        assert_eq!(std::fs::read_dir(&decoded).unwrap().count(), 0);
    }

    #[test]
    fn colliding_timestamps_keep_the_first_frame() {
        let temp = tempfile::tempdir().unwrap();
        for n in 1..=3 {
            std::fs::write(temp.path().join(format!("{n:08}.jpg")), b"x").unwrap();
        }
        let out = tempfile::tempdir().unwrap();
        let frames = name_decoded_frames(temp.path(), out.path(), 3000.0).unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn segment_command_placeholders() {
        let seg = CommandSegmenter::new(
            vec![
                "yolo".into(),
                "predict".into(),
                "source={source}".into(),
                "project={project}".into(),
                "name={name}".into(),
            ],
            "runs/segment",
        );
        let args = seg.expand(Path::new("frames/video_01"), "video_01");
        assert_eq!(args[2], "source=frames/video_01");
        assert_eq!(args[3], "project=runs/segment");
        assert_eq!(args[4], "name=video_01");
        assert_eq!(seg.run_dir("video_01"), PathBuf::from("runs/segment/video_01"));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let seg = CommandSegmenter::new(Vec::new(), "runs");
        let err = seg.infer(Path::new("frames"), "v").await.unwrap_err();
        assert!(matches!(err, MediaError::NoSegmenter));
    }

    #[test]
    fn concat_list_holds_one_period_per_image() {
        let list = concat_list(&[PathBuf::from("/a/frame_0.5s.jpg"), PathBuf::from("/a/it's.jpg")], 4);
        assert_eq!(
            list,
            "ffconcat version 1.0\nfile '/a/frame_0.5s.jpg'\nduration 0.250000\nfile '/a/it'\\''s.jpg'\nduration 0.250000\n"
        );
    }
}
