//! Frame identity and canonical frame order.
//!
//! Frames are named `frame_<seconds>s` after the elapsed video time at which
//! they were decoded. The float in the name is only for display and file
//! resolution; stages join on the integer millisecond key.

use crate::error::PipelineError;
use globset::Glob;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

pub const FRAME_PREFIX: &str = "frame_";
pub const IMAGE_EXT: &str = "jpg";
pub const LABEL_EXT: &str = "txt";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameId {
    key: u64,
    stem: String,
}

impl FrameId {
    /// Builds the canonical identifier for a frame decoded at `seconds`.
    pub fn from_seconds(seconds: f64) -> Self {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        Self {
            key: (seconds * 1000.0).round() as u64,
            stem: format!("{FRAME_PREFIX}{seconds:.3}s"),
        }
    }

    /// Parses a file stem such as `frame_12.34s`. The stem is kept verbatim.
    pub fn parse(stem: &str) -> Result<Self, PipelineError> {
        let seconds = stem
            .strip_prefix(FRAME_PREFIX)
            .and_then(|rest| rest.strip_suffix('s'))
            .and_then(|num| num.parse::<f64>().ok())
            .filter(|s| s.is_finite() && *s >= 0.0)
            .ok_or_else(|| PipelineError::InvalidFrameId(stem.to_string()))?;
        Ok(Self {
            key: (seconds * 1000.0).round() as u64,
            stem: stem.to_string(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| PipelineError::InvalidFrameId(path.display().to_string()))?;
        Self::parse(stem)
    }

    /// Elapsed time in milliseconds.
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn seconds(&self) -> f64 {
        self.key as f64 / 1000.0
    }

    pub fn image_file(&self) -> String {
        format!("{}.{IMAGE_EXT}", self.stem)
    }

    pub fn label_file(&self) -> String {
        format!("{}.{LABEL_EXT}", self.stem)
    }
}

impl PartialEq for FrameId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for FrameId {}

impl Hash for FrameId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for FrameId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrameId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem)
    }
}

/// Ordered, duplicate-free list of frames. A frame's position is its
/// sequence number within the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameList(Vec<FrameId>);

impl FrameList {
    /// Sorts by elapsed time and drops frames that collide on the same key.
    pub fn canonical(ids: impl IntoIterator<Item = FrameId>) -> Self {
        let mut ids: Vec<FrameId> = ids.into_iter().collect();
        ids.sort_by_key(|id| id.key);
        Self::dedup(ids)
    }

    /// Keeps the caller's order; later duplicates are dropped.
    pub fn in_order(ids: impl IntoIterator<Item = FrameId>) -> Self {
        Self::dedup(ids.into_iter().collect())
    }

    fn dedup(ids: Vec<FrameId>) -> Self {
        let mut seen = HashSet::with_capacity(ids.len());
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if seen.insert(id.key) {
                out.push(id);
            } else {
                warn!(frame = %id, "duplicate frame identifier dropped");
            }
        }
        Self(out)
    }

    /// Lists `dir` (non-recursive) for files matching `pattern`, in canonical order.
    pub fn scan_dir(dir: &Path, pattern: &str) -> Result<Self, PipelineError> {
        Ok(Self::canonical(
            scan_frame_files(dir, pattern)?.into_iter().map(|(id, _)| id),
        ))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FrameId> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[FrameId] {
        &self.0
    }

    pub fn position(&self, id: &FrameId) -> Option<usize> {
        self.0.iter().position(|f| f == id)
    }
}

impl<'a> IntoIterator for &'a FrameList {
    type Item = &'a FrameId;
    type IntoIter = std::slice::Iter<'a, FrameId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Frame files in `dir` matching `pattern`, sorted by key, duplicates removed.
/// Files whose stem is not a frame identifier are skipped with a warning.
pub fn scan_frame_files(dir: &Path, pattern: &str) -> Result<Vec<(FrameId, PathBuf)>, PipelineError> {
    let matcher = Glob::new(pattern)
        .map_err(|e| PipelineError::InvalidFrameId(format!("bad pattern {pattern}: {e}")))?
        .compile_matcher();

    let mut found = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            PipelineError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() || !matcher.is_match(entry.file_name()) {
            continue;
        }
        match FrameId::from_path(entry.path()) {
            Ok(id) => found.push((id, entry.into_path())),
            Err(e) => warn!(path = %entry.path().display(), "skipping file: {e}"),
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    let mut seen = HashSet::with_capacity(found.len());
    found.retain(|(id, path)| {
        let fresh = seen.insert(id.key());
        if !fresh {
            warn!(path = %path.display(), "frame collides with an earlier timestamp, skipped");
        }
        fresh
    });
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_formatting_uses_milliseconds() {
        let id = FrameId::from_seconds(1.0 / 30.0);
        assert_eq!(id.stem(), "frame_0.033s");
        assert_eq!(id.key(), 33);
        assert_eq!(id.image_file(), "frame_0.033s.jpg");
        assert_eq!(id.label_file(), "frame_0.033s.txt");
    }

    #[test]
    fn parse_keeps_foreign_stem_but_joins_on_key() {
        let foreign = FrameId::parse("frame_0.03333333333333333s").unwrap();
        assert_eq!(foreign.stem(), "frame_0.03333333333333333s");
        assert_eq!(foreign, FrameId::from_seconds(1.0 / 30.0));
    }

    #[test]
    fn parse_rejects_other_names() {
        for bad in ["frame_.s", "frame_12.3", "img_1.0s", "frame_-1.0s", "frame_nans"] {
            assert!(FrameId::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn canonical_list_sorts_numerically_and_dedups() {
        let ids = ["frame_10.0s", "frame_2.0s", "frame_2.0000s", "frame_0.5s"]
            .iter()
            .map(|s| FrameId::parse(s).unwrap());
        let list = FrameList::canonical(ids);
        let stems: Vec<&str> = list.iter().map(|f| f.stem()).collect();
        assert_eq!(stems, vec!["frame_0.5s", "frame_2.0s", "frame_10.0s"]);
    }

    #[test]
    fn scan_dir_filters_by_pattern() {
        let temp = tempfile::tempdir().unwrap();
        for name in ["frame_1.5s.jpg", "frame_0.25s.jpg", "frame_3.0s.txt", "notes.jpg", "frame_x.jpg"] {
            std::fs::write(temp.path().join(name), b"").unwrap();
        }
        let list = FrameList::scan_dir(temp.path(), "*.jpg").unwrap();
        let stems: Vec<&str> = list.iter().map(|f| f.stem()).collect();
        assert_eq!(stems, vec!["frame_0.25s", "frame_1.5s"]);
    }
}
