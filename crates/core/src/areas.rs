//! Per-class segmented area for every frame of a run.

use crate::error::PipelineError;
use crate::frames::{FrameId, FrameList};
use crate::geometry::Ring;
use crate::labels::{self, ClassId, PolygonLabel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use storage::ArtifactStore;
use tracing::{debug, info, warn};

pub const AREA_REPORT_KIND: &str = "run_area_report";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameAreaEntry {
    pub frame: FrameId,
    pub areas: BTreeMap<ClassId, f64>,
}

impl FrameAreaEntry {
    pub fn zeroed(frame: FrameId, class_count: usize) -> Self {
        Self {
            frame,
            areas: (0..class_count).map(|c| (c as ClassId, 0.0)).collect(),
        }
    }

    pub fn area(&self, class_id: ClassId) -> f64 {
        self.areas.get(&class_id).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunAreaReport {
    pub run: String,
    pub entries: Vec<FrameAreaEntry>,
}

impl RunAreaReport {
    pub fn new(run: impl Into<String>) -> Self {
        Self {
            run: run.into(),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries keyed by frame key, for joining against a pairing.
    pub fn by_frame(&self) -> HashMap<u64, &FrameAreaEntry> {
        self.entries.iter().map(|e| (e.frame.key(), e)).collect()
    }
}

/// Receives the in-progress report while a run is being measured.
pub trait Checkpoint {
    fn save(&mut self, report: &RunAreaReport) -> Result<(), PipelineError>;
}

pub struct NoCheckpoint;

impl Checkpoint for NoCheckpoint {
    fn save(&mut self, _report: &RunAreaReport) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Writes the report as an artifact, replacing the previous checkpoint.
pub struct StoreCheckpoint<'a> {
    store: &'a ArtifactStore,
    name: String,
}

impl<'a> StoreCheckpoint<'a> {
    pub fn new(store: &'a ArtifactStore, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }
}

impl Checkpoint for StoreCheckpoint<'_> {
    fn save(&mut self, report: &RunAreaReport) -> Result<(), PipelineError> {
        self.store.write(AREA_REPORT_KIND, &self.name, report)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AreaAggregator {
    width: f64,
    height: f64,
    class_count: usize,
    checkpoint_every: usize,
}

impl AreaAggregator {
    pub fn new(width: u32, height: u32, class_count: usize) -> Self {
        Self {
            width: width as f64,
            height: height as f64,
            class_count,
            checkpoint_every: 1,
        }
    }

    /// Hand the report to the checkpoint every `frames` frames (at least 1).
    pub fn with_checkpoint_every(mut self, frames: usize) -> Self {
        self.checkpoint_every = frames.max(1);
        self
    }

    /// Pixel area per class for one frame's polygons.
    pub fn measure(&self, frame: FrameId, labels: &[PolygonLabel]) -> FrameAreaEntry {
        let mut entry = FrameAreaEntry::zeroed(frame, self.class_count);
        for label in labels {
            let pixels: Vec<(f64, f64)> = label
                .vertices
                .iter()
                .map(|(x, y)| (x * self.width, y * self.height))
                .collect();
            let Some(ring) = Ring::new(&pixels) else {
                warn!(
                    frame = %entry.frame,
                    class = label.class_id,
                    vertices = label.vertices.len(),
                    "skipping polygon with fewer than 3 vertices"
                );
                continue;
            };
            *entry.areas.entry(label.class_id).or_insert(0.0) += ring.area();
        }
        entry
    }

    /// Measures one frame from `label_dir`. A frame without a label file had
    /// no detections and gets all-zero areas.
    pub fn measure_file(&self, label_dir: &Path, frame: &FrameId) -> Result<FrameAreaEntry, PipelineError> {
        let path = label_dir.join(frame.label_file());
        match labels::read_labels(&path, self.class_count)? {
            Some(parsed) => {
                for w in &parsed.warnings {
                    warn!(frame = %frame, "{w}");
                }
                Ok(self.measure(frame.clone(), &parsed.labels))
            }
            None => {
                debug!(frame = %frame, "no label file, recording zero areas");
                Ok(FrameAreaEntry::zeroed(frame.clone(), self.class_count))
            }
        }
    }

    /// Builds the report for `order`, one entry per frame.
    pub fn aggregate(
        &self,
        run: &str,
        label_dir: &Path,
        order: &FrameList,
        checkpoint: &mut dyn Checkpoint,
    ) -> Result<RunAreaReport, PipelineError> {
        info!(run, frames = order.len(), dir = %label_dir.display(), "measuring areas");
        let mut report = RunAreaReport::new(run);
        let mut saved = 0;
        for frame in order {
            report.entries.push(self.measure_file(label_dir, frame)?);
            if report.len() % self.checkpoint_every == 0 {
                checkpoint.save(&report)?;
                saved = report.len();
            }
        }
        if saved != report.len() || report.is_empty() {
            checkpoint.save(&report)?;
        }
        info!(run, frames = report.len(), "areas measured");
        Ok(report)
    }
}
