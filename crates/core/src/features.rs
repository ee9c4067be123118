//! Embedding index over the frames of one video.

use crate::error::PipelineError;
use crate::frames::{self, FrameId, FrameList};
use crate::preprocess;
use providers::EmbeddingProvider;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub id: FrameId,
    pub image_path: PathBuf,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub batch_size: usize,
    /// Glob used when listing a directory without an explicit subset.
    pub pattern: String,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            batch_size: 4,
            pattern: format!("{}*.{}", frames::FRAME_PREFIX, frames::IMAGE_EXT),
        }
    }
}

/// Ordered frame embeddings sharing one vector space.
#[derive(Debug, Clone, Default)]
pub struct FeatureIndex {
    records: Vec<FrameRecord>,
    dim: usize,
}

impl FeatureIndex {
    /// Wraps already-computed records. All embeddings must have the same length.
    pub fn from_records(records: Vec<FrameRecord>) -> Result<Self, PipelineError> {
        let mut index = Self::default();
        for record in records {
            index.push(record)?;
        }
        Ok(index)
    }

    /// Embeds the frames found in `frames_dir`.
    ///
    /// With a `subset`, frames are taken in exactly that order and resolved
    /// as `{frames_dir}/{stem}.jpg`. Otherwise the directory is listed and
    /// frames are taken in canonical (time) order. Any failure aborts the
    /// whole build.
    pub async fn build(
        frames_dir: &Path,
        subset: Option<&FrameList>,
        provider: &dyn EmbeddingProvider,
        opts: &IndexOptions,
    ) -> Result<Self, PipelineError> {
        let entries: Vec<(FrameId, PathBuf)> = match subset {
            Some(list) => list
                .iter()
                .map(|id| (id.clone(), frames_dir.join(id.image_file())))
                .collect(),
            None => frames::scan_frame_files(frames_dir, &opts.pattern)?,
        };
        if let Some((_, missing)) = entries.iter().find(|(_, p)| !p.is_file()) {
            return Err(PipelineError::MissingImage(missing.clone()));
        }

        info!(
            dir = %frames_dir.display(),
            frames = entries.len(),
            "building feature index"
        );
        let size = provider.input_size();
        let mut index = Self::default();
        for batch in entries.chunks(opts.batch_size.max(1)) {
            let paths: Vec<PathBuf> = batch.iter().map(|(_, p)| p.clone()).collect();
            let tensors = tokio::task::spawn_blocking(move || {
                paths
                    .iter()
                    .map(|p| preprocess::load_tensor(p, size))
                    .collect::<Result<Vec<_>, _>>()
            })
            .await
            .map_err(|e| PipelineError::EmbeddingExtraction {
                frame: batch[0].0.to_string(),
                reason: format!("decoder task failed: {e}"),
            })??;

            let resp = provider.embed(&tensors).await.map_err(|e| {
                PipelineError::EmbeddingExtraction {
                    frame: batch[0].0.to_string(),
                    reason: e.to_string(),
                }
            })?;
            if resp.vectors.len() != batch.len() {
                return Err(PipelineError::EmbeddingExtraction {
                    frame: batch[0].0.to_string(),
                    reason: format!(
                        "extractor returned {} vectors for {} images",
                        resp.vectors.len(),
                        batch.len()
                    ),
                });
            }
            for ((id, path), embedding) in batch.iter().zip(resp.vectors) {
                index.push(FrameRecord {
                    id: id.clone(),
                    image_path: path.clone(),
                    embedding,
                })?;
            }
            debug!(done = index.len(), total = entries.len(), "embedded batch");
        }
        info!(frames = index.len(), dim = index.dim, "feature index ready");
        Ok(index)
    }

    fn push(&mut self, record: FrameRecord) -> Result<(), PipelineError> {
        if record.embedding.is_empty() {
            return Err(PipelineError::EmbeddingExtraction {
                frame: record.id.to_string(),
                reason: "extractor returned an empty vector".into(),
            });
        }
        if record.embedding.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::EmbeddingExtraction {
                frame: record.id.to_string(),
                reason: "extractor returned a non-finite value".into(),
            });
        }
        if self.records.is_empty() {
            self.dim = record.embedding.len();
        } else if record.embedding.len() != self.dim {
            return Err(PipelineError::EmbeddingExtraction {
                frame: record.id.to_string(),
                reason: format!(
                    "vector has {} values, index dimension is {}",
                    record.embedding.len(),
                    self.dim
                ),
            });
        }
        self.records.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Embedding length; 0 for an empty index.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn get(&self, pos: usize) -> Option<&FrameRecord> {
        self.records.get(pos)
    }

    pub fn ids(&self) -> impl Iterator<Item = &FrameId> {
        self.records.iter().map(|r| &r.id)
    }
}
