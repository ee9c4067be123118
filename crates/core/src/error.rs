use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("image not found: {0}")]
    MissingImage(PathBuf),
    #[error("embedding extraction failed for {frame}: {reason}")]
    EmbeddingExtraction { frame: String, reason: String },
    #[error("search index is empty")]
    EmptySearchSet,
    #[error("embedding dimension mismatch: query vectors have {query} values, search vectors have {search}")]
    DimensionMismatch { query: usize, search: usize },
    #[error("invalid frame identifier: {0}")]
    InvalidFrameId(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Storage(#[from] storage::StorageError),
    #[error(transparent)]
    Media(#[from] MediaError),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ToolNotFound(String),
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("could not read frame rate of {0}")]
    UnknownFrameRate(PathBuf),
    #[error("no segmentation command configured")]
    NoSegmenter,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffprobe output: {0}")]
    Probe(#[from] serde_json::Error),
}
