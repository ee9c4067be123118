//! Storage layer: stage artifacts persisted as files.
//!
//! Every artifact is written to a temp file in the same directory and renamed
//! into place, so readers only ever see a complete previous or new version.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("artifact not found: {0}")]
    Missing(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed artifact {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
    #[error("artifact {path} holds `{found}`, expected `{expected}`")]
    KindMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub kind: String,
    pub written_at: DateTime<Utc>,
    pub payload: T,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    pub fn write<T: Serialize>(&self, kind: &str, name: &str, payload: &T) -> StorageResult<PathBuf> {
        #[derive(Serialize)]
        struct EnvelopeRef<'a, T> {
            kind: &'a str,
            written_at: DateTime<Utc>,
            payload: &'a T,
        }

        let path = self.path(name);
        let body = serde_json::to_vec_pretty(&EnvelopeRef {
            kind,
            written_at: Utc::now(),
            payload,
        })
        .map_err(|source| StorageError::Json {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &body)?;
        debug!(kind, path = %path.display(), "artifact written");
        Ok(path)
    }

    pub fn read_envelope<T: DeserializeOwned>(
        &self,
        kind: &str,
        name: &str,
    ) -> StorageResult<Envelope<T>> {
        let path = self.path(name);
        let bytes = read_bytes(&path)?;
        let envelope: Envelope<serde_json::Value> =
            serde_json::from_slice(&bytes).map_err(|source| StorageError::Json {
                path: path.clone(),
                source,
            })?;
        if envelope.kind != kind {
            return Err(StorageError::KindMismatch {
                path,
                expected: kind.to_string(),
                found: envelope.kind,
            });
        }
        let payload = serde_json::from_value(envelope.payload)
            .map_err(|source| StorageError::Json { path, source })?;
        Ok(Envelope {
            kind: envelope.kind,
            written_at: envelope.written_at,
            payload,
        })
    }

    pub fn read<T: DeserializeOwned>(&self, kind: &str, name: &str) -> StorageResult<T> {
        Ok(self.read_envelope(kind, name)?.payload)
    }

    /// Reads any artifact without checking its kind.
    pub fn read_raw(&self, name: &str) -> StorageResult<Envelope<serde_json::Value>> {
        let path = self.path(name);
        let bytes = read_bytes(&path)?;
        serde_json::from_slice(&bytes).map_err(|source| StorageError::Json { path, source })
    }

    pub fn write_lines(&self, name: &str, lines: &[String]) -> StorageResult<PathBuf> {
        let path = self.path(name);
        let mut body = lines.join("\n");
        if !lines.is_empty() {
            body.push('\n');
        }
        write_atomic(&path, body.as_bytes())?;
        debug!(lines = lines.len(), path = %path.display(), "text artifact written");
        Ok(path)
    }

    pub fn read_lines(&self, name: &str) -> StorageResult<Vec<String>> {
        let path = self.path(name);
        let bytes = read_bytes(&path)?;
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

fn read_bytes(path: &Path) -> StorageResult<Vec<u8>> {
    fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::Missing(path.to_path_buf())
        } else {
            StorageError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|source| StorageError::Persist {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
