//! Pluggable sink for finished artifacts.
//!
//! Callers depend only on the [`StorageBackend`] capability; the concrete
//! variant (local filesystem or remote object store) is selected by
//! configuration at startup and constructed exactly once.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::config::AppConfig;

pub mod local;
pub mod remote;

pub use local::LocalStorage;
pub use remote::RemoteStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object path")]
    InvalidObjectPath,
    #[error("remote storage responded with status {status}: {message}")]
    Remote { status: u16, message: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Artifact content handed to a backend. File bodies are streamed; callers
/// never need to materialize a large artifact in memory.
#[derive(Debug)]
pub enum UploadBody {
    Bytes(Bytes),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Logical folder beneath the backend root (e.g. `audio`).
    pub folder: String,
    pub filename: String,
    pub content_type: String,
    /// Observability tags recorded alongside the artifact. Not
    /// correctness-bearing; backends may only log them.
    pub metadata: Vec<(String, String)>,
}

/// A stored artifact as reported back by a backend.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub filename: String,
    /// Backend-relative path (`folder/filename`).
    pub path: String,
    /// Durable URL for the artifact.
    pub url: String,
    pub size: u64,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn upload(&self, body: UploadBody, options: UploadOptions) -> StorageResult<StoredFile>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;

    async fn get_url(&self, path: &str) -> StorageResult<String>;

    /// Remove an artifact. Returns whether anything was deleted.
    async fn delete(&self, path: &str) -> StorageResult<bool>;
}

/// Select and construct the backend named by configuration.
///
/// An unrecognized provider falls back to local storage with a warning; a
/// remote provider with incomplete settings is a startup error.
pub fn backend_from_config(cfg: &AppConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match cfg.storage_provider.as_str() {
        "local" => Ok(Arc::new(LocalStorage::new(&cfg.storage_dir, &cfg.base_url))),
        "remote" => {
            let url = cfg
                .remote_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("remote storage provider requires a remote URL"))?;
            let key = cfg
                .remote_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("remote storage provider requires an API key"))?;
            Ok(Arc::new(RemoteStorage::new(url, key, cfg.remote_bucket.clone())))
        }
        other => {
            warn!("Unknown storage provider `{}`, falling back to local storage", other);
            Ok(Arc::new(LocalStorage::new(&cfg.storage_dir, &cfg.base_url)))
        }
    }
}

/// Reject paths that could escape the backend root.
///
/// Rejects empty segments, leading `/`, `..`, backslashes, and control
/// bytes. Object paths here are always service-generated, so this is a
/// guard rail rather than a full sanitizer.
pub(crate) fn ensure_object_path_safe(path: &str) -> StorageResult<()> {
    if path.is_empty() || path.starts_with('/') || path.contains("..") {
        return Err(StorageError::InvalidObjectPath);
    }
    if path
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StorageError::InvalidObjectPath);
    }
    Ok(())
}
