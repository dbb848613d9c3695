//! Local-filesystem storage backend.
//!
//! Artifacts land beneath `root/{folder}/{filename}`; writes go through a
//! temp file and an atomic rename so a crashed upload never leaves a
//! half-written artifact at its final path. URLs point at the static
//! `/uploads` prefix served by whatever fronts this service.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use super::{
    StorageBackend, StorageError, StorageResult, StoredFile, UploadBody, UploadOptions,
    ensure_object_path_safe,
};

pub struct LocalStorage {
    root: PathBuf,
    base_url: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    fn full_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn public_url(&self, relative: &str) -> String {
        format!(
            "{}/uploads/{}",
            self.base_url.trim_end_matches('/'),
            relative
        )
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn upload(&self, body: UploadBody, options: UploadOptions) -> StorageResult<StoredFile> {
        let relative = format!("{}/{}", options.folder, options.filename);
        ensure_object_path_safe(&relative)?;

        let destination = self.full_path(&relative);
        let parent = destination
            .parent()
            .map(Path::to_path_buf)
            .ok_or(StorageError::InvalidObjectPath)?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let size = match write_body(&tmp_path, &body).await {
            Ok(size) => size,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &destination).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        debug!(
            "stored artifact {} ({} bytes, {:?})",
            relative, size, options.metadata
        );

        Ok(StoredFile {
            filename: options.filename,
            url: self.public_url(&relative),
            path: relative,
            size,
        })
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        ensure_object_path_safe(path)?;
        Ok(fs::try_exists(self.full_path(path)).await?)
    }

    async fn get_url(&self, path: &str) -> StorageResult<String> {
        ensure_object_path_safe(path)?;
        Ok(self.public_url(path))
    }

    async fn delete(&self, path: &str) -> StorageResult<bool> {
        ensure_object_path_safe(path)?;
        match fs::remove_file(self.full_path(path)).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

/// Write the body to `path`, streaming file sources, and flush durably.
async fn write_body(path: &Path, body: &UploadBody) -> std::io::Result<u64> {
    let mut file = File::create(path).await?;
    let size = match body {
        UploadBody::Bytes(bytes) => {
            file.write_all(bytes).await?;
            bytes.len() as u64
        }
        UploadBody::File(source) => {
            let mut reader = File::open(source).await?;
            tokio::io::copy(&mut reader, &mut file).await?
        }
    };
    file.flush().await?;
    file.sync_all().await?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    fn options(filename: &str) -> UploadOptions {
        UploadOptions {
            folder: "audio".into(),
            filename: filename.into(),
            content_type: "audio/wav".into(),
            metadata: Vec::new(),
        }
    }

    #[tokio::test]
    async fn uploads_bytes_and_reports_url() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost:3000");

        let stored = storage
            .upload(UploadBody::Bytes(Bytes::from_static(b"pcm")), options("a.wav"))
            .await
            .unwrap();

        assert_eq!(stored.path, "audio/a.wav");
        assert_eq!(stored.size, 3);
        assert_eq!(stored.url, "http://localhost:3000/uploads/audio/a.wav");
        assert_eq!(std::fs::read(dir.path().join("audio/a.wav")).unwrap(), b"pcm");
    }

    #[tokio::test]
    async fn uploads_file_source_by_streaming() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.wav");
        std::fs::write(&source, b"wav-bytes").unwrap();
        let storage = LocalStorage::new(dir.path().join("store"), "http://localhost:3000");

        let stored = storage
            .upload(UploadBody::File(source), options("b.wav"))
            .await
            .unwrap();

        assert_eq!(stored.size, 9);
        assert!(storage.exists("audio/b.wav").await.unwrap());
    }

    #[tokio::test]
    async fn upload_overwrites_existing_artifact() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost:3000");

        storage
            .upload(UploadBody::Bytes(Bytes::from_static(b"old")), options("c.wav"))
            .await
            .unwrap();
        storage
            .upload(UploadBody::Bytes(Bytes::from_static(b"newer")), options("c.wav"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join("audio/c.wav")).unwrap(), b"newer");
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost:3000");

        storage
            .upload(UploadBody::Bytes(Bytes::from_static(b"x")), options("d.wav"))
            .await
            .unwrap();

        assert!(storage.delete("audio/d.wav").await.unwrap());
        assert!(!storage.delete("audio/d.wav").await.unwrap());
        assert!(!storage.exists("audio/d.wav").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_traversal_paths() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost:3000");
        assert!(matches!(
            storage.exists("../outside").await,
            Err(StorageError::InvalidObjectPath)
        ));
    }
}
