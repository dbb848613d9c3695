//! Remote object-store backend.
//!
//! Speaks the bucket-scoped HTTP object API of a hosted store: objects are
//! PUT under `storage/v1/object/{bucket}/{path}` with a bearer key, and the
//! public URL is derived from the same path. File bodies are streamed as a
//! chunked request body rather than buffered.

use async_trait::async_trait;
use reqwest::Body;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::{
    StorageBackend, StorageError, StorageResult, StoredFile, UploadBody, UploadOptions,
    ensure_object_path_safe,
};

pub struct RemoteStorage {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: String,
}

impl RemoteStorage {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            bucket: bucket.into(),
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

#[async_trait]
impl StorageBackend for RemoteStorage {
    async fn upload(&self, body: UploadBody, options: UploadOptions) -> StorageResult<StoredFile> {
        let relative = format!("{}/{}", options.folder, options.filename);
        ensure_object_path_safe(&relative)?;

        let (request_body, size) = match body {
            UploadBody::Bytes(bytes) => {
                let size = bytes.len() as u64;
                (Body::from(bytes), size)
            }
            UploadBody::File(path) => {
                let size = tokio::fs::metadata(&path).await?.len();
                let file = File::open(&path).await?;
                (Body::wrap_stream(ReaderStream::new(file)), size)
            }
        };

        let response = self
            .client
            .post(self.object_url(&relative))
            .header(AUTHORIZATION, self.bearer())
            .header(CONTENT_TYPE, &options.content_type)
            .header("x-upsert", "true")
            .body(request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Remote { status, message });
        }

        debug!(
            "uploaded artifact {} to bucket `{}` ({} bytes, {:?})",
            relative, self.bucket, size, options.metadata
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
        let response = self
            .client
            .head(self.object_url(path))
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?;

        match response.status().as_u16() {
            200 => Ok(true),
            400 | 404 => Ok(false),
            status => Err(StorageError::Remote {
                status,
                message: "unexpected response to existence probe".into(),
            }),
        }
    }

    async fn get_url(&self, path: &str) -> StorageResult<String> {
        ensure_object_path_safe(path)?;
        Ok(self.public_url(path))
    }

    async fn delete(&self, path: &str) -> StorageResult<bool> {
        ensure_object_path_safe(path)?;
        let response = self
            .client
            .delete(self.object_url(path))
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?;

        match response.status().as_u16() {
            status if (200..300).contains(&status) => Ok(true),
            400 | 404 => Ok(false),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(StorageError::Remote { status, message })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_bucket_scoped() {
        let storage = RemoteStorage::new("https://store.example.com/", "key", "meeting-audio");
        assert_eq!(
            storage.object_url("audio/x.wav"),
            "https://store.example.com/storage/v1/object/meeting-audio/audio/x.wav"
        );
        assert_eq!(
            storage.public_url("audio/x.wav"),
            "https://store.example.com/storage/v1/object/public/meeting-audio/audio/x.wav"
        );
    }
}
