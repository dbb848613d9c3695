//! Upload session manager.
//!
//! Owns the session record and its state machine, validates part writes,
//! assembles the final artifact, and hands off to the processing queue.
//! Completion treats verification + assembly + status transition as
//! effectively atomic per session: the `IN_PROGRESS → COMPLETED`
//! compare-and-swap is taken before assembly, so concurrent completions
//! produce exactly one assembly and exactly one enqueued job.

use bytes::Bytes;
use chrono::Utc;
use md5::Context;
use serde::Serialize;
use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::job::ProcessingJob;
use crate::models::session::{UploadSession, UploadStatus};
use crate::services::part_store::PartStore;
use crate::services::queue::JobQueue;
use crate::services::record_store::RecordStore;

/// Declared MIME types accepted at init.
const ALLOWED_FILE_TYPES: [&str; 6] = [
    "audio/mpeg",
    "audio/wav",
    "audio/mp3",
    "video/mp4",
    "video/avi",
    "video/mov",
];

pub const MIN_TOTAL_PARTS: u32 = 1;
pub const MAX_TOTAL_PARTS: u32 = 1000;

/// Per-part payload cap.
pub const MAX_PART_BYTES: usize = 50 * 1024 * 1024;

const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    Validation(String),
    #[error("upload session `{0}` not found")]
    NotFound(Uuid),
    #[error("cannot perform operation on upload with status {0}")]
    InvalidStatus(UploadStatus),
    #[error("upload is missing part indices {missing:?}")]
    IncompleteUpload { missing: Vec<u32> },
    #[error("file processing failed: {0}")]
    Processing(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Debug, Clone)]
pub struct InitUploadParams {
    pub filename: String,
    pub file_type: String,
    pub total_parts: u32,
    pub owner_id: Uuid,
}

/// Acknowledgement for a stored part.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PartReceipt {
    pub upload_id: Uuid,
    pub part_index: u32,
    pub size: usize,
}

/// Acknowledgement for a completed upload.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReceipt {
    pub upload_id: Uuid,
    pub status: UploadStatus,
    pub total_parts: u32,
    pub size: u64,
    pub etag: String,
}

/// Session manager. Cheap to clone; all fields are handles.
#[derive(Clone)]
pub struct UploadService {
    pub records: RecordStore,
    pub parts: PartStore,
    pub queue: JobQueue<ProcessingJob>,
}

impl UploadService {
    pub fn new(records: RecordStore, parts: PartStore, queue: JobQueue<ProcessingJob>) -> Self {
        Self {
            records,
            parts,
            queue,
        }
    }

    /// Create a new `IN_PROGRESS` session and provision its scratch area.
    pub async fn init_upload(&self, params: InitUploadParams) -> UploadResult<UploadSession> {
        ensure_filename_safe(&params.filename)?;
        ensure_file_type_allowed(&params.file_type)?;
        ensure_total_parts_in_range(params.total_parts)?;

        let session = UploadSession {
            id: Uuid::new_v4(),
            owner_id: params.owner_id,
            filename: params.filename,
            file_type: params.file_type,
            total_parts: params.total_parts,
            status: UploadStatus::InProgress,
            error_message: None,
            created_at: Utc::now(),
        };

        self.records.create_session(&session).await?;
        self.parts.provision(session.id).await?;

        debug!(
            "initialized upload {} ({} parts, {})",
            session.id, session.total_parts, session.file_type
        );
        Ok(session)
    }

    /// Store (or replace) the blob at `part_index`. Idempotent per index:
    /// a client retrying after a dropped connection simply overwrites.
    pub async fn upload_part(
        &self,
        session_id: Uuid,
        part_index: u32,
        bytes: Bytes,
    ) -> UploadResult<PartReceipt> {
        let session = self.fetch_in_progress(session_id).await?;

        if part_index >= session.total_parts {
            return Err(UploadError::Validation(format!(
                "partIndex must be in [0, {}), got {}",
                session.total_parts, part_index
            )));
        }
        if bytes.len() > MAX_PART_BYTES {
            return Err(UploadError::Validation(format!(
                "part exceeds the {} byte limit",
                MAX_PART_BYTES
            )));
        }

        let size = bytes.len();
        self.parts.write(session_id, part_index, &bytes).await?;

        Ok(PartReceipt {
            upload_id: session_id,
            part_index,
            size,
        })
    }

    /// Verify, assemble, transition, and enqueue — exactly once per session.
    pub async fn complete_upload(
        &self,
        session_id: Uuid,
        title: Option<String>,
    ) -> UploadResult<CompletionReceipt> {
        let session = self.fetch_in_progress(session_id).await?;

        let missing = self
            .parts
            .missing_indices(session_id, session.total_parts)
            .await;
        if !missing.is_empty() {
            return Err(UploadError::IncompleteUpload { missing });
        }

        // Single-writer gate: only the caller that wins this transition may
        // consume parts and enqueue. Losers see the session's current state.
        if !self.records.try_complete_session(session_id).await? {
            let status = self
                .records
                .get_session(session_id)
                .await?
                .map(|s| s.status)
                .unwrap_or(UploadStatus::Completed);
            return Err(UploadError::InvalidStatus(status));
        }

        let artifact_path = self.parts.session_dir(session_id).join(&session.filename);
        let (size, etag) = match self.assemble(&session, &artifact_path).await {
            Ok(result) => result,
            Err(err) => {
                let message = format!("assembly failed: {}", err);
                if let Err(mark_err) = self.records.mark_session_failed(session_id, &message).await
                {
                    warn!("failed to record assembly failure for {}: {}", session_id, mark_err);
                }
                if let Err(purge_err) = self.parts.purge(session_id).await {
                    warn!("failed to purge scratch for {}: {}", session_id, purge_err);
                }
                return Err(UploadError::Processing(message));
            }
        };

        let job = ProcessingJob {
            upload_id: session_id,
            file_path: artifact_path,
            file_type: session.file_type.clone(),
            owner_id: session.owner_id,
            filename: session.filename.clone(),
            title,
        };
        if let Err(err) = self.queue.enqueue(&job).await {
            let message = format!("failed to enqueue processing job: {}", err);
            if let Err(mark_err) = self.records.mark_session_failed(session_id, &message).await {
                warn!("failed to record enqueue failure for {}: {}", session_id, mark_err);
            }
            if let Err(purge_err) = self.parts.purge(session_id).await {
                warn!("failed to purge scratch for {}: {}", session_id, purge_err);
            }
            return Err(UploadError::Processing(message));
        }

        debug!(
            "completed upload {} ({} bytes, etag {})",
            session_id, size, etag
        );

        Ok(CompletionReceipt {
            upload_id: session_id,
            status: UploadStatus::Completed,
            total_parts: session.total_parts,
            size,
            etag,
        })
    }

    async fn fetch_in_progress(&self, session_id: Uuid) -> UploadResult<UploadSession> {
        let session = self
            .records
            .get_session(session_id)
            .await?
            .ok_or(UploadError::NotFound(session_id))?;
        if session.status != UploadStatus::InProgress {
            return Err(UploadError::InvalidStatus(session.status));
        }
        Ok(session)
    }

    /// Stream-concatenate parts in index order into `destination`, deleting
    /// each part immediately after it is consumed so peak scratch usage
    /// stays bounded by one part. Computes an MD5 etag along the way.
    async fn assemble(
        &self,
        session: &UploadSession,
        destination: &Path,
    ) -> io::Result<(u64, String)> {
        let mut file = File::create(destination).await?;
        let mut digest = Context::new();
        let mut size: u64 = 0;

        for index in 0..session.total_parts {
            let bytes = self.parts.read_and_delete(session.id, index).await?;
            digest.consume(&bytes);
            size += bytes.len() as u64;
            file.write_all(&bytes).await?;
        }

        file.flush().await?;
        file.sync_all().await?;
        self.parts.prune_parts_dir(session.id).await;

        Ok((size, format!("{:x}", digest.compute())))
    }
}

fn ensure_filename_safe(filename: &str) -> UploadResult<()> {
    if filename.is_empty() || filename.len() > MAX_FILENAME_LEN {
        return Err(UploadError::Validation(
            "filename must be between 1 and 255 bytes".into(),
        ));
    }
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(UploadError::Validation(
            "filename must not contain path separators or `..`".into(),
        ));
    }
    if filename.bytes().any(|b| b.is_ascii_control() || b == b'\0') {
        return Err(UploadError::Validation(
            "filename must not contain control characters".into(),
        ));
    }
    Ok(())
}

fn ensure_file_type_allowed(file_type: &str) -> UploadResult<()> {
    if ALLOWED_FILE_TYPES.contains(&file_type) {
        Ok(())
    } else {
        Err(UploadError::Validation(format!(
            "fileType `{}` is not supported",
            file_type
        )))
    }
}

fn ensure_total_parts_in_range(total_parts: u32) -> UploadResult<()> {
    if (MIN_TOTAL_PARTS..=MAX_TOTAL_PARTS).contains(&total_parts) {
        Ok(())
    } else {
        Err(UploadError::Validation(format!(
            "totalParts must be between {} and {}",
            MIN_TOTAL_PARTS, MAX_TOTAL_PARTS
        )))
    }
}
