//! Represents a resumable multipart upload session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Lifecycle of an upload session.
///
/// `IN_PROGRESS` is the only state that accepts part writes or completion.
/// `COMPLETED` and `FAILED` are terminal for the upload path; the processing
/// worker may still move a completed session to `FAILED` when the
/// asynchronous pipeline breaks down.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    InProgress,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::InProgress => "IN_PROGRESS",
            UploadStatus::Completed => "COMPLETED",
            UploadStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A multipart upload session, initiated before uploading a media file in parts.
///
/// `total_parts` is fixed at creation; parts are addressed by zero-based index
/// in `[0, total_parts)`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UploadSession {
    /// Unique session identifier (returned to the client).
    pub id: Uuid,

    /// ID of the user that initiated the upload.
    pub owner_id: Uuid,

    /// Original filename as declared by the client.
    pub filename: String,

    /// Declared MIME type (validated against the allow-list at init).
    pub file_type: String,

    /// Number of parts the client committed to upload.
    pub total_parts: u32,

    /// Current state machine position.
    pub status: UploadStatus,

    /// Failure detail, truncated to a bounded length. Only set on `FAILED`.
    pub error_message: Option<String>,

    /// When this session was created.
    pub created_at: DateTime<Utc>,
}
