//! Meeting, transcript, and transcript-chunk records produced by the
//! processing worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A meeting backed by a processed audio artifact.
///
/// Keyed by `upload_id` (unique) so a redelivered processing job upserts the
/// same row instead of creating a duplicate.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Meeting {
    pub id: Uuid,

    /// Upload session this meeting was derived from.
    pub upload_id: Uuid,

    pub title: String,

    pub owner_id: Uuid,

    /// Durable URL of the normalized audio artifact in the storage backend.
    pub audio_url: String,

    pub created_at: DateTime<Utc>,
}

/// Full transcript text for a meeting. One per meeting.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Transcript {
    pub id: Uuid,

    pub meeting_id: Uuid,

    pub full_text: String,

    pub created_at: DateTime<Utc>,
}

/// An indexed, overlapping window over a transcript's full text.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct TranscriptChunk {
    pub transcript_id: Uuid,

    /// Zero-based position of this chunk in the tiling.
    pub chunk_index: i64,

    pub content: String,
}
