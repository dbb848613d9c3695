//! Narrow record-store interface over SQLite.
//!
//! The upload service and the processing worker reach the relational layer
//! only through these single-row (or small-batch) operations. Meeting and
//! transcript creation are upserts keyed by their originating upload so a
//! redelivered job overwrites rather than duplicates.

use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::meeting::{Meeting, Transcript};
use crate::models::session::{UploadSession, UploadStatus};

/// Longest error message persisted onto a session record.
pub const ERROR_MESSAGE_MAX_CHARS: usize = 500;

#[derive(Clone)]
pub struct RecordStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl RecordStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn create_session(&self, session: &UploadSession) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO upload_sessions (
                id, owner_id, filename, file_type, total_parts, status,
                error_message, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id)
        .bind(session.owner_id)
        .bind(&session.filename)
        .bind(&session.file_type)
        .bind(session.total_parts)
        .bind(session.status)
        .bind(session.error_message.as_deref())
        .bind(session.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn get_session(&self, id: Uuid) -> sqlx::Result<Option<UploadSession>> {
        sqlx::query_as::<Sqlite, UploadSession>(
            "SELECT id, owner_id, filename, file_type, total_parts, status,
                    error_message, created_at
             FROM upload_sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    /// Single-writer guard for completion: flips `IN_PROGRESS → COMPLETED`
    /// and reports whether this caller won the transition. A concurrent
    /// completion (or a terminal session) leaves the row untouched and
    /// returns `false`.
    pub async fn try_complete_session(&self, id: Uuid) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE upload_sessions SET status = ? WHERE id = ? AND status = ?",
        )
        .bind(UploadStatus::Completed)
        .bind(id)
        .bind(UploadStatus::InProgress)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record a failure onto the session, truncating the message to a
    /// bounded length. Unconditional: the pipeline may fail a session that
    /// already completed its upload leg.
    pub async fn mark_session_failed(&self, id: Uuid, message: &str) -> sqlx::Result<()> {
        sqlx::query("UPDATE upload_sessions SET status = ?, error_message = ? WHERE id = ?")
            .bind(UploadStatus::Failed)
            .bind(truncate_message(message))
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Create or refresh the meeting derived from `upload_id`.
    pub async fn upsert_meeting(
        &self,
        upload_id: Uuid,
        title: &str,
        owner_id: Uuid,
        audio_url: &str,
    ) -> sqlx::Result<Meeting> {
        sqlx::query_as::<Sqlite, Meeting>(
            r#"
            INSERT INTO meetings (id, upload_id, title, owner_id, audio_url, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(upload_id) DO UPDATE SET
                title = excluded.title,
                audio_url = excluded.audio_url
            RETURNING id, upload_id, title, owner_id, audio_url, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(upload_id)
        .bind(title)
        .bind(owner_id)
        .bind(audio_url)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
    }

    /// Create or refresh the transcript for `meeting_id`.
    pub async fn upsert_transcript(
        &self,
        meeting_id: Uuid,
        full_text: &str,
    ) -> sqlx::Result<Transcript> {
        sqlx::query_as::<Sqlite, Transcript>(
            r#"
            INSERT INTO transcripts (id, meeting_id, full_text, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(meeting_id) DO UPDATE SET
                full_text = excluded.full_text
            RETURNING id, meeting_id, full_text, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(meeting_id)
        .bind(full_text)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
    }

    /// Replace the chunk set for a transcript wholesale. Batched inserts keep
    /// well clear of SQLite's bind-parameter limit.
    pub async fn replace_transcript_chunks(
        &self,
        transcript_id: Uuid,
        chunks: &[String],
    ) -> sqlx::Result<usize> {
        sqlx::query("DELETE FROM transcript_chunks WHERE transcript_id = ?")
            .bind(transcript_id)
            .execute(&*self.db)
            .await?;

        for (batch_no, batch) in chunks.chunks(200).enumerate() {
            let base_index = batch_no * 200;
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO transcript_chunks (transcript_id, chunk_index, content) ",
            );
            builder.push_values(batch.iter().enumerate(), |mut b, (offset, content)| {
                b.push_bind(transcript_id)
                    .push_bind((base_index + offset) as i64)
                    .push_bind(content);
            });
            builder.build().execute(&*self.db).await?;
        }

        debug!("stored {} transcript chunks for {}", chunks.len(), transcript_id);
        Ok(chunks.len())
    }
}

/// Cut a message at a character boundary so it fits the bounded
/// `error_message` column.
pub fn truncate_message(message: &str) -> &str {
    match message.char_indices().nth(ERROR_MESSAGE_MAX_CHARS) {
        Some((byte_offset, _)) => &message[..byte_offset],
        None => message,
    }
}
