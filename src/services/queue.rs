//! Durable, named work queue over SQLite.
//!
//! Delivery is at-least-once: a claim is a conditional `waiting → active`
//! update, so exactly one consumer wins each job, and rows stranded in
//! `active` by a crash are recovered to `waiting` at startup. Failed
//! attempts back off exponentially until the attempt cap, after which the
//! row stays in `failed` as a dead-letter record. A bounded history of
//! completed and failed rows is retained for observability.

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::services::record_store::truncate_message;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("job payload could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Delivery policy. Defaults mirror the upstream job pipeline: three
/// attempts, exponential backoff from a 2 s base, and a short retained
/// history of terminal rows.
#[derive(Clone, Debug)]
pub struct QueueOptions {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Upper bound on a single processing attempt; the transcode step is the
    /// only unbounded-duration operation and this is what bounds it.
    pub attempt_timeout: Duration,
    pub poll_interval: Duration,
    pub keep_completed: u32,
    pub keep_failed: u32,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
            keep_completed: 10,
            keep_failed: 5,
        }
    }
}

/// A job handed to a consumer. `attempt` is 1-based.
#[derive(Debug)]
pub struct ClaimedJob<T> {
    pub id: i64,
    pub attempt: u32,
    pub payload: T,
}

pub struct JobQueue<T> {
    db: Arc<SqlitePool>,
    name: String,
    pub options: QueueOptions,
    _payload: PhantomData<fn(T)>,
}

impl<T> Clone for JobQueue<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            name: self.name.clone(),
            options: self.options.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> JobQueue<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub fn new(db: Arc<SqlitePool>, name: impl Into<String>, options: QueueOptions) -> Self {
        Self {
            db,
            name: name.into(),
            options,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Persist a job, immediately available for claiming.
    pub async fn enqueue(&self, payload: &T) -> Result<i64, QueueError> {
        let encoded = serde_json::to_string(payload)?;
        let result = sqlx::query(
            "INSERT INTO processing_jobs (queue, payload, state, attempts, available_at, enqueued_at)
             VALUES (?, ?, 'waiting', 0, ?, ?)",
        )
        .bind(&self.name)
        .bind(&encoded)
        .bind(Utc::now().timestamp_millis())
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        let id = result.last_insert_rowid();
        debug!("enqueued job {} on queue `{}`", id, self.name);
        Ok(id)
    }

    /// Claim the oldest due job, if any.
    ///
    /// The `waiting → active` transition is a conditional update retried on
    /// conflict, so concurrent consumers never double-claim.
    pub async fn claim_next(&self) -> Result<Option<ClaimedJob<T>>, QueueError> {
        loop {
            let now = Utc::now().timestamp_millis();
            let candidate = sqlx::query_as::<_, (i64, String, u32)>(
                "SELECT id, payload, attempts FROM processing_jobs
                 WHERE queue = ? AND state = 'waiting' AND available_at <= ?
                 ORDER BY id ASC LIMIT 1",
            )
            .bind(&self.name)
            .bind(now)
            .fetch_optional(&*self.db)
            .await?;

            let Some((id, payload, attempts)) = candidate else {
                return Ok(None);
            };

            let claimed = sqlx::query(
                "UPDATE processing_jobs SET state = 'active', attempts = attempts + 1
                 WHERE id = ? AND state = 'waiting'",
            )
            .bind(id)
            .execute(&*self.db)
            .await?;

            if claimed.rows_affected() == 0 {
                // lost the race for this row; look for another
                continue;
            }

            return Ok(Some(ClaimedJob {
                id,
                attempt: attempts + 1,
                payload: serde_json::from_str(&payload)?,
            }));
        }
    }

    /// Mark a job done and prune completed history beyond the retention cap.
    pub async fn complete(&self, id: i64) -> Result<(), QueueError> {
        sqlx::query(
            "UPDATE processing_jobs SET state = 'completed', finished_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.db)
        .await?;

        self.prune("completed", self.options.keep_completed).await?;
        debug!("completed job {} on queue `{}`", id, self.name);
        Ok(())
    }

    /// Record a failed attempt. Schedules a retry with exponential backoff
    /// until the attempt cap, then parks the job in the dead-letter state.
    pub async fn fail(&self, id: i64, error: &str) -> Result<(), QueueError> {
        let attempts = sqlx::query_scalar::<_, u32>(
            "SELECT attempts FROM processing_jobs WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await?;

        if attempts >= self.options.max_attempts {
            sqlx::query(
                "UPDATE processing_jobs SET state = 'failed', error = ?, finished_at = ?
                 WHERE id = ?",
            )
            .bind(truncate_message(error))
            .bind(Utc::now())
            .bind(id)
            .execute(&*self.db)
            .await?;

            self.prune("failed", self.options.keep_failed).await?;
            debug!(
                "job {} on queue `{}` exhausted {} attempts: {}",
                id, self.name, attempts, error
            );
        } else {
            let delay = backoff_delay(self.options.backoff_base, attempts);
            let available_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
            sqlx::query(
                "UPDATE processing_jobs SET state = 'waiting', error = ?, available_at = ?
                 WHERE id = ?",
            )
            .bind(truncate_message(error))
            .bind(available_at)
            .bind(id)
            .execute(&*self.db)
            .await?;

            debug!(
                "job {} on queue `{}` failed attempt {} of {}, retrying in {:?}",
                id, self.name, attempts, self.options.max_attempts, delay
            );
        }

        Ok(())
    }

    /// Return jobs stranded in `active` (by a crash mid-attempt) to
    /// `waiting`. Called once at startup, before consumers spawn.
    pub async fn recover_stalled(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "UPDATE processing_jobs SET state = 'waiting', available_at = ?
             WHERE queue = ? AND state = 'active'",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(&self.name)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn prune(&self, state: &str, keep: u32) -> Result<(), QueueError> {
        sqlx::query(
            "DELETE FROM processing_jobs
             WHERE queue = ? AND state = ? AND id NOT IN (
                 SELECT id FROM processing_jobs
                 WHERE queue = ? AND state = ?
                 ORDER BY id DESC LIMIT ?
             )",
        )
        .bind(&self.name)
        .bind(state)
        .bind(&self.name)
        .bind(state)
        .bind(keep)
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}

/// Exponential backoff for a failed attempt: `base · 2^(attempt-1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde::Deserialize;
    use tempfile::{TempDir, tempdir};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct TestPayload {
        value: u32,
    }

    async fn test_queue(options: QueueOptions) -> (TempDir, JobQueue<TestPayload>) {
        let dir = tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("queue.db").display());
        let pool = db::connect(&url).await.unwrap();
        db::apply_migrations(&pool).await.unwrap();
        (dir, JobQueue::new(pool, "test-queue", options))
    }

    async fn force_due(queue: &JobQueue<TestPayload>, id: i64) {
        sqlx::query("UPDATE processing_jobs SET available_at = 0 WHERE id = ?")
            .bind(id)
            .execute(&**queue_db(queue))
            .await
            .unwrap();
    }

    fn queue_db<'a>(queue: &'a JobQueue<TestPayload>) -> &'a Arc<SqlitePool> {
        &queue.db
    }

    async fn job_state(queue: &JobQueue<TestPayload>, id: i64) -> String {
        sqlx::query_scalar("SELECT state FROM processing_jobs WHERE id = ?")
            .bind(id)
            .fetch_one(&**queue_db(queue))
            .await
            .unwrap()
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn enqueue_claim_complete_round_trips() {
        let (_dir, queue) = test_queue(QueueOptions::default()).await;

        let id = queue.enqueue(&TestPayload { value: 7 }).await.unwrap();
        let claimed = queue.claim_next().await.unwrap().expect("job due");
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.attempt, 1);
        assert_eq!(claimed.payload, TestPayload { value: 7 });

        // already active; nothing else to claim
        assert!(queue.claim_next().await.unwrap().is_none());

        queue.complete(id).await.unwrap();
        assert_eq!(job_state(&queue, id).await, "completed");
    }

    #[tokio::test]
    async fn failed_attempt_backs_off_before_redelivery() {
        let (_dir, queue) = test_queue(QueueOptions::default()).await;

        let id = queue.enqueue(&TestPayload { value: 1 }).await.unwrap();
        let before = Utc::now().timestamp_millis();
        queue.claim_next().await.unwrap().unwrap();
        queue.fail(id, "boom").await.unwrap();

        assert_eq!(job_state(&queue, id).await, "waiting");
        let available_at: i64 =
            sqlx::query_scalar("SELECT available_at FROM processing_jobs WHERE id = ?")
                .bind(id)
                .fetch_one(&**queue_db(&queue))
                .await
                .unwrap();
        assert!(available_at >= before + 2000);

        // not due yet
        assert!(queue.claim_next().await.unwrap().is_none());

        force_due(&queue, id).await;
        let retry = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(retry.attempt, 2);
    }

    #[tokio::test]
    async fn exhausted_job_lands_in_dead_letter_state() {
        let (_dir, queue) = test_queue(QueueOptions::default()).await;

        let id = queue.enqueue(&TestPayload { value: 2 }).await.unwrap();
        for _ in 0..3 {
            force_due(&queue, id).await;
            queue.claim_next().await.unwrap().unwrap();
            queue.fail(id, "still broken").await.unwrap();
        }

        assert_eq!(job_state(&queue, id).await, "failed");
        assert!(queue.claim_next().await.unwrap().is_none());

        let error: Option<String> =
            sqlx::query_scalar("SELECT error FROM processing_jobs WHERE id = ?")
                .bind(id)
                .fetch_one(&**queue_db(&queue))
                .await
                .unwrap();
        assert_eq!(error.as_deref(), Some("still broken"));
    }

    #[tokio::test]
    async fn completed_history_is_pruned_to_retention_cap() {
        let (_dir, queue) = test_queue(QueueOptions::default()).await;

        for value in 0..12 {
            let id = queue.enqueue(&TestPayload { value }).await.unwrap();
            queue.claim_next().await.unwrap().unwrap();
            queue.complete(id).await.unwrap();
        }

        let completed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM processing_jobs WHERE queue = 'test-queue' AND state = 'completed'",
        )
        .fetch_one(&**queue_db(&queue))
        .await
        .unwrap();
        assert_eq!(completed, 10);
    }

    #[tokio::test]
    async fn recover_stalled_returns_active_jobs_to_waiting() {
        let (_dir, queue) = test_queue(QueueOptions::default()).await;

        let id = queue.enqueue(&TestPayload { value: 3 }).await.unwrap();
        queue.claim_next().await.unwrap().unwrap();
        assert_eq!(job_state(&queue, id).await, "active");

        assert_eq!(queue.recover_stalled().await.unwrap(), 1);
        assert_eq!(job_state(&queue, id).await, "waiting");

        let reclaimed = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(reclaimed.id, id);
        assert_eq!(reclaimed.attempt, 2);
    }
}
