//! End-to-end tests for the media processing pipeline: queued jobs through
//! normalization, artifact storage, record creation, and scratch cleanup.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use uuid::Uuid;

use meeting_ingest::db;
use meeting_ingest::models::meeting::{Meeting, Transcript, TranscriptChunk};
use meeting_ingest::models::session::UploadStatus;
use meeting_ingest::services::part_store::PartStore;
use meeting_ingest::services::queue::{JobQueue, QueueOptions};
use meeting_ingest::services::record_store::RecordStore;
use meeting_ingest::services::storage::LocalStorage;
use meeting_ingest::services::transcoder::{AudioTarget, TranscodeError, Transcoder};
use meeting_ingest::services::upload_service::{InitUploadParams, UploadService};
use meeting_ingest::services::worker::MediaWorker;

/// Transcoder stub: copies input to output and records that it ran, instead
/// of shelling out to ffmpeg.
struct CopyTranscoder {
    called: AtomicBool,
}

impl CopyTranscoder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            called: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        _target: &AudioTarget,
    ) -> Result<(), TranscodeError> {
        self.called.store(true, Ordering::SeqCst);
        tokio::fs::copy(input, output).await.map_err(|source| TranscodeError::Spawn {
            tool: "copy".into(),
            source,
        })?;
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    storage_root: PathBuf,
    service: UploadService,
    worker: MediaWorker,
    transcoder: Arc<CopyTranscoder>,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("meta.db").display());
    let pool = db::connect(&url).await.unwrap();
    db::apply_migrations(&pool).await.unwrap();

    let records = RecordStore::new(pool.clone());
    let parts = PartStore::new(dir.path().join("scratch"));
    let queue = JobQueue::new(pool, "audio-processing", QueueOptions::default());
    let service = UploadService::new(records.clone(), parts, queue);

    let storage_root = dir.path().join("artifacts");
    let storage = Arc::new(LocalStorage::new(&storage_root, "http://localhost:3000"));
    let transcoder = CopyTranscoder::new();
    let worker = MediaWorker::new(records, storage, transcoder.clone());

    Harness {
        _dir: dir,
        storage_root,
        service,
        worker,
        transcoder,
    }
}

async fn upload_and_complete(
    service: &UploadService,
    filename: &str,
    file_type: &str,
    parts: &[&[u8]],
) -> Uuid {
    let session = service
        .init_upload(InitUploadParams {
            filename: filename.into(),
            file_type: file_type.into(),
            total_parts: parts.len() as u32,
            owner_id: Uuid::new_v4(),
        })
        .await
        .unwrap();
    for (index, body) in parts.iter().enumerate() {
        service
            .upload_part(session.id, index as u32, Bytes::copy_from_slice(body))
            .await
            .unwrap();
    }
    service.complete_upload(session.id, None).await.unwrap();
    session.id
}

async fn meeting_for(service: &UploadService, upload_id: Uuid) -> Option<Meeting> {
    sqlx::query_as(
        "SELECT id, upload_id, title, owner_id, audio_url, created_at
         FROM meetings WHERE upload_id = ?",
    )
    .bind(upload_id)
    .fetch_optional(&*service.records.db)
    .await
    .unwrap()
}

#[tokio::test]
async fn wav_upload_flows_through_to_chunked_transcript() {
    let h = harness().await;
    let upload_id = upload_and_complete(
        &h.service,
        "standup.wav",
        "audio/wav",
        &[b"RIFF....", b"fake-pcm-data"],
    )
    .await;

    let job = h.service.queue.claim_next().await.unwrap().expect("job queued");
    h.worker.process_file(&job.payload).await.unwrap();

    // artifact stored under the deterministic, upload-keyed name
    let artifact = h.storage_root.join(format!("audio/{}.wav", upload_id));
    assert_eq!(std::fs::read(&artifact).unwrap(), b"RIFF....fake-pcm-data");

    // WAV passes through; the transcoder must not run
    assert!(!h.transcoder.called.load(Ordering::SeqCst));

    // meeting record with a durable URL and a title derived from the filename
    let meeting = meeting_for(&h.service, upload_id).await.expect("meeting created");
    assert_eq!(meeting.title, "standup.wav");
    assert!(meeting.audio_url.contains(&upload_id.to_string()));

    // transcript plus at least one ordered chunk
    let transcript: Transcript = sqlx::query_as(
        "SELECT id, meeting_id, full_text, created_at FROM transcripts WHERE meeting_id = ?",
    )
    .bind(meeting.id)
    .fetch_one(&*h.service.records.db)
    .await
    .unwrap();
    assert!(transcript.full_text.contains("stand-in transcription"));

    let chunks: Vec<TranscriptChunk> = sqlx::query_as(
        "SELECT transcript_id, chunk_index, content FROM transcript_chunks
         WHERE transcript_id = ? ORDER BY chunk_index",
    )
    .bind(transcript.id)
    .fetch_all(&*h.service.records.db)
    .await
    .unwrap();
    assert!(!chunks.is_empty());
    for (expected_index, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, expected_index as i64);
    }

    // scratch namespace reclaimed
    assert!(!h.service.parts.session_dir(upload_id).exists());

    // session stays COMPLETED
    let session = h.service.records.get_session(upload_id).await.unwrap().unwrap();
    assert_eq!(session.status, UploadStatus::Completed);
}

#[tokio::test]
async fn video_upload_runs_audio_extraction() {
    let h = harness().await;
    let upload_id =
        upload_and_complete(&h.service, "demo.mp4", "video/mp4", &[b"mp4-container-bytes"]).await;

    let job = h.service.queue.claim_next().await.unwrap().unwrap();
    h.worker.process_file(&job.payload).await.unwrap();

    assert!(h.transcoder.called.load(Ordering::SeqCst));
    let artifact = h.storage_root.join(format!("audio/{}.wav", upload_id));
    assert!(artifact.exists());
    assert!(meeting_for(&h.service, upload_id).await.is_some());
}

#[tokio::test]
async fn explicit_title_wins_over_derived_name() {
    let h = harness().await;
    let session = h
        .service
        .init_upload(InitUploadParams {
            filename: "weekly.wav".into(),
            file_type: "audio/wav".into(),
            total_parts: 1,
            owner_id: Uuid::new_v4(),
        })
        .await
        .unwrap();
    h.service
        .upload_part(session.id, 0, Bytes::from_static(b"pcm"))
        .await
        .unwrap();
    h.service
        .complete_upload(session.id, Some("Weekly Sync".into()))
        .await
        .unwrap();

    let job = h.service.queue.claim_next().await.unwrap().unwrap();
    assert_eq!(job.payload.title.as_deref(), Some("Weekly Sync"));
    h.worker.process_file(&job.payload).await.unwrap();

    let meeting = meeting_for(&h.service, session.id).await.unwrap();
    assert_eq!(meeting.title, "Weekly Sync");
}

#[tokio::test]
async fn processing_failure_marks_session_failed() {
    let h = harness().await;
    let upload_id =
        upload_and_complete(&h.service, "gone.wav", "audio/wav", &[b"doomed"]).await;

    let job = h.service.queue.claim_next().await.unwrap().unwrap();
    // simulate a crash that lost the scratch file before the worker ran
    std::fs::remove_file(&job.payload.file_path).unwrap();

    let result = h.worker.process_file(&job.payload).await;
    assert!(result.is_err());

    let session = h.service.records.get_session(upload_id).await.unwrap().unwrap();
    assert_eq!(session.status, UploadStatus::Failed);
    let message = session.error_message.expect("failure recorded");
    assert!(!message.is_empty());
    assert!(message.chars().count() <= 500);

    // no meeting record was left behind
    assert!(meeting_for(&h.service, upload_id).await.is_none());
}

#[tokio::test]
async fn record_upserts_are_idempotent_under_redelivery() {
    let h = harness().await;
    let upload_id = Uuid::new_v4();
    let owner_id = Uuid::new_v4();

    let first = h
        .service
        .records
        .upsert_meeting(upload_id, "Take one", owner_id, "http://a/1.wav")
        .await
        .unwrap();
    let second = h
        .service
        .records
        .upsert_meeting(upload_id, "Take two", owner_id, "http://a/2.wav")
        .await
        .unwrap();
    assert_eq!(first.id, second.id, "redelivery must reuse the meeting row");
    assert_eq!(second.title, "Take two");

    let meeting_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM meetings")
        .fetch_one(&*h.service.records.db)
        .await
        .unwrap();
    assert_eq!(meeting_count, 1);

    let t1 = h
        .service
        .records
        .upsert_transcript(first.id, "text one")
        .await
        .unwrap();
    let t2 = h
        .service
        .records
        .upsert_transcript(first.id, "text two")
        .await
        .unwrap();
    assert_eq!(t1.id, t2.id);

    h.service
        .records
        .replace_transcript_chunks(t1.id, &["a".into(), "b".into()])
        .await
        .unwrap();
    h.service
        .records
        .replace_transcript_chunks(t1.id, &["c".into()])
        .await
        .unwrap();
    let chunk_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM transcript_chunks WHERE transcript_id = ?")
            .bind(t1.id)
            .fetch_one(&*h.service.records.db)
            .await
            .unwrap();
    assert_eq!(chunk_count, 1);
}
