//! Media processing worker.
//!
//! Consumes queued jobs: normalizes the uploaded media into the canonical
//! audio format, uploads the artifact, creates the meeting/transcript/chunk
//! records, and reclaims scratch space. Failures mark the originating
//! session `FAILED` and propagate so the queue's retry policy applies.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::models::job::ProcessingJob;
use crate::services::queue::JobQueue;
use crate::services::record_store::RecordStore;
use crate::services::storage::{StorageBackend, StorageError, UploadBody, UploadOptions};
use crate::services::transcoder::{AudioTarget, TranscodeError, Transcoder};

/// Transcript chunking parameters: 800-character windows overlapping by 100.
pub const CHUNK_SIZE: usize = 800;
pub const CHUNK_OVERLAP: usize = 100;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub struct MediaWorker {
    records: RecordStore,
    storage: Arc<dyn StorageBackend>,
    transcoder: Arc<dyn Transcoder>,
}

impl MediaWorker {
    pub fn new(
        records: RecordStore,
        storage: Arc<dyn StorageBackend>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            records,
            storage,
            transcoder,
        }
    }

    /// Process one job end to end. Safe to re-run under redelivery: the
    /// artifact name and the meeting/transcript records are keyed off the
    /// upload id, so a retry overwrites rather than duplicates.
    pub async fn process_file(&self, job: &ProcessingJob) -> Result<(), ProcessError> {
        info!("processing file for upload {}", job.upload_id);

        match self.run_pipeline(job).await {
            Ok(()) => {
                info!("successfully processed file for upload {}", job.upload_id);
                Ok(())
            }
            Err(err) => {
                self.record_failure(job, &err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Mark the session failed and reclaim scratch, swallowing secondary
    /// errors so they never mask the original failure.
    pub async fn record_failure(&self, job: &ProcessingJob, message: &str) {
        warn!("error processing upload {}: {}", job.upload_id, message);
        if let Err(err) = self
            .records
            .mark_session_failed(job.upload_id, message)
            .await
        {
            warn!("failed to mark upload {} as failed: {}", job.upload_id, err);
        }
        self.cleanup_scratch(job, None).await;
    }

    async fn run_pipeline(&self, job: &ProcessingJob) -> Result<(), ProcessError> {
        let audio_path = self.normalize_audio(job).await?;

        let stored = self
            .storage
            .upload(
                UploadBody::File(audio_path.clone()),
                UploadOptions {
                    folder: "audio".into(),
                    filename: format!("{}.wav", job.upload_id),
                    content_type: "audio/wav".into(),
                    metadata: vec![
                        ("uploadId".into(), job.upload_id.to_string()),
                        ("type".into(), "audio".into()),
                        ("originalFilename".into(), job.filename.clone()),
                    ],
                },
            )
            .await?;

        let title = job
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| canonical_audio_name(&job.filename));
        let meeting = self
            .records
            .upsert_meeting(job.upload_id, &title, job.owner_id, &stored.url)
            .await?;
        info!("created meeting {} for upload {}", meeting.id, job.upload_id);

        let full_text = placeholder_transcription(&audio_path).await?;
        let transcript = self.records.upsert_transcript(meeting.id, &full_text).await?;

        let chunks = chunk_text(&full_text, CHUNK_SIZE, CHUNK_OVERLAP);
        let stored_chunks = self
            .records
            .replace_transcript_chunks(transcript.id, &chunks)
            .await?;
        info!(
            "created {} transcript chunks for meeting {}",
            stored_chunks, meeting.id
        );

        self.cleanup_scratch(job, Some(&audio_path)).await;
        Ok(())
    }

    /// Produce the canonical mono 16 kHz WAV for this job.
    ///
    /// Video inputs have their audio track extracted; audio inputs are
    /// re-encoded unless the source is already WAV, which passes through.
    async fn normalize_audio(&self, job: &ProcessingJob) -> Result<PathBuf, ProcessError> {
        let is_video = job.file_type.starts_with("video/");
        let already_wav = !is_video
            && job
                .file_path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("wav"))
                .unwrap_or(false);
        if already_wav {
            return Ok(job.file_path.clone());
        }

        let stem = job
            .file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        let output = job
            .file_path
            .with_file_name(format!("{}-16k.wav", stem));

        self.transcoder
            .transcode(&job.file_path, &output, &AudioTarget::speech())
            .await?;
        Ok(output)
    }

    /// Remove the assembled file, any intermediate conversion, and the
    /// session's scratch directory. Errors are logged, never escalated.
    async fn cleanup_scratch(&self, job: &ProcessingJob, audio_path: Option<&Path>) {
        if let Err(err) = fs::remove_file(&job.file_path).await {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(
                    "failed to remove scratch file {}: {}",
                    job.file_path.display(),
                    err
                );
            }
        }

        if let Some(audio) = audio_path {
            if audio != job.file_path {
                if let Err(err) = fs::remove_file(audio).await {
                    if err.kind() != io::ErrorKind::NotFound {
                        warn!("failed to remove scratch file {}: {}", audio.display(), err);
                    }
                }
            }
        }

        if let Some(session_dir) = job.file_path.parent() {
            if let Err(err) = fs::remove_dir_all(session_dir).await {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(
                        "failed to remove scratch directory {}: {}",
                        session_dir.display(),
                        err
                    );
                }
            }
        }
    }
}

/// Consume jobs until the process exits. Each attempt is bounded by the
/// queue's per-attempt timeout; queue bookkeeping errors are logged and the
/// loop keeps going.
pub async fn run_worker(queue: JobQueue<ProcessingJob>, worker: Arc<MediaWorker>) {
    loop {
        match queue.claim_next().await {
            Ok(Some(job)) => {
                info!(
                    "claimed job {} (upload {}), attempt {}",
                    job.id, job.payload.upload_id, job.attempt
                );
                let outcome = tokio::time::timeout(
                    queue.options.attempt_timeout,
                    worker.process_file(&job.payload),
                )
                .await;

                let bookkeeping = match outcome {
                    Ok(Ok(())) => queue.complete(job.id).await,
                    Ok(Err(err)) => queue.fail(job.id, &err.to_string()).await,
                    Err(_) => {
                        let message = "processing attempt timed out";
                        worker.record_failure(&job.payload, message).await;
                        queue.fail(job.id, message).await
                    }
                };
                if let Err(err) = bookkeeping {
                    warn!("queue bookkeeping failed for job {}: {}", job.id, err);
                }
            }
            Ok(None) => tokio::time::sleep(queue.options.poll_interval).await,
            Err(err) => {
                warn!("failed to poll queue `{}`: {}", queue.name(), err);
                tokio::time::sleep(queue.options.poll_interval).await;
            }
        }
    }
}

/// Stand-in for a real speech-to-text call: deterministic text derived from
/// the artifact's size.
async fn placeholder_transcription(audio_path: &Path) -> io::Result<String> {
    let size_kb = (fs::metadata(audio_path).await?.len() as f64 / 1024.0).round() as u64;
    Ok(format!(
        "This is a stand-in transcription of the audio file ({}KB). A production \
         deployment would obtain the spoken content from a speech-to-text service \
         here. The rest of the pipeline treats this text exactly as it would treat \
         a real transcript, so chunking and retrieval behave identically.",
        size_kb
    ))
}

/// The original filename with its extension replaced by the canonical one.
fn canonical_audio_name(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{}.wav", stem),
        _ => format!("{}.wav", filename),
    }
}

/// Deterministic overlapping tiling of `full_text`.
///
/// Chunk `k` covers characters `[k·(chunk_size−overlap), k·(chunk_size−overlap)
/// + chunk_size)`, trimmed of surrounding whitespace; the last chunk may be
/// shorter. Offsets are character-based, so multi-byte text never splits a
/// code point.
pub fn chunk_text(full_text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    assert!(chunk_size > overlap, "chunk_size must exceed overlap");

    let offsets: Vec<usize> = full_text.char_indices().map(|(i, _)| i).collect();
    let char_count = offsets.len();
    let step = chunk_size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < char_count {
        let end = (start + chunk_size).min(char_count);
        let start_byte = offsets[start];
        let end_byte = if end == char_count {
            full_text.len()
        } else {
            offsets[end]
        };
        chunks.push(full_text[start_byte..end_byte].trim().to_string());
        start += step;
    }
    chunks
}
