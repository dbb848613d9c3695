//! Payload handed from upload completion to the media processing worker.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Work item enqueued exactly once per successfully completed upload session.
///
/// Serialized as JSON into the queue's backing table; consumers must be safe
/// to re-run under at-least-once delivery.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProcessingJob {
    /// Originating upload session.
    pub upload_id: Uuid,

    /// Assembled artifact on local scratch disk.
    pub file_path: PathBuf,

    /// MIME type declared at init; decides audio extraction vs. re-encode.
    pub file_type: String,

    pub owner_id: Uuid,

    /// Original filename as declared by the client.
    pub filename: String,

    /// Optional meeting title supplied at completion.
    pub title: Option<String>,
}
