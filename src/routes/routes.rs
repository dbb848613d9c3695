//! Defines routes for the resumable upload protocol.
//!
//! ## Structure
//! - `POST /upload/init`                 — create an upload session
//! - `PUT  /upload/{upload_id}/part`     — store one part (multipart: `chunk`, `part_index`)
//! - `POST /upload/{upload_id}/complete` — verify, assemble, and enqueue processing
//!
//! Health endpoints (`/healthz`, `/readyz`) are mounted at the root.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{complete_upload, init_upload, upload_part},
    },
    services::upload_service::{MAX_PART_BYTES, UploadService},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Build and return the router for all upload routes.
///
/// The router carries shared state (`UploadService`) to all handlers. The
/// body limit leaves headroom above the per-part cap for multipart framing.
pub fn routes() -> Router<UploadService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload protocol
        .route("/upload/init", post(init_upload))
        .route("/upload/{upload_id}/part", put(upload_part))
        .route("/upload/{upload_id}/complete", post(complete_upload))
        .layer(DefaultBodyLimit::max(MAX_PART_BYTES + 64 * 1024))
}
