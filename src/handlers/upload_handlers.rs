//! HTTP handlers for the resumable upload protocol.
//!
//! Thin wrappers: deserialize the request, call the upload service, map the
//! error taxonomy onto status codes via `AppError`. All business validation
//! lives in the service.

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    errors::AppError,
    models::session::UploadStatus,
    services::upload_service::{InitUploadParams, UploadService},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub filename: String,
    pub file_type: String,
    pub total_parts: u32,
    pub owner_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub upload_id: Uuid,
    pub status: UploadStatus,
    pub total_parts: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CompleteUploadRequest {
    pub title: Option<String>,
}

/// `POST /upload/init`
pub async fn init_upload(
    State(service): State<UploadService>,
    Json(req): Json<InitUploadRequest>,
) -> Result<impl IntoResponse, AppError> {
    info!("Initializing upload for file: {}", req.filename);

    let session = service
        .init_upload(InitUploadParams {
            filename: req.filename,
            file_type: req.file_type,
            total_parts: req.total_parts,
            owner_id: req.owner_id,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitUploadResponse {
            upload_id: session.id,
            status: session.status,
            total_parts: session.total_parts,
            created_at: session.created_at,
        }),
    ))
}

/// `PUT /upload/{upload_id}/part` — multipart body carrying the `chunk`
/// payload and its `part_index`.
pub async fn upload_part(
    State(service): State<UploadService>,
    Path(upload_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut part_index: Option<u32> = None;
    let mut chunk: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("part_index") | Some("partIndex") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                part_index = Some(text.trim().parse().map_err(|_| {
                    AppError::bad_request("part_index must be a non-negative integer")
                })?);
            }
            Some("chunk") => {
                chunk = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|err| AppError::bad_request(err.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let part_index =
        part_index.ok_or_else(|| AppError::bad_request("missing `part_index` field"))?;
    let chunk = chunk.ok_or_else(|| AppError::bad_request("no file chunk provided"))?;

    info!("Uploading part {} for upload {}", part_index, upload_id);
    let receipt = service.upload_part(upload_id, part_index, chunk).await?;
    Ok(Json(receipt))
}

/// `POST /upload/{upload_id}/complete`
pub async fn complete_upload(
    State(service): State<UploadService>,
    Path(upload_id): Path<Uuid>,
    body: Option<Json<CompleteUploadRequest>>,
) -> Result<impl IntoResponse, AppError> {
    info!("Completing upload {}", upload_id);

    let title = body.and_then(|Json(req)| req.title);
    let receipt = service.complete_upload(upload_id, title).await?;
    Ok(Json(receipt))
}
