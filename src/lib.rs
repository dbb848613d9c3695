//! Resumable media upload and processing service.
//!
//! Clients upload large audio/video files in parts, complete the upload, and
//! the service asynchronously normalizes the media into a canonical audio
//! artifact, produces a transcript, and splits it into indexed overlapping
//! chunks for retrieval.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
