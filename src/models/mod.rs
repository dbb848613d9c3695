//! Core data models for the meeting ingestion service.
//!
//! These entities represent upload sessions and the records the processing
//! pipeline derives from them. They map cleanly to database tables via
//! `sqlx::FromRow` and serialize naturally as JSON via `serde`.

pub mod job;
pub mod meeting;
pub mod session;
