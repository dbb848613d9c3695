//! Service layer: the upload state machine, its collaborators, and the
//! asynchronous processing pipeline.

pub mod part_store;
pub mod queue;
pub mod record_store;
pub mod storage;
pub mod transcoder;
pub mod upload_service;
pub mod worker;
