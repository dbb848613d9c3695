use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use meeting_ingest::{
    config::AppConfig,
    db,
    models::job::ProcessingJob,
    routes,
    services::{
        part_store::PartStore,
        queue::{JobQueue, QueueOptions},
        record_store::RecordStore,
        storage,
        transcoder::FfmpegTranscoder,
        upload_service::UploadService,
        worker::{MediaWorker, run_worker},
    },
};

/// Name of the queue carrying jobs from upload completion to the workers.
const PROCESSING_QUEUE: &str = "audio-processing";

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting meeting-ingest with config: {:?}", cfg);

    // --- Ensure scratch directory exists ---
    if !Path::new(&cfg.scratch_dir).exists() {
        fs::create_dir_all(&cfg.scratch_dir)?;
        tracing::info!("Created scratch directory at {}", cfg.scratch_dir);
    }
    if cfg.storage_provider == "local" && !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created artifact directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let database = db::connect(&cfg.database_url).await?;

    // --- Handle migration mode ---
    if migrate {
        db::apply_migrations(&database).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let records = RecordStore::new(database.clone());
    let parts = PartStore::new(&cfg.scratch_dir);
    let queue: JobQueue<ProcessingJob> =
        JobQueue::new(database.clone(), PROCESSING_QUEUE, QueueOptions::default());

    let storage_backend = storage::backend_from_config(&cfg)?;
    let transcoder = Arc::new(FfmpegTranscoder::new(&cfg.ffmpeg_path));
    if !transcoder.is_available().await {
        tracing::warn!(
            "ffmpeg not found at `{}`; video and non-WAV audio jobs will fail",
            cfg.ffmpeg_path
        );
    }

    // --- Recover jobs stranded by a previous crash, then spawn workers ---
    let recovered = queue.recover_stalled().await?;
    if recovered > 0 {
        tracing::info!("Recovered {} stalled processing jobs", recovered);
    }

    let worker = Arc::new(MediaWorker::new(
        records.clone(),
        storage_backend,
        transcoder,
    ));
    for _ in 0..cfg.workers.max(1) {
        tokio::spawn(run_worker(queue.clone(), worker.clone()));
    }

    // --- Build router ---
    let service = UploadService::new(records, parts, queue);
    let app: Router = routes::routes::routes().with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
