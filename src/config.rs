use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Scratch root for part blobs and assembled artifacts awaiting processing.
    pub scratch_dir: String,
    /// Root directory for the local storage backend.
    pub storage_dir: String,
    /// Public base URL used to build local artifact URLs.
    pub base_url: String,
    pub database_url: String,
    /// Storage backend selector: `local` or `remote`.
    pub storage_provider: String,
    pub remote_url: Option<String>,
    pub remote_key: Option<String>,
    pub remote_bucket: String,
    /// ffmpeg binary used by the transcoder client.
    pub ffmpeg_path: String,
    /// Number of concurrent processing workers.
    pub workers: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable media upload and processing service")]
pub struct Args {
    /// Host to bind to (overrides MEETING_INGEST_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEETING_INGEST_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Scratch directory for in-flight uploads (overrides MEETING_INGEST_SCRATCH_DIR)
    #[arg(long)]
    pub scratch_dir: Option<String>,

    /// Directory for the local storage backend (overrides MEETING_INGEST_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Public base URL (overrides MEETING_INGEST_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Database URL (overrides MEETING_INGEST_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Storage provider, `local` or `remote` (overrides MEETING_INGEST_STORAGE_PROVIDER)
    #[arg(long)]
    pub storage_provider: Option<String>,

    /// ffmpeg binary path (overrides MEETING_INGEST_FFMPEG_PATH)
    #[arg(long)]
    pub ffmpeg_path: Option<String>,

    /// Worker count (overrides MEETING_INGEST_WORKERS)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("MEETING_INGEST_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("MEETING_INGEST_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing MEETING_INGEST_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading MEETING_INGEST_PORT"),
        };
        let env_scratch =
            env::var("MEETING_INGEST_SCRATCH_DIR").unwrap_or_else(|_| "./data/scratch".into());
        let env_storage =
            env::var("MEETING_INGEST_STORAGE_DIR").unwrap_or_else(|_| "./data/artifacts".into());
        let env_base_url = env::var("MEETING_INGEST_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into());
        let env_db = env::var("MEETING_INGEST_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/meeting_ingest.db".into());
        let env_provider =
            env::var("MEETING_INGEST_STORAGE_PROVIDER").unwrap_or_else(|_| "local".into());
        let env_remote_url = env::var("MEETING_INGEST_REMOTE_URL").ok();
        let env_remote_key = env::var("MEETING_INGEST_REMOTE_KEY").ok();
        let env_remote_bucket =
            env::var("MEETING_INGEST_REMOTE_BUCKET").unwrap_or_else(|_| "meeting-audio".into());
        let env_ffmpeg = env::var("MEETING_INGEST_FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".into());
        let env_workers = match env::var("MEETING_INGEST_WORKERS") {
            Ok(value) => value
                .parse::<usize>()
                .with_context(|| format!("parsing MEETING_INGEST_WORKERS value `{}`", value))?,
            Err(env::VarError::NotPresent) => 2,
            Err(err) => return Err(err).context("reading MEETING_INGEST_WORKERS"),
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            scratch_dir: args.scratch_dir.unwrap_or(env_scratch),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            base_url: args.base_url.unwrap_or(env_base_url),
            database_url: args.database_url.unwrap_or(env_db),
            storage_provider: args.storage_provider.unwrap_or(env_provider),
            remote_url: env_remote_url,
            remote_key: env_remote_key,
            remote_bucket: env_remote_bucket,
            ffmpeg_path: args.ffmpeg_path.unwrap_or(env_ffmpeg),
            workers: args.workers.unwrap_or(env_workers),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
