//! SQLite pool construction and schema migrations.
//!
//! Migrations are embedded at compile time and applied statement by
//! statement, so the binary (`--migrate`) and the test suite share one code
//! path.

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

const SCHEMA_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Open a connection pool against `database_url`, creating the database file
/// and the parent directory of a file-backed database when missing.
pub async fn connect(database_url: &str) -> Result<Arc<SqlitePool>> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    let db_file = db_path.split('?').next().unwrap_or(db_path);

    if db_file != ":memory:" {
        if let Some(parent) = Path::new(db_file).parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(Arc::new(pool))
}

/// Apply the embedded schema, one statement at a time.
pub async fn apply_migrations(db: &SqlitePool) -> Result<()> {
    let statements = SCHEMA_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}
