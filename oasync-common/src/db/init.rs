//! Database initialization
//!
//! Opens (or creates) the SQLite database, applies connection pragmas and
//! makes sure the key-value `settings` table carries every default the sync
//! engine reads.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Persisted run status values
pub const STATUS_IDLE: &str = "idle";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_ERRORED: &str = "errored";

/// Busy timeout used until the `db_lock_retry_ms` setting has been read
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 250;

/// Connection options applied to every pooled connection
pub fn connect_options(db_path: &Path, busy_timeout_ms: u64) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        // WAL keeps status reads cheap while a step is writing checkpoints
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(busy_timeout_ms))
}

/// Initialize database connection and create the settings table if needed
///
/// The busy timeout lives in the settings table, so a single bootstrap
/// connection seeds defaults and reads it before the pool is opened.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let bootstrap = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options(db_path, DEFAULT_BUSY_TIMEOUT_MS))
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_settings_table(&bootstrap).await?;
    init_default_settings(&bootstrap).await?;

    let timeout_ms = sqlx::query_scalar::<_, i64>(
        "SELECT CAST(value AS INTEGER) FROM settings WHERE key = 'db_lock_retry_ms'",
    )
    .fetch_optional(&bootstrap)
    .await?
    .and_then(|ms| u64::try_from(ms).ok())
    .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS);
    bootstrap.close().await;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options(db_path, timeout_ms))
        .await?;

    info!("Database busy timeout set to {} ms", timeout_ms);

    Ok(pool)
}

/// Create the settings table
///
/// Stores configuration and all persisted engine state as key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or repair default settings
///
/// Missing keys are created; keys holding NULL are reset to the default.
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Run state
    ensure_setting(pool, "sync_status", STATUS_IDLE).await?;
    ensure_setting(pool, "sync_error_count", "0").await?;
    ensure_setting(pool, "sync_error_threshold", "10").await?;

    // Lock handling
    ensure_setting(pool, "db_max_lock_wait_ms", "5000").await?;
    ensure_setting(pool, "db_lock_retry_ms", "250").await?;

    Ok(())
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let existing: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match existing {
        None => {
            // INSERT OR IGNORE tolerates two processes initializing at once
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;
            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
        Some(None) => {
            warn!("Setting '{}' was NULL, resetting to default: {}", key, default_value);
            sqlx::query(
                "UPDATE settings SET value = ?, updated_at = CURRENT_TIMESTAMP WHERE key = ?",
            )
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;
        }
        Some(Some(_)) => {}
    }

    Ok(())
}
