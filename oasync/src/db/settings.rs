//! Settings database operations
//!
//! All engine state that must survive between steps is stored here as
//! key-value pairs: run status, breaker counter, per-kind pass cursors,
//! options, credentials and the reference-data cache.

use crate::models::{
    FieldDescriptor, GridColumn, KeywordCategory, RunStatus, SyncOptions, SyncRun, SyncState,
};
use oasync_common::{EntityKind, Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Pool, Sqlite};

pub const KEY_SYNC_STATUS: &str = "sync_status";
pub const KEY_ERROR_COUNT: &str = "sync_error_count";
pub const KEY_ERROR_THRESHOLD: &str = "sync_error_threshold";
pub const KEY_SYNC_OPTIONS: &str = "sync_options";
pub const KEY_MAX_LOCK_WAIT_MS: &str = "db_max_lock_wait_ms";
pub const KEY_INSTANCE_URL: &str = "credentials.instance_url";
pub const KEY_TOKEN_ID: &str = "credentials.token_id";
pub const KEY_API_TOKEN: &str = "credentials.api_token";
pub const KEY_GRID_COLUMNS: &str = "reference.grid_columns";
pub const KEY_KEYWORD_CATEGORIES: &str = "reference.keyword_categories";

/// Breaker threshold when the setting is missing
pub const DEFAULT_ERROR_THRESHOLD: i64 = 10;

fn sync_state_key(kind: EntityKind) -> String {
    format!("sync_state.{}", kind)
}

fn field_catalog_key(kind: EntityKind) -> String {
    format!("reference.fields.{}", kind)
}

// ============================================================================
// Run status and breaker counter
// ============================================================================

/// Current run status; a missing row reads as Idle
pub async fn get_run_status(db: &Pool<Sqlite>) -> Result<RunStatus> {
    match get_setting::<String>(db, KEY_SYNC_STATUS).await? {
        Some(value) => value.parse::<RunStatus>().map_err(Error::Config),
        None => Ok(RunStatus::Idle),
    }
}

pub async fn set_run_status(db: &Pool<Sqlite>, status: RunStatus) -> Result<()> {
    set_setting(db, KEY_SYNC_STATUS, status.as_str()).await
}

/// Atomically move the run to Running unless it already is
///
/// Returns true for the single caller that performed the transition.
pub async fn try_claim_run(db: &Pool<Sqlite>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE settings SET value = ?, updated_at = CURRENT_TIMESTAMP
         WHERE key = ? AND value <> ?",
    )
    .bind(RunStatus::Running.as_str())
    .bind(KEY_SYNC_STATUS)
    .bind(RunStatus::Running.as_str())
    .execute(db)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(true);
    }

    // Fresh database without the status row
    let inserted = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(KEY_SYNC_STATUS)
        .bind(RunStatus::Running.as_str())
        .execute(db)
        .await?;

    Ok(inserted.rows_affected() == 1)
}

pub async fn load_sync_run(db: &Pool<Sqlite>) -> Result<SyncRun> {
    Ok(SyncRun {
        status: get_run_status(db).await?,
        error_count: get_setting(db, KEY_ERROR_COUNT).await?.unwrap_or(0),
        error_threshold: error_threshold(db).await?,
    })
}

pub async fn error_threshold(db: &Pool<Sqlite>) -> Result<i64> {
    get_setting(db, KEY_ERROR_THRESHOLD)
        .await
        .map(|opt| opt.unwrap_or(DEFAULT_ERROR_THRESHOLD))
}

/// Increment the consecutive failure counter, returning the new value
pub async fn increment_error_count(db: &Pool<Sqlite>) -> Result<i64> {
    let updated: Option<i64> = sqlx::query_scalar(
        "UPDATE settings
         SET value = CAST(COALESCE(CAST(value AS INTEGER), 0) + 1 AS TEXT),
             updated_at = CURRENT_TIMESTAMP
         WHERE key = ?
         RETURNING CAST(value AS INTEGER)",
    )
    .bind(KEY_ERROR_COUNT)
    .fetch_optional(db)
    .await?;

    match updated {
        Some(count) => Ok(count),
        None => {
            set_setting(db, KEY_ERROR_COUNT, 1).await?;
            Ok(1)
        }
    }
}

pub async fn reset_error_count(db: &Pool<Sqlite>) -> Result<()> {
    set_setting(db, KEY_ERROR_COUNT, 0).await
}

// ============================================================================
// Per-kind pass state
// ============================================================================

/// Cursor for a kind; a missing row is a fresh pass
pub async fn load_sync_state(db: &Pool<Sqlite>, kind: EntityKind) -> Result<SyncState> {
    get_json(db, &sync_state_key(kind))
        .await
        .map(|opt| opt.unwrap_or_default())
}

pub async fn save_sync_state(db: &Pool<Sqlite>, kind: EntityKind, state: &SyncState) -> Result<()> {
    set_json(db, &sync_state_key(kind), state).await
}

/// Forget every kind's cursor (natural pass completion only)
pub async fn clear_sync_states(db: &Pool<Sqlite>) -> Result<()> {
    for kind in EntityKind::ALL {
        delete_setting(db, &sync_state_key(kind)).await?;
    }
    Ok(())
}

// ============================================================================
// Options, credentials, reference cache
// ============================================================================

pub async fn load_options(db: &Pool<Sqlite>) -> Result<SyncOptions> {
    get_json(db, KEY_SYNC_OPTIONS)
        .await
        .map(|opt| opt.unwrap_or_default())
}

pub async fn save_options(db: &Pool<Sqlite>, options: &SyncOptions) -> Result<()> {
    set_json(db, KEY_SYNC_OPTIONS, options).await
}

pub async fn max_lock_wait_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting(db, KEY_MAX_LOCK_WAIT_MS)
        .await
        .map(|opt| opt.unwrap_or(5000))
}

/// Stored credential fields (instance URL, token id, API token)
pub async fn get_stored_credentials(
    db: &Pool<Sqlite>,
) -> Result<(Option<String>, Option<String>, Option<String>)> {
    Ok((
        get_setting(db, KEY_INSTANCE_URL).await?,
        get_setting(db, KEY_TOKEN_ID).await?,
        get_setting(db, KEY_API_TOKEN).await?,
    ))
}

pub async fn set_stored_credentials(
    db: &Pool<Sqlite>,
    instance_url: &str,
    token_id: &str,
    api_token: &str,
) -> Result<()> {
    set_setting(db, KEY_INSTANCE_URL, instance_url).await?;
    set_setting(db, KEY_TOKEN_ID, token_id).await?;
    set_setting(db, KEY_API_TOKEN, api_token).await
}

pub async fn load_field_catalog(db: &Pool<Sqlite>, kind: EntityKind) -> Result<Vec<FieldDescriptor>> {
    get_json(db, &field_catalog_key(kind))
        .await
        .map(|opt| opt.unwrap_or_default())
}

pub async fn save_field_catalog(
    db: &Pool<Sqlite>,
    kind: EntityKind,
    fields: &[FieldDescriptor],
) -> Result<()> {
    set_json(db, &field_catalog_key(kind), &fields).await
}

pub async fn load_grid_columns(db: &Pool<Sqlite>) -> Result<Vec<GridColumn>> {
    get_json(db, KEY_GRID_COLUMNS)
        .await
        .map(|opt| opt.unwrap_or_default())
}

pub async fn save_grid_columns(db: &Pool<Sqlite>, columns: &[GridColumn]) -> Result<()> {
    set_json(db, KEY_GRID_COLUMNS, &columns).await
}

pub async fn load_keyword_categories(db: &Pool<Sqlite>) -> Result<Vec<KeywordCategory>> {
    get_json(db, KEY_KEYWORD_CATEGORIES)
        .await
        .map(|opt| opt.unwrap_or_default())
}

pub async fn save_keyword_categories(db: &Pool<Sqlite>, categories: &[KeywordCategory]) -> Result<()> {
    set_json(db, KEY_KEYWORD_CATEGORIES, &categories).await
}

// ============================================================================
// Generic accessors
// ============================================================================

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((Some(value),)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

pub async fn delete_setting(db: &Pool<Sqlite>, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM settings WHERE key = ?")
        .bind(key)
        .execute(db)
        .await?;
    Ok(())
}

/// JSON-encoded setting getter
pub async fn get_json<T: DeserializeOwned>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    match get_setting::<String>(db, key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| Error::Config(format!("Decode setting '{}' failed: {}", key, e))),
        None => Ok(None),
    }
}

/// JSON-encoded setting setter
pub async fn set_json<T: Serialize + ?Sized>(db: &Pool<Sqlite>, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Encode setting '{}' failed: {}", key, e)))?;
    set_setting(db, key, raw).await
}

// ============================================================================
// Tests
// ============================================================================
