//! Media asset database operations

use crate::models::{AssetMetadata, MediaAsset};
use oasync_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

const ASSET_COLUMNS: &str =
    "id, external_id, checksum, content_digest, blob_ref, source_url, parent_id, is_hero, metadata";

/// Asset of an entity by remote file id
pub async fn find_asset(pool: &SqlitePool, parent_id: i64, external_id: i64) -> Result<Option<MediaAsset>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM media_assets WHERE parent_id = ? AND external_id = ?",
        ASSET_COLUMNS
    ))
    .bind(parent_id)
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| asset_from_row(&r)).transpose()
}

/// Every asset attached to an entity
pub async fn list_assets(pool: &SqlitePool, parent_id: i64) -> Result<Vec<MediaAsset>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM media_assets WHERE parent_id = ? ORDER BY external_id",
        ASSET_COLUMNS
    ))
    .bind(parent_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(asset_from_row).collect()
}

/// Insert a freshly downloaded asset, returning its local id
pub async fn insert_asset(pool: &SqlitePool, asset: &MediaAsset) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO media_assets
            (external_id, checksum, content_digest, blob_ref, source_url, parent_id, is_hero, metadata)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(asset.external_id)
    .bind(&asset.checksum)
    .bind(&asset.content_digest)
    .bind(&asset.blob_ref)
    .bind(&asset.source_url)
    .bind(asset.parent_id)
    .bind(asset.is_hero)
    .bind(encode_metadata(&asset.metadata)?)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Refresh mutable metadata and the hero flag; bytes are untouched
pub async fn update_asset_metadata(
    pool: &SqlitePool,
    id: i64,
    metadata: &AssetMetadata,
    is_hero: bool,
) -> Result<()> {
    sqlx::query(
        "UPDATE media_assets SET metadata = ?, is_hero = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(encode_metadata(metadata)?)
    .bind(is_hero)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Make one asset the entity's hero and clear the flag on the others
pub async fn bind_hero(pool: &SqlitePool, parent_id: i64, asset_id: i64) -> Result<()> {
    sqlx::query("UPDATE media_assets SET is_hero = (id = ?) WHERE parent_id = ?")
        .bind(asset_id)
        .bind(parent_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_asset_row(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM media_assets WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Number of asset rows pointing at a blob file
pub async fn blob_ref_count(pool: &SqlitePool, blob_ref: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_assets WHERE blob_ref = ?")
        .bind(blob_ref)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// A stored blob of the same remote file and checksum under any parent
///
/// Returns `(blob_ref, content_digest, source_url)`.
pub async fn find_shared_blob(
    pool: &SqlitePool,
    external_id: i64,
    checksum: &str,
) -> Result<Option<(String, String, String)>> {
    let row = sqlx::query_as(
        r#"
        SELECT blob_ref, content_digest, source_url
        FROM media_assets
        WHERE external_id = ? AND checksum = ?
        ORDER BY id
        LIMIT 1
        "#,
    )
    .bind(external_id)
    .bind(checksum)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

fn encode_metadata(metadata: &AssetMetadata) -> Result<String> {
    serde_json::to_string(metadata).map_err(|e| Error::Internal(format!("Encode metadata failed: {}", e)))
}

fn asset_from_row(row: &SqliteRow) -> Result<MediaAsset> {
    let metadata: String = row.get("metadata");

    Ok(MediaAsset {
        id: row.get("id"),
        external_id: row.get("external_id"),
        checksum: row.get("checksum"),
        content_digest: row.get("content_digest"),
        blob_ref: row.get("blob_ref"),
        source_url: row.get("source_url"),
        parent_id: row.get("parent_id"),
        is_hero: row.get("is_hero"),
        metadata: serde_json::from_str(&metadata)
            .map_err(|e| Error::Internal(format!("Decode metadata failed: {}", e)))?,
    })
}
