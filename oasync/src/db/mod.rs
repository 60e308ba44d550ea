//! Local store for synchronized catalog data
//!
//! Engine state lives in the shared `settings` table; catalog data lives in
//! the tables created by [`init_tables`].

pub mod entities;
pub mod media;
pub mod settings;
pub mod terms;

use oasync_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open the database, seed default settings, create the catalog tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = oasync_common::db::init_database(db_path).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create the catalog tables if they don't exist
///
/// Safe to call repeatedly. Also creates the settings table so that
/// in-memory test pools get the full schema from one call.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    oasync_common::db::create_settings_table(pool).await?;
    oasync_common::db::init_default_settings(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            external_id INTEGER NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            fields TEXT NOT NULL DEFAULT '{}',
            hero_media_external_id INTEGER,
            sort_value TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (kind, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_relations (
            owner_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            related_kind TEXT NOT NULL,
            related_external_id INTEGER NOT NULL,
            roles TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (owner_id, related_kind, related_external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media_assets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            content_digest TEXT NOT NULL,
            blob_ref TEXT NOT NULL,
            source_url TEXT NOT NULL,
            parent_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            is_hero INTEGER NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (parent_id, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS keyword_terms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            level TEXT NOT NULL,
            external_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            parent_term_id INTEGER REFERENCES keyword_terms(id) ON DELETE SET NULL,
            parent_external_id INTEGER,
            UNIQUE (level, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_terms (
            entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            term_id INTEGER NOT NULL REFERENCES keyword_terms(id) ON DELETE CASCADE,
            PRIMARY KEY (entity_id, term_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("Catalog tables initialized");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_init_tables_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        init_tables(&pool).await.unwrap();
        init_tables(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert_eq!(
            tables,
            vec![
                "entities",
                "entity_relations",
                "entity_terms",
                "keyword_terms",
                "media_assets",
                "settings"
            ]
        );
    }
}
