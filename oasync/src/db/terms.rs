//! Keyword term database operations

use crate::models::{KeywordTerm, TermLevel};
use oasync_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

pub async fn list_terms(pool: &SqlitePool) -> Result<Vec<KeywordTerm>> {
    let rows = sqlx::query(
        r#"
        SELECT id, level, external_id, name, slug, parent_term_id, parent_external_id
        FROM keyword_terms
        ORDER BY level, external_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(term_from_row).collect()
}

/// Insert a term, returning its local id
pub async fn insert_term(
    pool: &SqlitePool,
    level: TermLevel,
    external_id: i64,
    name: &str,
    slug: &str,
    parent_term_id: Option<i64>,
    parent_external_id: Option<i64>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO keyword_terms (level, external_id, name, slug, parent_term_id, parent_external_id)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(level.as_str())
    .bind(external_id)
    .bind(name)
    .bind(slug)
    .bind(parent_term_id)
    .bind(parent_external_id)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Refresh name, lookup metadata and parent of an existing term
pub async fn update_term(
    pool: &SqlitePool,
    id: i64,
    external_id: i64,
    name: &str,
    parent_term_id: Option<i64>,
    parent_external_id: Option<i64>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE keyword_terms
        SET external_id = ?, name = ?, parent_term_id = ?, parent_external_id = ?
        WHERE id = ?
        "#,
    )
    .bind(external_id)
    .bind(name)
    .bind(parent_term_id)
    .bind(parent_external_id)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete a term and its assignments; children lose their parent link
pub async fn delete_term(pool: &SqlitePool, id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM entity_terms WHERE term_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE keyword_terms SET parent_term_id = NULL WHERE parent_term_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM keyword_terms WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn slug_exists(pool: &SqlitePool, slug: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM keyword_terms WHERE slug = ?")
        .bind(slug)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Replace the full term set assigned to an entity
pub async fn replace_entity_terms(pool: &SqlitePool, entity_id: i64, term_ids: &[i64]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM entity_terms WHERE entity_id = ?")
        .bind(entity_id)
        .execute(&mut *tx)
        .await?;

    for term_id in term_ids {
        sqlx::query("INSERT OR IGNORE INTO entity_terms (entity_id, term_id) VALUES (?, ?)")
            .bind(entity_id)
            .bind(term_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn list_entity_term_ids(pool: &SqlitePool, entity_id: i64) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar("SELECT term_id FROM entity_terms WHERE entity_id = ? ORDER BY term_id")
        .bind(entity_id)
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

fn term_from_row(row: &SqliteRow) -> Result<KeywordTerm> {
    let level: String = row.get("level");

    Ok(KeywordTerm {
        id: row.get("id"),
        level: TermLevel::parse(&level)
            .ok_or_else(|| Error::Internal(format!("Unknown term level '{}'", level)))?,
        external_id: row.get("external_id"),
        name: row.get("name"),
        slug: row.get("slug"),
        parent_term_id: row.get("parent_term_id"),
        parent_external_id: row.get("parent_external_id"),
    })
}
