//! Entity database operations
//!
//! Entities are keyed by (kind, external_id). Relations are owned by the
//! entity that listed them and are replaced wholesale on every upsert.

use crate::models::{Entity, Relation, RemoteItem};
use oasync_common::{EntityKind, Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

/// Insert or update an entity from a remote record, returning its local id
pub async fn upsert_entity(
    pool: &SqlitePool,
    kind: EntityKind,
    item: &RemoteItem,
    sort_value: &str,
) -> Result<i64> {
    let fields = serde_json::to_string(&item.to_value())
        .map_err(|e| Error::Internal(format!("Encode entity fields failed: {}", e)))?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO entities (kind, external_id, title, content, fields, hero_media_external_id, sort_value)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(kind, external_id) DO UPDATE SET
            title = excluded.title,
            content = excluded.content,
            fields = excluded.fields,
            hero_media_external_id = excluded.hero_media_external_id,
            sort_value = excluded.sort_value,
            updated_at = CURRENT_TIMESTAMP
        RETURNING id
        "#,
    )
    .bind(kind.as_str())
    .bind(item.external_id())
    .bind(item.title(kind))
    .bind(item.content(kind))
    .bind(fields)
    .bind(item.hero_image_id())
    .bind(sort_value)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

pub async fn find_by_external_id(
    pool: &SqlitePool,
    kind: EntityKind,
    external_id: i64,
) -> Result<Option<Entity>> {
    let row = sqlx::query(
        r#"
        SELECT id, kind, external_id, title, content, fields, hero_media_external_id, sort_value
        FROM entities
        WHERE kind = ? AND external_id = ?
        "#,
    )
    .bind(kind.as_str())
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| entity_from_row(&r)).transpose()
}

/// All entities of a kind, ordered by external id
pub async fn list_entities(pool: &SqlitePool, kind: EntityKind) -> Result<Vec<Entity>> {
    let rows = sqlx::query(
        r#"
        SELECT id, kind, external_id, title, content, fields, hero_media_external_id, sort_value
        FROM entities
        WHERE kind = ?
        ORDER BY external_id
        "#,
    )
    .bind(kind.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(entity_from_row).collect()
}

/// (local id, external id) of every entity of a kind
pub async fn list_ids(pool: &SqlitePool, kind: EntityKind) -> Result<Vec<(i64, i64)>> {
    let ids = sqlx::query_as("SELECT id, external_id FROM entities WHERE kind = ? ORDER BY external_id")
        .bind(kind.as_str())
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

pub async fn update_sort_value(pool: &SqlitePool, id: i64, sort_value: &str) -> Result<()> {
    sqlx::query("UPDATE entities SET sort_value = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(sort_value)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete an entity with its relation and term rows
///
/// Media rows must be removed first by the caller so their blobs are
/// cleaned up too.
pub async fn delete_entity(pool: &SqlitePool, id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM entity_relations WHERE owner_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM entity_terms WHERE entity_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM media_assets WHERE parent_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM entities WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Replace the relation rows owned by an entity
pub async fn replace_relations(pool: &SqlitePool, owner_id: i64, relations: &[Relation]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM entity_relations WHERE owner_id = ?")
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

    for relation in relations {
        let roles = serde_json::to_string(&relation.roles)
            .map_err(|e| Error::Internal(format!("Encode roles failed: {}", e)))?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO entity_relations (owner_id, related_kind, related_external_id, roles)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(owner_id)
        .bind(relation.related_kind.as_str())
        .bind(relation.related_external_id)
        .bind(roles)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn list_relations(pool: &SqlitePool, owner_id: i64) -> Result<Vec<Relation>> {
    let rows = sqlx::query(
        r#"
        SELECT related_kind, related_external_id, roles
        FROM entity_relations
        WHERE owner_id = ?
        ORDER BY related_kind, related_external_id
        "#,
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let kind: String = row.get("related_kind");
            let roles: String = row.get("roles");
            Ok(Relation {
                related_kind: kind.parse()?,
                related_external_id: row.get("related_external_id"),
                roles: serde_json::from_str(&roles)
                    .map_err(|e| Error::Internal(format!("Decode roles failed: {}", e)))?,
            })
        })
        .collect()
}

fn entity_from_row(row: &SqliteRow) -> Result<Entity> {
    let kind: String = row.get("kind");
    let fields: String = row.get("fields");

    Ok(Entity {
        id: row.get("id"),
        kind: kind.parse()?,
        external_id: row.get("external_id"),
        title: row.get("title"),
        content: row.get("content"),
        fields: serde_json::from_str(&fields)
            .map_err(|e| Error::Internal(format!("Decode entity fields failed: {}", e)))?,
        hero_media_external_id: row.get("hero_media_external_id"),
        sort_value: row.get("sort_value"),
    })
}
