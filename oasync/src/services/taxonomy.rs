//! Taxonomy Reconciler
//!
//! Two-level keyword hierarchy: remote keyword categories become parent
//! terms and project keywords become their children. A category only
//! appears when at least one keyword belongs to it.

use crate::db::terms;
use crate::error::SyncResult;
use crate::models::{KeywordCategory, KeywordTerm, RemoteKeyword, TermLevel};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// A term the local taxonomy should contain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredTerm {
    pub level: TermLevel,
    pub external_id: i64,
    pub name: String,
    pub slug: String,
    pub parent_external_id: Option<i64>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaxonomyReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Lowercase, ASCII alphanumerics separated by single dashes
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Build the desired term set, parents first
///
/// Keywords whose category is unknown are dropped, as are categories
/// without keywords.
pub fn desired_terms(categories: &[KeywordCategory], keywords: &[RemoteKeyword]) -> Vec<DesiredTerm> {
    let mut parents = Vec::new();
    let mut children = Vec::new();

    for category in categories {
        let members: Vec<&RemoteKeyword> = keywords
            .iter()
            .filter(|k| k.category_id == category.id)
            .collect();
        if members.is_empty() {
            continue;
        }

        parents.push(DesiredTerm {
            level: TermLevel::Category,
            external_id: category.id,
            name: category.name.clone(),
            slug: slugify(&category.name),
            parent_external_id: None,
        });

        children.extend(members.into_iter().map(|k| DesiredTerm {
            level: TermLevel::Keyword,
            external_id: k.id,
            name: k.name.clone(),
            slug: slugify(&k.name),
            parent_external_id: Some(category.id),
        }));
    }

    parents.extend(children);
    parents
}

#[derive(Clone)]
pub struct TaxonomyReconciler {
    db: SqlitePool,
}

impl TaxonomyReconciler {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Bring local terms in line with `desired`
    ///
    /// Existing terms match by (level, external id), then by slug or name
    /// within the same level. Unmatched local terms are deleted before any
    /// insert so their slugs become free.
    pub async fn reconcile(&self, desired: &[DesiredTerm]) -> SyncResult<TaxonomyReport> {
        let mut report = TaxonomyReport::default();
        let existing = terms::list_terms(&self.db).await?;

        let mut matched: HashMap<(TermLevel, i64), &KeywordTerm> = HashMap::new();
        let mut claimed: HashSet<i64> = HashSet::new();

        for want in desired {
            let found = existing
                .iter()
                .find(|t| t.level == want.level && t.external_id == want.external_id && !claimed.contains(&t.id))
                .or_else(|| {
                    existing.iter().find(|t| {
                        t.level == want.level
                            && !claimed.contains(&t.id)
                            && (t.slug == want.slug || t.name.eq_ignore_ascii_case(&want.name))
                    })
                });
            if let Some(term) = found {
                claimed.insert(term.id);
                matched.insert((want.level, want.external_id), term);
            }
        }

        for term in existing.iter().filter(|t| !claimed.contains(&t.id)) {
            terms::delete_term(&self.db, term.id).await?;
            report.deleted += 1;
        }

        let mut category_ids: HashMap<i64, i64> = HashMap::new();

        for want in desired {
            let parent_term_id = want
                .parent_external_id
                .and_then(|parent| category_ids.get(&parent).copied());

            let term_id = match matched.get(&(want.level, want.external_id)) {
                Some(term) => {
                    let parent_unchanged = want.level == TermLevel::Category
                        || (term.parent_term_id == parent_term_id
                            && term.parent_external_id == want.parent_external_id);
                    if term.external_id != want.external_id || term.name != want.name || !parent_unchanged {
                        terms::update_term(
                            &self.db,
                            term.id,
                            want.external_id,
                            &want.name,
                            parent_term_id,
                            want.parent_external_id,
                        )
                        .await?;
                        report.updated += 1;
                    }
                    term.id
                }
                None => {
                    let slug = self.free_slug(&want.slug, want.external_id).await?;
                    let id = terms::insert_term(
                        &self.db,
                        want.level,
                        want.external_id,
                        &want.name,
                        &slug,
                        parent_term_id,
                        want.parent_external_id,
                    )
                    .await?;
                    report.created += 1;
                    id
                }
            };

            if want.level == TermLevel::Category {
                category_ids.insert(want.external_id, term_id);
            }
        }

        if report != TaxonomyReport::default() {
            info!(
                created = report.created,
                updated = report.updated,
                deleted = report.deleted,
                "Keyword taxonomy reconciled"
            );
        }

        Ok(report)
    }

    /// Replace an entity's keyword terms with those for `keyword_ids`
    ///
    /// Ids without a local keyword term are ignored. Returns the number of
    /// terms assigned.
    pub async fn assign(&self, entity_id: i64, keyword_ids: &[i64]) -> SyncResult<usize> {
        let index: HashMap<i64, i64> = terms::list_terms(&self.db)
            .await?
            .into_iter()
            .filter(|t| t.level == TermLevel::Keyword)
            .map(|t| (t.external_id, t.id))
            .collect();

        let mut term_ids = Vec::with_capacity(keyword_ids.len());
        for keyword_id in keyword_ids {
            match index.get(keyword_id) {
                Some(term_id) if !term_ids.contains(term_id) => term_ids.push(*term_id),
                Some(_) => {}
                None => debug!(entity_id, keyword_id, "Keyword has no local term"),
            }
        }

        terms::replace_entity_terms(&self.db, entity_id, &term_ids).await?;
        Ok(term_ids.len())
    }

    async fn free_slug(&self, base: &str, external_id: i64) -> SyncResult<String> {
        let base = if base.is_empty() {
            format!("term-{}", external_id)
        } else {
            base.to_string()
        };
        if !terms::slug_exists(&self.db, &base).await? {
            return Ok(base);
        }

        let mut candidate = format!("{}-{}", base, external_id);
        let mut n = 2;
        while terms::slug_exists(&self.db, &candidate).await? {
            candidate = format!("{}-{}-{}", base, external_id, n);
            n += 1;
        }
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteItem;
    use oasync_common::EntityKind;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        pool
    }

    fn category(id: i64, name: &str) -> KeywordCategory {
        KeywordCategory {
            id,
            name: name.to_string(),
        }
    }

    fn keyword(id: i64, name: &str, category_id: i64) -> RemoteKeyword {
        RemoteKeyword {
            id,
            name: name.to_string(),
            category_id,
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Mixed Use / Retail"), "mixed-use-retail");
        assert_eq!(slugify("  K-12  "), "k-12");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn test_desired_terms_drop_empty_categories_and_orphans() {
        let desired = desired_terms(
            &[category(1, "Sector"), category(2, "Empty")],
            &[keyword(10, "Health", 1), keyword(11, "Orphan", 99)],
        );

        assert_eq!(desired.len(), 2);
        assert_eq!(desired[0].level, TermLevel::Category);
        assert_eq!(desired[0].external_id, 1);
        assert_eq!(desired[1].parent_external_id, Some(1));
        assert_eq!(desired[1].slug, "health");
    }

    #[tokio::test]
    async fn test_reconcile_creates_updates_and_deletes() {
        let pool = setup().await;
        let reconciler = TaxonomyReconciler::new(pool.clone());

        let first = desired_terms(
            &[category(1, "Sector")],
            &[keyword(10, "Health", 1), keyword(11, "Civic", 1)],
        );
        let report = reconciler.reconcile(&first).await.unwrap();
        assert_eq!(report.created, 3);

        let second = desired_terms(&[category(1, "Sector")], &[keyword(10, "Healthcare", 1)]);
        let report = reconciler.reconcile(&second).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 0);

        let stored = terms::list_terms(&pool).await.unwrap();
        assert_eq!(stored.len(), 2);
        let child = stored.iter().find(|t| t.level == TermLevel::Keyword).unwrap();
        let parent = stored.iter().find(|t| t.level == TermLevel::Category).unwrap();
        assert_eq!(child.name, "Healthcare");
        assert_eq!(child.slug, "health");
        assert_eq!(child.parent_term_id, Some(parent.id));

        let again = reconciler.reconcile(&second).await.unwrap();
        assert_eq!(again, TaxonomyReport::default());
    }

    #[tokio::test]
    async fn test_slug_collision_across_levels() {
        let pool = setup().await;
        let reconciler = TaxonomyReconciler::new(pool.clone());

        let desired = desired_terms(&[category(1, "Timber")], &[keyword(10, "Timber", 1)]);
        reconciler.reconcile(&desired).await.unwrap();

        let stored = terms::list_terms(&pool).await.unwrap();
        let slugs: Vec<&str> = stored.iter().map(|t| t.slug.as_str()).collect();
        assert!(slugs.contains(&"timber"));
        assert!(slugs.contains(&"timber-10"));
    }

    #[tokio::test]
    async fn test_assign_replaces_and_clears() {
        let pool = setup().await;
        let reconciler = TaxonomyReconciler::new(pool.clone());
        reconciler
            .reconcile(&desired_terms(
                &[category(1, "Sector")],
                &[keyword(10, "Health", 1), keyword(11, "Civic", 1)],
            ))
            .await
            .unwrap();

        let item = RemoteItem::from_value(json!({"id": 5, "name": "Clinic"})).unwrap();
        let entity = crate::db::entities::upsert_entity(&pool, EntityKind::Project, &item, "")
            .await
            .unwrap();

        assert_eq!(reconciler.assign(entity, &[10, 11, 999]).await.unwrap(), 2);
        assert_eq!(reconciler.assign(entity, &[11]).await.unwrap(), 1);
        assert_eq!(terms::list_entity_term_ids(&pool, entity).await.unwrap().len(), 1);

        assert_eq!(reconciler.assign(entity, &[]).await.unwrap(), 0);
        assert!(terms::list_entity_term_ids(&pool, entity).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_desired_set_deletes_everything() {
        let pool = setup().await;
        let reconciler = TaxonomyReconciler::new(pool.clone());
        reconciler
            .reconcile(&desired_terms(&[category(1, "Sector")], &[keyword(10, "Health", 1)]))
            .await
            .unwrap();

        let report = reconciler.reconcile(&[]).await.unwrap();
        assert_eq!(report.deleted, 2);
        assert!(terms::list_terms(&pool).await.unwrap().is_empty());
    }
}
