//! Keyword taxonomy reconciliation during project passes

use oasync::db::{entities, settings, terms};
use oasync::models::{KeywordCategory, KeywordTerm, TermLevel};
use oasync::testing::{project_json, Harness};
use oasync_common::EntityKind;
use serde_json::json;

async fn setup() -> Harness {
    let h = Harness::new().await;
    h.publish_all().await;
    h.serve_listing(EntityKind::Employee, json!([]));
    settings::save_keyword_categories(
        &h.db,
        &[
            KeywordCategory { id: 1, name: "Sector".into() },
            KeywordCategory { id: 2, name: "Region".into() },
        ],
    )
    .await
    .unwrap();
    h
}

async fn run_pass(h: &Harness) {
    h.mark_running().await;
    h.run_to_completion().await;
}

async fn assigned_keywords(h: &Harness, project_external_id: i64) -> Vec<i64> {
    let project = entities::find_by_external_id(&h.db, EntityKind::Project, project_external_id)
        .await
        .unwrap()
        .unwrap();
    let all = terms::list_terms(&h.db).await.unwrap();
    let mut ids: Vec<i64> = terms::list_entity_term_ids(&h.db, project.id)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|term_id| all.iter().find(|t| t.id == term_id))
        .map(|t| t.external_id)
        .collect();
    ids.sort_unstable();
    ids
}

fn find_term(all: &[KeywordTerm], level: TermLevel, external_id: i64) -> Option<&KeywordTerm> {
    all.iter().find(|t| t.level == level && t.external_id == external_id)
}

#[tokio::test]
async fn test_referenced_keywords_become_terms_under_categories() {
    let h = setup().await;
    h.serve_listing(
        EntityKind::Project,
        json!([project_json(10, "Clinic", 0, &[7]), project_json(11, "Lab", 0, &[7, 8])]),
    );
    h.transport.route_json(
        "/ProjectKeywords",
        &[],
        json!([
            {"id": 7, "name": "Healthcare", "project_keyword_category_id": 1},
            {"id": 8, "name": "Research & Development", "project_keyword_category_id": 1}
        ]),
    );

    run_pass(&h).await;

    let all = terms::list_terms(&h.db).await.unwrap();
    let sector = find_term(&all, TermLevel::Category, 1).unwrap();
    assert_eq!(sector.slug, "sector");
    // Categories without referenced keywords are not created
    assert!(find_term(&all, TermLevel::Category, 2).is_none());

    let healthcare = find_term(&all, TermLevel::Keyword, 7).unwrap();
    assert_eq!(healthcare.parent_term_id, Some(sector.id));
    assert_eq!(healthcare.parent_external_id, Some(1));
    assert_eq!(find_term(&all, TermLevel::Keyword, 8).unwrap().slug, "research-development");

    assert_eq!(assigned_keywords(&h, 10).await, vec![7]);
    assert_eq!(assigned_keywords(&h, 11).await, vec![7, 8]);
}

#[tokio::test]
async fn test_keyword_assignment_is_replaced_on_next_pass() {
    let h = setup().await;
    h.transport.route_json(
        "/ProjectKeywords",
        &[],
        json!([
            {"id": 7, "name": "Healthcare", "project_keyword_category_id": 1},
            {"id": 9, "name": "Coastal", "project_keyword_category_id": 2}
        ]),
    );
    h.serve_listing(EntityKind::Project, json!([project_json(10, "Clinic", 0, &[7])]));
    run_pass(&h).await;
    let healthcare_id = find_term(&terms::list_terms(&h.db).await.unwrap(), TermLevel::Keyword, 7)
        .unwrap()
        .id;

    h.serve_listing(EntityKind::Project, json!([project_json(10, "Clinic", 0, &[9])]));
    h.transport.route_json(
        "/ProjectKeywords",
        &[],
        json!([{"id": 9, "name": "Coastal", "project_keyword_category_id": 2}]),
    );
    run_pass(&h).await;

    let all = terms::list_terms(&h.db).await.unwrap();
    assert!(all.iter().all(|t| t.id != healthcare_id));
    assert!(find_term(&all, TermLevel::Category, 1).is_none());
    assert!(find_term(&all, TermLevel::Category, 2).is_some());
    assert_eq!(assigned_keywords(&h, 10).await, vec![9]);
}

#[tokio::test]
async fn test_listing_without_keywords_clears_taxonomy_without_fetching() {
    let h = setup().await;
    h.transport.route_json(
        "/ProjectKeywords",
        &[],
        json!([{"id": 7, "name": "Healthcare", "project_keyword_category_id": 1}]),
    );
    h.serve_listing(EntityKind::Project, json!([project_json(10, "Clinic", 0, &[7])]));
    run_pass(&h).await;
    assert!(!terms::list_terms(&h.db).await.unwrap().is_empty());

    h.serve_listing(EntityKind::Project, json!([project_json(10, "Clinic", 0, &[])]));
    h.transport.reset_logs();
    run_pass(&h).await;

    assert_eq!(h.transport.api_request_count("/ProjectKeywords"), 0);
    assert!(terms::list_terms(&h.db).await.unwrap().is_empty());
    assert!(assigned_keywords(&h, 10).await.is_empty());
}

#[tokio::test]
async fn test_renamed_keyword_keeps_its_term() {
    let h = setup().await;
    h.serve_listing(EntityKind::Project, json!([project_json(10, "Clinic", 0, &[7])]));
    h.transport.route_json(
        "/ProjectKeywords",
        &[],
        json!([{"id": 7, "name": "Healthcare", "project_keyword_category_id": 1}]),
    );
    run_pass(&h).await;
    let before = find_term(&terms::list_terms(&h.db).await.unwrap(), TermLevel::Keyword, 7)
        .unwrap()
        .clone();

    h.transport.route_json(
        "/ProjectKeywords",
        &[],
        json!([{"id": 7, "name": "Health Care", "project_keyword_category_id": 1}]),
    );
    run_pass(&h).await;

    let after = find_term(&terms::list_terms(&h.db).await.unwrap(), TermLevel::Keyword, 7)
        .unwrap()
        .clone();
    assert_eq!(after.id, before.id);
    assert_eq!(after.name, "Health Care");
    assert_eq!(after.slug, before.slug);
}
