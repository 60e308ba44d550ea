//! Integration tests for media ingestion during a pass

use oasync::db::{entities, media, settings};
use oasync::models::MediaAsset;
use oasync::testing::{file_url, project_json, FakeResponse, Harness};
use oasync_common::EntityKind;
use serde_json::json;

async fn project_assets(h: &Harness, external_id: i64) -> Vec<MediaAsset> {
    let project = entities::find_by_external_id(&h.db, EntityKind::Project, external_id)
        .await
        .unwrap()
        .unwrap();
    media::list_assets(&h.db, project.id).await.unwrap()
}

async fn run_pass(h: &Harness) {
    h.mark_running().await;
    h.run_to_completion().await;
}

fn setup(h: &Harness) {
    h.serve_listing(EntityKind::Employee, json!([]));
}

#[tokio::test]
async fn test_hero_and_gallery_are_downloaded_once() {
    let h = Harness::new().await;
    h.publish_all().await;
    setup(&h);
    h.serve_listing(EntityKind::Project, json!([project_json(10, "Bridge", 500, &[])]));
    h.serve_hero(500, "aa", b"hero");
    h.serve_gallery(10, &[(501, "bb"), (502, "cc")]);

    run_pass(&h).await;

    assert_eq!(h.transport.download_count(), 3);
    let assets = project_assets(&h, 10).await;
    assert_eq!(assets.len(), 3);

    let hero: Vec<i64> = assets.iter().filter(|a| a.is_hero).map(|a| a.external_id).collect();
    assert_eq!(hero, vec![500]);
    for asset in &assets {
        assert!(h.ingestor.blobs().path(&asset.blob_ref).exists());
        assert_eq!(asset.content_digest.len(), 64);
    }

    h.transport.reset_logs();
    run_pass(&h).await;
    assert_eq!(h.transport.download_count(), 0);
    assert_eq!(project_assets(&h, 10).await.len(), 3);
}

#[tokio::test]
async fn test_changed_checksum_replaces_asset() {
    let h = Harness::new().await;
    h.publish_all().await;
    setup(&h);
    h.serve_listing(EntityKind::Project, json!([project_json(10, "Bridge", 500, &[])]));
    h.serve_hero(500, "old", b"first edit");

    run_pass(&h).await;
    let before = project_assets(&h, 10).await;
    assert_eq!(before.len(), 1);
    let old_blob = before[0].blob_ref.clone();

    h.serve_hero(500, "new", b"second edit");
    h.transport.reset_logs();
    run_pass(&h).await;

    assert_eq!(h.transport.downloads(), vec![file_url(500, "new")]);
    let after = project_assets(&h, 10).await;
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].checksum, "new");
    assert!(after[0].is_hero);
    assert_ne!(after[0].blob_ref, old_blob);
    assert!(!h.ingestor.blobs().path(&old_blob).exists());
}

#[tokio::test]
async fn test_blob_is_shared_across_parents() {
    let h = Harness::new().await;
    h.publish_all().await;
    setup(&h);
    h.serve_listing(
        EntityKind::Project,
        json!([project_json(10, "Bridge", 0, &[]), project_json(11, "Tunnel", 0, &[])]),
    );
    h.serve_gallery(10, &[(600, "dd")]);
    h.serve_gallery(11, &[(600, "dd")]);

    run_pass(&h).await;

    assert_eq!(h.transport.download_count(), 1);
    let bridge = project_assets(&h, 10).await;
    let tunnel = project_assets(&h, 11).await;
    assert_eq!(bridge[0].blob_ref, tunnel[0].blob_ref);

    // Dropping one parent keeps the blob the other still references
    h.serve_listing(EntityKind::Project, json!([project_json(10, "Bridge", 0, &[])]));
    run_pass(&h).await;

    assert!(entities::find_by_external_id(&h.db, EntityKind::Project, 11)
        .await
        .unwrap()
        .is_none());
    assert!(h.ingestor.blobs().path(&bridge[0].blob_ref).exists());
}

#[tokio::test]
async fn test_gallery_respects_image_limit_and_excludes_hero() {
    let h = Harness::new().await;
    h.publish_all().await;
    let mut options = settings::load_options(&h.db).await.unwrap();
    options.project.gallery.image_limit = 2;
    settings::save_options(&h.db, &options).await.unwrap();

    setup(&h);
    h.serve_listing(EntityKind::Project, json!([project_json(10, "Bridge", 701, &[])]));
    h.serve_hero(701, "h1", b"hero");
    h.serve_gallery(10, &[(701, "h1"), (702, "g2"), (703, "g3"), (704, "g4")]);

    run_pass(&h).await;

    let mut ids: Vec<i64> = project_assets(&h, 10).await.iter().map(|a| a.external_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![701, 702, 703]);
}

#[tokio::test]
async fn test_zero_image_limit_skips_gallery_lookup() {
    let h = Harness::new().await;
    h.publish_all().await;
    let mut options = settings::load_options(&h.db).await.unwrap();
    options.project.gallery.image_limit = 0;
    settings::save_options(&h.db, &options).await.unwrap();

    setup(&h);
    h.serve_listing(EntityKind::Project, json!([project_json(10, "Bridge", 0, &[])]));
    h.serve_gallery(10, &[(801, "x1")]);

    run_pass(&h).await;

    let gallery_lookups = h
        .transport
        .api_requests()
        .iter()
        .filter(|url| url.query_pairs().any(|(k, _)| k == "project_id"))
        .count();
    assert_eq!(gallery_lookups, 0);
    assert!(project_assets(&h, 10).await.is_empty());
}

#[tokio::test]
async fn test_failed_download_skips_only_that_asset() {
    let h = Harness::new().await;
    h.publish_all().await;
    setup(&h);
    h.serve_listing(EntityKind::Project, json!([project_json(10, "Bridge", 0, &[])]));
    h.serve_gallery(10, &[(901, "ok"), (902, "gone")]);
    h.transport
        .serve_download(&file_url(902, "gone"), FakeResponse::Bytes(500, Vec::new()));

    run_pass(&h).await;

    let ids: Vec<i64> = project_assets(&h, 10).await.iter().map(|a| a.external_id).collect();
    assert_eq!(ids, vec![901]);
    assert_eq!(settings::load_sync_run(&h.db).await.unwrap().error_count, 0);
}

#[tokio::test]
async fn test_failed_gallery_fetch_keeps_existing_media() {
    let h = Harness::new().await;
    h.publish_all().await;
    setup(&h);
    h.serve_listing(EntityKind::Project, json!([project_json(10, "Bridge", 0, &[])]));
    h.serve_gallery(10, &[(1001, "k1"), (1002, "k2")]);

    run_pass(&h).await;
    assert_eq!(project_assets(&h, 10).await.len(), 2);

    h.transport.route(
        "/Files",
        &[("project_id", "10")],
        FakeResponse::Json(500, json!({"error": "boom"})),
    );
    run_pass(&h).await;

    assert_eq!(project_assets(&h, 10).await.len(), 2);
}
