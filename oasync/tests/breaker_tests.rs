//! Circuit breaker behavior of the remote data client

use oasync::db::settings;
use oasync::models::{RunStatus, StepOutcome};
use oasync::services::requests;
use oasync::testing::{employee_json, FakeResponse, Harness};
use oasync::SyncError;
use oasync_common::events::SyncEvent;
use oasync_common::EntityKind;
use serde_json::json;

#[tokio::test]
async fn test_tenth_consecutive_failure_terminates_run() {
    let h = Harness::new().await;
    h.publish_all().await;
    h.transport
        .route("/Employees", &[], FakeResponse::Json(500, json!({"error": "down"})));
    h.mark_running().await;
    let mut rx = h.event_bus.subscribe();

    for attempt in 1..10 {
        assert_eq!(h.engine.step().await.unwrap(), StepOutcome::Aborted);
        assert_eq!(settings::load_sync_run(&h.db).await.unwrap().error_count, attempt);
    }

    let err = h.engine.step().await.unwrap_err();
    assert!(err.is_terminal());
    assert!(matches!(
        err,
        SyncError::Terminated {
            error_count: 10,
            threshold: 10
        }
    ));
    assert_eq!(settings::get_run_status(&h.db).await.unwrap(), RunStatus::Errored);

    let mut tripped = false;
    while let Ok(event) = rx.try_recv() {
        tripped |= matches!(event, SyncEvent::BreakerTripped { error_count: 10, .. });
    }
    assert!(tripped);

    // Errored is not Running: no further remote work
    h.transport.reset_logs();
    assert_eq!(h.engine.step().await.unwrap(), StepOutcome::NotRunning);
    assert!(h.transport.api_requests().is_empty());
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let h = Harness::new().await;
    h.publish_all().await;
    h.transport.route("/Employees", &[], FakeResponse::NetworkError);
    h.mark_running().await;

    for _ in 0..3 {
        assert_eq!(h.engine.step().await.unwrap(), StepOutcome::Aborted);
    }
    assert_eq!(settings::load_sync_run(&h.db).await.unwrap().error_count, 3);

    h.serve_listing(EntityKind::Employee, json!([employee_json(1, "Ada", "Lovelace")]));
    h.serve_listing(EntityKind::Project, json!([]));
    assert_eq!(h.run_to_completion().await, StepOutcome::Completed);

    assert_eq!(settings::load_sync_run(&h.db).await.unwrap().error_count, 0);
}

#[tokio::test]
async fn test_status_codes_map_to_error_kinds() {
    let h = Harness::new().await;
    h.transport
        .route("/Employees", &[], FakeResponse::Json(401, json!({"error": "auth"})));
    h.transport
        .route("/Projects", &[], FakeResponse::Json(402, json!({"error": "license"})));
    h.transport
        .route("/GridColumns", &[], FakeResponse::Json(200, json!("not an array")));

    let auth = h.client.fetch(&requests::credential_check_request()).await.unwrap_err();
    assert!(matches!(auth, SyncError::Auth));

    let license = h
        .client
        .fetch(&requests::ApiRequest::new("/Projects"))
        .await
        .unwrap_err();
    assert!(matches!(license, SyncError::License));
    assert_eq!(settings::load_sync_run(&h.db).await.unwrap().error_count, 2);

    // Well-formed JSON of the wrong shape is a 2xx and resets the counter
    let columns = h
        .client
        .fetch_as::<Vec<oasync::models::GridColumn>>(&requests::grid_columns_request(None))
        .await
        .unwrap_err();
    assert!(matches!(columns, SyncError::MalformedResponse(_)));
    assert_eq!(settings::load_sync_run(&h.db).await.unwrap().error_count, 0);
}

#[tokio::test]
async fn test_failed_downloads_do_not_count() {
    let h = Harness::new().await;
    h.transport
        .serve_download("https://cdn.test/files/missing.jpg", FakeResponse::NetworkError);

    for _ in 0..12 {
        let err = h
            .client
            .download("https://cdn.test/files/missing.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MediaDownload(_)));
    }

    let run = settings::load_sync_run(&h.db).await.unwrap();
    assert_eq!(run.error_count, 0);
    assert_eq!(run.status, RunStatus::Idle);
}

#[tokio::test]
async fn test_threshold_is_read_from_settings() {
    let h = Harness::new().await;
    settings::set_setting(&h.db, settings::KEY_ERROR_THRESHOLD, 2).await.unwrap();
    h.transport.route("/Projects", &[], FakeResponse::NetworkError);
    let request = requests::ApiRequest::new("/Projects");

    assert!(matches!(h.client.fetch(&request).await, Err(SyncError::Transport(_))));
    assert!(h.client.fetch(&request).await.unwrap_err().is_terminal());
    assert_eq!(settings::get_run_status(&h.db).await.unwrap(), RunStatus::Errored);
}
