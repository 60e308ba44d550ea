//! Control surface tests: GetStatus, SetSortField and CheckCredentials

use oasync::db::{entities, settings};
use oasync::models::{FieldDescriptor, Frequency, RemoteItem, RunStatus, StepOutcome};
use oasync::testing::{employee_json, project_json, FakeResponse, Harness};
use oasync::SyncError;
use oasync_common::EntityKind;
use serde_json::json;
use std::time::Duration;

fn field(id: i64, rest_code: &str, built_in: bool) -> FieldDescriptor {
    FieldDescriptor {
        id,
        name: rest_code.to_string(),
        rest_code: rest_code.to_string(),
        display_type: "singleLine".to_string(),
        built_in,
    }
}

fn serve_catalogs(h: &Harness) {
    h.serve_empty_reference();
    h.transport.route_json(
        "/Fields",
        &[("field_type", "employee")],
        json!([
            {"id": 5, "name": "First Name", "rest_code": "first_name", "built_in": 1},
            {"id": 6, "name": "Last Name", "rest_code": "last_name", "built_in": 1},
            {"id": 7, "name": "Job Title", "rest_code": "job_title", "built_in": 1}
        ]),
    );
    h.transport.route_json(
        "/Fields",
        &[("field_type", "project")],
        json!([
            {"id": 1, "name": "Name", "rest_code": "name", "built_in": true},
            {"id": 40, "name": "Year", "rest_code": "year_completed", "built_in": false}
        ]),
    );
}

#[tokio::test]
async fn test_status_reports_progress_per_kind() {
    let h = Harness::with_budget(Duration::ZERO).await;
    h.publish_all().await;
    h.serve_listing(
        EntityKind::Employee,
        json!([employee_json(1, "Ada", "Lovelace"), employee_json(2, "Alan", "Turing")]),
    );
    h.serve_listing(
        EntityKind::Project,
        json!([
            project_json(10, "Bridge", 0, &[]),
            project_json(11, "Tunnel", 0, &[]),
            project_json(12, "Dam", 0, &[])
        ]),
    );
    h.mark_running().await;

    assert_eq!(h.engine.step().await.unwrap(), StepOutcome::Yielded);

    let status = h.control.get_status().await.unwrap();
    assert_eq!(status.status, RunStatus::Running);
    assert_eq!(status.error_count, 0);

    let employees = status.kind(EntityKind::Employee).unwrap();
    assert_eq!((employees.processed, employees.total), (1, 2));
    assert!(!employees.cleanup_done);

    // Projects have not started yet but already report their remote total
    let projects = status.kind(EntityKind::Project).unwrap();
    assert_eq!((projects.processed, projects.total), (0, 3));
}

#[tokio::test]
async fn test_sort_field_recomputes_from_stored_records() {
    let h = Harness::new().await;
    settings::save_field_catalog(&h.db, EntityKind::Project, &[field(1, "name", true), field(40, "year_completed", false)])
        .await
        .unwrap();

    for (id, name, year) in [(10, "Bridge", "2019"), (11, "Tunnel", "2004")] {
        let item = RemoteItem::from_value(json!({
            "id": id,
            "name": name,
            "code": format!("P-{}", id),
            "fields": [{"id": 40, "values": [year]}]
        }))
        .unwrap();
        entities::upsert_entity(&h.db, EntityKind::Project, &item, name).await.unwrap();
    }

    let updated = h.control.set_sort_field(EntityKind::Project, 40).await.unwrap();
    assert_eq!(updated, 2);
    assert!(h.transport.api_requests().is_empty());

    let sort_values: Vec<String> = entities::list_entities(&h.db, EntityKind::Project)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.sort_value)
        .collect();
    assert_eq!(sort_values, vec!["2019", "2004"]);
    assert_eq!(
        settings::load_options(&h.db).await.unwrap().project.sort_field,
        Some(40)
    );

    // Switching back to the name touches every record again; reapplying is a no-op
    assert_eq!(h.control.set_sort_field(EntityKind::Project, 1).await.unwrap(), 2);
    assert_eq!(h.control.set_sort_field(EntityKind::Project, 1).await.unwrap(), 0);
}

#[tokio::test]
async fn test_check_credentials_adopts_and_seeds_defaults() {
    let h = Harness::new().await;
    serve_catalogs(&h);
    h.transport.route_json("/Employees", &[("limit", "1")], json!([]));

    h.control.set_frequency(Frequency::Hourly).await.unwrap();
    assert!(h.scheduler.is_refresh_armed().await);

    h.control
        .check_credentials("http://www.studio.test", "42", "fresh-token")
        .await
        .unwrap();

    let (url, token_id, api_token) = settings::get_stored_credentials(&h.db).await.unwrap();
    assert_eq!(url.as_deref(), Some("https://studio.test/"));
    assert_eq!(token_id.as_deref(), Some("42"));
    assert_eq!(api_token.as_deref(), Some("fresh-token"));

    let adopted = h.client.credentials().await;
    assert_eq!(adopted.instance_url, "https://studio.test/");
    assert!(h
        .transport
        .api_requests()
        .iter()
        .any(|u| u.host_str() == Some("studio.test")));

    let options = settings::load_options(&h.db).await.unwrap();
    assert_eq!(options.frequency, Frequency::None);
    assert!(!h.scheduler.is_refresh_armed().await);
    assert_eq!(options.employee.criteria_fields, vec![5, 6]);
    assert_eq!(options.employee.sort_field, Some(5));
    assert_eq!(options.project.criteria_fields, vec![1]);
    assert_eq!(options.project.sort_field, Some(1));
}

#[tokio::test]
async fn test_rejected_credentials_change_nothing() {
    let h = Harness::new().await;
    h.transport
        .route("/Employees", &[], FakeResponse::Json(401, json!({"error": "bad token"})));

    let err = h
        .control
        .check_credentials("studio.test", "42", "wrong")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Auth));

    assert_eq!(settings::get_stored_credentials(&h.db).await.unwrap(), (None, None, None));
    assert_eq!(h.client.credentials().await.instance_url, "https://acme.test/");
    assert_eq!(settings::load_sync_run(&h.db).await.unwrap().error_count, 0);
}

#[tokio::test]
async fn test_license_rejection_is_distinct() {
    let h = Harness::new().await;
    h.transport
        .route("/Employees", &[], FakeResponse::Json(402, json!({"error": "license"})));

    let err = h
        .control
        .check_credentials("studio.test", "42", "token")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::License));
}
