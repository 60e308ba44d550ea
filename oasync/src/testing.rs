//! Test support: scripted transport and fixtures
//!
//! [`FakeTransport`] answers catalog requests from a route table and media
//! downloads from a URL map, logging both so tests can count remote calls.
//! [`Harness`] wires the whole engine against it with an in-memory database.

use crate::config::Credentials;
use crate::error::{SyncError, SyncResult};
use crate::services::{
    BlobStore, MediaIngestor, ReconciliationEngine, RemoteDataClient, Scheduler, SyncControl,
    TaxonomyReconciler, Transport, TransportRequest, TransportResponse,
};
use async_trait::async_trait;
use oasync_common::events::EventBus;
use oasync_common::EntityKind;
use reqwest::Url;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Scripted reply
#[derive(Debug, Clone)]
pub enum FakeResponse {
    Json(u16, Value),
    Bytes(u16, Vec<u8>),
    /// No HTTP status at all (connect failure, timeout)
    NetworkError,
}

impl FakeResponse {
    fn into_result(self) -> SyncResult<TransportResponse> {
        match self {
            FakeResponse::Json(status, body) => Ok(TransportResponse {
                status,
                body: serde_json::to_vec(&body)?,
            }),
            FakeResponse::Bytes(status, body) => Ok(TransportResponse { status, body }),
            FakeResponse::NetworkError => Err(SyncError::Transport("connection refused".into())),
        }
    }
}

#[derive(Debug, Clone)]
struct Route {
    path: String,
    query: Vec<(String, String)>,
    response: FakeResponse,
}

/// In-memory [`Transport`]
///
/// Authorized requests are catalog calls, routed by the path after
/// `/REST/1` plus any required query pairs; the most recently added
/// matching route wins. Unauthorized requests are downloads, looked up by
/// full URL. Anything unmatched is a 404.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    downloads: Mutex<HashMap<String, FakeResponse>>,
    api_log: Mutex<Vec<Url>>,
    download_log: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, path: &str, query: &[(&str, &str)], response: FakeResponse) {
        self.routes.lock().unwrap().push(Route {
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            response,
        });
    }

    pub fn route_json(&self, path: &str, query: &[(&str, &str)], body: Value) {
        self.route(path, query, FakeResponse::Json(200, body));
    }

    pub fn serve_download(&self, url: &str, response: FakeResponse) {
        self.downloads.lock().unwrap().insert(url.to_string(), response);
    }

    /// Every catalog URL requested so far
    pub fn api_requests(&self) -> Vec<Url> {
        self.api_log.lock().unwrap().clone()
    }

    /// Catalog requests whose path (after `/REST/1`) equals `path`
    pub fn api_request_count(&self, path: &str) -> usize {
        self.api_log
            .lock()
            .unwrap()
            .iter()
            .filter(|url| api_path(url) == path)
            .count()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.download_log.lock().unwrap().clone()
    }

    pub fn download_count(&self) -> usize {
        self.download_log.lock().unwrap().len()
    }

    pub fn reset_logs(&self) {
        self.api_log.lock().unwrap().clear();
        self.download_log.lock().unwrap().clear();
    }

    fn answer_api(&self, url: &Url) -> FakeResponse {
        let path = api_path(url);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        self.routes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|route| route.path == path && route.query.iter().all(|q| pairs.contains(q)))
            .map(|route| route.response.clone())
            .unwrap_or_else(|| FakeResponse::Json(404, json!({"error": "no route"})))
    }
}

fn api_path(url: &Url) -> String {
    url.path().trim_start_matches("/REST/1").to_string()
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, request: TransportRequest) -> SyncResult<TransportResponse> {
        if request.authorization.is_some() {
            self.api_log.lock().unwrap().push(request.url.clone());
            self.answer_api(&request.url).into_result()
        } else {
            let url = request.url.to_string();
            self.download_log.lock().unwrap().push(url.clone());
            let response = self
                .downloads
                .lock()
                .unwrap()
                .get(&url)
                .cloned()
                .unwrap_or(FakeResponse::Bytes(404, Vec::new()));
            response.into_result()
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Single-connection in-memory database with all tables
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    crate::db::init_tables(&pool).await.unwrap();
    pool
}

/// Credentials for `https://acme.test/`
pub fn test_credentials() -> Credentials {
    Credentials::new("acme.test", "7", "secret")
}

/// Download URL served for a file fixture
pub fn file_url(id: i64, md5: &str) -> String {
    format!("https://cdn.test/files/{}-{}.jpg", id, md5)
}

/// `/Files` record with a single acceptable 800x600 variant
pub fn file_json(id: i64, md5: &str) -> Value {
    json!({
        "id": id,
        "md5_at_upload": md5,
        "caption": format!("File {}", id),
        "rank": 1,
        "sizes": [{
            "id": 1,
            "width": 800,
            "height": 600,
            "http_root": "//cdn.test/files/",
            "http_relative_path": format!("{}-{}.jpg", id, md5)
        }]
    })
}

pub fn employee_json(id: i64, first_name: &str, last_name: &str) -> Value {
    json!({
        "id": id,
        "first_name": first_name,
        "last_name": last_name,
        "job_title": "Architect",
        "hero_image_id": 0,
        "projects": []
    })
}

pub fn project_json(id: i64, name: &str, hero_image_id: i64, keyword_ids: &[i64]) -> Value {
    let keywords: Vec<Value> = keyword_ids.iter().map(|k| json!({"id": k})).collect();
    json!({
        "id": id,
        "name": name,
        "code": format!("P-{:03}", id),
        "hero_image_id": hero_image_id,
        "employees": [],
        "projectKeywords": keywords,
        "fields": []
    })
}

// ============================================================================
// Harness
// ============================================================================

/// The full engine wired to a [`FakeTransport`]
pub struct Harness {
    pub db: SqlitePool,
    pub transport: Arc<FakeTransport>,
    pub event_bus: EventBus,
    pub client: RemoteDataClient,
    pub ingestor: MediaIngestor,
    pub engine: ReconciliationEngine,
    pub scheduler: Arc<Scheduler>,
    pub control: SyncControl,
    pub media_dir: TempDir,
}

impl Harness {
    /// Harness whose steps run until done
    pub async fn new() -> Self {
        Self::with_budget(Duration::from_secs(3600)).await
    }

    /// Harness with a custom step budget; `Duration::ZERO` yields after
    /// every item
    pub async fn with_budget(budget: Duration) -> Self {
        let db = memory_pool().await;
        let transport = Arc::new(FakeTransport::new());
        let event_bus = EventBus::new(256);
        let media_dir = TempDir::new().unwrap();

        // Catch-alls so unscripted media and keyword lookups come back empty
        transport.route_json("/Files", &[], json!([]));
        transport.route_json("/ProjectKeywords", &[], json!([]));

        let client = RemoteDataClient::new(
            db.clone(),
            transport.clone(),
            event_bus.clone(),
            test_credentials(),
        );
        let ingestor = MediaIngestor::new(db.clone(), client.clone(), BlobStore::new(media_dir.path()));
        let engine = ReconciliationEngine::new(
            db.clone(),
            client.clone(),
            ingestor.clone(),
            TaxonomyReconciler::new(db.clone()),
            event_bus.clone(),
        )
        .with_step_budget(budget);
        let scheduler = Arc::new(
            Scheduler::new(db.clone(), client.clone(), engine.clone())
                .with_tick_interval(Duration::from_millis(20)),
        );
        let control = SyncControl::new(db.clone(), client.clone(), scheduler.clone());

        Self {
            db,
            transport,
            event_bus,
            client,
            ingestor,
            engine,
            scheduler,
            control,
            media_dir,
        }
    }

    /// Answer every reference-data request with an empty catalog
    pub fn serve_empty_reference(&self) {
        for kind in EntityKind::ALL {
            self.transport
                .route_json("/Fields", &[("field_type", kind.as_str())], json!([]));
        }
        self.transport
            .route_json("/Fields", &[("field_type", "employee2project")], json!([]));
        self.transport.route_json("/GridColumns", &[], json!([]));
        self.transport
            .route_json("/ProjectKeywordCategories", &[], json!([]));
    }

    pub fn serve_listing(&self, kind: EntityKind, items: Value) {
        let path = match kind {
            EntityKind::Employee => "/Employees",
            EntityKind::Project => "/Projects",
        };
        self.transport.route_json(path, &[], items);
    }

    /// Serve a file as a hero lookup and its bytes as a download
    pub fn serve_hero(&self, id: i64, md5: &str, bytes: &[u8]) {
        let id_text = id.to_string();
        self.transport
            .route_json("/Files", &[("id", id_text.as_str())], json!([file_json(id, md5)]));
        self.transport
            .serve_download(&file_url(id, md5), FakeResponse::Bytes(200, bytes.to_vec()));
    }

    /// Serve a project's gallery listing, registering each file's bytes
    pub fn serve_gallery(&self, project_id: i64, files: &[(i64, &str)]) {
        let records: Vec<Value> = files.iter().map(|(id, md5)| file_json(*id, md5)).collect();
        let owner = project_id.to_string();
        self.transport
            .route_json("/Files", &[("project_id", owner.as_str())], Value::Array(records));
        for (id, md5) in files {
            self.transport.serve_download(
                &file_url(*id, md5),
                FakeResponse::Bytes(200, format!("bytes-{}-{}", id, md5).into_bytes()),
            );
        }
    }

    /// Publish both kinds; everything else stays at its defaults
    pub async fn publish_all(&self) {
        let mut options = crate::db::settings::load_options(&self.db).await.unwrap();
        options.employee.publish = true;
        options.project.publish = true;
        crate::db::settings::save_options(&self.db, &options).await.unwrap();
    }

    /// Mark the run Running without priming
    pub async fn mark_running(&self) {
        crate::db::settings::set_run_status(&self.db, crate::models::RunStatus::Running)
            .await
            .unwrap();
    }

    /// Step until the engine stops yielding
    pub async fn run_to_completion(&self) -> crate::models::StepOutcome {
        for _ in 0..10_000 {
            let outcome = self.engine.step().await.unwrap();
            if outcome != crate::models::StepOutcome::Yielded {
                return outcome;
            }
        }
        panic!("engine did not finish");
    }
}
