//! oasync library interface
//!
//! Incremental sync of a remote OpenAsset catalog (employees, projects,
//! their media and keyword taxonomy) into a local SQLite store.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use crate::error::{SyncError, SyncResult};

use crate::config::Credentials;
use crate::services::{
    BlobStore, MediaIngestor, ReconciliationEngine, RemoteDataClient, Scheduler, SyncControl,
    TaxonomyReconciler, Transport,
};
use chrono::{DateTime, Utc};
use oasync_common::events::EventBus;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

/// Application state shared by the daemon
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Progress events from the engine
    pub event_bus: EventBus,
    pub control: SyncControl,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire the client, ingestor, engine and scheduler together
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        transport: Arc<dyn Transport>,
        credentials: Credentials,
        media_dir: PathBuf,
    ) -> Self {
        let client = RemoteDataClient::new(db.clone(), transport, event_bus.clone(), credentials);
        let ingestor = MediaIngestor::new(db.clone(), client.clone(), BlobStore::new(media_dir));
        let engine = ReconciliationEngine::new(
            db.clone(),
            client.clone(),
            ingestor,
            TaxonomyReconciler::new(db.clone()),
            event_bus.clone(),
        );
        let scheduler = Arc::new(Scheduler::new(db.clone(), client.clone(), engine));
        let control = SyncControl::new(db.clone(), client, scheduler);

        Self {
            db,
            event_bus,
            control,
            startup_time: Utc::now(),
        }
    }
}
