//! Remote Data Client
//!
//! Authenticated GETs against the catalog REST API with circuit-breaker
//! bookkeeping in the settings table:
//!
//! - 2xx resets the consecutive failure counter
//! - network failure or non-2xx increments it; reaching the threshold marks
//!   the run Errored and yields [`SyncError::Terminated`]
//!
//! Media downloads go through the same transport but never touch the
//! breaker; a failed download only costs the one asset.

use crate::config::Credentials;
use crate::db::settings;
use crate::error::{SyncError, SyncResult};
use crate::models::RunStatus;
use crate::services::requests::{self, ApiRequest};
use crate::services::transport::{Transport, TransportRequest, TransportResponse};
use chrono::Utc;
use oasync_common::events::{EventBus, SyncEvent};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Timeout for catalog requests and media downloads
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the credential check
pub const CREDENTIAL_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

/// Breaker-aware catalog client
#[derive(Clone)]
pub struct RemoteDataClient {
    db: SqlitePool,
    transport: Arc<dyn Transport>,
    event_bus: EventBus,
    credentials: Arc<RwLock<Credentials>>,
}

impl RemoteDataClient {
    pub fn new(
        db: SqlitePool,
        transport: Arc<dyn Transport>,
        event_bus: EventBus,
        credentials: Credentials,
    ) -> Self {
        Self {
            db,
            transport,
            event_bus,
            credentials: Arc::new(RwLock::new(credentials)),
        }
    }

    /// Swap in freshly validated credentials
    pub async fn set_credentials(&self, credentials: Credentials) {
        *self.credentials.write().await = credentials;
    }

    pub async fn credentials(&self) -> Credentials {
        self.credentials.read().await.clone()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Fetch and parse a JSON body
    ///
    /// Errors:
    /// - `Terminated` once the failure counter reaches the threshold
    /// - `Auth` / `License` / `Transport` for counted failures below it
    /// - `MalformedResponse` for a 2xx body that is not JSON (not counted)
    pub async fn fetch(&self, request: &ApiRequest) -> SyncResult<Value> {
        let (url, authorization) = {
            let credentials = self.credentials.read().await;
            (request.url(&credentials.api_base())?, credentials.auth_header())
        };
        debug!(resource = %request.resource, "Fetching from remote catalog");

        let outcome = self
            .transport
            .get(TransportRequest {
                url,
                authorization: Some(authorization),
                timeout: REQUEST_TIMEOUT,
            })
            .await;

        match outcome {
            Ok(response) if response.is_success() => {
                settings::reset_error_count(&self.db).await?;
                serde_json::from_slice(&response.body).map_err(|e| {
                    SyncError::MalformedResponse(format!("{}: {}", request.resource, e))
                })
            }
            Ok(response) => {
                let failure = status_error(&response, &request.resource);
                Err(self.record_failure(failure).await?)
            }
            Err(failure) => Err(self.record_failure(failure).await?),
        }
    }

    /// Fetch and deserialize into a typed value
    pub async fn fetch_as<T: DeserializeOwned>(&self, request: &ApiRequest) -> SyncResult<T> {
        let body = self.fetch(request).await?;
        serde_json::from_value(body)
            .map_err(|e| SyncError::MalformedResponse(format!("{}: {}", request.resource, e)))
    }

    /// Download a media blob; failures map to `MediaDownload`
    pub async fn download(&self, url: &str) -> SyncResult<Vec<u8>> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| SyncError::MediaDownload(format!("invalid URL {}: {}", url, e)))?;

        let response = self
            .transport
            .get(TransportRequest {
                url: parsed,
                authorization: None,
                timeout: REQUEST_TIMEOUT,
            })
            .await
            .map_err(|e| SyncError::MediaDownload(e.to_string()))?;

        if !response.is_success() {
            return Err(SyncError::MediaDownload(format!(
                "HTTP {} for {}",
                response.status, url
            )));
        }
        if response.body.is_empty() {
            return Err(SyncError::MediaDownload(format!("empty body for {}", url)));
        }

        Ok(response.body)
    }

    /// Count a failure; trip the breaker when the threshold is reached
    ///
    /// Returns the error the caller should surface.
    async fn record_failure(&self, failure: SyncError) -> SyncResult<SyncError> {
        let error_count = settings::increment_error_count(&self.db).await?;
        let threshold = settings::error_threshold(&self.db).await?;

        if error_count >= threshold {
            settings::set_run_status(&self.db, RunStatus::Errored).await?;
            error!(
                error_count,
                threshold,
                last_error = %failure,
                "Remote catalog failure threshold reached, sync terminated"
            );
            self.event_bus.emit_lossy(SyncEvent::BreakerTripped {
                error_count,
                threshold,
                timestamp: Utc::now(),
            });
            return Ok(SyncError::Terminated {
                error_count,
                threshold,
            });
        }

        warn!(error_count, threshold, error = %failure, "Remote catalog request failed");
        Ok(failure)
    }
}

/// Validate credentials with a single `/Employees?limit=1` request
///
/// Does not touch the breaker counter.
pub async fn check_credentials(transport: &dyn Transport, credentials: &Credentials) -> SyncResult<()> {
    let url = requests::credential_check_request().url(&credentials.api_base())?;

    let response = transport
        .get(TransportRequest {
            url,
            authorization: Some(credentials.auth_header()),
            timeout: CREDENTIAL_CHECK_TIMEOUT,
        })
        .await?;

    if response.is_success() {
        Ok(())
    } else {
        Err(status_error(&response, "/Employees"))
    }
}

fn status_error(response: &TransportResponse, resource: &str) -> SyncError {
    match response.status {
        401 => SyncError::Auth,
        402 => SyncError::License,
        status => SyncError::Transport(format!("HTTP {} from {}", status, resource)),
    }
}
