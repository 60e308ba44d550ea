//! HTTP transport seam
//!
//! The engine talks to the remote catalog through [`Transport`] so tests can
//! script responses and count requests. [`HttpTransport`] is the reqwest
//! implementation used by the daemon.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;

/// A single GET request
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: Url,
    /// `Authorization` header value, absent for media downloads
    pub authorization: Option<String>,
    pub timeout: Duration,
}

/// Raw response; any status is returned, interpretation is up to the caller
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the request
    ///
    /// `Err` only for failures where no HTTP status was received (DNS,
    /// connect, timeout, body read).
    async fn get(&self, request: TransportRequest) -> SyncResult<TransportResponse>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(oasync_common::config::get_user_agent())
            .build()
            .map_err(|e| SyncError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, request: TransportRequest) -> SyncResult<TransportResponse> {
        tracing::debug!(url = %redact(&request.url), "GET");

        let mut builder = self.client.get(request.url).timeout(request.timeout);
        if let Some(authorization) = request.authorization {
            builder = builder.header(reqwest::header::AUTHORIZATION, authorization);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("Request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::Transport(format!("Failed to read body: {}", e)))?;

        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Path only, for logs; query strings can be long
fn redact(url: &Url) -> String {
    format!("{}{}", url.host_str().unwrap_or_default(), url.path())
}
