//! Credential resolution and instance URL handling
//!
//! Each credential field is resolved independently with priority
//! Database → ENV → TOML.

use oasync_common::config::TomlConfig;
use oasync_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

pub const ENV_INSTANCE_URL: &str = "OASYNC_INSTANCE_URL";
pub const ENV_TOKEN_ID: &str = "OASYNC_TOKEN_ID";
pub const ENV_API_TOKEN: &str = "OASYNC_API_TOKEN";

/// Remote catalog credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Normalized instance URL (`https://host/`)
    pub instance_url: String,
    pub token_id: String,
    pub api_token: String,
}

impl Credentials {
    /// Build credentials, normalizing the instance URL
    pub fn new(instance_url: &str, token_id: &str, api_token: &str) -> Self {
        Self {
            instance_url: normalize_instance_url(instance_url),
            token_id: token_id.trim().to_string(),
            api_token: api_token.trim().to_string(),
        }
    }

    /// REST API base (`https://host/REST/1`)
    pub fn api_base(&self) -> String {
        format!("{}REST/1", self.instance_url)
    }

    /// Value of the `Authorization` header
    pub fn auth_header(&self) -> String {
        format!("OATU {}:{}", self.token_id, self.api_token)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("instance_url", &self.instance_url)
            .field("token_id", &self.token_id)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

/// Normalize a user-entered instance URL
///
/// Strips `www.`, forces https, and guarantees a trailing slash:
/// `http://www.acme.openasset.com` → `https://acme.openasset.com/`.
pub fn normalize_instance_url(raw: &str) -> String {
    let trimmed = raw.trim();

    let host_and_path = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host_and_path = host_and_path.strip_prefix("www.").unwrap_or(host_and_path);

    let mut url = format!("https://{}", host_and_path);
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

/// Resolve credentials from Database → ENV → TOML
///
/// Every field must resolve from some source, otherwise a `Config` error
/// names the missing fields.
pub async fn resolve_credentials(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<Credentials> {
    let (db_url, db_token_id, db_api_token) =
        crate::db::settings::get_stored_credentials(db).await?;
    let toml_credentials = toml_config.credentials.clone().unwrap_or_default();

    let instance_url = resolve_field(
        "instance_url",
        db_url,
        std::env::var(ENV_INSTANCE_URL).ok(),
        toml_credentials.instance_url,
    );
    let token_id = resolve_field(
        "token_id",
        db_token_id,
        std::env::var(ENV_TOKEN_ID).ok(),
        toml_credentials.token_id,
    );
    let api_token = resolve_field(
        "api_token",
        db_api_token,
        std::env::var(ENV_API_TOKEN).ok(),
        toml_credentials.api_token,
    );

    match (instance_url, token_id, api_token) {
        (Some(url), Some(token_id), Some(api_token)) => {
            Ok(Credentials::new(&url, &token_id, &api_token))
        }
        (url, token_id, api_token) => {
            let missing: Vec<&str> = [
                ("instance_url", url.is_none()),
                ("token_id", token_id.is_none()),
                ("api_token", api_token.is_none()),
            ]
            .iter()
            .filter(|(_, absent)| *absent)
            .map(|(name, _)| *name)
            .collect();

            Err(Error::Config(format!(
                "Remote catalog credentials not configured (missing: {}). Configure them in the database, \
                 via {}/{}/{}, or in the [credentials] section of config.toml",
                missing.join(", "),
                ENV_INSTANCE_URL,
                ENV_TOKEN_ID,
                ENV_API_TOKEN
            )))
        }
    }
}

fn resolve_field(
    name: &str,
    db_value: Option<String>,
    env_value: Option<String>,
    toml_value: Option<String>,
) -> Option<String> {
    let candidates = [
        ("database", db_value),
        ("environment", env_value),
        ("TOML", toml_value),
    ];

    let present: Vec<&(&str, Option<String>)> = candidates
        .iter()
        .filter(|(_, v)| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
        .collect();

    if present.len() > 1 {
        let sources: Vec<&str> = present.iter().map(|(source, _)| *source).collect();
        warn!(
            "Credential '{}' found in multiple sources: {}. Using {}.",
            name,
            sources.join(", "),
            sources[0]
        );
    }

    present.first().and_then(|(source, value)| {
        info!("Credential '{}' loaded from {}", name, source);
        value.clone()
    })
}
