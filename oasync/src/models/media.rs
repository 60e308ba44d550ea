//! Media variants, bounds and locally stored assets

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One rendition of a remote file (`sizes[]` entry)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeVariant {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub width: Option<u64>,
    #[serde(default)]
    pub height: Option<u64>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default, alias = "file_format")]
    pub format: Option<String>,
    #[serde(default)]
    pub http_root: Option<String>,
    #[serde(default)]
    pub http_relative_path: Option<String>,
}

impl SizeVariant {
    pub fn area(&self) -> u64 {
        self.width.unwrap_or(0).saturating_mul(self.height.unwrap_or(0))
    }

    /// Absolute download URL (`https:` + root + relative path)
    pub fn source_url(&self) -> Option<String> {
        let root = self.http_root.as_deref()?;
        let path = self.http_relative_path.as_deref()?;
        if root.starts_with("http://") || root.starts_with("https://") {
            Some(format!("{}{}", root, path))
        } else {
            Some(format!("https:{}{}", root, path))
        }
    }
}

/// Acceptance bounds for size variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaBounds {
    pub formats: Vec<String>,
    pub max_width: u64,
    pub max_height: u64,
    pub max_filesize: u64,
}

impl Default for MediaBounds {
    fn default() -> Self {
        Self {
            formats: vec!["png".into(), "jpg".into(), "gif".into()],
            max_width: 2000,
            max_height: 2000,
            max_filesize: 3_145_728,
        }
    }
}

impl MediaBounds {
    /// True when no known attribute of the variant exceeds a bound
    ///
    /// Attributes the server did not return are not held against the variant.
    pub fn accepts(&self, variant: &SizeVariant) -> bool {
        let format_ok = variant.format.as_deref().map_or(true, |format| {
            self.formats.iter().any(|f| f.eq_ignore_ascii_case(format))
        });
        format_ok
            && variant.width.map_or(true, |w| w <= self.max_width)
            && variant.height.map_or(true, |h| h <= self.max_height)
            && variant.filesize.map_or(true, |s| s <= self.max_filesize)
    }
}

/// Mutable descriptive metadata refreshed on every pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photographer: Option<String>,
    #[serde(default)]
    pub copyright_holder: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub uploaded: Option<String>,
    #[serde(default)]
    pub rank: Option<i64>,
    #[serde(default)]
    pub project_display_order: Option<i64>,
    /// Extra file fields requested through `file_options`
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Remote file record (`/Files` response entry)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: i64,
    #[serde(default)]
    pub md5_at_upload: Option<String>,
    #[serde(default)]
    pub sizes: Vec<SizeVariant>,
    #[serde(flatten)]
    pub metadata: AssetMetadata,
}

impl RemoteFile {
    /// Checksum at source; an absent checksum compares as empty
    pub fn checksum(&self) -> &str {
        self.md5_at_upload.as_deref().unwrap_or("")
    }
}

/// Locally stored media asset
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAsset {
    pub id: i64,
    pub external_id: i64,
    /// Source checksum (`md5_at_upload`)
    pub checksum: String,
    /// SHA-256 of the downloaded bytes
    pub content_digest: String,
    /// File name under the media directory
    pub blob_ref: String,
    pub source_url: String,
    /// Local id of the owning entity
    pub parent_id: i64,
    pub is_hero: bool,
    pub metadata: AssetMetadata,
}

/// What `upsert_asset` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Same checksum; metadata refreshed, no download
    Reused,
    /// Checksum changed; old asset deleted and the new one downloaded
    Replaced,
    /// No previous asset; downloaded
    Created,
    /// No acceptable variant or the download failed
    Skipped,
}
