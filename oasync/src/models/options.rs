//! Sync options
//!
//! Stored as one JSON document under the `sync_options` setting. Defaults
//! are what a fresh credential check seeds.

use crate::models::MediaBounds;
use oasync_common::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Listing and gallery ordering direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Suffix appended to `orderBy`
    pub fn as_suffix(&self) -> &'static str {
        match self {
            SortOrder::Asc => "Asc",
            SortOrder::Desc => "Desc",
        }
    }
}

/// Gallery sort key understood by `/Files`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GallerySortKey {
    #[default]
    Created,
    Updated,
    ProjectDisplayOrder,
    Id,
    Rank,
}

impl GallerySortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            GallerySortKey::Created => "created",
            GallerySortKey::Updated => "updated",
            GallerySortKey::ProjectDisplayOrder => "project_display_order",
            GallerySortKey::Id => "id",
            GallerySortKey::Rank => "rank",
        }
    }
}

/// Per-entity gallery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryOptions {
    /// Only files tagged "show on website"
    pub show_on_website_only: bool,
    /// Maximum gallery images, hero not counted
    pub image_limit: u32,
    pub sort_key: GallerySortKey,
    pub direction: SortOrder,
}

/// Settings for one entity kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindOptions {
    /// Unpublished kinds sync as an empty listing
    pub publish: bool,
    /// Field ids projected into the listing
    pub criteria_fields: Vec<i64>,
    /// Field id driving `orderBy` and the derived sort value
    pub sort_field: Option<i64>,
    pub order: SortOrder,
    pub gallery: GalleryOptions,
}

impl KindOptions {
    fn with_image_limit(image_limit: u32) -> Self {
        Self {
            publish: false,
            criteria_fields: Vec::new(),
            sort_field: None,
            order: SortOrder::Asc,
            gallery: GalleryOptions {
                show_on_website_only: false,
                image_limit,
                sort_key: GallerySortKey::Created,
                direction: SortOrder::Desc,
            },
        }
    }
}

/// Refresh frequency for the recurring full sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Frequency {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "30m")]
    Every30Minutes,
    #[serde(rename = "60m")]
    Hourly,
    #[serde(rename = "8h")]
    Every8Hours,
    #[serde(rename = "24h")]
    Daily,
}

impl Frequency {
    /// Interval between refreshes; `None` for manual-only
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Frequency::None => None,
            Frequency::Every30Minutes => Some(Duration::from_secs(30 * 60)),
            Frequency::Hourly => Some(Duration::from_secs(60 * 60)),
            Frequency::Every8Hours => Some(Duration::from_secs(8 * 60 * 60)),
            Frequency::Daily => Some(Duration::from_secs(24 * 60 * 60)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::None => "none",
            Frequency::Every30Minutes => "30m",
            Frequency::Hourly => "60m",
            Frequency::Every8Hours => "8h",
            Frequency::Daily => "24h",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    /// Accepts the short names and the legacy `openasset_*` schedule names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" | "" => Ok(Frequency::None),
            "30m" | "openasset_30" => Ok(Frequency::Every30Minutes),
            "60m" | "openasset_60" => Ok(Frequency::Hourly),
            "8h" | "openasset_8" => Ok(Frequency::Every8Hours),
            "24h" | "openasset_24" => Ok(Frequency::Daily),
            other => Err(format!("unknown frequency '{}'", other)),
        }
    }
}

/// Complete option document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOptions {
    pub employee: KindOptions,
    pub project: KindOptions,
    /// Grid column ids projected into `employees[roles]`
    #[serde(default)]
    pub role_grid_columns: Vec<i64>,
    /// Extra file fields requested with every `/Files` query
    #[serde(default)]
    pub file_options: Vec<String>,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub media_bounds: MediaBounds,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            employee: KindOptions::with_image_limit(0),
            project: KindOptions::with_image_limit(4),
            role_grid_columns: Vec::new(),
            file_options: Vec::new(),
            frequency: Frequency::None,
            media_bounds: MediaBounds::default(),
        }
    }
}

impl SyncOptions {
    pub fn kind(&self, kind: EntityKind) -> &KindOptions {
        match kind {
            EntityKind::Employee => &self.employee,
            EntityKind::Project => &self.project,
        }
    }

    pub fn kind_mut(&mut self, kind: EntityKind) -> &mut KindOptions {
        match kind {
            EntityKind::Employee => &mut self.employee,
            EntityKind::Project => &mut self.project,
        }
    }
}
