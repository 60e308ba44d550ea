//! Data models for the sync engine
//!
//! - Remote records and local entities
//! - Persisted run and per-kind pass state
//! - Media variants, bounds and assets
//! - Reference data (field catalogs, grid columns, keyword taxonomy)
//! - Sync options

pub mod entity;
pub mod media;
pub mod options;
pub mod reference;
pub mod sync_state;

pub use entity::{parse_listing, value_as_i64, value_as_text, Entity, Relation, RemoteItem};
pub use media::{AssetMetadata, MediaAsset, MediaBounds, RemoteFile, SizeVariant, UpsertOutcome};
pub use options::{Frequency, GalleryOptions, GallerySortKey, KindOptions, SortOrder, SyncOptions};
pub use reference::{find_field, FieldDescriptor, GridColumn, KeywordCategory, KeywordTerm, RemoteKeyword, TermLevel};
pub use sync_state::{KindProgress, RunStatus, StepOutcome, SyncRun, SyncState, SyncStatusReport};
