//! Media Ingestor
//!
//! Keeps each entity's hero image and gallery in line with the remote
//! catalog. An asset is identified by (remote file id, source checksum):
//!
//! - same checksum: metadata refresh only, no download
//! - changed checksum: the old asset (row and, when unreferenced, blob) is
//!   deleted and the file downloaded again
//! - download failures skip the asset and never abort the entity

use crate::db::media;
use crate::error::{SyncError, SyncResult};
use crate::models::{MediaAsset, MediaBounds, RemoteFile, RemoteItem, SizeVariant, SyncOptions, UpsertOutcome};
use crate::services::blob_store::BlobStore;
use crate::services::remote_client::RemoteDataClient;
use crate::services::requests;
use oasync_common::EntityKind;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Largest acceptable variant by area
///
/// Strictly greater wins, so the first of several equal areas is kept.
/// Variants without known dimensions (area 0) are never chosen.
pub fn resolve_best_variant<'a>(sizes: &'a [SizeVariant], bounds: &MediaBounds) -> Option<&'a SizeVariant> {
    let mut best: Option<&SizeVariant> = None;
    let mut best_area = 0;

    for variant in sizes.iter().filter(|v| bounds.accepts(v)) {
        let area = variant.area();
        if area > best_area {
            best = Some(variant);
            best_area = area;
        }
    }

    best
}

/// Per-entity tally, for logs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MediaSummary {
    pub created: usize,
    pub replaced: usize,
    pub reused: usize,
    pub skipped: usize,
    pub deleted: usize,
}

impl MediaSummary {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Replaced => self.replaced += 1,
            UpsertOutcome::Reused => self.reused += 1,
            UpsertOutcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Clone)]
pub struct MediaIngestor {
    db: SqlitePool,
    client: RemoteDataClient,
    blobs: BlobStore,
}

impl MediaIngestor {
    pub fn new(db: SqlitePool, client: RemoteDataClient, blobs: BlobStore) -> Self {
        Self { db, client, blobs }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Create, refresh or replace one asset of an entity
    pub async fn upsert_asset(
        &self,
        parent_id: i64,
        file: &RemoteFile,
        is_hero: bool,
        bounds: &MediaBounds,
    ) -> SyncResult<UpsertOutcome> {
        let existing = media::find_asset(&self.db, parent_id, file.id).await?;

        if let Some(asset) = &existing {
            if asset.checksum == file.checksum() {
                media::update_asset_metadata(&self.db, asset.id, &file.metadata, is_hero).await?;
                if is_hero {
                    media::bind_hero(&self.db, parent_id, asset.id).await?;
                }
                return Ok(UpsertOutcome::Reused);
            }
        }

        let outcome = match existing {
            Some(asset) => {
                debug!(
                    external_id = file.id,
                    old = %asset.checksum,
                    new = %file.checksum(),
                    "Checksum changed, replacing asset"
                );
                self.delete_asset(&asset).await?;
                UpsertOutcome::Replaced
            }
            None => UpsertOutcome::Created,
        };

        let Some((blob_ref, content_digest, source_url)) = self.obtain_blob(file, bounds).await? else {
            return Ok(UpsertOutcome::Skipped);
        };

        let asset_id = media::insert_asset(
            &self.db,
            &MediaAsset {
                id: 0,
                external_id: file.id,
                checksum: file.checksum().to_string(),
                content_digest,
                blob_ref,
                source_url,
                parent_id,
                is_hero,
                metadata: file.metadata.clone(),
            },
        )
        .await?;

        if is_hero {
            media::bind_hero(&self.db, parent_id, asset_id).await?;
        }

        Ok(outcome)
    }

    /// Blob for a file: reuse one already stored for the same checksum, or download
    async fn obtain_blob(
        &self,
        file: &RemoteFile,
        bounds: &MediaBounds,
    ) -> SyncResult<Option<(String, String, String)>> {
        if let Some(shared) = media::find_shared_blob(&self.db, file.id, file.checksum()).await? {
            if self.blobs.path(&shared.0).exists() {
                debug!(external_id = file.id, blob_ref = %shared.0, "Reusing stored blob");
                return Ok(Some(shared));
            }
        }

        let Some(source_url) = resolve_best_variant(&file.sizes, bounds).and_then(SizeVariant::source_url) else {
            warn!(external_id = file.id, "No acceptable size variant, skipping asset");
            return Ok(None);
        };

        let bytes = match self.client.download(&source_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(external_id = file.id, url = %source_url, error = %e, "Media download failed, skipping asset");
                return Ok(None);
            }
        };

        let stored = self.blobs.store(file.id, &source_url, bytes).await?;
        Ok(Some((stored.blob_ref, stored.content_digest, source_url)))
    }

    /// Reconcile hero and gallery for one entity
    ///
    /// Only a breaker trip is returned as an error from remote fetches; any
    /// other fetch failure skips that part and leaves local media alone.
    pub async fn sync_entity_media(
        &self,
        kind: EntityKind,
        entity_id: i64,
        item: &RemoteItem,
        options: &SyncOptions,
    ) -> SyncResult<MediaSummary> {
        let mut summary = MediaSummary::default();
        let bounds = &options.media_bounds;
        let hero_id = item.hero_image_id();

        if let Some(hero_id) = hero_id {
            match self
                .fetch_files(&requests::hero_file_request(hero_id, options))
                .await
            {
                Ok(files) => {
                    if let Some(file) = files.iter().find(|f| f.id == hero_id) {
                        summary.record(self.upsert_asset(entity_id, file, true, bounds).await?);
                    } else {
                        warn!(kind = %kind, external_id = item.external_id(), hero_id, "Hero file not returned");
                    }
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    warn!(kind = %kind, external_id = item.external_id(), error = %e, "Hero fetch failed");
                }
            }
        }

        let limit = options.kind(kind).gallery.image_limit as usize;
        let gallery = if limit == 0 {
            Vec::new()
        } else {
            match self
                .fetch_files(&requests::gallery_request(kind, item.external_id(), options))
                .await
            {
                Ok(mut files) => {
                    files.retain(|f| Some(f.id) != hero_id);
                    files.truncate(limit);
                    files
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    warn!(kind = %kind, external_id = item.external_id(), error = %e, "Gallery fetch failed");
                    return Ok(summary);
                }
            }
        };

        let keep: HashSet<i64> = gallery.iter().map(|f| f.id).chain(hero_id).collect();
        for asset in media::list_assets(&self.db, entity_id).await? {
            if !keep.contains(&asset.external_id) {
                self.delete_asset(&asset).await?;
                summary.deleted += 1;
            }
        }

        for file in &gallery {
            summary.record(self.upsert_asset(entity_id, file, false, bounds).await?);
        }

        debug!(
            kind = %kind,
            external_id = item.external_id(),
            created = summary.created,
            replaced = summary.replaced,
            reused = summary.reused,
            skipped = summary.skipped,
            deleted = summary.deleted,
            "Media reconciled"
        );

        Ok(summary)
    }

    /// Delete every asset owned by an entity
    pub async fn delete_entity_media(&self, entity_id: i64) -> SyncResult<usize> {
        let assets = media::list_assets(&self.db, entity_id).await?;
        for asset in &assets {
            self.delete_asset(asset).await?;
        }
        Ok(assets.len())
    }

    /// Remove the row, then the blob once nothing references it
    pub async fn delete_asset(&self, asset: &MediaAsset) -> SyncResult<()> {
        media::delete_asset_row(&self.db, asset.id).await?;
        if media::blob_ref_count(&self.db, &asset.blob_ref).await? == 0 {
            self.blobs.remove(&asset.blob_ref).await?;
        }
        Ok(())
    }

    async fn fetch_files(&self, request: &requests::ApiRequest) -> SyncResult<Vec<RemoteFile>> {
        let body = self.client.fetch(request).await?;
        match body {
            serde_json::Value::Array(_) => serde_json::from_value(body)
                .map_err(|e| SyncError::MalformedResponse(format!("{}: {}", request.resource, e))),
            _ => Err(SyncError::MalformedResponse(format!(
                "{}: expected an array",
                request.resource
            ))),
        }
    }
}
