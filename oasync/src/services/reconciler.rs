//! Reconciliation Engine
//!
//! One call to [`ReconciliationEngine::step`] performs a bounded slice of a
//! pass. All progress lives in the settings table, so a step can run in a
//! fresh process and continue where the last one stopped.
//!
//! A step first fetches the listing of every kind still in its pass and
//! records each total (a breaker trip ends the run, any other failure ends
//! only this step). Then per kind, in [`EntityKind::ALL`] order:
//!
//! 1. for projects, reconcile the keyword taxonomy
//! 2. upsert items after the checkpoint in listing order, saving the
//!    checkpoint after each and yielding once the budget is spent
//! 3. after the last item, delete local entities the listing no longer
//!    contains (once per pass)
//!
//! When every kind has cleaned up, the cursors are cleared and the run goes
//! back to Idle.

use crate::db::{entities, settings};
use crate::error::{SyncError, SyncResult};
use crate::models::{
    parse_listing, FieldDescriptor, RemoteItem, RemoteKeyword, RunStatus, StepOutcome, SyncOptions, SyncState,
};
use crate::services::media_ingestor::MediaIngestor;
use crate::services::remote_client::RemoteDataClient;
use crate::services::requests;
use crate::services::sort_value::SortKey;
use crate::services::taxonomy::{desired_terms, TaxonomyReconciler};
use crate::utils::retry_on_lock;
use chrono::Utc;
use oasync_common::events::{EventBus, SyncEvent};
use oasync_common::EntityKind;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Wall-clock budget of one step
pub const DEFAULT_STEP_BUDGET: Duration = Duration::from_secs(50);

/// How a kind's slice of the step ended
enum KindStep {
    /// Pass finished and cleanup ran
    Done,
    Yielded,
}

/// A kind still in its pass, with the listing fetched for this step
struct PendingKind {
    kind: EntityKind,
    state: SyncState,
    fields: Vec<FieldDescriptor>,
    listing: Vec<RemoteItem>,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    db: SqlitePool,
    client: RemoteDataClient,
    ingestor: MediaIngestor,
    taxonomy: TaxonomyReconciler,
    event_bus: EventBus,
    step_budget: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        db: SqlitePool,
        client: RemoteDataClient,
        ingestor: MediaIngestor,
        taxonomy: TaxonomyReconciler,
        event_bus: EventBus,
    ) -> Self {
        Self {
            db,
            client,
            ingestor,
            taxonomy,
            event_bus,
            step_budget: DEFAULT_STEP_BUDGET,
        }
    }

    pub fn with_step_budget(mut self, budget: Duration) -> Self {
        self.step_budget = budget;
        self
    }

    pub fn step_budget(&self) -> Duration {
        self.step_budget
    }

    /// Run one bounded step
    ///
    /// Returns `Err` only for a breaker trip or a local failure outside
    /// per-item processing (loading options, saving the cursor).
    pub async fn step(&self) -> SyncResult<StepOutcome> {
        if settings::get_run_status(&self.db).await? != RunStatus::Running {
            return Ok(StepOutcome::NotRunning);
        }

        let started = Instant::now();
        let options = settings::load_options(&self.db).await?;

        // Listings first, so every pending kind reports a current total
        let mut pending = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            let mut state = settings::load_sync_state(&self.db, kind).await?;
            if state.cleanup_done {
                continue;
            }

            let fields = settings::load_field_catalog(&self.db, kind).await?;
            let Some(listing) = self.fetch_listing(kind, &options, &fields).await? else {
                return Ok(StepOutcome::Aborted);
            };
            self.record_total(kind, &mut state, listing.len() as i64).await?;

            pending.push(PendingKind {
                kind,
                state,
                fields,
                listing,
            });
        }

        for mut entry in pending {
            match self.step_kind(&mut entry, &options, started).await? {
                KindStep::Done => continue,
                KindStep::Yielded => {
                    debug!(
                        kind = %entry.kind,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Step budget spent"
                    );
                    return Ok(StepOutcome::Yielded);
                }
            }
        }

        settings::clear_sync_states(&self.db).await?;
        settings::set_run_status(&self.db, RunStatus::Idle).await?;
        self.event_bus.emit_lossy(SyncEvent::RunCompleted {
            timestamp: Utc::now(),
        });
        info!("Sync pass complete for all kinds");

        Ok(StepOutcome::Completed)
    }

    async fn record_total(&self, kind: EntityKind, state: &mut SyncState, remote_count: i64) -> SyncResult<()> {
        if remote_count == state.total_remote_count {
            return Ok(());
        }
        if state.checkpoint_index >= 0 {
            warn!(
                kind = %kind,
                previous = state.total_remote_count,
                current = remote_count,
                checkpoint = state.checkpoint_index,
                "Remote listing size changed mid-pass, continuing with new total"
            );
        }
        state.total_remote_count = remote_count;
        self.save_state(kind, state).await
    }

    async fn step_kind(
        &self,
        entry: &mut PendingKind,
        options: &SyncOptions,
        started: Instant,
    ) -> SyncResult<KindStep> {
        let kind = entry.kind;
        let state = &mut entry.state;

        let items = if options.kind(kind).publish {
            std::mem::take(&mut entry.listing)
        } else {
            debug!(kind = %kind, "Kind not published, treating listing as empty");
            Vec::new()
        };

        self.event_bus.emit_lossy(SyncEvent::StepStarted {
            kind,
            checkpoint_index: state.checkpoint_index,
            total: state.total_remote_count,
            timestamp: Utc::now(),
        });
        info!(
            kind = %kind,
            checkpoint = state.checkpoint_index,
            total = state.total_remote_count,
            "Reconciliation step started"
        );

        if kind == EntityKind::Project {
            self.sync_keywords(&items).await?;
        }

        let sort_key = SortKey::resolve(&entry.fields, options.kind(kind).sort_field);

        let remote_ids: HashSet<i64> = items.iter().map(RemoteItem::external_id).collect();
        let leftovers: Vec<(i64, i64)> = entities::list_ids(&self.db, kind)
            .await?
            .into_iter()
            .filter(|(_, external_id)| !remote_ids.contains(external_id))
            .collect();

        for (index, item) in items.iter().enumerate() {
            let index = index as i64;
            if index <= state.checkpoint_index {
                continue;
            }

            let success = match self.upsert_item(kind, item, options, &sort_key).await {
                Ok(()) => true,
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    warn!(
                        kind = %kind,
                        index,
                        external_id = item.external_id(),
                        error = %e,
                        "Item failed, advancing past it"
                    );
                    state.failed_items += 1;
                    false
                }
            };

            state.checkpoint_index = index;
            self.save_state(kind, state).await?;
            self.event_bus.emit_lossy(SyncEvent::ItemProcessed {
                kind,
                index,
                external_id: item.external_id(),
                success,
                timestamp: Utc::now(),
            });

            if started.elapsed() >= self.step_budget {
                return Ok(KindStep::Yielded);
            }
        }

        let mut deleted = 0;
        for (entity_id, external_id) in leftovers {
            self.ingestor.delete_entity_media(entity_id).await?;
            entities::delete_entity(&self.db, entity_id).await?;
            debug!(kind = %kind, external_id, "Deleted stale entity");
            deleted += 1;
        }

        state.cleanup_done = true;
        self.save_state(kind, state).await?;
        self.event_bus.emit_lossy(SyncEvent::KindCompleted {
            kind,
            total: state.total_remote_count,
            deleted,
            timestamp: Utc::now(),
        });
        info!(
            kind = %kind,
            total = state.total_remote_count,
            failed = state.failed_items,
            deleted,
            "Pass complete for kind"
        );

        Ok(KindStep::Done)
    }

    /// Listing for a kind; `None` when the step should abort
    async fn fetch_listing(
        &self,
        kind: EntityKind,
        options: &SyncOptions,
        fields: &[FieldDescriptor],
    ) -> SyncResult<Option<Vec<RemoteItem>>> {
        let grid_columns = settings::load_grid_columns(&self.db).await?;
        let request = requests::listing_request(kind, options, fields, &grid_columns);

        let body = match self.client.fetch(&request).await {
            Ok(body) => body,
            Err(e) if e.is_terminal() => return Err(e),
            Err(e) => {
                warn!(kind = %kind, error = %e, "Listing fetch failed, aborting step");
                return Ok(None);
            }
        };

        match parse_listing(body) {
            Ok(items) => Ok(Some(items)),
            Err(reason) => {
                warn!(kind = %kind, reason = %reason, "Malformed listing, aborting step");
                Ok(None)
            }
        }
    }

    /// Reconcile keyword terms against the keywords the listing references
    ///
    /// No referenced keywords means an empty taxonomy. A failed keyword fetch
    /// leaves the terms as they are.
    async fn sync_keywords(&self, items: &[RemoteItem]) -> SyncResult<()> {
        let ids: BTreeSet<i64> = items.iter().flat_map(|item| item.keyword_ids()).collect();

        let keywords: Vec<RemoteKeyword> = if ids.is_empty() {
            Vec::new()
        } else {
            let ids: Vec<i64> = ids.into_iter().collect();
            match self.client.fetch_as(&requests::keywords_request(&ids)).await {
                Ok(keywords) => keywords,
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Keyword fetch failed, keeping existing terms");
                    return Ok(());
                }
            }
        };

        let categories = settings::load_keyword_categories(&self.db).await?;
        self.taxonomy
            .reconcile(&desired_terms(&categories, &keywords))
            .await?;
        Ok(())
    }

    async fn upsert_item(
        &self,
        kind: EntityKind,
        item: &RemoteItem,
        options: &SyncOptions,
        sort_key: &SortKey,
    ) -> SyncResult<()> {
        let sort_value = sort_key.value_for(kind, item);
        let entity_id = entities::upsert_entity(&self.db, kind, item, &sort_value).await?;
        entities::replace_relations(&self.db, entity_id, &item.relations(kind)).await?;

        self.ingestor
            .sync_entity_media(kind, entity_id, item, options)
            .await?;

        if kind == EntityKind::Project {
            self.taxonomy.assign(entity_id, &item.keyword_ids()).await?;
        }

        Ok(())
    }

    async fn save_state(&self, kind: EntityKind, state: &SyncState) -> SyncResult<()> {
        let max_wait_ms = settings::max_lock_wait_ms(&self.db).await?;
        retry_on_lock("sync state save", max_wait_ms, || {
            settings::save_sync_state(&self.db, kind, state)
        })
        .await
        .map_err(SyncError::from)
    }
}
