//! Control surface
//!
//! The operations an admin layer drives: Start, Stop, GetStatus,
//! SetFrequency, SetSortField and CheckCredentials.

use crate::config::Credentials;
use crate::db::{entities, settings};
use crate::error::SyncResult;
use crate::models::{
    FieldDescriptor, Frequency, KindProgress, RemoteItem, SyncOptions, SyncStatusReport,
};
use crate::services::reference::prime_reference_data;
use crate::services::remote_client::{self, RemoteDataClient};
use crate::services::scheduler::{Scheduler, StartOutcome};
use crate::services::sort_value::SortKey;
use oasync_common::EntityKind;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct SyncControl {
    db: SqlitePool,
    client: RemoteDataClient,
    scheduler: Arc<Scheduler>,
}

impl SyncControl {
    pub fn new(db: SqlitePool, client: RemoteDataClient, scheduler: Arc<Scheduler>) -> Self {
        Self { db, client, scheduler }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub async fn start(&self) -> SyncResult<StartOutcome> {
        self.scheduler.start().await
    }

    pub async fn stop(&self) -> SyncResult<()> {
        self.scheduler.stop().await
    }

    /// Run status, breaker counter and per-kind progress
    pub async fn get_status(&self) -> SyncResult<SyncStatusReport> {
        let run = settings::load_sync_run(&self.db).await?;

        let mut kinds = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            let state = settings::load_sync_state(&self.db, kind).await?;
            kinds.push(KindProgress {
                kind,
                processed: state.processed(),
                total: state.total_remote_count,
                failed_items: state.failed_items,
                cleanup_done: state.cleanup_done,
            });
        }

        Ok(SyncStatusReport {
            status: run.status,
            error_count: run.error_count,
            kinds,
        })
    }

    /// Persist the feed frequency and re-arm the refresh timer
    pub async fn set_frequency(&self, frequency: Frequency) -> SyncResult<()> {
        let mut options = settings::load_options(&self.db).await?;
        options.frequency = frequency;
        settings::save_options(&self.db, &options).await?;

        self.scheduler.reschedule(frequency).await;
        Ok(())
    }

    /// Persist a kind's sort field and recompute stored sort values
    ///
    /// Works from the stored records only; nothing is fetched. Returns the
    /// number of entities updated.
    pub async fn set_sort_field(&self, kind: EntityKind, field_id: i64) -> SyncResult<usize> {
        let mut options = settings::load_options(&self.db).await?;
        options.kind_mut(kind).sort_field = Some(field_id);
        settings::save_options(&self.db, &options).await?;

        let fields = settings::load_field_catalog(&self.db, kind).await?;
        let sort_key = SortKey::resolve(&fields, Some(field_id));

        let mut updated = 0;
        for entity in entities::list_entities(&self.db, kind).await? {
            let Some(item) = RemoteItem::from_value(entity.fields) else {
                warn!(kind = %kind, external_id = entity.external_id, "Stored record unreadable, sort value kept");
                continue;
            };
            let value = sort_key.value_for(kind, &item);
            if value != entity.sort_value {
                entities::update_sort_value(&self.db, entity.id, &value).await?;
                updated += 1;
            }
        }

        info!(kind = %kind, field_id, rest_code = %sort_key.rest_code, updated, "Sort field applied");
        Ok(updated)
    }

    /// Validate and adopt new credentials
    ///
    /// On success the credentials are stored, options reset to their
    /// defaults with the refresh timer cleared, reference data primed and
    /// default criteria and sort fields selected. Rejections leave
    /// everything as it was.
    pub async fn check_credentials(&self, instance_url: &str, token_id: &str, api_token: &str) -> SyncResult<()> {
        let credentials = Credentials::new(instance_url, token_id, api_token);
        remote_client::check_credentials(self.client.transport(), &credentials).await?;

        settings::set_stored_credentials(
            &self.db,
            &credentials.instance_url,
            &credentials.token_id,
            &credentials.api_token,
        )
        .await?;
        info!(instance_url = %credentials.instance_url, "Credentials accepted");
        self.client.set_credentials(credentials).await;

        // Defaults carry Frequency::None
        let mut options = SyncOptions::default();
        settings::save_options(&self.db, &options).await?;
        self.scheduler.reschedule(Frequency::None).await;

        prime_reference_data(&self.client, &self.db).await?;

        let employee_fields = settings::load_field_catalog(&self.db, EntityKind::Employee).await?;
        let project_fields = settings::load_field_catalog(&self.db, EntityKind::Project).await?;
        apply_default_fields(&mut options, EntityKind::Employee, &employee_fields, &["first_name", "last_name"]);
        apply_default_fields(&mut options, EntityKind::Project, &project_fields, &["name"]);
        settings::save_options(&self.db, &options).await?;

        Ok(())
    }
}

/// Select fields by rest code as criteria; the first one found is the sort field
fn apply_default_fields(options: &mut SyncOptions, kind: EntityKind, fields: &[FieldDescriptor], codes: &[&str]) {
    let ids: Vec<i64> = codes
        .iter()
        .filter_map(|code| fields.iter().find(|f| f.rest_code == *code).map(|f| f.id))
        .collect();

    let kind_options = options.kind_mut(kind);
    kind_options.sort_field = ids.first().copied();
    kind_options.criteria_fields = ids;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(id: i64, rest_code: &str) -> FieldDescriptor {
        FieldDescriptor {
            id,
            name: rest_code.to_string(),
            rest_code: rest_code.to_string(),
            display_type: "singleLine".to_string(),
            built_in: true,
        }
    }

    #[test]
    fn test_default_fields_pick_sort_from_first_code() {
        let fields = vec![field(3, "last_name"), field(2, "first_name"), field(9, "job_title")];
        let mut options = SyncOptions::default();

        apply_default_fields(&mut options, EntityKind::Employee, &fields, &["first_name", "last_name"]);

        assert_eq!(options.employee.criteria_fields, vec![2, 3]);
        assert_eq!(options.employee.sort_field, Some(2));
    }

    #[test]
    fn test_default_fields_missing_codes() {
        let mut options = SyncOptions::default();
        apply_default_fields(&mut options, EntityKind::Project, &[], &["name"]);

        assert!(options.project.criteria_fields.is_empty());
        assert_eq!(options.project.sort_field, None);
    }
}
