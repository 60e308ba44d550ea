//! Reference data priming
//!
//! Field catalogs, role grid columns and keyword categories are fetched
//! before a run and cached in settings. A failed fetch keeps the cached
//! value; only a breaker trip stops priming.

use crate::db::settings;
use crate::error::SyncResult;
use crate::models::{FieldDescriptor, GridColumn, KeywordCategory};
use crate::services::remote_client::RemoteDataClient;
use crate::services::requests;
use oasync_common::EntityKind;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// What priming managed to refresh
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrimeReport {
    pub field_catalogs: usize,
    pub grid_columns: bool,
    pub keyword_categories: bool,
}

/// Refresh every reference cache
pub async fn prime_reference_data(client: &RemoteDataClient, db: &SqlitePool) -> SyncResult<PrimeReport> {
    let mut report = PrimeReport::default();

    for kind in EntityKind::ALL {
        match client
            .fetch_as::<Vec<FieldDescriptor>>(&requests::field_catalog_request(kind))
            .await
        {
            Ok(fields) => {
                settings::save_field_catalog(db, kind, &fields).await?;
                report.field_catalogs += 1;
            }
            Err(e) if e.is_terminal() => return Err(e),
            Err(e) => warn!(kind = %kind, error = %e, "Field catalog fetch failed, keeping cache"),
        }
    }

    let roles_field_id = match client
        .fetch_as::<Vec<FieldDescriptor>>(&requests::roles_field_request())
        .await
    {
        Ok(fields) => fields.first().map(|f| f.id),
        Err(e) if e.is_terminal() => return Err(e),
        Err(e) => {
            warn!(error = %e, "Roles field lookup failed");
            None
        }
    };

    match client
        .fetch_as::<Vec<GridColumn>>(&requests::grid_columns_request(roles_field_id))
        .await
    {
        Ok(columns) => {
            settings::save_grid_columns(db, &columns).await?;
            report.grid_columns = true;
        }
        Err(e) if e.is_terminal() => return Err(e),
        Err(e) => warn!(error = %e, "Grid columns fetch failed, keeping cache"),
    }

    match client
        .fetch_as::<Vec<KeywordCategory>>(&requests::keyword_categories_request())
        .await
    {
        Ok(categories) => {
            settings::save_keyword_categories(db, &categories).await?;
            report.keyword_categories = true;
        }
        Err(e) if e.is_terminal() => return Err(e),
        Err(e) => warn!(error = %e, "Keyword categories fetch failed, keeping cache"),
    }

    info!(
        field_catalogs = report.field_catalogs,
        grid_columns = report.grid_columns,
        keyword_categories = report.keyword_categories,
        "Reference data primed"
    );

    Ok(report)
}
