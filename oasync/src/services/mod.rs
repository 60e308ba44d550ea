//! Sync engine services
//!
//! Leaves first: transport and request building, the breaker-aware remote
//! client, blob storage and media ingest, taxonomy, then the reconciliation
//! engine, the scheduler that drives it and the control surface on top.

pub mod blob_store;
pub mod control;
pub mod media_ingestor;
pub mod reconciler;
pub mod reference;
pub mod remote_client;
pub mod requests;
pub mod scheduler;
pub mod sort_value;
pub mod taxonomy;
pub mod transport;

pub use blob_store::{BlobStore, StoredBlob};
pub use control::SyncControl;
pub use media_ingestor::{resolve_best_variant, MediaIngestor, MediaSummary};
pub use reconciler::{ReconciliationEngine, DEFAULT_STEP_BUDGET};
pub use reference::{prime_reference_data, PrimeReport};
pub use remote_client::{check_credentials, RemoteDataClient};
pub use requests::ApiRequest;
pub use scheduler::{Scheduler, StartOutcome, TICK_INTERVAL};
pub use sort_value::SortKey;
pub use taxonomy::{desired_terms, slugify, DesiredTerm, TaxonomyReconciler, TaxonomyReport};
pub use transport::{HttpTransport, Transport, TransportRequest, TransportResponse};
