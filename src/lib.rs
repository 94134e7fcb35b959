//! # cs-tools-core
//!
//! HTTP orchestration substrate for talking to a ThoughtSpot-style analytics
//! cluster: a rate-limited, cached, retrying transport; a typed REST client;
//! fan-out workflows built on top of it; and a TML checkpoint/deploy engine
//! for moving content between environments.
//!
//! ## Key Features
//!
//! - **Cached transport**: opt-in, per-request SQLite-backed response cache
//! - **Bounded concurrency**: every fan-out workflow runs through a semaphore-backed task group
//! - **Deterministic retry**: stateless classifier, no wall-clock-dependent jitter
//! - **TML deployment engine**: checkpoint objects to disk, deploy them into another environment
//!
//! ## Example
//!
//! ```rust,no_run
//! use cs_tools_core::{ApiClient, ClientConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ClientConfig::new("https://my-cluster.thoughtspot.cloud");
//! let client = ApiClient::new(&config)?;
//! client.login("admin", "correct-horse-battery-staple", None).await?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::missing_errors_doc)]

// =============================================================================
// Module declarations
// =============================================================================

pub mod cache;
pub mod client;
pub mod config;
pub mod deploy;
pub mod error;
pub mod retry;
pub mod session;
pub mod syncer;
pub mod task_group;
pub mod types;
pub mod workflows;

pub(crate) mod logging;
pub(crate) mod paginator;
pub(crate) mod transport;

// =============================================================================
// Public API re-exports
// =============================================================================

pub use client::{scrub_undefined_sentinel, ApiClient, SharedApiClient};

pub use config::{ClientConfig, DEFAULT_REQUEST_TIMEOUT, PERMISSIONS_REQUEST_TIMEOUT};

pub use error::{CsToolsError, CsToolsResult, ErrorCategory, ErrorSeverity};

pub use session::{SessionContext, SessionUser};

pub use types::{ApiObjectType, ApiResult, Guid, OperationStatusRow, TmlImportPolicy, TmlStatus, TypedGuids};

pub use cache::{CacheStore, CachedResponse};

pub use retry::{GiveReason, Outcome, RetryDecision, RetryPolicy};

pub use task_group::BoundedTaskGroup;

pub use deploy::{checkpoint, deploy as deploy_tml, CheckpointFilters, DeployType, HistoryMode, HistoryRecord, MappingFile};

pub use syncer::{DatabaseSyncer, FileSyncer, LoadStrategy, Record, RecordBatch, Syncer, SyncerManifest, TabularFileSyncer};

pub use paginator::{paginate, DEFAULT_RECORD_SIZE};
