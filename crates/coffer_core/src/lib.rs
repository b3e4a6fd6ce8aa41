//! Core domain logic for the coffer vault.
//! Stores, records, expiry pruning and snapshots live here; the API and
//! daemon crates only adapt these types.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod policy;
pub mod repo;
pub mod scheduler;
pub mod snapshot;

pub use config::{AuthConfig, ConfigError, SchedulerConfig, VaultConfig};
pub use db::{Database, DbError, DbResult};
pub use logging::{default_log_level, init_logging, init_stderr_logging, logging_status, LogTarget};
pub use model::now_epoch_ms;
pub use model::record::{
    NewRecord, Record, RecordHeader, RecordId, RecordPatch, TtlPolicy, DEFAULT_ENCRYPTION,
};
pub use model::store::{NewStore, Store, StoreGraph, StoreId, StorePatch};
pub use model::validation::ValidationError;
pub use policy::{is_expired, DefaultPrunePolicy, PrunePolicy};
pub use repo::sqlite_repo::SqliteVaultRepository;
pub use repo::{EntityRef, RecordRepository, RepoError, RepoResult, StoreRepository};
pub use scheduler::{
    PruneFailure, Pruner, PruningScheduler, SchedulerError, SchedulerHandle, SchedulerState,
    SweepReport,
};
pub use snapshot::{
    parse_snapshot, read_snapshot_file, write_snapshot_file, Snapshot, SnapshotCoordinator,
    SnapshotError, SNAPSHOT_VERSION,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
