//! Repository layer: per-entity capability traits and the SQLite implementation.
//!
//! # Responsibility
//! - Define the store/record data access contracts used by API callers,
//!   the pruning scheduler and the snapshot coordinator.
//! - Isolate SQL details behind those contracts.
//!
//! # Invariants
//! - Write paths validate entities before any SQL mutation.
//! - Read-modify-write paths run inside `BEGIN IMMEDIATE` transactions.
//! - Every failure is returned to the caller; nothing is swallowed here.

pub mod sqlite_repo;

use crate::db::DbError;
use crate::model::record::{NewRecord, Record, RecordHeader, RecordId, RecordPatch};
use crate::model::store::{NewStore, Store, StoreGraph, StoreId, StorePatch};
use crate::model::validation::ValidationError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Identifies the entity a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Store(StoreId),
    Record {
        store_id: StoreId,
        record_id: RecordId,
    },
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(id) => write!(f, "store {id}"),
            Self::Record {
                store_id,
                record_id,
            } => write!(f, "record {record_id} in store {store_id}"),
        }
    }
}

/// Repository error for store/record persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Db(DbError),
    NotFound(EntityRef),
    InvalidData(String),
}

impl RepoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "storage error: {err}"),
            Self::NotFound(entity) => write!(f, "{entity} not found"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Store capabilities.
pub trait StoreRepository {
    /// Lists all stores ordered by id.
    fn list_stores(&self) -> RepoResult<Vec<Store>>;
    fn count_stores(&self) -> RepoResult<u64>;
    fn create_store(&self, spec: &NewStore) -> RepoResult<Store>;
    fn get_store(&self, id: StoreId) -> RepoResult<Store>;
    fn update_store(&self, id: StoreId, patch: &StorePatch) -> RepoResult<Store>;
    /// Deletes a store and all of its records in one transaction.
    ///
    /// Returns the number of records removed with it.
    fn delete_store(&self, id: StoreId) -> RepoResult<usize>;
    /// Reads stores with their records from a single read transaction.
    ///
    /// `None` loads every store; `Some(id)` fails with `NotFound` when absent.
    fn load_graph(&self, scope: Option<StoreId>) -> RepoResult<Vec<StoreGraph>>;
    /// Writes stores with their records in a single write transaction.
    ///
    /// Store ids are kept when free, otherwise storage assigns a new one.
    /// Record ids are always kept. Returns the stores as persisted.
    fn import_graph(&self, graphs: &[StoreGraph]) -> RepoResult<Vec<Store>>;
}

/// Record capabilities.
pub trait RecordRepository {
    /// Lists record headers of one store ordered by id.
    fn list_records(&self, store_id: StoreId) -> RepoResult<Vec<RecordHeader>>;
    fn create_record(&self, store_id: StoreId, spec: &NewRecord) -> RepoResult<Record>;
    fn get_record(&self, store_id: StoreId, record_id: RecordId) -> RepoResult<Record>;
    fn update_record(
        &self,
        store_id: StoreId,
        record_id: RecordId,
        patch: &RecordPatch,
    ) -> RepoResult<Record>;
    fn delete_record(&self, store_id: StoreId, record_id: RecordId) -> RepoResult<()>;
    /// Deletes a record only if `guard` still holds for its current state.
    ///
    /// The check and the delete happen in the same write transaction.
    /// Returns `Ok(false)` when the guard rejected the current state.
    fn delete_record_if(
        &self,
        store_id: StoreId,
        record_id: RecordId,
        guard: &dyn Fn(&RecordHeader) -> bool,
    ) -> RepoResult<bool>;
    /// Headers of every record with `expires_at <= now`, across all stores.
    fn list_expired(&self, now: i64) -> RepoResult<Vec<RecordHeader>>;
}
