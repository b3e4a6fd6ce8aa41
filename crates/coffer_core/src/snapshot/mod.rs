//! Import/export coordinator for full or per-store vault snapshots.
//!
//! # Responsibility
//! - Serialize stores with their records from one consistent read.
//! - Restore snapshots all-or-nothing, preserving identities where possible.
//! - Seed an empty vault on first start.
//!
//! # Invariants
//! - An import is validated completely before anything is written.
//! - A rejected import leaves existing state untouched.
//! - Seeding never touches a vault that already holds stores.

mod format;

pub use format::{RecordSnapshot, Snapshot, StoreSnapshot, SNAPSHOT_VERSION};

use crate::model::now_epoch_ms;
use crate::model::store::{Store, StoreId};
use crate::repo::{RepoError, StoreRepository};
use log::{info, warn};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub enum SnapshotError {
    /// Input is not valid snapshot JSON.
    Parse(serde_json::Error),
    /// Input parsed but violates a data invariant.
    Malformed { location: String, reason: String },
    UnsupportedVersion(u32),
    Encode(serde_json::Error),
    Io { path: PathBuf, source: std::io::Error },
    Repo(RepoError),
}

impl SnapshotError {
    fn malformed(location: &str, reason: impl Display) -> Self {
        Self::Malformed {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the snapshot data itself was rejected.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::Malformed { .. } | Self::UnsupportedVersion(_)
        )
    }
}

impl Display for SnapshotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "malformed snapshot: {err}"),
            Self::Malformed { location, reason } => {
                write!(f, "malformed snapshot at {location}: {reason}")
            }
            Self::UnsupportedVersion(version) => write!(
                f,
                "unsupported snapshot version {version}, expected {SNAPSHOT_VERSION}"
            ),
            Self::Encode(err) => write!(f, "failed to encode snapshot: {err}"),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SnapshotError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) | Self::Encode(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Repo(err) => Some(err),
            Self::Malformed { .. } | Self::UnsupportedVersion(_) => None,
        }
    }
}

impl From<RepoError> for SnapshotError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Coordinates snapshot export/import over a store repository.
#[derive(Debug)]
pub struct SnapshotCoordinator<R> {
    repo: Arc<R>,
}

impl<R: StoreRepository> SnapshotCoordinator<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Snapshot of every store and record at a single instant.
    pub fn export_all(&self) -> Result<Snapshot, SnapshotError> {
        let graphs = self.repo.load_graph(None)?;
        Ok(Snapshot::from_graphs(graphs, now_epoch_ms()))
    }

    /// Snapshot of one store; fails with `NotFound` when it does not exist.
    pub fn export_one(&self, store_id: StoreId) -> Result<Snapshot, SnapshotError> {
        let graphs = self.repo.load_graph(Some(store_id))?;
        Ok(Snapshot::from_graphs(graphs, now_epoch_ms()))
    }

    /// Restores `snapshot` atomically and returns the stores as persisted.
    pub fn import_snapshot(&self, snapshot: &Snapshot) -> Result<Vec<Store>, SnapshotError> {
        let graphs = match snapshot.to_graphs() {
            Ok(graphs) => graphs,
            Err(err) => {
                warn!("event=snapshot_import module=snapshot status=rejected error={err}");
                return Err(err);
            }
        };
        let stores = self.repo.import_graph(&graphs)?;
        info!(
            "event=snapshot_import module=snapshot status=ok stores={} records={}",
            stores.len(),
            snapshot.record_count()
        );
        Ok(stores)
    }

    /// Imports `seed` only when the vault holds no stores yet.
    ///
    /// Returns the number of stores created.
    pub fn seed_if_empty(&self, seed: &Snapshot) -> Result<usize, SnapshotError> {
        let existing = self.repo.count_stores()?;
        if existing > 0 {
            info!(
                "event=snapshot_seed module=snapshot status=skipped existing_stores={existing}"
            );
            return Ok(0);
        }
        warn!(
            "event=snapshot_seed module=snapshot status=start stores={}",
            seed.stores.len()
        );
        Ok(self.import_snapshot(seed)?.len())
    }

    /// Exports all stores (`None`) or one store to a JSON file.
    pub fn export_to_file(
        &self,
        scope: Option<StoreId>,
        path: impl AsRef<Path>,
    ) -> Result<Snapshot, SnapshotError> {
        let snapshot = match scope {
            Some(store_id) => self.export_one(store_id)?,
            None => self.export_all()?,
        };
        write_snapshot_file(path.as_ref(), &snapshot)?;
        info!(
            "event=snapshot_export module=snapshot status=ok path={} stores={} records={}",
            path.as_ref().display(),
            snapshot.stores.len(),
            snapshot.record_count()
        );
        Ok(snapshot)
    }

    pub fn import_from_file(&self, path: impl AsRef<Path>) -> Result<Vec<Store>, SnapshotError> {
        let snapshot = read_snapshot_file(path.as_ref())?;
        self.import_snapshot(&snapshot)
    }
}

/// Parses snapshot JSON.
///
/// A bare JSON array is accepted as the list of stores of a version-1
/// snapshot, which keeps hand-written seed files short.
pub fn parse_snapshot(text: &str) -> Result<Snapshot, SnapshotError> {
    let value: Value = serde_json::from_str(text).map_err(SnapshotError::Parse)?;
    snapshot_from_value(value)
}

/// Reads and parses a snapshot file.
pub fn read_snapshot_file(path: &Path) -> Result<Snapshot, SnapshotError> {
    let file = File::open(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value =
        serde_json::from_reader(BufReader::new(file)).map_err(SnapshotError::Parse)?;
    snapshot_from_value(value)
}

/// Writes `snapshot` as pretty-printed JSON, replacing any existing file.
pub fn write_snapshot_file(path: &Path, snapshot: &Snapshot) -> Result<(), SnapshotError> {
    let io_error = |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, snapshot).map_err(SnapshotError::Encode)?;
    writer.flush().map_err(io_error)
}

fn snapshot_from_value(value: Value) -> Result<Snapshot, SnapshotError> {
    if value.is_array() {
        let stores: Vec<StoreSnapshot> =
            serde_json::from_value(value).map_err(SnapshotError::Parse)?;
        return Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            exported_at: 0,
            stores,
        });
    }
    serde_json::from_value(value).map_err(SnapshotError::Parse)
}
