//! Serialized snapshot shape and its conversion to domain graphs.
//!
//! # Invariants
//! - Payload bytes are base64 encoded in JSON.
//! - Conversion to domain types rejects invariant violations instead of
//!   correcting them.

use super::SnapshotError;
use crate::model::buffer;
use crate::model::record::{
    payload_size, Record, RecordHeader, RecordId, TtlPolicy, DEFAULT_ENCRYPTION,
};
use crate::model::store::{Store, StoreGraph, StoreId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Full serialized state of one or more stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Unix epoch milliseconds; `0` for hand-written seed files.
    #[serde(default)]
    pub exported_at: i64,
    #[serde(default)]
    pub stores: Vec<StoreSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub id: StoreId,
    pub title: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub created_at: i64,
    /// Defaults to `created_at` when absent.
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub records: Vec<RecordSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default = "default_encryption")]
    pub encryption: String,
    #[serde(with = "buffer")]
    pub buffer: Vec<u8>,
    #[serde(default)]
    pub ttl_policy: TtlPolicy,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

fn default_encryption() -> String {
    DEFAULT_ENCRYPTION.to_string()
}

impl Snapshot {
    pub fn from_graphs(graphs: Vec<StoreGraph>, exported_at: i64) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            exported_at,
            stores: graphs.into_iter().map(StoreSnapshot::from_graph).collect(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.stores.iter().map(|store| store.records.len()).sum()
    }

    /// Converts every store to a domain graph, failing on the first violation.
    pub fn to_graphs(&self) -> Result<Vec<StoreGraph>, SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(self.version));
        }
        self.stores
            .iter()
            .enumerate()
            .map(|(index, store)| store.to_graph(index))
            .collect()
    }
}

impl StoreSnapshot {
    fn from_graph(graph: StoreGraph) -> Self {
        let StoreGraph { store, records } = graph;
        Self {
            id: store.id,
            title: store.title,
            metadata: store.metadata,
            created_at: store.created_at,
            updated_at: Some(store.updated_at),
            records: records.into_iter().map(RecordSnapshot::from_record).collect(),
        }
    }

    fn to_graph(&self, index: usize) -> Result<StoreGraph, SnapshotError> {
        let location = format!("stores[{index}]");
        let store = Store {
            id: self.id,
            title: self.title.clone(),
            metadata: self.metadata.clone().filter(|value| !value.is_null()),
            created_at: self.created_at,
            updated_at: self.updated_at.unwrap_or(self.created_at),
        };
        store
            .validate()
            .map_err(|err| SnapshotError::malformed(&location, err))?;

        let mut seen = HashSet::with_capacity(self.records.len());
        let mut records = Vec::with_capacity(self.records.len());
        for (record_index, source) in self.records.iter().enumerate() {
            let location = format!("{location}.records[{record_index}]");
            if source.id < 1 {
                return Err(SnapshotError::malformed(
                    &location,
                    format!("record id must be positive, got {}", source.id),
                ));
            }
            if source.id == RecordId::MAX {
                return Err(SnapshotError::malformed(
                    &location,
                    format!("record id {} leaves no room for new records", source.id),
                ));
            }
            if !seen.insert(source.id) {
                return Err(SnapshotError::malformed(
                    &location,
                    format!("duplicate record id {}", source.id),
                ));
            }
            let record = source.to_record(self.id);
            record
                .validate()
                .map_err(|err| SnapshotError::malformed(&location, err))?;
            records.push(record);
        }

        Ok(StoreGraph { store, records })
    }
}

impl RecordSnapshot {
    fn from_record(record: Record) -> Self {
        let Record { header, buffer } = record;
        Self {
            id: header.id,
            title: header.title,
            metadata: header.metadata,
            encryption: header.encryption,
            buffer,
            ttl_policy: header.ttl_policy,
            created_at: header.created_at,
            updated_at: Some(header.updated_at),
            expires_at: header.expires_at,
        }
    }

    fn to_record(&self, store_id: StoreId) -> Record {
        Record {
            header: RecordHeader {
                id: self.id,
                store_id,
                title: self.title.clone(),
                metadata: self.metadata.clone().filter(|value| !value.is_null()),
                encryption: self.encryption.clone(),
                size: payload_size(&self.buffer),
                ttl_policy: self.ttl_policy,
                created_at: self.created_at,
                updated_at: self.updated_at.unwrap_or(self.created_at),
                expires_at: self.expires_at,
            },
            buffer: self.buffer.clone(),
        }
    }
}
