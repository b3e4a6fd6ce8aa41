//! Record domain model.
//!
//! # Responsibility
//! - Define the titled, optionally-expiring opaque payload owned by a store.
//! - Provide create specs and typed partial updates for records.
//!
//! # Invariants
//! - `(store_id, id)` identifies a record; `id` alone is only store-unique.
//! - `buffer` is never inspected; `encryption` is an opaque client label.
//! - `expires_at >= created_at` whenever `expires_at` is set.

use super::buffer;
use super::deserialize_present;
use super::store::StoreId;
use super::validation::{
    check_expiry_window, normalize_encryption_label, normalize_title, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record identifier, unique within its owning store.
pub type RecordId = i64;

/// Encryption label used when the client does not provide one.
pub const DEFAULT_ENCRYPTION: &str = "none";

/// What happens to a record once its expiry time has passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlPolicy {
    /// Deleted by the pruning sweep after calendar expiry.
    #[default]
    Prune,
    /// Reported as expired but kept until deleted explicitly.
    Retain,
}

impl TtlPolicy {
    /// Stable storage value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prune => "prune",
            Self::Retain => "retain",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "prune" => Some(Self::Prune),
            "retain" => Some(Self::Retain),
            _ => None,
        }
    }
}

/// Record metadata without the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub id: RecordId,
    pub store_id: StoreId,
    pub title: String,
    pub metadata: Option<Value>,
    pub encryption: String,
    /// Payload length in bytes.
    pub size: u64,
    pub ttl_policy: TtlPolicy,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
    /// Unix epoch milliseconds; `None` means the record never expires.
    pub expires_at: Option<i64>,
}

/// Full record: header plus opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub header: RecordHeader,
    pub buffer: Vec<u8>,
}

impl Record {
    /// Checks field-level invariants of a persisted or imported record.
    pub fn validate(&self) -> Result<(), ValidationError> {
        normalize_title(&self.header.title)?;
        normalize_encryption_label(&self.header.encryption)?;
        check_expiry_window(self.header.created_at, self.header.expires_at)
    }

    /// Applies `patch` to a copy of this record and validates the result.
    pub fn patched(&self, patch: &RecordPatch, now: i64) -> Result<Self, ValidationError> {
        let mut next = self.clone();
        if let Some(title) = patch.title.as_deref() {
            next.header.title = normalize_title(title)?;
        }
        if let Some(metadata) = patch.metadata.as_ref() {
            next.header.metadata = if metadata.is_null() {
                None
            } else {
                Some(metadata.clone())
            };
        }
        if let Some(encryption) = patch.encryption.as_deref() {
            next.header.encryption = normalize_encryption_label(encryption)?;
        }
        if let Some(buffer) = patch.buffer.as_ref() {
            next.buffer = buffer.clone();
            next.header.size = payload_size(buffer);
        }
        if let Some(ttl_policy) = patch.ttl_policy {
            next.header.ttl_policy = ttl_policy;
        }
        if let Some(expires_at) = patch.expires_at {
            next.header.expires_at = expires_at;
        }
        next.header.updated_at = now.max(self.header.updated_at);
        next.validate()?;
        Ok(next)
    }
}

/// Create request for a new record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub title: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub encryption: Option<String>,
    #[serde(default, with = "buffer")]
    pub buffer: Vec<u8>,
    #[serde(default)]
    pub ttl_policy: TtlPolicy,
    /// Defaults to the time of insertion.
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl NewRecord {
    pub fn new(title: impl Into<String>, buffer: impl Into<Vec<u8>>) -> Self {
        Self {
            title: title.into(),
            buffer: buffer.into(),
            ..Self::default()
        }
    }

    pub fn expiring_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn created_at(mut self, created_at: i64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_policy(mut self, ttl_policy: TtlPolicy) -> Self {
        self.ttl_policy = ttl_policy;
        self
    }

    /// Builds the record that will be persisted under `(store_id, id)`.
    pub fn build(&self, store_id: StoreId, id: RecordId, now: i64) -> Result<Record, ValidationError> {
        let created_at = self.created_at.unwrap_or(now);
        let encryption = match self.encryption.as_deref() {
            Some(label) => normalize_encryption_label(label)?,
            None => DEFAULT_ENCRYPTION.to_string(),
        };
        let record = Record {
            header: RecordHeader {
                id,
                store_id,
                title: normalize_title(&self.title)?,
                metadata: self.metadata.clone().filter(|value| !value.is_null()),
                encryption,
                size: payload_size(&self.buffer),
                ttl_policy: self.ttl_policy,
                created_at,
                updated_at: created_at.max(now),
                expires_at: self.expires_at,
            },
            buffer: self.buffer.clone(),
        };
        record.validate()?;
        Ok(record)
    }
}

/// Partial update for a record. `None` leaves a field untouched.
///
/// - `metadata: Some(Value::Null)` clears stored metadata.
/// - `expires_at: Some(None)` removes the expiry (JSON `null`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub encryption: Option<String>,
    #[serde(default, with = "buffer::option")]
    pub buffer: Option<Vec<u8>>,
    #[serde(default)]
    pub ttl_policy: Option<TtlPolicy>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub expires_at: Option<Option<i64>>,
}

pub(crate) fn payload_size(buffer: &[u8]) -> u64 {
    u64::try_from(buffer.len()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{NewRecord, RecordPatch, TtlPolicy, ValidationError};
    use serde_json::json;

    #[test]
    fn build_defaults_creation_time_and_encryption() {
        let record = NewRecord::new("token", b"abc".to_vec())
            .build(3, 1, 5_000)
            .unwrap();
        assert_eq!(record.header.created_at, 5_000);
        assert_eq!(record.header.updated_at, 5_000);
        assert_eq!(record.header.encryption, "none");
        assert_eq!(record.header.size, 3);
        assert_eq!(record.header.ttl_policy, TtlPolicy::Prune);
    }

    #[test]
    fn build_rejects_expiry_before_creation() {
        let err = NewRecord::new("token", Vec::new())
            .created_at(2_000)
            .expiring_at(1_000)
            .build(1, 1, 3_000)
            .unwrap_err();
        assert!(matches!(err, ValidationError::ExpiryBeforeCreation { .. }));
    }

    #[test]
    fn patch_can_clear_expiry_and_replace_buffer() {
        let record = NewRecord::new("token", b"old".to_vec())
            .expiring_at(9_000)
            .build(1, 1, 1_000)
            .unwrap();
        let patch: RecordPatch =
            serde_json::from_value(json!({"expires_at": null, "buffer": "bmV3IQ=="})).unwrap();

        let next = record.patched(&patch, 2_000).unwrap();
        assert_eq!(next.header.expires_at, None);
        assert_eq!(next.buffer, b"new!".to_vec());
        assert_eq!(next.header.size, 4);
        assert_eq!(next.header.updated_at, 2_000);
    }

    #[test]
    fn patch_moving_expiry_before_creation_fails() {
        let record = NewRecord::new("token", Vec::new())
            .build(1, 1, 1_000)
            .unwrap();
        let patch = RecordPatch {
            expires_at: Some(Some(500)),
            ..RecordPatch::default()
        };
        assert!(record.patched(&patch, 2_000).is_err());
    }

    #[test]
    fn new_record_decodes_base64_buffer() {
        let spec: NewRecord = serde_json::from_value(json!({
            "title": "ssh key",
            "buffer": "AAEC",
            "ttl_policy": "retain"
        }))
        .unwrap();
        assert_eq!(spec.buffer, vec![0, 1, 2]);
        assert_eq!(spec.ttl_policy, TtlPolicy::Retain);
    }
}
