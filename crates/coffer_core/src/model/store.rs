//! Store domain model.
//!
//! # Responsibility
//! - Define the named container that owns records.
//! - Provide create specs and typed partial updates for stores.
//!
//! # Invariants
//! - `id` is assigned by storage and never changes afterwards.
//! - A store exclusively owns its records; deleting it deletes them.

use super::record::Record;
use super::deserialize_present;
use super::validation::{normalize_title, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store identifier, unique across the vault.
pub type StoreId = i64;

/// Named container of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    pub title: String,
    /// Free-form client metadata, stored as JSON.
    pub metadata: Option<Value>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
}

/// Create request for a new store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewStore {
    pub title: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl NewStore {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            metadata: None,
        }
    }

    /// Returns a normalized copy, or the first validation failure.
    pub fn validated(&self) -> Result<Self, ValidationError> {
        Ok(Self {
            title: normalize_title(&self.title)?,
            metadata: self.metadata.clone().filter(|value| !value.is_null()),
        })
    }
}

/// Partial update for a store. `None` leaves a field untouched.
///
/// `metadata: Some(Value::Null)` clears stored metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorePatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub metadata: Option<Value>,
}

impl Store {
    /// Applies `patch` to a copy of this store and validates the result.
    pub fn patched(&self, patch: &StorePatch, now: i64) -> Result<Self, ValidationError> {
        let mut next = self.clone();
        if let Some(title) = patch.title.as_deref() {
            next.title = normalize_title(title)?;
        }
        if let Some(metadata) = patch.metadata.as_ref() {
            next.metadata = if metadata.is_null() {
                None
            } else {
                Some(metadata.clone())
            };
        }
        next.updated_at = now.max(self.updated_at);
        next.validate()?;
        Ok(next)
    }

    /// Checks field-level invariants of a persisted or imported store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        normalize_title(&self.title).map(|_| ())
    }
}

/// A store together with every record it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreGraph {
    pub store: Store,
    pub records: Vec<Record>,
}

#[cfg(test)]
mod tests {
    use super::{NewStore, Store, StorePatch};
    use serde_json::json;

    fn store() -> Store {
        Store {
            id: 7,
            title: "mail".to_string(),
            metadata: Some(json!({"color": "red"})),
            created_at: 1_000,
            updated_at: 1_000,
        }
    }

    #[test]
    fn patch_replaces_only_given_fields() {
        let patch = StorePatch {
            title: Some(" inbox ".to_string()),
            metadata: None,
        };
        let next = store().patched(&patch, 2_000).unwrap();
        assert_eq!(next.title, "inbox");
        assert_eq!(next.metadata, Some(json!({"color": "red"})));
        assert_eq!(next.updated_at, 2_000);
        assert_eq!(next.created_at, 1_000);
    }

    #[test]
    fn null_metadata_patch_clears_metadata() {
        let patch = StorePatch {
            title: None,
            metadata: Some(serde_json::Value::Null),
        };
        assert_eq!(store().patched(&patch, 2_000).unwrap().metadata, None);
    }

    #[test]
    fn json_null_metadata_is_kept_as_clear_request() {
        let patch: StorePatch = serde_json::from_value(json!({"metadata": null})).unwrap();
        assert_eq!(patch.metadata, Some(serde_json::Value::Null));

        let patch: StorePatch = serde_json::from_value(json!({"title": "x"})).unwrap();
        assert_eq!(patch.metadata, None);
    }

    #[test]
    fn new_store_rejects_blank_title() {
        assert!(NewStore::new("  ").validated().is_err());
    }
}
