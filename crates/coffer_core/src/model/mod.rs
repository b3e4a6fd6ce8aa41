//! Vault domain model: stores, records and their validation rules.
//!
//! # Responsibility
//! - Define canonical data structures used by repository and scheduler code.
//! - Keep create requests and typed partial updates next to the entities they build.
//!
//! # Invariants
//! - A record belongs to exactly one store and is never reassigned.
//! - `expires_at`, when set, is never earlier than `created_at`.
//! - Timestamps are unix epoch milliseconds.

pub mod buffer;
pub mod record;
pub mod store;
pub mod validation;

use serde::{Deserialize, Deserializer};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}

/// Deserializes a present field as `Some`, keeping explicit JSON `null`
/// distinguishable from an absent field in patches.
pub(crate) fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}
