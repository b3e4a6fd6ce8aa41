//! Expiration policy: pure decisions about record lifetime.
//!
//! # Responsibility
//! - Decide whether a record is expired at a given instant.
//! - Decide whether an expired record may be deleted right now.
//!
//! # Invariants
//! - `is_expired` is monotonic in `now`.
//! - A prunable record is always expired.

use crate::model::record::{RecordHeader, TtlPolicy};

/// Returns whether `header` has expired at `now` (epoch milliseconds).
pub fn is_expired(header: &RecordHeader, now: i64) -> bool {
    header.expires_at.is_some_and(|expires_at| expires_at <= now)
}

/// Decides whether an expired record is currently safe to delete.
///
/// Implementations may add holds such as retention or legal hold,
/// but must never report a non-expired record as prunable.
pub trait PrunePolicy {
    fn is_prunable(&self, header: &RecordHeader, now: i64) -> bool;
}

/// Prunes expired records whose ttl policy asks for deletion.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPrunePolicy;

impl PrunePolicy for DefaultPrunePolicy {
    fn is_prunable(&self, header: &RecordHeader, now: i64) -> bool {
        is_expired(header, now) && header.ttl_policy == TtlPolicy::Prune
    }
}

#[cfg(test)]
mod tests {
    use super::{is_expired, DefaultPrunePolicy, PrunePolicy};
    use crate::model::record::{RecordHeader, TtlPolicy};

    fn header(expires_at: Option<i64>, ttl_policy: TtlPolicy) -> RecordHeader {
        RecordHeader {
            id: 1,
            store_id: 1,
            title: "otp seed".to_string(),
            metadata: None,
            encryption: "none".to_string(),
            size: 0,
            ttl_policy,
            created_at: 0,
            updated_at: 0,
            expires_at,
        }
    }

    #[test]
    fn records_without_expiry_never_expire() {
        let record = header(None, TtlPolicy::Prune);
        assert!(!is_expired(&record, i64::MAX));
        assert!(!DefaultPrunePolicy.is_prunable(&record, i64::MAX));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let record = header(Some(1_000), TtlPolicy::Prune);
        assert!(!is_expired(&record, 999));
        assert!(is_expired(&record, 1_000));
    }

    #[test]
    fn expiry_is_monotonic_in_now() {
        for expires_at in [-5_i64, 0, 1, 1_000, 1_700_000_000_000] {
            let record = header(Some(expires_at), TtlPolicy::Prune);
            let mut seen_expired = false;
            for now in (expires_at - 3)..(expires_at + 3) {
                let expired = is_expired(&record, now);
                assert!(!seen_expired || expired, "expiry flipped back at now={now}");
                seen_expired |= expired;
            }
            assert!(seen_expired);
        }
    }

    #[test]
    fn retained_records_expire_but_are_not_prunable() {
        let record = header(Some(10), TtlPolicy::Retain);
        assert!(is_expired(&record, 20));
        assert!(!DefaultPrunePolicy.is_prunable(&record, 20));
    }

    #[test]
    fn prunable_implies_expired() {
        let record = header(Some(10), TtlPolicy::Prune);
        assert!(!DefaultPrunePolicy.is_prunable(&record, 9));
        assert!(DefaultPrunePolicy.is_prunable(&record, 10));
    }
}
