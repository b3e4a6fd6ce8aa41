//! One sweep: find expired records and delete the prunable ones.
//!
//! # Invariants
//! - A failed deletion never aborts the sweep; it is captured per record.
//! - A record is deleted only if it is still prunable inside the delete
//!   transaction, so concurrent updates (e.g. an extended expiry) win.
//! - `NotFound` during deletion means someone else already deleted it.

use crate::model::record::{RecordHeader, RecordId};
use crate::model::store::StoreId;
use crate::policy::{DefaultPrunePolicy, PrunePolicy};
use crate::repo::{RecordRepository, RepoError, RepoResult};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Records whose expiry passed, prunable or not.
    pub expired: usize,
    /// Subset of `expired` the policy allowed to delete.
    pub prunable: usize,
    /// Records actually deleted by this sweep.
    pub pruned: usize,
    /// Records already deleted by someone else.
    pub already_gone: usize,
    /// Records that stopped being prunable before their delete ran.
    pub skipped: usize,
    pub failures: Vec<PruneFailure>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A record the sweep could not delete.
#[derive(Debug)]
pub struct PruneFailure {
    pub store_id: StoreId,
    pub record_id: RecordId,
    pub error: RepoError,
}

/// Runs sweeps against a record repository with a prune policy.
#[derive(Debug)]
pub struct Pruner<R, P = DefaultPrunePolicy> {
    repo: Arc<R>,
    policy: P,
}

impl<R: RecordRepository> Pruner<R, DefaultPrunePolicy> {
    pub fn with_default_policy(repo: Arc<R>) -> Self {
        Self::new(repo, DefaultPrunePolicy)
    }
}

impl<R: RecordRepository, P: PrunePolicy> Pruner<R, P> {
    pub fn new(repo: Arc<R>, policy: P) -> Self {
        Self { repo, policy }
    }

    /// Runs one sweep as of `now` (epoch milliseconds).
    ///
    /// Fails only when the expired set cannot be listed; per-record failures
    /// are reported in [`SweepReport::failures`].
    pub fn sweep(&self, now: i64) -> RepoResult<SweepReport> {
        let expired = self.repo.list_expired(now)?;
        let prunable: Vec<&RecordHeader> = expired
            .iter()
            .filter(|header| self.policy.is_prunable(header, now))
            .collect();

        let mut report = SweepReport {
            expired: expired.len(),
            prunable: prunable.len(),
            ..SweepReport::default()
        };

        if report.expired == 0 {
            return Ok(report);
        }
        if report.prunable == 0 {
            debug!(
                "event=sweep module=scheduler status=held expired={} prunable=0",
                report.expired
            );
            return Ok(report);
        }

        info!(
            "event=sweep module=scheduler status=start expired={} prunable={}",
            report.expired, report.prunable
        );

        let still_prunable = |current: &RecordHeader| self.policy.is_prunable(current, now);
        for header in prunable {
            warn!(
                "event=record_prune module=scheduler store_id={} record_id={} expires_at={:?}",
                header.store_id, header.id, header.expires_at
            );
            match self
                .repo
                .delete_record_if(header.store_id, header.id, &still_prunable)
            {
                Ok(true) => report.pruned += 1,
                Ok(false) => {
                    debug!(
                        "event=record_prune module=scheduler status=skipped store_id={} record_id={}",
                        header.store_id, header.id
                    );
                    report.skipped += 1;
                }
                Err(err) if err.is_not_found() => {
                    debug!(
                        "event=record_prune module=scheduler status=already_gone store_id={} record_id={}",
                        header.store_id, header.id
                    );
                    report.already_gone += 1;
                }
                Err(err) => {
                    error!(
                        "event=record_prune module=scheduler status=error store_id={} record_id={} error={}",
                        header.store_id, header.id, err
                    );
                    report.failures.push(PruneFailure {
                        store_id: header.store_id,
                        record_id: header.id,
                        error: err,
                    });
                }
            }
        }

        Ok(report)
    }
}
