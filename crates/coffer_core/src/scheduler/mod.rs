//! Pruning scheduler: a long-lived thread that sweeps expired records.
//!
//! # Responsibility
//! - Own the sweep timer and a reference to the record repository.
//! - Be started and stopped explicitly by the process lifecycle.
//!
//! # Invariants
//! - The period is strictly positive.
//! - A stop request is only observed between sweeps; a running sweep always
//!   finishes the batch it fetched.
//! - Sweep failures are logged and never end the loop.

mod sweep;

pub use sweep::{PruneFailure, Pruner, SweepReport};

use crate::model::now_epoch_ms;
use crate::policy::PrunePolicy;
use crate::repo::RecordRepository;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const SCHEDULER_THREAD_NAME: &str = "coffer-pruner";

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next tick.
    Idle,
    /// Running a sweep.
    Sweeping,
}

impl SchedulerState {
    fn to_raw(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Sweeping => 1,
        }
    }

    fn from_raw(raw: u8) -> Self {
        if raw == 1 {
            Self::Sweeping
        } else {
            Self::Idle
        }
    }
}

#[derive(Debug)]
pub enum SchedulerError {
    InvalidPeriod,
    Spawn(std::io::Error),
    Panicked,
}

impl Display for SchedulerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPeriod => write!(f, "scheduler period must be greater than zero"),
            Self::Spawn(err) => write!(f, "failed to spawn scheduler thread: {err}"),
            Self::Panicked => write!(f, "scheduler thread panicked"),
        }
    }
}

impl Error for SchedulerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
            Self::InvalidPeriod | Self::Panicked => None,
        }
    }
}

#[derive(Debug)]
struct SharedState {
    state: AtomicU8,
    sweeps: AtomicU64,
}

/// Entry point for starting the background pruning loop.
#[derive(Debug)]
pub struct PruningScheduler;

impl PruningScheduler {
    /// Spawns the scheduler thread; the first sweep runs one `period` after start.
    pub fn start<R, P>(pruner: Pruner<R, P>, period: Duration) -> Result<SchedulerHandle, SchedulerError>
    where
        R: RecordRepository + Send + Sync + 'static,
        P: PrunePolicy + Send + 'static,
    {
        if period.is_zero() {
            return Err(SchedulerError::InvalidPeriod);
        }

        let shared = Arc::new(SharedState {
            state: AtomicU8::new(SchedulerState::Idle.to_raw()),
            sweeps: AtomicU64::new(0),
        });
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let loop_state = Arc::clone(&shared);

        let thread = thread::Builder::new()
            .name(SCHEDULER_THREAD_NAME.to_string())
            .spawn(move || run_loop(&pruner, period, &stop_rx, &loop_state))
            .map_err(SchedulerError::Spawn)?;

        Ok(SchedulerHandle {
            stop_tx,
            thread,
            shared,
        })
    }
}

/// Handle to a running scheduler.
///
/// Dropping the handle without calling [`SchedulerHandle::stop`] also ends the
/// loop after the current wait, but does not wait for the thread.
#[derive(Debug)]
pub struct SchedulerHandle {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
    shared: Arc<SharedState>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_raw(self.shared.state.load(Ordering::SeqCst))
    }

    /// Number of sweeps finished so far, failed ones included.
    pub fn completed_sweeps(&self) -> u64 {
        self.shared.sweeps.load(Ordering::SeqCst)
    }

    /// Requests a stop and waits for the loop to exit.
    pub fn stop(self) -> Result<(), SchedulerError> {
        let _ = self.stop_tx.send(());
        self.thread.join().map_err(|_| SchedulerError::Panicked)
    }

    /// Blocks until the loop exits, which under normal operation is never.
    pub fn join(self) -> Result<(), SchedulerError> {
        let Self {
            stop_tx: _keep_alive,
            thread,
            ..
        } = self;
        thread.join().map_err(|_| SchedulerError::Panicked)
    }
}

fn run_loop<R, P>(
    pruner: &Pruner<R, P>,
    period: Duration,
    stop_rx: &mpsc::Receiver<()>,
    shared: &SharedState,
) where
    R: RecordRepository,
    P: PrunePolicy,
{
    info!(
        "event=scheduler_start module=scheduler status=ok period_ms={}",
        period.as_millis()
    );

    loop {
        match stop_rx.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        shared
            .state
            .store(SchedulerState::Sweeping.to_raw(), Ordering::SeqCst);
        let started_at = Instant::now();
        match pruner.sweep(now_epoch_ms()) {
            Ok(report) if report.prunable > 0 => info!(
                "event=sweep module=scheduler status=done duration_ms={} expired={} prunable={} pruned={} already_gone={} skipped={} failed={}",
                started_at.elapsed().as_millis(),
                report.expired,
                report.prunable,
                report.pruned,
                report.already_gone,
                report.skipped,
                report.failures.len()
            ),
            Ok(_) => {}
            Err(err) => error!(
                "event=sweep module=scheduler status=error duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            ),
        }
        shared.sweeps.fetch_add(1, Ordering::SeqCst);
        shared
            .state
            .store(SchedulerState::Idle.to_raw(), Ordering::SeqCst);
    }

    info!("event=scheduler_stop module=scheduler status=ok");
}
