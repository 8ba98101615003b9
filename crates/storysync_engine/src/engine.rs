//! Sync cycle orchestration.
//!
//! Ties the pipeline together: fetch remote state, diff (through the
//! conflict resolver in bidirectional mode), plan, snapshot, execute,
//! and report. The engine aggregates per-operation outcomes into one
//! report rather than raising on first failure, so callers always see
//! the complete picture of what succeeded, failed, and was skipped.

use crate::apply::{ExecutionEngine, OperationResult};
use crate::backup::SnapshotStore;
use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::diff::DiffEngine;
use crate::error::{EngineResult, TrackerError};
use crate::planner::ChangePlanner;
use crate::port::TrackerPort;
use crate::resolver::ConflictResolver;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use storysync_model::{
    current_time_ms, ChangeSet, ConflictRecord, ConflictStrategy, Epic, Snapshot, SnapshotId,
};
use tracing::{info, warn};

/// The current phase of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not syncing.
    Idle,
    /// Computing the change set.
    Diffing,
    /// Ordering the change set.
    Planning,
    /// Capturing the pre-execution snapshot.
    BackingUp,
    /// Applying operations.
    Executing,
    /// Last cycle completed with every operation successful.
    Synced,
    /// Last cycle failed or completed with failures.
    Error,
}

impl SyncState {
    /// Returns true while a cycle is in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Diffing | SyncState::Planning | SyncState::BackingUp | SyncState::Executing
        )
    }

    /// Returns true if a new cycle may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Statistics across sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed cycles.
    pub cycles_completed: u64,
    /// Operations planned across cycles.
    pub operations_planned: u64,
    /// Operations applied successfully.
    pub operations_applied: u64,
    /// Operations that failed.
    pub operations_failed: u64,
    /// Operations skipped due to failed dependencies.
    pub operations_skipped: u64,
    /// Conflicts detected in bidirectional cycles.
    pub conflicts_detected: u64,
    /// Snapshots captured before execution.
    pub snapshots_taken: u64,
    /// Last error message, if the last cycle failed.
    pub last_error: Option<String>,
}

/// How a sync cycle reconciles the two sides.
#[derive(Debug, Clone)]
pub enum SyncMode {
    /// Push local state to the tracker; remote drift is overwritten
    /// where it differs from the authored state.
    Push {
        /// Report without mutating the tracker.
        dry_run: bool,
    },
    /// Three-way reconciliation against a base snapshot; divergent
    /// fields surface as conflicts handled per the strategy.
    Bidirectional {
        /// Strategy for conflicted fields.
        strategy: ConflictStrategy,
        /// Snapshot capturing the last synced state.
        base: SnapshotId,
        /// Report without mutating the tracker.
        dry_run: bool,
    },
}

impl SyncMode {
    fn dry_run(&self) -> bool {
        match self {
            SyncMode::Push { dry_run } => *dry_run,
            SyncMode::Bidirectional { dry_run, .. } => *dry_run,
        }
    }
}

/// Report of one sync cycle.
///
/// Dry-run cycles produce the same shape as execute cycles; only the
/// outcomes differ.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// The planned change set.
    pub changeset: ChangeSet,
    /// Per-operation results, in change-set order.
    pub results: Vec<OperationResult>,
    /// Conflicts detected (bidirectional mode only).
    pub conflicts: Vec<ConflictRecord>,
    /// Id of the pre-execution snapshot, when one was captured.
    pub snapshot: Option<SnapshotId>,
    /// Wall-clock duration of the cycle.
    pub duration: Duration,
    /// True when every operation succeeded.
    pub success: bool,
}

/// Orchestrates sync cycles for one epic against one tracker
/// connection.
pub struct SyncEngine<P: TrackerPort, S: SnapshotStore> {
    config: SyncConfig,
    port: P,
    store: S,
    cancel: CancelToken,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    snapshot_counter: AtomicU64,
}

impl<P: TrackerPort, S: SnapshotStore> SyncEngine<P, S> {
    /// Creates a sync engine.
    ///
    /// The rate limiter lives inside the tracker connection, not
    /// here, so several engines over one connection share one
    /// admission budget.
    pub fn new(config: SyncConfig, port: P, store: S) -> Self {
        Self {
            config,
            port,
            store,
            cancel: CancelToken::new(),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            snapshot_counter: AtomicU64::new(0),
        }
    }

    /// Current phase.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Token that aborts the running cycle when cancelled.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The tracker port this engine drives.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// The snapshot store this engine records into.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn fail(&self, error: TrackerError) -> TrackerError {
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
        error
    }

    /// Runs one sync cycle and returns the full report.
    ///
    /// Errors only for cycle-level problems (fetch failure, missing
    /// base snapshot, cancellation, misuse); per-operation failures
    /// land in the report.
    pub fn sync(&self, local: &Epic, mode: &SyncMode) -> EngineResult<SyncOutcome> {
        if !self.state().can_start_sync() {
            return Err(TrackerError::InvalidState(format!(
                "cannot start sync in state {:?}",
                self.state()
            )));
        }
        self.cancel.reset();
        let started = Instant::now();
        let dry_run = mode.dry_run();

        self.set_state(SyncState::Diffing);
        let remote = match self.port.fetch_epic(&local.key) {
            Ok(remote) => remote,
            Err(error) => return Err(self.fail(error)),
        };

        let (changeset, conflicts) = match mode {
            SyncMode::Push { .. } => (DiffEngine::new().diff(local, &remote), Vec::new()),
            SyncMode::Bidirectional { strategy, base, .. } => {
                let base = match self.store.load(&local.key, base) {
                    Ok(base) => base,
                    Err(error) => return Err(self.fail(error)),
                };
                ConflictResolver::new(*strategy).resolve(local, &remote, &base)
            }
        };
        if !conflicts.is_empty() {
            warn!(epic_key = %local.key, conflicts = conflicts.len(), "conflicts detected");
        }
        if let Err(error) = self.cancel.check() {
            return Err(self.fail(error));
        }

        self.set_state(SyncState::Planning);
        let planned = ChangePlanner::new().plan(changeset);
        info!(
            epic_key = %local.key,
            operations = planned.len(),
            dry_run,
            "change set planned"
        );

        let snapshot = if !dry_run && self.config.capture_snapshots && !planned.is_empty() {
            self.set_state(SyncState::BackingUp);
            // Snapshot the state we already fetched; a second fetch
            // could capture state newer than what was diffed.
            let created_at_ms = current_time_ms();
            let id = SnapshotId::derive(
                created_at_ms,
                self.snapshot_counter.fetch_add(1, Ordering::SeqCst),
            );
            let snapshot = Snapshot::of_epic(&remote, id, created_at_ms);
            if let Err(error) = self.store.save(&snapshot) {
                return Err(self.fail(error));
            }
            self.stats.write().snapshots_taken += 1;
            Some(snapshot.id)
        } else {
            None
        };

        self.set_state(SyncState::Executing);
        let execution = ExecutionEngine::new(
            &self.port,
            local.key.clone(),
            self.config.max_workers,
            self.cancel.clone(),
        );
        let results = match execution.apply(&planned, dry_run) {
            Ok(results) => results,
            Err(error) => return Err(self.fail(error)),
        };

        let failed = results.iter().filter(|r| !r.is_success()).count();
        let skipped = results
            .iter()
            .filter(|r| matches!(r.outcome, crate::apply::Outcome::SkippedDependency { .. }))
            .count();
        let success = failed == 0;

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.operations_planned += planned.len() as u64;
            stats.operations_applied += (results.len() - failed) as u64;
            stats.operations_failed += (failed - skipped) as u64;
            stats.operations_skipped += skipped as u64;
            stats.conflicts_detected += conflicts.len() as u64;
            stats.last_error = if success {
                None
            } else {
                Some(format!("{failed} operations failed or were skipped"))
            };
        }

        self.set_state(if success {
            SyncState::Synced
        } else {
            SyncState::Error
        });
        info!(
            epic_key = %local.key,
            operations = results.len(),
            failed,
            success,
            "sync cycle complete"
        );

        Ok(SyncOutcome {
            changeset: planned,
            results,
            conflicts,
            snapshot,
            duration: started.elapsed(),
            success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_states() {
        assert!(SyncState::Diffing.is_active());
        assert!(SyncState::Executing.is_active());
        assert!(!SyncState::Idle.is_active());
        assert!(!SyncState::Synced.is_active());
    }

    #[test]
    fn startable_states() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Synced.can_start_sync());
        assert!(SyncState::Error.can_start_sync());
        assert!(!SyncState::BackingUp.can_start_sync());
    }

    #[test]
    fn mode_dry_run_flag() {
        assert!(SyncMode::Push { dry_run: true }.dry_run());
        assert!(!SyncMode::Bidirectional {
            strategy: ConflictStrategy::Manual,
            base: SnapshotId::derive(1, 0),
            dry_run: false,
        }
        .dry_run());
    }
}
