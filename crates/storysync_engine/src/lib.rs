//! # Storysync Engine
//!
//! Reconciliation engine for keeping locally authored epics in sync
//! with a remote issue tracker.
//!
//! This crate provides:
//! - Token-bucket rate limiting with adaptive backoff
//! - Resilient remote-call execution (timeout, retry classification,
//!   exponential backoff)
//! - Structural diffing into dependency-annotated change sets
//! - Change planning with deterministic, dependency-respecting order
//! - Execution with dry-run, partial-failure containment, and
//!   bounded-worker concurrency
//! - Snapshot capture, drift diff, and restore
//! - Three-way conflict detection with caller-selected strategies
//!
//! ## Architecture
//!
//! One `RestTracker` represents a tracker connection and owns the
//! connection's rate limiter; every outbound call passes through the
//! same resilient executor. The `SyncEngine` orchestrates a cycle:
//!
//! 1. Fetch remote state through the tracker port
//! 2. Diff local against remote (via the conflict resolver in
//!    bidirectional mode)
//! 3. Plan the change set into dependency order
//! 4. Snapshot remote state before mutating it
//! 5. Execute, aggregating every per-operation outcome
//!
//! ## Key Invariants
//!
//! - Permanent failures (401/403/404) are never retried
//! - No operation's dependency index is at or after its own position
//! - One failed operation skips its dependents, never the whole sync
//! - Dry-run reports have the same shape as execute reports
//! - Snapshots are immutable and restores are themselves undoable

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod backup;
mod cancel;
mod config;
mod diff;
mod engine;
mod error;
mod executor;
mod limiter;
mod planner;
mod port;
mod resolver;

pub use apply::{ExecutionEngine, OperationResult, Outcome};
pub use backup::{BackupManager, FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use cancel::CancelToken;
pub use config::{RateLimitConfig, RetryConfig, SyncConfig};
pub use diff::DiffEngine;
pub use engine::{SyncEngine, SyncMode, SyncOutcome, SyncState, SyncStats};
pub use error::{EngineResult, TrackerError};
pub use executor::{
    RemoteBackend, RemoteMethod, RemoteRequest, RemoteResponse, ResilientExecutor,
};
pub use limiter::{AcquireOutcome, RateLimiter};
pub use planner::ChangePlanner;
pub use port::{RestTracker, TrackerPort};
pub use resolver::ConflictResolver;
