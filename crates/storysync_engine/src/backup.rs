//! Snapshot capture, drift diff, and restore.
//!
//! Snapshots are captured before any mutating change set executes so
//! every sync is undoable. The store is append-only and snapshots
//! are immutable once saved; restoring first captures a pre-restore
//! snapshot, so restores are themselves undoable.

use crate::apply::{ExecutionEngine, OperationResult};
use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::diff::DiffEngine;
use crate::error::{EngineResult, TrackerError};
use crate::planner::ChangePlanner;
use crate::port::TrackerPort;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use storysync_model::{current_time_ms, ChangeSet, Snapshot, SnapshotId};
use tracing::info;

/// Ordered, append-only store of snapshots keyed by
/// `(epic_key, snapshot_id)`.
pub trait SnapshotStore: Send + Sync {
    /// Persists a snapshot. Fails if the id already exists; snapshots
    /// are never overwritten.
    fn save(&self, snapshot: &Snapshot) -> EngineResult<()>;

    /// Loads a snapshot by key and id.
    fn load(&self, epic_key: &str, id: &SnapshotId) -> EngineResult<Snapshot>;

    /// Lists snapshot ids for an epic in capture order.
    fn list(&self, epic_key: &str) -> EngineResult<Vec<SnapshotId>>;
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for &S {
    fn save(&self, snapshot: &Snapshot) -> EngineResult<()> {
        (**self).save(snapshot)
    }

    fn load(&self, epic_key: &str, id: &SnapshotId) -> EngineResult<Snapshot> {
        (**self).load(epic_key, id)
    }

    fn list(&self, epic_key: &str) -> EngineResult<Vec<SnapshotId>> {
        (**self).list(epic_key)
    }
}

/// In-memory snapshot store.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<BTreeMap<(String, SnapshotId), Snapshot>>,
}

impl MemorySnapshotStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> EngineResult<()> {
        let key = (snapshot.epic_key.clone(), snapshot.id.clone());
        let mut snapshots = self.snapshots.write();
        if snapshots.contains_key(&key) {
            return Err(TrackerError::Snapshot(format!(
                "snapshot {} already exists for {}",
                snapshot.id, snapshot.epic_key
            )));
        }
        snapshots.insert(key, snapshot.clone());
        Ok(())
    }

    fn load(&self, epic_key: &str, id: &SnapshotId) -> EngineResult<Snapshot> {
        self.snapshots
            .read()
            .get(&(epic_key.to_string(), id.clone()))
            .cloned()
            .ok_or_else(|| {
                TrackerError::Snapshot(format!("snapshot {id} not found for {epic_key}"))
            })
    }

    fn list(&self, epic_key: &str) -> EngineResult<Vec<SnapshotId>> {
        Ok(self
            .snapshots
            .read()
            .keys()
            .filter(|(key, _)| key == epic_key)
            .map(|(_, id)| id.clone())
            .collect())
    }
}

/// File-backed snapshot store: one JSON document per snapshot under
/// `<root>/<epic_key>/<snapshot_id>.json`.
#[derive(Debug)]
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    /// Creates a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn snapshot_path(&self, epic_key: &str, id: &SnapshotId) -> PathBuf {
        self.root.join(epic_key).join(format!("{id}.json"))
    }

    fn io_error(context: &str, err: impl std::fmt::Display) -> TrackerError {
        TrackerError::Snapshot(format!("{context}: {err}"))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> EngineResult<()> {
        let path = self.snapshot_path(&snapshot.epic_key, &snapshot.id);
        if path.exists() {
            return Err(TrackerError::Snapshot(format!(
                "snapshot {} already exists for {}",
                snapshot.id, snapshot.epic_key
            )));
        }
        let dir = path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| Self::io_error("create snapshot dir", e))?;

        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| Self::io_error("encode snapshot", e))?;
        std::fs::write(&path, json).map_err(|e| Self::io_error("write snapshot", e))
    }

    fn load(&self, epic_key: &str, id: &SnapshotId) -> EngineResult<Snapshot> {
        let path = self.snapshot_path(epic_key, id);
        let json = std::fs::read_to_string(&path)
            .map_err(|_| TrackerError::Snapshot(format!("snapshot {id} not found for {epic_key}")))?;
        serde_json::from_str(&json).map_err(|e| Self::io_error("decode snapshot", e))
    }

    fn list(&self, epic_key: &str) -> EngineResult<Vec<SnapshotId>> {
        let dir = self.root.join(epic_key);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<SnapshotId> = std::fs::read_dir(&dir)
            .map_err(|e| Self::io_error("read snapshot dir", e))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(SnapshotId::parse)
            })
            .collect();
        // Ids are timestamp-derived, so lexicographic order is
        // capture order.
        ids.sort();
        Ok(ids)
    }
}

/// Captures, diffs, and restores snapshots of remote state.
pub struct BackupManager<'a, P: TrackerPort + ?Sized, S: SnapshotStore + ?Sized> {
    port: &'a P,
    store: &'a S,
    config: SyncConfig,
    cancel: CancelToken,
    counter: AtomicU64,
}

impl<'a, P: TrackerPort + ?Sized, S: SnapshotStore + ?Sized> BackupManager<'a, P, S> {
    /// Creates a backup manager over a tracker connection and store.
    pub fn new(port: &'a P, store: &'a S, config: SyncConfig) -> Self {
        Self::with_cancel(port, store, config, CancelToken::new())
    }

    /// Creates a backup manager observing the given cancellation
    /// token.
    pub fn with_cancel(
        port: &'a P,
        store: &'a S,
        config: SyncConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            port,
            store,
            config,
            cancel,
            counter: AtomicU64::new(0),
        }
    }

    /// Fetches the current remote state and persists it as a new
    /// snapshot.
    pub fn capture(&self, epic_key: &str) -> EngineResult<Snapshot> {
        let epic = self.port.fetch_epic(epic_key)?;
        let created_at_ms = current_time_ms();
        let id = SnapshotId::derive(created_at_ms, self.counter.fetch_add(1, Ordering::SeqCst));
        let snapshot = Snapshot::of_epic(&epic, id, created_at_ms);
        self.store.save(&snapshot)?;
        info!(epic_key, id = %snapshot.id, stories = snapshot.stories.len(), "snapshot captured");
        Ok(snapshot)
    }

    /// Diffs the current remote state against a snapshot, yielding
    /// the change set that would restore the captured state.
    ///
    /// Reuses the diff engine with roles reversed: the snapshot plays
    /// the authored side.
    pub fn diff_since(&self, snapshot_id: &SnapshotId, epic_key: &str) -> EngineResult<ChangeSet> {
        let snapshot = self.store.load(epic_key, snapshot_id)?;
        let current = self.port.fetch_epic(epic_key)?;
        Ok(DiffEngine::new().diff(&snapshot.to_epic(), &current))
    }

    /// Restores an epic to a snapshot's state.
    ///
    /// A pre-restore snapshot is captured first (unless dry-run), so
    /// the restore itself can be undone. Returns the per-operation
    /// report of the reversal change set.
    pub fn restore(
        &self,
        snapshot_id: &SnapshotId,
        epic_key: &str,
        dry_run: bool,
    ) -> EngineResult<Vec<OperationResult>> {
        let reversal = self.diff_since(snapshot_id, epic_key)?;
        let planned = ChangePlanner::new().plan(reversal);

        if !dry_run && !planned.is_empty() {
            let pre = self.capture(epic_key)?;
            info!(epic_key, pre_restore = %pre.id, restoring = %snapshot_id, "restore starting");
        }

        let engine = ExecutionEngine::new(
            self.port,
            epic_key,
            self.config.max_workers,
            self.cancel.clone(),
        );
        engine.apply(&planned, dry_run)
    }
}
