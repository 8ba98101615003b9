//! Execution of planned change sets through the tracker port.
//!
//! At-most-one-effect semantics per item: each operation is
//! dispatched once, and one failed operation never aborts the whole
//! sync. Operations transitively depending on a failure are skipped
//! with `SkippedDependency` rather than silently proceeding on top of
//! a missing prerequisite. Independent operations may run
//! concurrently up to the worker bound, with at most one in-flight
//! call per target story so partial updates never interleave.

use crate::cancel::CancelToken;
use crate::error::{EngineResult, TrackerError};
use crate::port::TrackerPort;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use storysync_model::{ChangeSet, EntityId, Operation, OperationKind, OperationPayload};
use tracing::{debug, warn};

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The operation was applied; creates carry the assigned id.
    Applied {
        /// Tracker-assigned id for create operations.
        remote_id: Option<EntityId>,
    },
    /// Dry-run mode: the operation would have been applied.
    DryRun,
    /// The operation was attempted and failed.
    Failed {
        /// The classified failure.
        error: TrackerError,
    },
    /// Never attempted: a (transitive) dependency failed.
    SkippedDependency {
        /// Index of the operation whose failure caused the skip.
        failed_index: usize,
    },
}

impl Outcome {
    /// Returns true for applied and dry-run outcomes.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Applied { .. } | Outcome::DryRun)
    }
}

/// Per-operation report entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    /// Index of the operation in the executed change set.
    pub index: usize,
    /// Operation kind.
    pub kind: OperationKind,
    /// Local key of the targeted story.
    pub target_key: String,
    /// What happened.
    pub outcome: Outcome,
}

impl OperationResult {
    /// Returns true for applied and dry-run outcomes.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

#[derive(Debug)]
enum Slot {
    Pending,
    Running,
    Done(Outcome),
}

struct SchedState {
    slots: Vec<Slot>,
    busy_targets: HashSet<String>,
}

impl SchedState {
    fn all_done(&self) -> bool {
        self.slots.iter().all(|s| matches!(s, Slot::Done(_)))
    }
}

struct Shared {
    state: Mutex<SchedState>,
    cond: Condvar,
}

/// Applies planned change sets.
pub struct ExecutionEngine<'a, P: TrackerPort + ?Sized> {
    port: &'a P,
    epic_key: String,
    max_workers: usize,
    cancel: CancelToken,
}

impl<'a, P: TrackerPort + ?Sized> ExecutionEngine<'a, P> {
    /// Creates an execution engine for one epic.
    pub fn new(
        port: &'a P,
        epic_key: impl Into<String>,
        max_workers: usize,
        cancel: CancelToken,
    ) -> Self {
        Self {
            port,
            epic_key: epic_key.into(),
            max_workers: max_workers.max(1),
            cancel,
        }
    }

    /// Applies the change set, returning one result per operation in
    /// operation order.
    ///
    /// Dry-run produces the same report shape without any port call.
    /// Business-level failures land in the result list; only misuse
    /// (a change set failing ordering validation) is an error.
    pub fn apply(&self, changeset: &ChangeSet, dry_run: bool) -> EngineResult<Vec<OperationResult>> {
        changeset
            .validate_ordering()
            .map_err(|e| TrackerError::InvalidState(e.to_string()))?;

        if dry_run {
            return Ok(changeset
                .iter()
                .enumerate()
                .map(|(index, op)| OperationResult {
                    index,
                    kind: op.kind,
                    target_key: op.target_key.clone(),
                    outcome: Outcome::DryRun,
                })
                .collect());
        }

        let operations = changeset.operations();
        let shared = Shared {
            state: Mutex::new(SchedState {
                slots: operations.iter().map(|_| Slot::Pending).collect(),
                busy_targets: HashSet::new(),
            }),
            cond: Condvar::new(),
        };

        let workers = self.max_workers.min(operations.len().max(1));
        if workers <= 1 {
            self.worker(operations, &shared);
        } else {
            std::thread::scope(|scope| {
                for _ in 0..workers {
                    scope.spawn(|| self.worker(operations, &shared));
                }
            });
        }

        let slots = shared.state.into_inner().slots;
        let results: Vec<OperationResult> = slots
            .into_iter()
            .zip(operations)
            .enumerate()
            .map(|(index, (slot, op))| {
                let outcome = match slot {
                    Slot::Done(outcome) => outcome,
                    // Unreachable: workers drain every slot.
                    _ => Outcome::Failed {
                        error: TrackerError::InvalidState("operation never completed".into()),
                    },
                };
                OperationResult {
                    index,
                    kind: op.kind,
                    target_key: op.target_key.clone(),
                    outcome,
                }
            })
            .collect();

        let failed = results.iter().filter(|r| !r.is_success()).count();
        debug!(
            operations = results.len(),
            failed_or_skipped = failed,
            "apply complete"
        );
        Ok(results)
    }

    fn worker(&self, operations: &[Operation], shared: &Shared) {
        let mut guard = shared.state.lock();
        loop {
            if guard.state_done_or_cancel(self, operations) {
                shared.cond.notify_all();
                return;
            }

            let mut resolved_any = false;
            let mut dispatch = None;

            for index in 0..operations.len() {
                if !matches!(guard.slots[index], Slot::Pending) {
                    continue;
                }

                let mut blocked = false;
                let mut root_failure = None;
                for &dep in &operations[index].depends_on {
                    match &guard.slots[dep] {
                        Slot::Done(Outcome::Failed { .. }) => {
                            root_failure = Some(dep);
                            break;
                        }
                        Slot::Done(Outcome::SkippedDependency { failed_index }) => {
                            root_failure = Some(*failed_index);
                            break;
                        }
                        Slot::Done(_) => {}
                        Slot::Pending | Slot::Running => blocked = true,
                    }
                }

                if let Some(failed_index) = root_failure {
                    guard.slots[index] = Slot::Done(Outcome::SkippedDependency { failed_index });
                    resolved_any = true;
                    continue;
                }
                if blocked || guard.busy_targets.contains(&operations[index].target_key) {
                    continue;
                }
                dispatch = Some(index);
                break;
            }

            if let Some(index) = dispatch {
                let operation = &operations[index];
                guard.slots[index] = Slot::Running;
                guard.busy_targets.insert(operation.target_key.clone());
                drop(guard);

                let outcome = self.run_operation(operation);

                guard = shared.state.lock();
                guard.busy_targets.remove(&operation.target_key);
                guard.slots[index] = Slot::Done(outcome);
                shared.cond.notify_all();
                continue;
            }

            if resolved_any {
                shared.cond.notify_all();
                continue;
            }
            if guard.all_done() {
                shared.cond.notify_all();
                return;
            }
            shared.cond.wait(&mut guard);
        }
    }

    fn run_operation(&self, operation: &Operation) -> Outcome {
        let result = match &operation.payload {
            OperationPayload::CreateStory { story } => self
                .port
                .create_story(&self.epic_key, story)
                .map(|id| Some(id)),
            OperationPayload::UpdateDescription { description } => self
                .port
                .update_description(&operation.target_key, description)
                .map(|()| None),
            OperationPayload::UpdateStoryPoints { story_points } => self
                .port
                .update_story_points(&operation.target_key, *story_points)
                .map(|()| None),
            OperationPayload::CreateSubtask { subtask } => self
                .port
                .create_subtask(&operation.target_key, subtask)
                .map(|id| Some(id)),
            OperationPayload::UpdateSubtask { subtask } => self
                .port
                .update_subtask(&operation.target_key, subtask)
                .map(|()| None),
            OperationPayload::AddComment { comment } => self
                .port
                .add_comment(&operation.target_key, comment)
                .map(|id| Some(id)),
            OperationPayload::TransitionStatus { status } => self
                .port
                .transition_issue(&operation.target_key, status)
                .map(|()| None),
            OperationPayload::CreateLink { link } => self
                .port
                .create_link(&operation.target_key, link)
                .map(|()| None),
        };

        match result {
            Ok(remote_id) => Outcome::Applied { remote_id },
            Err(error) => {
                warn!(
                    kind = %operation.kind,
                    target = %operation.target_key,
                    error = %error,
                    "operation failed"
                );
                Outcome::Failed { error }
            }
        }
    }
}

impl SchedState {
    /// Handles terminal checks shared by the worker loop head: marks
    /// all still-pending operations as cancelled once the token
    /// fires, and reports whether every slot is done.
    fn state_done_or_cancel<P: TrackerPort + ?Sized>(
        &mut self,
        engine: &ExecutionEngine<'_, P>,
        operations: &[Operation],
    ) -> bool {
        if engine.cancel.is_cancelled() {
            for index in 0..operations.len() {
                if matches!(self.slots[index], Slot::Pending) {
                    self.slots[index] = Slot::Done(Outcome::Failed {
                        error: TrackerError::Cancelled,
                    });
                }
            }
        }
        self.all_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineResult;
    use parking_lot::Mutex as PMutex;
    use storysync_model::{Comment, Link, Status, Story, Subtask};

    /// Minimal port that records calls and fails on demand.
    #[derive(Default)]
    struct FakePort {
        calls: PMutex<Vec<String>>,
        fail_targets: PMutex<HashSet<String>>,
        next_id: PMutex<u32>,
    }

    impl FakePort {
        fn fail_on(&self, target: &str) {
            self.fail_targets.lock().insert(target.to_string());
        }

        fn record(&self, what: &str, target: &str) -> EngineResult<()> {
            self.calls.lock().push(format!("{what} {target}"));
            if self.fail_targets.lock().contains(target) {
                return Err(TrackerError::Transient {
                    status: 503,
                    attempts: 1,
                });
            }
            Ok(())
        }

        fn fresh_id(&self) -> EntityId {
            let mut next = self.next_id.lock();
            *next += 1;
            EntityId::new(format!("R-{next}"))
        }
    }

    impl TrackerPort for FakePort {
        fn fetch_epic(&self, epic_key: &str) -> EngineResult<storysync_model::Epic> {
            Ok(storysync_model::Epic::new(epic_key, epic_key))
        }

        fn create_story(&self, _epic_key: &str, story: &Story) -> EngineResult<EntityId> {
            self.record("create_story", &story.local_key)?;
            Ok(self.fresh_id())
        }

        fn update_description(&self, story_key: &str, _description: &str) -> EngineResult<()> {
            self.record("update_description", story_key)
        }

        fn update_story_points(&self, story_key: &str, _points: Option<u32>) -> EngineResult<()> {
            self.record("update_story_points", story_key)
        }

        fn create_subtask(&self, story_key: &str, _subtask: &Subtask) -> EngineResult<EntityId> {
            self.record("create_subtask", story_key)?;
            Ok(self.fresh_id())
        }

        fn update_subtask(&self, story_key: &str, _subtask: &Subtask) -> EngineResult<()> {
            self.record("update_subtask", story_key)
        }

        fn add_comment(&self, story_key: &str, _comment: &Comment) -> EngineResult<EntityId> {
            self.record("add_comment", story_key)?;
            Ok(self.fresh_id())
        }

        fn transition_issue(&self, story_key: &str, _status: &Status) -> EngineResult<()> {
            self.record("transition_issue", story_key)
        }

        fn create_link(&self, story_key: &str, _link: &Link) -> EngineResult<()> {
            self.record("create_link", story_key)
        }
    }

    fn create_op(target: &str) -> Operation {
        Operation::new(
            target,
            OperationPayload::CreateStory {
                story: Story::new(target, target),
            },
        )
    }

    fn transition_op(target: &str) -> Operation {
        Operation::new(
            target,
            OperationPayload::TransitionStatus {
                status: Status::Done,
            },
        )
    }

    fn engine(port: &FakePort, workers: usize) -> ExecutionEngine<'_, FakePort> {
        ExecutionEngine::new(port, "EP-1", workers, CancelToken::new())
    }

    #[test]
    fn dry_run_matches_execute_shape_without_calls() {
        let port = FakePort::default();
        let mut cs = ChangeSet::new();
        cs.push(create_op("US-001"));
        cs.push(transition_op("US-002"));

        let results = engine(&port, 1).apply(&cs, true).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].kind, OperationKind::CreateStory);
        assert_eq!(results[0].outcome, Outcome::DryRun);
        assert_eq!(results[1].target_key, "US-002");
        assert!(port.calls.lock().is_empty());
    }

    #[test]
    fn applied_creates_carry_remote_ids() {
        let port = FakePort::default();
        let mut cs = ChangeSet::new();
        cs.push(create_op("US-001"));
        cs.push(transition_op("US-001").with_depends_on(vec![0]));

        let results = engine(&port, 1).apply(&cs, false).unwrap();
        assert_eq!(
            results[0].outcome,
            Outcome::Applied {
                remote_id: Some(EntityId::new("R-1"))
            }
        );
        assert_eq!(results[1].outcome, Outcome::Applied { remote_id: None });
    }

    #[test]
    fn failure_skips_transitive_dependents_but_not_independents() {
        let port = FakePort::default();
        port.fail_on("US-001");

        let mut cs = ChangeSet::new();
        cs.push(create_op("US-001")); // 0: fails
        cs.push(
            Operation::new(
                "US-001",
                OperationPayload::CreateSubtask {
                    subtask: Subtask::new(1, "t"),
                },
            )
            .with_depends_on(vec![0]), // 1: skipped (direct)
        );
        cs.push(transition_op("US-001").with_depends_on(vec![0, 1])); // 2: skipped (transitive)
        cs.push(create_op("US-002")); // 3: independent, applied

        let results = engine(&port, 1).apply(&cs, false).unwrap();
        assert!(matches!(results[0].outcome, Outcome::Failed { .. }));
        assert_eq!(
            results[1].outcome,
            Outcome::SkippedDependency { failed_index: 0 }
        );
        assert_eq!(
            results[2].outcome,
            Outcome::SkippedDependency { failed_index: 0 }
        );
        assert!(results[3].is_success());

        // The skipped operations were never dispatched to the port.
        let calls = port.calls.lock().clone();
        assert_eq!(calls, vec!["create_story US-001", "create_story US-002"]);
    }

    #[test]
    fn execution_follows_dependency_order() {
        let port = FakePort::default();
        let mut cs = ChangeSet::new();
        cs.push(create_op("US-001"));
        cs.push(transition_op("US-001").with_depends_on(vec![0]));

        engine(&port, 4).apply(&cs, false).unwrap();
        let calls = port.calls.lock().clone();
        assert_eq!(
            calls,
            vec!["create_story US-001", "transition_issue US-001"]
        );
    }

    #[test]
    fn concurrent_workers_apply_all_independent_operations() {
        let port = FakePort::default();
        let mut cs = ChangeSet::new();
        for i in 0..12 {
            cs.push(create_op(&format!("US-{i:03}")));
        }

        let results = engine(&port, 4).apply(&cs, false).unwrap();
        assert_eq!(results.len(), 12);
        assert!(results.iter().all(OperationResult::is_success));
        assert_eq!(port.calls.lock().len(), 12);
    }

    #[test]
    fn forward_dependency_is_rejected_as_misuse() {
        let port = FakePort::default();
        let mut cs = ChangeSet::new();
        cs.push(transition_op("US-001").with_depends_on(vec![0]));

        let err = engine(&port, 1).apply(&cs, false).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidState(_)));
    }

    #[test]
    fn cancelled_engine_marks_pending_operations() {
        let port = FakePort::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let engine = ExecutionEngine::new(&port, "EP-1", 1, cancel);

        let mut cs = ChangeSet::new();
        cs.push(create_op("US-001"));
        cs.push(create_op("US-002"));

        let results = engine.apply(&cs, false).unwrap();
        for result in &results {
            assert_eq!(
                result.outcome,
                Outcome::Failed {
                    error: TrackerError::Cancelled
                }
            );
        }
        assert!(port.calls.lock().is_empty());
    }

    #[test]
    fn empty_changeset_yields_empty_report() {
        let port = FakePort::default();
        let results = engine(&port, 2).apply(&ChangeSet::new(), false).unwrap();
        assert!(results.is_empty());
    }
}
