//! Orders diff output into a dependency-respecting operation
//! sequence.
//!
//! Tier order: creates first so later operations can reference the
//! new story; description and point updates before status
//! transitions so the final visible state reflects updated content;
//! subtask creates before subtask updates; links last since they may
//! reference any story created earlier in the same batch. Within a
//! tier the diff order is preserved (stable sort) for determinism.

use storysync_model::{ChangeSet, Operation, OperationKind, OperationPayload};
use std::collections::HashMap;
use tracing::debug;

fn tier(kind: OperationKind) -> u8 {
    match kind {
        OperationKind::CreateStory => 0,
        OperationKind::UpdateDescription | OperationKind::UpdateStoryPoints => 1,
        OperationKind::CreateSubtask => 2,
        OperationKind::UpdateSubtask | OperationKind::AddComment => 3,
        OperationKind::TransitionStatus => 4,
        OperationKind::CreateLink => 5,
    }
}

/// Reorders change sets for execution.
///
/// Precondition: dependencies in the input may only point at
/// `CreateStory` operations, which is what the diff engine emits;
/// creates sort into the first tier, so reordering cannot invert a
/// dependency.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangePlanner;

impl ChangePlanner {
    /// Creates a planner.
    pub fn new() -> Self {
        Self
    }

    /// Plans a change set: stable tier sort, dependency remap,
    /// implied create dependencies, and transitive closure.
    pub fn plan(&self, changeset: ChangeSet) -> ChangeSet {
        let operations = changeset.into_operations();

        let mut order: Vec<usize> = (0..operations.len()).collect();
        order.sort_by_key(|&index| tier(operations[index].kind));

        let mut new_index = vec![0usize; operations.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new;
        }

        let mut planned: Vec<Operation> = order
            .iter()
            .map(|&old| {
                let mut operation = operations[old].clone();
                operation.depends_on = operation
                    .depends_on
                    .iter()
                    .map(|&dep| new_index[dep])
                    .collect();
                operation
            })
            .collect();

        // Planned index of each CreateStory, by story key.
        let creates: HashMap<String, usize> = planned
            .iter()
            .enumerate()
            .filter(|(_, op)| op.kind == OperationKind::CreateStory)
            .map(|(index, op)| (op.target_key.clone(), index))
            .collect();

        // Every operation on a story created in this batch depends on
        // that create; links additionally depend on the create of the
        // story they point at.
        for (index, operation) in planned.iter_mut().enumerate() {
            if operation.kind != OperationKind::CreateStory {
                if let Some(&create) = creates.get(&operation.target_key) {
                    if create != index {
                        operation.depends_on.push(create);
                    }
                }
            }
            if let OperationPayload::CreateLink { link } = &operation.payload {
                if let Some(&create) = creates.get(&link.target_key) {
                    if create != index {
                        operation.depends_on.push(create);
                    }
                }
            }
        }

        // Transitive closure: dependencies always point backwards, so
        // one ascending pass suffices.
        let mut closures: Vec<Vec<usize>> = Vec::with_capacity(planned.len());
        for (index, operation) in planned.iter().enumerate() {
            let mut closure: Vec<usize> = Vec::new();
            for &dep in &operation.depends_on {
                debug_assert!(dep < index, "dependency {dep} does not precede {index}");
                closure.push(dep);
                if dep < index {
                    closure.extend(closures[dep].iter().copied());
                }
            }
            closure.sort_unstable();
            closure.dedup();
            closures.push(closure);
        }
        for (operation, closure) in planned.iter_mut().zip(closures) {
            operation.depends_on = closure;
        }

        let planned: ChangeSet = planned.into_iter().collect();
        debug_assert!(planned.validate_ordering().is_ok());
        debug!(operations = planned.len(), "plan complete");
        planned
    }
}
