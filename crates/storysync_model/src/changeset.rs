//! Change sets: ordered, dependency-annotated operation lists.
//!
//! A `ChangeSet` is the unit of work flowing from the diff engine
//! through the planner into the execution engine. Operations carry
//! typed payloads and declare indices of earlier operations they
//! depend on, so execution can validate ordering independent of list
//! position.

use crate::entity::{Comment, Link, Status, Story, Subtask};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of reconciliation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create a story in the tracker.
    CreateStory,
    /// Replace a story's description.
    UpdateDescription,
    /// Replace a story's point estimate.
    UpdateStoryPoints,
    /// Create a subtask under a story.
    CreateSubtask,
    /// Update an existing subtask.
    UpdateSubtask,
    /// Append a comment to a story.
    AddComment,
    /// Transition a story to a new status.
    TransitionStatus,
    /// Create a link between stories.
    CreateLink,
}

impl OperationKind {
    /// Returns true for operations that create a remote entity and
    /// therefore yield a new remote id.
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            OperationKind::CreateStory | OperationKind::CreateSubtask | OperationKind::AddComment
        )
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationKind::CreateStory => "create_story",
            OperationKind::UpdateDescription => "update_description",
            OperationKind::UpdateStoryPoints => "update_story_points",
            OperationKind::CreateSubtask => "create_subtask",
            OperationKind::UpdateSubtask => "update_subtask",
            OperationKind::AddComment => "add_comment",
            OperationKind::TransitionStatus => "transition_status",
            OperationKind::CreateLink => "create_link",
        };
        f.write_str(name)
    }
}

/// Typed payload, one variant per operation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPayload {
    /// Story to create, without children (children are planned as
    /// separate dependent operations).
    CreateStory {
        /// The story core fields.
        story: Story,
    },
    /// New description text.
    UpdateDescription {
        /// Replacement description.
        description: String,
    },
    /// New point estimate.
    UpdateStoryPoints {
        /// Replacement estimate, `None` clears it.
        story_points: Option<u32>,
    },
    /// Subtask to create.
    CreateSubtask {
        /// The subtask as authored.
        subtask: Subtask,
    },
    /// Subtask replacement state, matched by sequence number.
    UpdateSubtask {
        /// The subtask as authored.
        subtask: Subtask,
    },
    /// Comment to append.
    AddComment {
        /// The comment as authored.
        comment: Comment,
    },
    /// Target status.
    TransitionStatus {
        /// The status to transition to.
        status: Status,
    },
    /// Link to create.
    CreateLink {
        /// The link as authored.
        link: Link,
    },
}

impl OperationPayload {
    /// Returns the operation kind this payload belongs to.
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::CreateStory { .. } => OperationKind::CreateStory,
            OperationPayload::UpdateDescription { .. } => OperationKind::UpdateDescription,
            OperationPayload::UpdateStoryPoints { .. } => OperationKind::UpdateStoryPoints,
            OperationPayload::CreateSubtask { .. } => OperationKind::CreateSubtask,
            OperationPayload::UpdateSubtask { .. } => OperationKind::UpdateSubtask,
            OperationPayload::AddComment { .. } => OperationKind::AddComment,
            OperationPayload::TransitionStatus { .. } => OperationKind::TransitionStatus,
            OperationPayload::CreateLink { .. } => OperationKind::CreateLink,
        }
    }
}

/// A single reconciliation operation.
///
/// Invariant: every operation whose effect requires a remote id
/// produced by an earlier operation in the same change set declares
/// that operation's index in `depends_on`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Operation kind, matching the payload variant.
    pub kind: OperationKind,
    /// Local key of the story this operation targets.
    pub target_key: String,
    /// Typed payload.
    pub payload: OperationPayload,
    /// Indices of operations that must complete first.
    pub depends_on: Vec<usize>,
}

impl Operation {
    /// Creates an operation; the kind is derived from the payload.
    pub fn new(target_key: impl Into<String>, payload: OperationPayload) -> Self {
        Self {
            kind: payload.kind(),
            target_key: target_key.into(),
            payload,
            depends_on: Vec::new(),
        }
    }

    /// Adds dependency indices, keeping them sorted and deduplicated.
    pub fn with_depends_on(mut self, indices: Vec<usize>) -> Self {
        self.depends_on = indices;
        self.depends_on.sort_unstable();
        self.depends_on.dedup();
        self
    }
}

/// Error raised by change-set validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChangeSetError {
    /// An operation depends on an operation at or after its own
    /// position.
    #[error("operation {index} depends on {depends_on}, which does not precede it")]
    ForwardDependency {
        /// Index of the offending operation.
        index: usize,
        /// The invalid dependency index.
        depends_on: usize,
    },
}

/// Ordered list of operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    operations: Vec<Operation>,
}

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation and returns its index.
    pub fn push(&mut self, operation: Operation) -> usize {
        self.operations.push(operation);
        self.operations.len() - 1
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if there are no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the operation at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Operation> {
        self.operations.get(index)
    }

    /// Iterates operations in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    /// Read access to the underlying list.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Consumes the change set, yielding the operation list.
    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    /// Validates that every dependency index precedes its operation.
    pub fn validate_ordering(&self) -> Result<(), ChangeSetError> {
        for (index, operation) in self.operations.iter().enumerate() {
            for &dep in &operation.depends_on {
                if dep >= index {
                    return Err(ChangeSetError::ForwardDependency {
                        index,
                        depends_on: dep,
                    });
                }
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

impl FromIterator<Operation> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self {
            operations: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(target: &str) -> Operation {
        Operation::new(
            target,
            OperationPayload::TransitionStatus {
                status: Status::Done,
            },
        )
    }

    #[test]
    fn kind_derived_from_payload() {
        let op = Operation::new(
            "US-001",
            OperationPayload::UpdateDescription {
                description: "new".into(),
            },
        );
        assert_eq!(op.kind, OperationKind::UpdateDescription);
        assert!(op.depends_on.is_empty());
    }

    #[test]
    fn depends_on_is_sorted_and_deduped() {
        let op = transition("US-001").with_depends_on(vec![3, 1, 3, 0]);
        assert_eq!(op.depends_on, vec![0, 1, 3]);
    }

    #[test]
    fn create_kinds_yield_remote_ids() {
        assert!(OperationKind::CreateStory.is_create());
        assert!(OperationKind::AddComment.is_create());
        assert!(!OperationKind::TransitionStatus.is_create());
    }

    #[test]
    fn validate_accepts_backward_dependencies() {
        let mut cs = ChangeSet::new();
        let first = cs.push(transition("US-001"));
        cs.push(transition("US-002").with_depends_on(vec![first]));
        assert!(cs.validate_ordering().is_ok());
    }

    #[test]
    fn validate_rejects_forward_dependency() {
        let mut cs = ChangeSet::new();
        cs.push(transition("US-001").with_depends_on(vec![0]));
        assert_eq!(
            cs.validate_ordering(),
            Err(ChangeSetError::ForwardDependency {
                index: 0,
                depends_on: 0,
            })
        );
    }

    #[test]
    fn push_returns_indices_in_order() {
        let mut cs = ChangeSet::new();
        assert_eq!(cs.push(transition("US-001")), 0);
        assert_eq!(cs.push(transition("US-002")), 1);
        assert_eq!(cs.len(), 2);
        assert!(!cs.is_empty());
    }
}
