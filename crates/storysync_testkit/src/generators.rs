//! Property-based test generators using proptest.
//!
//! Strategies generate structurally valid data: change sets always
//! satisfy the backward-dependency invariant, stories always carry
//! distinct subtask sequence numbers.

use proptest::prelude::*;
use storysync_model::{
    ChangeSet, Operation, OperationPayload, Priority, Status, Story, Subtask,
};

/// Strategy for story local keys (`US-001` style).
pub fn local_key_strategy() -> impl Strategy<Value = String> {
    (1u32..999).prop_map(|n| format!("US-{n:03}"))
}

/// Strategy for statuses across the canonical set.
pub fn status_strategy() -> impl Strategy<Value = Status> {
    prop_oneof![
        Just(Status::Open),
        Just(Status::InProgress),
        Just(Status::InReview),
        Just(Status::Done),
        Just(Status::Blocked),
    ]
}

/// Strategy for priorities.
pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Critical),
        Just(Priority::High),
        Just(Priority::Medium),
        Just(Priority::Low),
    ]
}

/// Strategy for stories with up to five subtasks carrying distinct
/// sequence numbers.
pub fn story_strategy() -> impl Strategy<Value = Story> {
    (
        local_key_strategy(),
        "[a-zA-Z ]{1,30}",
        "[a-zA-Z ]{0,60}",
        proptest::option::of(0u32..100),
        priority_strategy(),
        status_strategy(),
        proptest::collection::btree_set(1u32..20, 0..5),
    )
        .prop_map(
            |(local_key, title, description, story_points, priority, status, sequences)| {
                let mut story = Story::new(local_key, title);
                story.description = description;
                story.story_points = story_points;
                story.priority = priority;
                story.status = status;
                story.subtasks = sequences
                    .into_iter()
                    .map(|sequence| Subtask::new(sequence, format!("Subtask {sequence}")))
                    .collect();
                story
            },
        )
}

/// Strategy for change sets whose dependencies always point
/// backwards, as the diff engine guarantees.
pub fn changeset_strategy() -> impl Strategy<Value = ChangeSet> {
    proptest::collection::vec((local_key_strategy(), any::<bool>(), any::<u8>()), 0..20).prop_map(
        |entries| {
            let mut changeset = ChangeSet::new();
            for (index, (key, create, dep_seed)) in entries.iter().enumerate() {
                let payload = if *create {
                    OperationPayload::CreateStory {
                        story: Story::new(key.clone(), key.clone()),
                    }
                } else {
                    OperationPayload::TransitionStatus {
                        status: Status::Done,
                    }
                };
                let mut operation = Operation::new(key.clone(), payload);
                if index > 0 {
                    // Depend on an arbitrary earlier create, if any.
                    let earlier_creates: Vec<usize> = changeset
                        .iter()
                        .enumerate()
                        .take(index)
                        .filter(|(_, op)| {
                            matches!(op.payload, OperationPayload::CreateStory { .. })
                        })
                        .map(|(i, _)| i)
                        .collect();
                    if !earlier_creates.is_empty() && *dep_seed as usize % 3 != 0 {
                        let pick = earlier_creates[*dep_seed as usize % earlier_creates.len()];
                        operation = operation.with_depends_on(vec![pick]);
                    }
                }
                changeset.push(operation);
            }
            changeset
        },
    )
}
