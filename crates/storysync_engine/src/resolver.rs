//! Three-way conflict detection for bidirectional sync.
//!
//! Sits between the diff engine and the planner when bidirectional
//! mode is active. A field conflicts when local and remote both
//! moved away from the base snapshot and disagree; everything else
//! auto-merges regardless of strategy. Conflicts are surfaced as
//! data, never errors.

use crate::diff::DiffEngine;
use serde_json::{json, Value};
use storysync_model::{
    ChangeSet, ConflictField, ConflictRecord, ConflictStrategy, Epic, Snapshot, Story,
};
use tracing::debug;

/// Resolves three-way divergence between local, remote, and a base
/// snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
}

impl ConflictResolver {
    /// Creates a resolver with the caller-selected strategy.
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    /// Computes the reconciliation change set and the conflict
    /// records for fields that could not be auto-merged.
    ///
    /// Auto-merge rules per field: if only the local side moved, the
    /// local value is planned; if only the remote side moved, the
    /// remote value is adopted and no operation is emitted. For
    /// conflicted fields, `LocalWins` plans the local value while
    /// `RemoteWins` and `Manual` emit no operation — `Manual` callers
    /// edit and re-invoke after reviewing the records.
    pub fn resolve(
        &self,
        local: &Epic,
        remote: &Epic,
        base: &Snapshot,
    ) -> (ChangeSet, Vec<ConflictRecord>) {
        let mut conflicts = Vec::new();
        let mut effective = local.clone();

        for story in &mut effective.stories {
            let remote_story = story
                .remote_id
                .as_ref()
                .and_then(|id| remote.story_by_remote_id(id))
                .or_else(|| remote.story_by_key(&story.local_key));
            let base_story = base.story_by_key(&story.local_key);

            let (Some(remote_story), Some(base_story)) = (remote_story, base_story) else {
                // No remote match: the story is new and follows the
                // create path. No base: the story appeared since the
                // snapshot, so there is no three-way evidence and the
                // local side is authoritative.
                continue;
            };

            merge_story_fields(story, remote_story, base_story, self.strategy, &mut conflicts);
        }

        let changeset = DiffEngine::new().diff(&effective, remote);
        debug!(
            operations = changeset.len(),
            conflicts = conflicts.len(),
            "conflict resolution complete"
        );
        (changeset, conflicts)
    }
}

/// Applies the three-way rule to every comparable field of one story,
/// rewriting the story to its effective (post-merge) state.
fn merge_story_fields(
    story: &mut Story,
    remote: &Story,
    base: &Story,
    strategy: ConflictStrategy,
    conflicts: &mut Vec<ConflictRecord>,
) {
    let key = story.local_key.clone();

    let title = three_way(
        &key,
        ConflictField::Title,
        story.title.clone(),
        remote.title.clone(),
        base.title.clone(),
        json_string,
        strategy,
        conflicts,
    );
    story.title = title;

    let description = three_way(
        &key,
        ConflictField::Description,
        story.description.clone(),
        remote.description.clone(),
        base.description.clone(),
        json_string,
        strategy,
        conflicts,
    );
    story.description = description;

    let story_points = three_way(
        &key,
        ConflictField::StoryPoints,
        story.story_points,
        remote.story_points,
        base.story_points,
        |points| json!(points),
        strategy,
        conflicts,
    );
    story.story_points = story_points;

    let priority = three_way(
        &key,
        ConflictField::Priority,
        story.priority,
        remote.priority,
        base.priority,
        |priority| json!(priority.as_str()),
        strategy,
        conflicts,
    );
    story.priority = priority;

    let status = three_way(
        &key,
        ConflictField::Status,
        story.status.clone(),
        remote.status.clone(),
        base.status.clone(),
        |status| json!(status.as_str()),
        strategy,
        conflicts,
    );
    story.status = status;
}

fn json_string(value: &String) -> Value {
    Value::String(value.clone())
}

/// Resolves one field, recording a conflict when local and remote
/// both diverged from base and disagree. Returns the effective value.
#[allow(clippy::too_many_arguments)]
fn three_way<T: Clone + PartialEq>(
    story_key: &str,
    field: ConflictField,
    local: T,
    remote: T,
    base: T,
    to_json: impl Fn(&T) -> Value,
    strategy: ConflictStrategy,
    conflicts: &mut Vec<ConflictRecord>,
) -> T {
    if local != base && remote != base && local != remote {
        conflicts.push(ConflictRecord::new(
            story_key,
            field,
            to_json(&local),
            to_json(&remote),
            to_json(&base),
        ));
        return match strategy {
            ConflictStrategy::LocalWins => local,
            // RemoteWins discards the local change; Manual emits no
            // operation for the field and leaves the decision to the
            // caller.
            ConflictStrategy::RemoteWins | ConflictStrategy::Manual => remote,
        };
    }

    if local != base {
        local
    } else {
        remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storysync_model::{EntityId, OperationKind, SnapshotId, Status};

    fn story(key: &str, points: Option<u32>) -> Story {
        let mut story = Story::new(key, "Login");
        story.description = "desc".into();
        story.story_points = points;
        story.remote_id = Some(EntityId::new("R-1"));
        story
    }

    fn epic_with(stories: Vec<Story>) -> Epic {
        let mut epic = Epic::new("EP-1", "Auth");
        epic.stories = stories;
        epic
    }

    fn base_snapshot(stories: Vec<Story>) -> Snapshot {
        Snapshot::of_epic(&epic_with(stories), SnapshotId::derive(1, 0), 1)
    }

    #[test]
    fn local_only_change_plans_an_update_without_conflict() {
        // Local 5, remote 3, base 3: remote never moved.
        let local = epic_with(vec![story("US-001", Some(5))]);
        let remote = epic_with(vec![story("US-001", Some(3))]);
        let base = base_snapshot(vec![story("US-001", Some(3))]);

        let (changeset, conflicts) =
            ConflictResolver::new(ConflictStrategy::Manual).resolve(&local, &remote, &base);

        assert!(conflicts.is_empty());
        let kinds: Vec<_> = changeset.iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![OperationKind::UpdateStoryPoints]);
    }

    #[test]
    fn divergent_change_surfaces_conflict_instead_of_operation() {
        // Local 5, remote 8, base 3: both moved, disagree.
        let local = epic_with(vec![story("US-001", Some(5))]);
        let remote = epic_with(vec![story("US-001", Some(8))]);
        let base = base_snapshot(vec![story("US-001", Some(3))]);

        let (changeset, conflicts) =
            ConflictResolver::new(ConflictStrategy::Manual).resolve(&local, &remote, &base);

        assert!(changeset.is_empty());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, ConflictField::StoryPoints);
        assert_eq!(conflicts[0].local, json!(5));
        assert_eq!(conflicts[0].remote, json!(8));
        assert_eq!(conflicts[0].base, json!(3));
    }

    #[test]
    fn local_wins_plans_local_value_and_still_reports_conflict() {
        let local = epic_with(vec![story("US-001", Some(5))]);
        let remote = epic_with(vec![story("US-001", Some(8))]);
        let base = base_snapshot(vec![story("US-001", Some(3))]);

        let (changeset, conflicts) =
            ConflictResolver::new(ConflictStrategy::LocalWins).resolve(&local, &remote, &base);

        assert_eq!(conflicts.len(), 1);
        let kinds: Vec<_> = changeset.iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![OperationKind::UpdateStoryPoints]);
    }

    #[test]
    fn remote_wins_discards_only_conflicted_fields() {
        let mut local_story = story("US-001", Some(5));
        local_story.description = "locally improved".into();
        let local = epic_with(vec![local_story]);

        // Remote moved points but not description.
        let remote = epic_with(vec![story("US-001", Some(8))]);
        let base = base_snapshot(vec![story("US-001", Some(3))]);

        let (changeset, conflicts) =
            ConflictResolver::new(ConflictStrategy::RemoteWins).resolve(&local, &remote, &base);

        assert_eq!(conflicts.len(), 1);
        // The non-conflicted description update survives.
        let kinds: Vec<_> = changeset.iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![OperationKind::UpdateDescription]);
    }

    #[test]
    fn identical_concurrent_edits_do_not_conflict() {
        let local = epic_with(vec![story("US-001", Some(5))]);
        let remote = epic_with(vec![story("US-001", Some(5))]);
        let base = base_snapshot(vec![story("US-001", Some(3))]);

        let (changeset, conflicts) =
            ConflictResolver::new(ConflictStrategy::Manual).resolve(&local, &remote, &base);

        assert!(conflicts.is_empty());
        assert!(changeset.is_empty());
    }

    #[test]
    fn remote_drift_is_adopted_without_operations() {
        // Local untouched, remote moved status: nothing to push.
        let local = epic_with(vec![story("US-001", Some(3))]);
        let mut remote_story = story("US-001", Some(3));
        remote_story.status = Status::Done;
        let remote = epic_with(vec![remote_story]);
        let base = base_snapshot(vec![story("US-001", Some(3))]);

        let (changeset, conflicts) =
            ConflictResolver::new(ConflictStrategy::Manual).resolve(&local, &remote, &base);

        assert!(conflicts.is_empty());
        assert!(changeset.is_empty());
    }

    #[test]
    fn story_missing_from_base_falls_back_to_local_authority() {
        let mut local_story = story("US-002", Some(2));
        local_story.description = "new words".into();
        let local = epic_with(vec![local_story]);
        let remote = epic_with(vec![story("US-002", Some(2))]);
        let base = base_snapshot(vec![]);

        let (changeset, conflicts) =
            ConflictResolver::new(ConflictStrategy::Manual).resolve(&local, &remote, &base);

        assert!(conflicts.is_empty());
        let kinds: Vec<_> = changeset.iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![OperationKind::UpdateDescription]);
    }

    #[test]
    fn unmatched_local_story_still_becomes_a_create() {
        let local = epic_with(vec![Story::new("US-009", "Brand new")]);
        let remote = epic_with(vec![]);
        let base = base_snapshot(vec![]);

        let (changeset, conflicts) =
            ConflictResolver::new(ConflictStrategy::RemoteWins).resolve(&local, &remote, &base);

        assert!(conflicts.is_empty());
        assert_eq!(changeset.get(0).unwrap().kind, OperationKind::CreateStory);
    }
}
