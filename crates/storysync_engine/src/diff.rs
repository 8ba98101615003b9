//! Structural diff between local and remote entity graphs.
//!
//! Produces the minimal change set that reconciles the remote state
//! toward the locally authored state. The engine never deletes
//! without an explicit operation kind, so remote-only stories and
//! subtasks are left untouched.

use storysync_model::{ChangeSet, Epic, Operation, OperationPayload, Story, Subtask};
use std::collections::HashMap;
use tracing::debug;

/// Computes change sets from entity graph pairs.
///
/// Stateless; a value exists so call sites read as a component.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine;

impl DiffEngine {
    /// Creates a diff engine.
    pub fn new() -> Self {
        Self
    }

    /// Diffs `local` (authored) against `remote` (fetched).
    ///
    /// Matching: by `remote_id` when the local story has one, else by
    /// `local_key`. Unmatched local stories become `CreateStory` plus
    /// dependent child operations; unmatched remote stories are
    /// ignored. Matched stories with equal content hashes are skipped
    /// entirely, which is what makes repeated diffs over unchanged
    /// input idempotent.
    pub fn diff(&self, local: &Epic, remote: &Epic) -> ChangeSet {
        let mut changeset = ChangeSet::new();
        let mut skipped = 0usize;

        let by_id: HashMap<&str, &Story> = remote
            .stories
            .iter()
            .filter_map(|s| s.remote_id.as_ref().map(|id| (id.as_str(), s)))
            .collect();
        let by_key: HashMap<&str, &Story> = remote
            .stories
            .iter()
            .map(|s| (s.local_key.as_str(), s))
            .collect();

        for story in &local.stories {
            let matched = story
                .remote_id
                .as_ref()
                .and_then(|id| by_id.get(id.as_str()).copied())
                .or_else(|| by_key.get(story.local_key.as_str()).copied());

            match matched {
                None => Self::plan_new_story(&mut changeset, story),
                Some(remote_story) => {
                    if Self::diff_matched(&mut changeset, story, remote_story) {
                        skipped += 1;
                    }
                }
            }
        }

        debug!(
            operations = changeset.len(),
            unchanged_stories = skipped,
            "diff complete"
        );
        changeset
    }

    fn plan_new_story(changeset: &mut ChangeSet, story: &Story) {
        let create = changeset.push(Operation::new(
            &story.local_key,
            OperationPayload::CreateStory {
                story: story.without_children(),
            },
        ));

        for subtask in &story.subtasks {
            changeset.push(
                Operation::new(
                    &story.local_key,
                    OperationPayload::CreateSubtask {
                        subtask: subtask.clone(),
                    },
                )
                .with_depends_on(vec![create]),
            );
        }
        for comment in story.pending_comments() {
            changeset.push(
                Operation::new(
                    &story.local_key,
                    OperationPayload::AddComment {
                        comment: comment.clone(),
                    },
                )
                .with_depends_on(vec![create]),
            );
        }
        for link in &story.links {
            changeset.push(
                Operation::new(
                    &story.local_key,
                    OperationPayload::CreateLink { link: link.clone() },
                )
                .with_depends_on(vec![create]),
            );
        }
    }

    /// Diffs one matched pair. Returns true if the content hash
    /// matched and the story was skipped entirely.
    fn diff_matched(changeset: &mut ChangeSet, local: &Story, remote: &Story) -> bool {
        if local.content_hash() == remote.content_hash() {
            return true;
        }

        // Comments are append-only: pending ones are posted, posted
        // ones are never diffed for modification.
        for comment in local.pending_comments() {
            changeset.push(Operation::new(
                &local.local_key,
                OperationPayload::AddComment {
                    comment: comment.clone(),
                },
            ));
        }

        if local.description != remote.description {
            changeset.push(Operation::new(
                &local.local_key,
                OperationPayload::UpdateDescription {
                    description: local.description.clone(),
                },
            ));
        }

        if local.story_points != remote.story_points {
            changeset.push(Operation::new(
                &local.local_key,
                OperationPayload::UpdateStoryPoints {
                    story_points: local.story_points,
                },
            ));
        }

        if local.status != remote.status {
            changeset.push(Operation::new(
                &local.local_key,
                OperationPayload::TransitionStatus {
                    status: local.status.clone(),
                },
            ));
        }

        for subtask in &local.subtasks {
            match remote.subtask_by_sequence(subtask.sequence_number) {
                None => {
                    changeset.push(Operation::new(
                        &local.local_key,
                        OperationPayload::CreateSubtask {
                            subtask: subtask.clone(),
                        },
                    ));
                }
                Some(remote_subtask) => {
                    if Self::subtask_differs(subtask, remote_subtask) {
                        changeset.push(Operation::new(
                            &local.local_key,
                            OperationPayload::UpdateSubtask {
                                subtask: subtask.clone(),
                            },
                        ));
                    }
                }
            }
        }

        for link in &local.links {
            if !remote.links.contains(link) {
                changeset.push(Operation::new(
                    &local.local_key,
                    OperationPayload::CreateLink { link: link.clone() },
                ));
            }
        }

        false
    }

    fn subtask_differs(local: &Subtask, remote: &Subtask) -> bool {
        local.title != remote.title
            || local.description != remote.description
            || local.story_points != remote.story_points
            || local.status != remote.status
    }
}
