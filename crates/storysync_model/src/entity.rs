//! Canonical sync entities.
//!
//! The entity graph is `Epic` → `Story` → `Subtask`/`Comment`/`Link`.
//! The same types describe both sides of a sync: the locally authored
//! state and the fetched remote state. Remote identity is carried by
//! `Option<EntityId>` fields, where `None` means the item has not been
//! assigned an id by the tracker yet.

use serde::{Deserialize, Serialize};

/// Opaque identifier assigned by the remote tracker.
///
/// Stable across syncs once assigned. The engine never interprets the
/// contents, it only compares and forwards them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity id from a tracker-assigned string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Workflow status of a story or subtask.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not started.
    Open,
    /// Being worked on.
    InProgress,
    /// Waiting for review.
    InReview,
    /// Completed.
    Done,
    /// Blocked on something external.
    Blocked,
    /// Tracker-specific status the canonical set does not cover.
    Other(String),
}

impl Status {
    /// Returns a stable textual form used for hashing and payloads.
    pub fn as_str(&self) -> &str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::InReview => "in_review",
            Status::Done => "done",
            Status::Blocked => "blocked",
            Status::Other(name) => name,
        }
    }
}

/// Priority of an epic or story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Must be addressed immediately.
    Critical,
    /// High priority.
    High,
    /// Normal priority.
    Medium,
    /// Low priority.
    Low,
}

impl Priority {
    /// Returns a stable textual form used for hashing and payloads.
    pub fn as_str(&self) -> &str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// Relationship between two stories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkType {
    /// This story depends on the target.
    DependsOn,
    /// This story blocks the target.
    Blocks,
    /// Loose association.
    RelatesTo,
    /// This story duplicates the target.
    Duplicates,
}

impl LinkType {
    /// Returns a stable textual form used for hashing and payloads.
    pub fn as_str(&self) -> &str {
        match self {
            LinkType::DependsOn => "depends-on",
            LinkType::Blocks => "blocks",
            LinkType::RelatesTo => "relates-to",
            LinkType::Duplicates => "duplicates",
        }
    }
}

/// A directed link from the owning story to another story.
///
/// The core performs no cycle validation on links; they are planned
/// last so that the target may have been created in the same batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Local key of the story the link points at.
    pub target_key: String,
    /// Kind of relationship.
    pub link_type: LinkType,
}

impl Link {
    /// Creates a link to `target_key`.
    pub fn new(target_key: impl Into<String>, link_type: LinkType) -> Self {
        Self {
            target_key: target_key.into(),
            link_type,
        }
    }
}

/// A comment on a story.
///
/// Comments are append-only: once a comment has a `remote_id` the
/// engine never updates or deletes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Remote id, once the comment has been posted.
    pub remote_id: Option<EntityId>,
    /// Author display name.
    pub author: String,
    /// Comment body.
    pub body: String,
    /// Creation time as Unix epoch milliseconds.
    pub created_at_ms: u64,
}

impl Comment {
    /// Creates a comment that has not been posted to the tracker yet.
    pub fn local(author: impl Into<String>, body: impl Into<String>, created_at_ms: u64) -> Self {
        Self {
            remote_id: None,
            author: author.into(),
            body: body.into(),
            created_at_ms,
        }
    }

    /// Returns true if this comment has not been posted yet.
    pub fn is_pending(&self) -> bool {
        self.remote_id.is_none()
    }
}

/// A subtask, exclusively owned by its parent story.
///
/// The `sequence_number` is stable and is the matching key across
/// syncs; array position carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    /// Stable sequence number within the parent story.
    pub sequence_number: u32,
    /// Remote id, once created in the tracker.
    pub remote_id: Option<EntityId>,
    /// Subtask title.
    pub title: String,
    /// Subtask description.
    pub description: String,
    /// Estimated story points, if any.
    pub story_points: Option<u32>,
    /// Workflow status.
    pub status: Status,
}

impl Subtask {
    /// Creates a subtask with the given sequence number and title.
    pub fn new(sequence_number: u32, title: impl Into<String>) -> Self {
        Self {
            sequence_number,
            remote_id: None,
            title: title.into(),
            description: String::new(),
            story_points: None,
            status: Status::Open,
        }
    }
}

/// A single work item with description, points, status, subtasks,
/// comments, and links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    /// Locally assigned key, e.g. `US-001`. The matching key when no
    /// remote id has been assigned yet.
    pub local_key: String,
    /// Remote id, once the story exists in the tracker.
    pub remote_id: Option<EntityId>,
    /// Story title.
    pub title: String,
    /// Story description.
    pub description: String,
    /// Estimated story points, if any.
    pub story_points: Option<u32>,
    /// Priority.
    pub priority: Priority,
    /// Workflow status.
    pub status: Status,
    /// Subtasks, owned by this story.
    pub subtasks: Vec<Subtask>,
    /// Comments, append-only.
    pub comments: Vec<Comment>,
    /// Outgoing links.
    pub links: Vec<Link>,
}

impl Story {
    /// Creates an empty story with the given local key and title.
    pub fn new(local_key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            local_key: local_key.into(),
            remote_id: None,
            title: title.into(),
            description: String::new(),
            story_points: None,
            priority: Priority::Medium,
            status: Status::Open,
            subtasks: Vec::new(),
            comments: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Digest of the diff-relevant content fields.
    ///
    /// Two stories with equal hashes require no operations to
    /// reconcile. Remote ids and comment timestamps are excluded so
    /// the hash converges after a successful sync.
    pub fn content_hash(&self) -> String {
        crate::hash::story_content_hash(self)
    }

    /// Returns the subtask with the given sequence number, if any.
    pub fn subtask_by_sequence(&self, sequence_number: u32) -> Option<&Subtask> {
        self.subtasks
            .iter()
            .find(|s| s.sequence_number == sequence_number)
    }

    /// Returns the comments that have not been posted yet.
    pub fn pending_comments(&self) -> impl Iterator<Item = &Comment> {
        self.comments.iter().filter(|c| c.is_pending())
    }

    /// Copy of this story without subtasks, comments, and links.
    ///
    /// Used as the `CreateStory` payload: children are planned as
    /// separate dependent operations so their outcomes are reported
    /// individually.
    pub fn without_children(&self) -> Self {
        Self {
            subtasks: Vec::new(),
            comments: Vec::new(),
            links: Vec::new(),
            ..self.clone()
        }
    }
}

/// Top-level grouping of stories.
///
/// The epic owns its story list by composition for planning purposes;
/// a story may outlive its epic reference in the remote system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epic {
    /// Remote id, once the epic exists in the tracker.
    pub id: Option<EntityId>,
    /// Stable epic key, also the snapshot-store key.
    pub key: String,
    /// Epic title.
    pub title: String,
    /// Workflow status.
    pub status: Status,
    /// Priority.
    pub priority: Priority,
    /// Stories in authored order.
    pub stories: Vec<Story>,
}

impl Epic {
    /// Creates an empty epic with the given key and title.
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: None,
            key: key.into(),
            title: title.into(),
            status: Status::Open,
            priority: Priority::Medium,
            stories: Vec::new(),
        }
    }

    /// Returns the story with the given local key, if any.
    pub fn story_by_key(&self, local_key: &str) -> Option<&Story> {
        self.stories.iter().find(|s| s.local_key == local_key)
    }

    /// Returns the story with the given remote id, if any.
    pub fn story_by_remote_id(&self, id: &EntityId) -> Option<&Story> {
        self.stories
            .iter()
            .find(|s| s.remote_id.as_ref() == Some(id))
    }
}
