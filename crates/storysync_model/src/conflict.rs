//! Three-way conflict records and resolution strategies.
//!
//! A conflict exists for a field when local and remote both diverged
//! from the common base snapshot and disagree with each other.
//! Conflicts are surfaced as data, never as errors; the caller picks
//! a strategy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Story field subject to three-way comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictField {
    /// Story title.
    Title,
    /// Story description.
    Description,
    /// Point estimate.
    StoryPoints,
    /// Priority.
    Priority,
    /// Workflow status.
    Status,
}

impl std::fmt::Display for ConflictField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConflictField::Title => "title",
            ConflictField::Description => "description",
            ConflictField::StoryPoints => "story_points",
            ConflictField::Priority => "priority",
            ConflictField::Status => "status",
        };
        f.write_str(name)
    }
}

/// A three-way divergence on one story field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Local key of the conflicted story.
    pub story_key: String,
    /// The field that diverged.
    pub field: ConflictField,
    /// Value authored locally.
    pub local: Value,
    /// Value currently in the tracker.
    pub remote: Value,
    /// Value at the base snapshot.
    pub base: Value,
}

impl ConflictRecord {
    /// Creates a conflict record.
    pub fn new(
        story_key: impl Into<String>,
        field: ConflictField,
        local: Value,
        remote: Value,
        base: Value,
    ) -> Self {
        Self {
            story_key: story_key.into(),
            field,
            local,
            remote,
            base,
        }
    }
}

/// Caller-selected strategy for conflicted fields.
///
/// Fields with no three-way disagreement are always auto-merged
/// regardless of strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Keep the local value for conflicted fields.
    LocalWins,
    /// Keep the remote value for conflicted fields.
    RemoteWins,
    /// Emit no operations for conflicted fields; the caller resolves
    /// and re-invokes.
    Manual,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_construction() {
        let record = ConflictRecord::new(
            "US-001",
            ConflictField::StoryPoints,
            json!(5),
            json!(8),
            json!(3),
        );
        assert_eq!(record.story_key, "US-001");
        assert_eq!(record.field, ConflictField::StoryPoints);
        assert_eq!(record.local, json!(5));
        assert_eq!(record.remote, json!(8));
        assert_eq!(record.base, json!(3));
    }

    #[test]
    fn field_display_names() {
        assert_eq!(ConflictField::StoryPoints.to_string(), "story_points");
        assert_eq!(ConflictField::Status.to_string(), "status");
    }
}
