//! Entity builders and canned fixtures.
//!
//! Builders keep test setup terse:
//!
//! ```rust
//! use storysync_testkit::{epic, story};
//! use storysync_model::Status;
//!
//! let local = epic("EP-1")
//!     .story(story("US-001").points(5).status(Status::InProgress))
//!     .story(story("US-002").description("second"))
//!     .build();
//! assert_eq!(local.stories.len(), 2);
//! ```

use storysync_model::{
    Comment, EntityId, Epic, Link, LinkType, Priority, Status, Story, Subtask,
};

/// Starts a story builder with the given local key.
pub fn story(local_key: &str) -> StoryBuilder {
    StoryBuilder {
        story: Story::new(local_key, format!("Story {local_key}")),
    }
}

/// Starts an epic builder with the given key.
pub fn epic(key: &str) -> EpicBuilder {
    EpicBuilder {
        epic: Epic::new(key, format!("Epic {key}")),
    }
}

/// Fluent story construction for tests.
#[derive(Debug, Clone)]
pub struct StoryBuilder {
    story: Story,
}

impl StoryBuilder {
    /// Sets the title.
    pub fn title(mut self, title: &str) -> Self {
        self.story.title = title.into();
        self
    }

    /// Sets the description.
    pub fn description(mut self, description: &str) -> Self {
        self.story.description = description.into();
        self
    }

    /// Sets the point estimate.
    pub fn points(mut self, points: u32) -> Self {
        self.story.story_points = Some(points);
        self
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.story.priority = priority;
        self
    }

    /// Sets the status.
    pub fn status(mut self, status: Status) -> Self {
        self.story.status = status;
        self
    }

    /// Assigns a remote id, marking the story as already synced.
    pub fn remote_id(mut self, id: &str) -> Self {
        self.story.remote_id = Some(EntityId::new(id));
        self
    }

    /// Adds a subtask with the given sequence number and title.
    pub fn subtask(mut self, sequence_number: u32, title: &str) -> Self {
        self.story
            .subtasks
            .push(Subtask::new(sequence_number, title));
        self
    }

    /// Adds a not-yet-posted comment.
    pub fn comment(mut self, author: &str, body: &str) -> Self {
        let created_at_ms = 1_700_000_000_000 + self.story.comments.len() as u64;
        self.story
            .comments
            .push(Comment::local(author, body, created_at_ms));
        self
    }

    /// Adds a link.
    pub fn link(mut self, target_key: &str, link_type: LinkType) -> Self {
        self.story.links.push(Link::new(target_key, link_type));
        self
    }

    /// Finishes the story.
    pub fn build(self) -> Story {
        self.story
    }
}

impl From<StoryBuilder> for Story {
    fn from(builder: StoryBuilder) -> Self {
        builder.build()
    }
}

/// Fluent epic construction for tests.
#[derive(Debug, Clone)]
pub struct EpicBuilder {
    epic: Epic,
}

impl EpicBuilder {
    /// Sets the title.
    pub fn title(mut self, title: &str) -> Self {
        self.epic.title = title.into();
        self
    }

    /// Adds a story.
    pub fn story(mut self, story: impl Into<Story>) -> Self {
        self.epic.stories.push(story.into());
        self
    }

    /// Finishes the epic.
    pub fn build(self) -> Epic {
        self.epic
    }
}

impl From<EpicBuilder> for Epic {
    fn from(builder: EpicBuilder) -> Self {
        builder.build()
    }
}

/// A small, realistic epic: one synced story with subtasks, one
/// unsynced story with a pending comment and a link.
pub fn sample_epic() -> Epic {
    epic("EP-1")
        .title("Authentication")
        .story(
            story("US-001")
                .title("Login form")
                .description("As a user I can log in with email and password")
                .points(5)
                .remote_id("R-1")
                .subtask(1, "Design the form")
                .subtask(2, "Wire up the backend"),
        )
        .story(
            story("US-002")
                .title("Password reset")
                .description("As a user I can reset my password")
                .points(3)
                .comment("ann", "Needs security review")
                .link("US-001", LinkType::DependsOn),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose() {
        let epic = sample_epic();
        assert_eq!(epic.key, "EP-1");
        assert_eq!(epic.stories.len(), 2);

        let synced = epic.story_by_key("US-001").unwrap();
        assert_eq!(synced.remote_id, Some(EntityId::new("R-1")));
        assert_eq!(synced.subtasks.len(), 2);

        let unsynced = epic.story_by_key("US-002").unwrap();
        assert!(unsynced.remote_id.is_none());
        assert_eq!(unsynced.pending_comments().count(), 1);
        assert_eq!(unsynced.links[0].target_key, "US-001");
    }
}
