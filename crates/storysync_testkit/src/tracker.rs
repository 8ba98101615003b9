//! In-memory tracker for engine tests.
//!
//! `MemoryTracker` holds epics behind a mutex, assigns sequential
//! remote ids, records every port call, and can be scripted to fail
//! specific calls. It behaves like a well-behaved remote: mutations
//! are visible to subsequent fetches.

use parking_lot::Mutex;
use std::collections::HashMap;
use storysync_engine::{EngineResult, TrackerError, TrackerPort};
use storysync_model::{Comment, EntityId, Epic, Link, Status, Story, Subtask};

#[derive(Default)]
struct Inner {
    epics: HashMap<String, Epic>,
    next_id: u64,
    calls: Vec<String>,
    failures: Vec<(String, String, TrackerError)>,
}

impl Inner {
    fn fresh_id(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId::new(format!("R-{}", self.next_id))
    }

    /// Records the call and consumes a matching scripted failure.
    fn observe(&mut self, method: &str, target: &str) -> EngineResult<()> {
        self.calls.push(format!("{method} {target}"));
        if let Some(position) = self
            .failures
            .iter()
            .position(|(m, t, _)| m == method && t == target)
        {
            let (_, _, error) = self.failures.remove(position);
            return Err(error);
        }
        Ok(())
    }

    fn story_mut(&mut self, story_key: &str) -> EngineResult<&mut Story> {
        self.epics
            .values_mut()
            .flat_map(|epic| epic.stories.iter_mut())
            .find(|story| story.local_key == story_key)
            .ok_or_else(|| TrackerError::NotFound(story_key.to_string()))
    }
}

/// Thread-safe in-memory tracker.
#[derive(Default)]
pub struct MemoryTracker {
    inner: Mutex<Inner>,
}

impl MemoryTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds remote state for an epic.
    pub fn seed(&self, epic: Epic) {
        self.inner.lock().epics.insert(epic.key.clone(), epic);
    }

    /// Returns a copy of the stored epic, if any.
    pub fn epic(&self, key: &str) -> Option<Epic> {
        self.inner.lock().epics.get(key).cloned()
    }

    /// Returns the recorded calls, in order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    /// Scripts the next matching call to fail with the given error.
    /// Consumed on first match; later identical calls succeed.
    pub fn fail_once(&self, method: &str, target: &str, error: TrackerError) {
        self.inner
            .lock()
            .failures
            .push((method.to_string(), target.to_string(), error));
    }
}

impl TrackerPort for MemoryTracker {
    fn fetch_epic(&self, epic_key: &str) -> EngineResult<Epic> {
        let mut inner = self.inner.lock();
        inner.observe("fetch_epic", epic_key)?;
        inner
            .epics
            .get(epic_key)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(epic_key.to_string()))
    }

    fn create_story(&self, epic_key: &str, story: &Story) -> EngineResult<EntityId> {
        let mut inner = self.inner.lock();
        inner.observe("create_story", &story.local_key)?;
        let id = inner.fresh_id();
        let mut created = story.clone();
        created.remote_id = Some(id.clone());
        inner
            .epics
            .entry(epic_key.to_string())
            .or_insert_with(|| Epic::new(epic_key, epic_key))
            .stories
            .push(created);
        Ok(id)
    }

    fn update_description(&self, story_key: &str, description: &str) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        inner.observe("update_description", story_key)?;
        inner.story_mut(story_key)?.description = description.to_string();
        Ok(())
    }

    fn update_story_points(&self, story_key: &str, story_points: Option<u32>) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        inner.observe("update_story_points", story_key)?;
        inner.story_mut(story_key)?.story_points = story_points;
        Ok(())
    }

    fn create_subtask(&self, story_key: &str, subtask: &Subtask) -> EngineResult<EntityId> {
        let mut inner = self.inner.lock();
        inner.observe("create_subtask", story_key)?;
        let id = inner.fresh_id();
        let mut created = subtask.clone();
        created.remote_id = Some(id.clone());
        inner.story_mut(story_key)?.subtasks.push(created);
        Ok(id)
    }

    fn update_subtask(&self, story_key: &str, subtask: &Subtask) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        inner.observe("update_subtask", story_key)?;
        let story = inner.story_mut(story_key)?;
        let existing = story
            .subtasks
            .iter_mut()
            .find(|s| s.sequence_number == subtask.sequence_number)
            .ok_or_else(|| {
                TrackerError::NotFound(format!(
                    "{story_key} subtask {}",
                    subtask.sequence_number
                ))
            })?;
        existing.title = subtask.title.clone();
        existing.description = subtask.description.clone();
        existing.story_points = subtask.story_points;
        existing.status = subtask.status.clone();
        Ok(())
    }

    fn add_comment(&self, story_key: &str, comment: &Comment) -> EngineResult<EntityId> {
        let mut inner = self.inner.lock();
        inner.observe("add_comment", story_key)?;
        let id = inner.fresh_id();
        let mut posted = comment.clone();
        posted.remote_id = Some(id.clone());
        inner.story_mut(story_key)?.comments.push(posted);
        Ok(id)
    }

    fn transition_issue(&self, story_key: &str, status: &Status) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        inner.observe("transition_issue", story_key)?;
        inner.story_mut(story_key)?.status = status.clone();
        Ok(())
    }

    fn create_link(&self, story_key: &str, link: &Link) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        inner.observe("create_link", story_key)?;
        let story = inner.story_mut(story_key)?;
        if !story.links.contains(link) {
            story.links.push(link.clone());
        }
        Ok(())
    }
}
