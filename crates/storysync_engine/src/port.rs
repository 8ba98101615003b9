//! The tracker port: the capability set the engine needs from a
//! remote issue tracker.
//!
//! One method corresponds to each operation kind, plus the fetch that
//! produces the remote entity graph. Implementations are selected
//! explicitly at construction time; the engine never probes for
//! capabilities at runtime. `RestTracker` is the REST-shaped
//! implementation routing every call through the resilient executor;
//! tests use the in-memory tracker from the testkit.

use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::error::{EngineResult, TrackerError};
use crate::executor::{RemoteBackend, RemoteRequest, ResilientExecutor};
use crate::limiter::RateLimiter;
use serde_json::{json, Value};
use std::sync::Arc;
use storysync_model::{Comment, EntityId, Epic, Link, Status, Story, Subtask};

/// Remote tracker capability set consumed by the engine.
///
/// Create methods return the tracker-assigned id; update methods
/// return a success marker. All methods fail with the classified
/// errors of the executor layer.
pub trait TrackerPort: Send + Sync {
    /// Fetches the remote entity graph for an epic.
    fn fetch_epic(&self, epic_key: &str) -> EngineResult<Epic>;

    /// Creates a story; children are created by their own calls.
    fn create_story(&self, epic_key: &str, story: &Story) -> EngineResult<EntityId>;

    /// Replaces a story's description.
    fn update_description(&self, story_key: &str, description: &str) -> EngineResult<()>;

    /// Replaces a story's point estimate.
    fn update_story_points(&self, story_key: &str, story_points: Option<u32>) -> EngineResult<()>;

    /// Creates a subtask under a story.
    fn create_subtask(&self, story_key: &str, subtask: &Subtask) -> EngineResult<EntityId>;

    /// Updates an existing subtask, matched by sequence number.
    fn update_subtask(&self, story_key: &str, subtask: &Subtask) -> EngineResult<()>;

    /// Appends a comment to a story.
    fn add_comment(&self, story_key: &str, comment: &Comment) -> EngineResult<EntityId>;

    /// Transitions a story to a new status.
    fn transition_issue(&self, story_key: &str, status: &Status) -> EngineResult<()>;

    /// Creates a link from a story to another story.
    fn create_link(&self, story_key: &str, link: &Link) -> EngineResult<()>;
}

impl<P: TrackerPort + ?Sized> TrackerPort for Arc<P> {
    fn fetch_epic(&self, epic_key: &str) -> EngineResult<Epic> {
        (**self).fetch_epic(epic_key)
    }

    fn create_story(&self, epic_key: &str, story: &Story) -> EngineResult<EntityId> {
        (**self).create_story(epic_key, story)
    }

    fn update_description(&self, story_key: &str, description: &str) -> EngineResult<()> {
        (**self).update_description(story_key, description)
    }

    fn update_story_points(&self, story_key: &str, story_points: Option<u32>) -> EngineResult<()> {
        (**self).update_story_points(story_key, story_points)
    }

    fn create_subtask(&self, story_key: &str, subtask: &Subtask) -> EngineResult<EntityId> {
        (**self).create_subtask(story_key, subtask)
    }

    fn update_subtask(&self, story_key: &str, subtask: &Subtask) -> EngineResult<()> {
        (**self).update_subtask(story_key, subtask)
    }

    fn add_comment(&self, story_key: &str, comment: &Comment) -> EngineResult<EntityId> {
        (**self).add_comment(story_key, comment)
    }

    fn transition_issue(&self, story_key: &str, status: &Status) -> EngineResult<()> {
        (**self).transition_issue(story_key, status)
    }

    fn create_link(&self, story_key: &str, link: &Link) -> EngineResult<()> {
        (**self).create_link(story_key, link)
    }
}

/// REST-shaped tracker connection.
///
/// Owns the connection's rate limiter and routes every call through
/// one resilient executor, so admission control covers all outbound
/// traffic for this connection.
pub struct RestTracker<B: RemoteBackend> {
    executor: ResilientExecutor<B>,
    limiter: Arc<RateLimiter>,
}

impl<B: RemoteBackend> RestTracker<B> {
    /// Creates a connection with a freshly constructed limiter.
    pub fn new(backend: B, config: &SyncConfig) -> Self {
        Self::with_cancel(backend, config, CancelToken::new())
    }

    /// Creates a connection observing the given cancellation token.
    pub fn with_cancel(backend: B, config: &SyncConfig, cancel: CancelToken) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let executor = ResilientExecutor::new(
            backend,
            Arc::clone(&limiter),
            config.retry.clone(),
            config.acquire_timeout,
            cancel,
        );
        Self { executor, limiter }
    }

    /// The limiter gating this connection. Diagnostic only.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn created_id(body: &Value, context: &str) -> EngineResult<EntityId> {
        body.get("id")
            .and_then(Value::as_str)
            .map(EntityId::new)
            .ok_or_else(|| TrackerError::Protocol(format!("{context}: response missing id")))
    }
}

impl<B: RemoteBackend> TrackerPort for RestTracker<B> {
    fn fetch_epic(&self, epic_key: &str) -> EngineResult<Epic> {
        let body = self
            .executor
            .execute(&RemoteRequest::get(format!("/epics/{epic_key}")))?;
        serde_json::from_value(body)
            .map_err(|e| TrackerError::Protocol(format!("fetch_epic: malformed epic body: {e}")))
    }

    fn create_story(&self, epic_key: &str, story: &Story) -> EngineResult<EntityId> {
        let body = self.executor.execute(&RemoteRequest::post(
            format!("/epics/{epic_key}/stories"),
            json!({
                "local_key": story.local_key,
                "title": story.title,
                "description": story.description,
                "story_points": story.story_points,
                "priority": story.priority.as_str(),
                "status": story.status.as_str(),
            }),
        ))?;
        Self::created_id(&body, "create_story")
    }

    fn update_description(&self, story_key: &str, description: &str) -> EngineResult<()> {
        self.executor
            .execute(&RemoteRequest::put(
                format!("/stories/{story_key}/description"),
                json!({ "description": description }),
            ))
            .map(|_| ())
    }

    fn update_story_points(&self, story_key: &str, story_points: Option<u32>) -> EngineResult<()> {
        self.executor
            .execute(&RemoteRequest::put(
                format!("/stories/{story_key}/points"),
                json!({ "story_points": story_points }),
            ))
            .map(|_| ())
    }

    fn create_subtask(&self, story_key: &str, subtask: &Subtask) -> EngineResult<EntityId> {
        let body = self.executor.execute(&RemoteRequest::post(
            format!("/stories/{story_key}/subtasks"),
            json!({
                "sequence_number": subtask.sequence_number,
                "title": subtask.title,
                "description": subtask.description,
                "story_points": subtask.story_points,
                "status": subtask.status.as_str(),
            }),
        ))?;
        Self::created_id(&body, "create_subtask")
    }

    fn update_subtask(&self, story_key: &str, subtask: &Subtask) -> EngineResult<()> {
        self.executor
            .execute(&RemoteRequest::put(
                format!(
                    "/stories/{story_key}/subtasks/{}",
                    subtask.sequence_number
                ),
                json!({
                    "title": subtask.title,
                    "description": subtask.description,
                    "story_points": subtask.story_points,
                    "status": subtask.status.as_str(),
                }),
            ))
            .map(|_| ())
    }

    fn add_comment(&self, story_key: &str, comment: &Comment) -> EngineResult<EntityId> {
        let body = self.executor.execute(&RemoteRequest::post(
            format!("/stories/{story_key}/comments"),
            json!({
                "author": comment.author,
                "body": comment.body,
                "created_at_ms": comment.created_at_ms,
            }),
        ))?;
        Self::created_id(&body, "add_comment")
    }

    fn transition_issue(&self, story_key: &str, status: &Status) -> EngineResult<()> {
        self.executor
            .execute(&RemoteRequest::post(
                format!("/stories/{story_key}/transitions"),
                json!({ "status": status.as_str() }),
            ))
            .map(|_| ())
    }

    fn create_link(&self, story_key: &str, link: &Link) -> EngineResult<()> {
        self.executor
            .execute(&RemoteRequest::post(
                format!("/stories/{story_key}/links"),
                json!({
                    "target_key": link.target_key,
                    "link_type": link.link_type.as_str(),
                }),
            ))
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RemoteResponse;
    use parking_lot::Mutex;

    /// Backend that records paths and answers every call with a
    /// canned create response.
    #[derive(Default)]
    struct Recording {
        paths: Mutex<Vec<String>>,
    }

    impl RemoteBackend for Recording {
        fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, String> {
            self.paths.lock().push(request.path.clone());
            Ok(RemoteResponse::ok(json!({ "id": "R-1" })))
        }
    }

    #[test]
    fn create_story_extracts_assigned_id() {
        let tracker = RestTracker::new(Recording::default(), &SyncConfig::new());
        let story = Story::new("US-001", "Login");

        let id = tracker.create_story("EP-1", &story).unwrap();
        assert_eq!(id, EntityId::new("R-1"));
    }

    #[test]
    fn calls_route_to_expected_paths() {
        let backend = Arc::new(Recording::default());
        let tracker = RestTracker::new(Arc::clone(&backend), &SyncConfig::new());

        tracker.update_description("US-001", "text").unwrap();
        tracker
            .transition_issue("US-001", &Status::Done)
            .unwrap();
        tracker
            .create_link("US-001", &Link::new("US-002", storysync_model::LinkType::Blocks))
            .unwrap();

        let paths = backend.paths.lock().clone();
        assert_eq!(
            paths,
            vec![
                "/stories/US-001/description",
                "/stories/US-001/transitions",
                "/stories/US-001/links",
            ]
        );
    }

    #[test]
    fn missing_id_in_create_response_is_protocol_error() {
        struct NoId;
        impl RemoteBackend for NoId {
            fn send(&self, _request: &RemoteRequest) -> Result<RemoteResponse, String> {
                Ok(RemoteResponse::ok(json!({})))
            }
        }

        let tracker = RestTracker::new(NoId, &SyncConfig::new());
        let err = tracker
            .create_story("EP-1", &Story::new("US-001", "Login"))
            .unwrap_err();
        assert!(matches!(err, TrackerError::Protocol(_)));
    }
}
