//! Scripted remote backend for executor and limiter tests.

use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use storysync_engine::{RemoteBackend, RemoteRequest, RemoteResponse};

/// Replays a queued sequence of responses, recording every request.
///
/// Once the queue is empty, every call succeeds with a canned
/// create-style body so port tests do not have to script the happy
/// path explicitly.
#[derive(Default)]
pub struct ScriptedBackend {
    queue: Mutex<VecDeque<Result<RemoteResponse, String>>>,
    requests: Mutex<Vec<RemoteRequest>>,
}

impl ScriptedBackend {
    /// Creates a backend with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, response: RemoteResponse) {
        self.queue.lock().push_back(Ok(response));
    }

    /// Queues a connection-level failure.
    pub fn push_network_error(&self, message: &str) {
        self.queue.lock().push_back(Err(message.to_string()));
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests seen so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl RemoteBackend for ScriptedBackend {
    fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, String> {
        self.requests.lock().push(request.clone());
        self.queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(RemoteResponse::ok(json!({ "id": "R-auto" }))))
    }
}
