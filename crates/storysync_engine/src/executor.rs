//! Resilient execution of single remote calls.
//!
//! `ResilientExecutor` wraps the raw transport with admission
//! control, timeout, retry classification, and exponential backoff.
//! Remote conditions resolve to classified `TrackerError` kinds, not
//! panics: 401/403/404 fail immediately since retrying cannot change
//! their outcome, while 429/5xx and connection failures are retried
//! with backoff up to the configured budget.

use crate::cancel::CancelToken;
use crate::config::RetryConfig;
use crate::error::{EngineResult, TrackerError};
use crate::limiter::{AcquireOutcome, RateLimiter};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP-ish method of a remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMethod {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Update.
    Put,
}

/// Descriptor of a single remote call.
///
/// The path is tracker-relative; the wire format behind it is a
/// backend concern.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    /// Request method.
    pub method: RemoteMethod,
    /// Tracker-relative path, e.g. `/stories/US-001/status`.
    pub path: String,
    /// JSON body; `Value::Null` for body-less requests.
    pub body: Value,
}

impl RemoteRequest {
    /// Creates a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: RemoteMethod::Get,
            path: path.into(),
            body: Value::Null,
        }
    }

    /// Creates a POST request with a JSON body.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: RemoteMethod::Post,
            path: path.into(),
            body,
        }
    }

    /// Creates a PUT request with a JSON body.
    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: RemoteMethod::Put,
            path: path.into(),
            body,
        }
    }
}

/// Response surfaced by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed `Retry-After` value, when the server sent one.
    pub retry_after: Option<Duration>,
    /// JSON body; `Value::Null` when the body was empty.
    pub body: Value,
}

impl RemoteResponse {
    /// A 200 response with the given body.
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body,
        }
    }

    /// A bodyless response with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            body: Value::Null,
        }
    }

    /// A 429 response carrying an explicit retry-after.
    pub fn throttled(retry_after: Duration) -> Self {
        Self {
            status: 429,
            retry_after: Some(retry_after),
            body: Value::Null,
        }
    }
}

/// Raw transport to the tracker.
///
/// Implementations perform one request without retrying; connection
/// failures are reported as `Err` with a message. The executor owns
/// all retry policy.
pub trait RemoteBackend: Send + Sync {
    /// Performs a single request.
    fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, String>;
}

impl<B: RemoteBackend + ?Sized> RemoteBackend for &B {
    fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, String> {
        (**self).send(request)
    }
}

impl<B: RemoteBackend + ?Sized> RemoteBackend for Arc<B> {
    fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, String> {
        (**self).send(request)
    }
}

fn classify(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 => StatusClass::Authentication,
        403 => StatusClass::Permission,
        404 => StatusClass::NotFound,
        429 => StatusClass::Throttled,
        500..=599 => StatusClass::ServerRetryable,
        _ => StatusClass::Unexpected,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Success,
    Authentication,
    Permission,
    NotFound,
    Throttled,
    ServerRetryable,
    Unexpected,
}

/// Executes remote calls with admission control and retries.
pub struct ResilientExecutor<B: RemoteBackend> {
    backend: B,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    acquire_timeout: Option<Duration>,
    cancel: CancelToken,
}

impl<B: RemoteBackend> ResilientExecutor<B> {
    /// Creates an executor sharing the connection's limiter.
    pub fn new(
        backend: B,
        limiter: Arc<RateLimiter>,
        retry: RetryConfig,
        acquire_timeout: Option<Duration>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            backend,
            limiter,
            retry,
            acquire_timeout,
            cancel,
        }
    }

    /// The cancellation token observed at every blocking point.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Executes one call, retrying transient failures with
    /// exponential backoff.
    ///
    /// Resolves to the response body on any 2xx (an empty body maps
    /// to `Value::Null`, not an error) or to a classified
    /// `TrackerError`.
    pub fn execute(&self, request: &RemoteRequest) -> EngineResult<Value> {
        let mut last_network_error = String::new();
        let mut last_status = 0u16;

        for attempt in 0..=self.retry.max_retries {
            match self.limiter.acquire(self.acquire_timeout, &self.cancel) {
                AcquireOutcome::Admitted => {}
                AcquireOutcome::Cancelled => return Err(TrackerError::Cancelled),
                AcquireOutcome::TimedOut => {
                    return Err(TrackerError::RateLimited { attempts: attempt })
                }
            }

            match self.backend.send(request) {
                Err(message) => {
                    warn!(path = %request.path, attempt, error = %message, "network failure");
                    last_network_error = message;
                    if attempt < self.retry.max_retries {
                        self.backoff(attempt)?;
                        continue;
                    }
                }
                Ok(response) => {
                    self.limiter
                        .on_response_observed(response.status, response.retry_after);
                    last_status = response.status;

                    match classify(response.status) {
                        StatusClass::Success => return Ok(response.body),
                        StatusClass::Authentication => {
                            return Err(TrackerError::Authentication(body_message(&response)))
                        }
                        StatusClass::Permission => {
                            return Err(TrackerError::Permission(body_message(&response)))
                        }
                        StatusClass::NotFound => {
                            return Err(TrackerError::NotFound(request.path.clone()))
                        }
                        StatusClass::Unexpected => {
                            return Err(TrackerError::Protocol(format!(
                                "unexpected status {} for {}",
                                response.status, request.path
                            )))
                        }
                        StatusClass::Throttled | StatusClass::ServerRetryable => {
                            debug!(
                                path = %request.path,
                                status = response.status,
                                attempt,
                                "retryable response"
                            );
                            if attempt < self.retry.max_retries {
                                self.backoff(attempt)?;
                                continue;
                            }
                        }
                    }
                }
            }
        }

        let attempts = self.retry.max_retries + 1;
        if last_status == 429 {
            Err(TrackerError::RateLimited { attempts })
        } else if last_status != 0 {
            Err(TrackerError::Transient {
                status: last_status,
                attempts,
            })
        } else {
            Err(TrackerError::Network {
                message: last_network_error,
                attempts,
            })
        }
    }

    fn backoff(&self, attempt: u32) -> EngineResult<()> {
        let delay = self.retry.delay_for_attempt(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
        if self.cancel.sleep(delay) {
            Ok(())
        } else {
            Err(TrackerError::Cancelled)
        }
    }
}

fn body_message(response: &RemoteResponse) -> String {
    match &response.body {
        Value::Null => format!("status {}", response.status),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Backend that replays a scripted sequence of outcomes.
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<RemoteResponse, String>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<RemoteResponse, String>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    impl RemoteBackend for Scripted {
        fn send(&self, _request: &RemoteRequest) -> Result<RemoteResponse, String> {
            *self.calls.lock() += 1;
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(RemoteResponse::ok(Value::Null)))
        }
    }

    fn executor(backend: &Scripted, retries: u32) -> ResilientExecutor<&Scripted> {
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig::new(100.0, 100.0)));
        let retry = RetryConfig::new(retries)
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(false);
        ResilientExecutor::new(backend, limiter, retry, None, CancelToken::new())
    }

    #[test]
    fn success_returns_body() {
        let backend = Scripted::new(vec![Ok(RemoteResponse::ok(json!({"id": "R-1"})))]);
        let exec = executor(&backend, 3);

        let body = exec.execute(&RemoteRequest::get("/stories")).unwrap();
        assert_eq!(body, json!({"id": "R-1"}));
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn empty_body_is_success_not_error() {
        let backend = Scripted::new(vec![Ok(RemoteResponse::status(204))]);
        let exec = executor(&backend, 3);

        let body = exec.execute(&RemoteRequest::get("/stories")).unwrap();
        assert_eq!(body, Value::Null);
    }

    #[test]
    fn auth_failures_never_retry() {
        let backend = Scripted::new(vec![Ok(RemoteResponse::status(401))]);
        let exec = executor(&backend, 5);

        let err = exec.execute(&RemoteRequest::get("/stories")).unwrap_err();
        assert!(matches!(err, TrackerError::Authentication(_)));
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn permission_and_not_found_never_retry() {
        for (status, check) in [
            (403u16, TrackerError::is_permanent as fn(&TrackerError) -> bool),
            (404u16, TrackerError::is_permanent),
        ] {
            let backend = Scripted::new(vec![Ok(RemoteResponse::status(status))]);
            let exec = executor(&backend, 5);
            let err = exec.execute(&RemoteRequest::get("/x")).unwrap_err();
            assert!(check(&err), "status {status} gave {err:?}");
            assert_eq!(backend.calls(), 1);
        }
    }

    #[test]
    fn retryable_status_retries_until_success() {
        let backend = Scripted::new(vec![
            Ok(RemoteResponse::status(503)),
            Ok(RemoteResponse::status(502)),
            Ok(RemoteResponse::ok(json!({"ok": true}))),
        ]);
        let exec = executor(&backend, 3);

        let body = exec.execute(&RemoteRequest::get("/stories")).unwrap();
        assert_eq!(body, json!({"ok": true}));
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn exhausted_5xx_surfaces_transient() {
        let backend = Scripted::new(vec![
            Ok(RemoteResponse::status(503)),
            Ok(RemoteResponse::status(503)),
            Ok(RemoteResponse::status(504)),
        ]);
        let exec = executor(&backend, 2);

        let err = exec.execute(&RemoteRequest::get("/stories")).unwrap_err();
        assert_eq!(
            err,
            TrackerError::Transient {
                status: 504,
                attempts: 3
            }
        );
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn exhausted_429_surfaces_rate_limited() {
        let backend = Scripted::new(vec![
            Ok(RemoteResponse::status(429)),
            Ok(RemoteResponse::status(429)),
        ]);
        let exec = executor(&backend, 1);

        let err = exec.execute(&RemoteRequest::get("/stories")).unwrap_err();
        assert_eq!(err, TrackerError::RateLimited { attempts: 2 });
    }

    #[test]
    fn network_failures_retry_then_surface() {
        let backend = Scripted::new(vec![
            Err("connection refused".into()),
            Err("connection reset".into()),
        ]);
        let exec = executor(&backend, 1);

        let err = exec.execute(&RemoteRequest::get("/stories")).unwrap_err();
        assert_eq!(
            err,
            TrackerError::Network {
                message: "connection reset".into(),
                attempts: 2
            }
        );
    }

    #[test]
    fn network_failure_then_success_recovers() {
        let backend = Scripted::new(vec![
            Err("connection refused".into()),
            Ok(RemoteResponse::ok(json!(1))),
        ]);
        let exec = executor(&backend, 2);

        assert_eq!(exec.execute(&RemoteRequest::get("/x")).unwrap(), json!(1));
    }

    #[test]
    fn unexpected_status_is_protocol_error() {
        let backend = Scripted::new(vec![Ok(RemoteResponse::status(418))]);
        let exec = executor(&backend, 3);

        let err = exec.execute(&RemoteRequest::get("/brew")).unwrap_err();
        assert!(matches!(err, TrackerError::Protocol(_)));
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn responses_feed_the_limiter() {
        let backend = Scripted::new(vec![
            Ok(RemoteResponse::status(429)),
            Ok(RemoteResponse::ok(Value::Null)),
        ]);
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig::new(100.0, 8.0)));
        let exec = ResilientExecutor::new(
            &backend,
            Arc::clone(&limiter),
            RetryConfig::new(2)
                .with_base_delay(Duration::from_millis(1))
                .with_jitter(false),
            None,
            CancelToken::new(),
        );

        exec.execute(&RemoteRequest::get("/stories")).unwrap();
        assert_eq!(limiter.current_refill_rate(), 4.0);
    }

    #[test]
    fn cancelled_before_call_short_circuits() {
        let backend = Scripted::new(vec![Ok(RemoteResponse::ok(Value::Null))]);
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig::default()));
        let cancel = CancelToken::new();
        cancel.cancel();

        let exec = ResilientExecutor::new(
            &backend,
            limiter,
            RetryConfig::no_retry(),
            None,
            cancel,
        );

        let err = exec.execute(&RemoteRequest::get("/stories")).unwrap_err();
        assert_eq!(err, TrackerError::Cancelled);
        assert_eq!(backend.calls(), 0);
    }
}
