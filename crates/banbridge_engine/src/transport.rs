//! HTTP transport abstraction.
//!
//! The request layer talks to the network through [`HttpClient`], which
//! allows the retry and decoding logic to run against a scripted client in
//! tests and against `reqwest` in production.

use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use url::Url;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// A fully built request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute target URL, query included.
    pub url: Url,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// JSON body for `POST`.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Returns the value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received response. The body is read fully before returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body text.
    pub body: String,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implementations perform exactly one exchange per call and report
/// connection-level failures as [`BridgeError::Transport`]. Status handling
/// and retries belong to the caller.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response.
    async fn send(&self, request: &HttpRequest) -> BridgeResult<HttpResponse>;
}

/// A scripted reply for [`MockHttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Respond with a status and body.
    Response(u16, String),
    /// Fail at the transport level.
    Transport {
        /// Error message.
        message: String,
        /// Whether the failure is retryable.
        retryable: bool,
    },
}

impl MockReply {
    /// A response with a JSON body.
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        MockReply::Response(status, body.into())
    }

    /// A response with an empty body.
    pub fn status(status: u16) -> Self {
        MockReply::Response(status, String::new())
    }

    /// A retryable connection failure.
    pub fn connection_refused() -> Self {
        MockReply::Transport {
            message: "connection refused".into(),
            retryable: true,
        }
    }

    fn into_result(self) -> BridgeResult<HttpResponse> {
        match self {
            MockReply::Response(status, body) => Ok(HttpResponse::new(status, body)),
            MockReply::Transport { message, retryable } => Err(BridgeError::Transport {
                message,
                retryable,
            }),
        }
    }
}

/// A mock client for testing.
///
/// Replies are scripted per URL path. Queued replies are consumed in order;
/// once a path's queue is empty its sticky reply (if any) is used, otherwise
/// the request fails with a non-retryable transport error.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    queued: Mutex<HashMap<String, VecDeque<MockReply>>>,
    sticky: Mutex<HashMap<String, MockReply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttpClient {
    /// Creates a new mock client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a one-shot reply for `path`.
    pub fn push_reply(&self, path: &str, reply: MockReply) {
        self.queued
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Sets the reply used for `path` when its queue is empty.
    pub fn set_reply(&self, path: &str, reply: MockReply) {
        self.sticky.lock().insert(path.to_string(), reply);
    }

    /// Returns every request seen so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Returns the requests sent to `path`.
    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.path() == path)
            .cloned()
            .collect()
    }

    /// Returns the number of requests sent to `path`.
    pub fn count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.path() == path)
            .count()
    }

    fn next_reply(&self, path: &str) -> Option<MockReply> {
        if let Some(reply) = self.queued.lock().get_mut(path).and_then(|q| q.pop_front()) {
            return Some(reply);
        }
        self.sticky.lock().get(path).cloned()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn send(&self, request: &HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.lock().push(request.clone());

        let path = request.url.path().to_string();
        match self.next_reply(&path) {
            Some(reply) => reply.into_result(),
            None => Err(BridgeError::transport_fatal(format!(
                "no mock reply for {path}"
            ))),
        }
    }
}
