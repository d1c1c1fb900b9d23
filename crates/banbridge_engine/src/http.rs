//! `reqwest`-backed HTTP client.

use crate::error::{BridgeError, BridgeResult};
use crate::transport::{HttpClient, HttpRequest, HttpResponse, Method};
use async_trait::async_trait;
use std::time::Duration;

/// Production [`HttpClient`] built on `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with the given per-request and connect timeouts.
    pub fn new(request_timeout: Duration, connect_timeout: Duration) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| BridgeError::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: &HttpRequest) -> BridgeResult<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(request.url.clone()),
            Method::Post => self.client.post(request.url.clone()),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        Ok(HttpResponse { status, body })
    }
}

/// Maps a `reqwest` failure onto the transport taxonomy.
///
/// Connect failures, timeouts and body I/O errors are retryable; errors
/// raised while building the request are not.
fn classify(err: reqwest::Error) -> BridgeError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else if err.is_builder() {
        return BridgeError::transport_fatal(format!("request build failed: {err}"));
    } else if err.is_redirect() {
        return BridgeError::transport_fatal(format!("redirect failed: {err}"));
    } else {
        "io"
    };
    BridgeError::transport_retryable(format!("{kind}: {err}"))
}
