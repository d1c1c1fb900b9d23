//! Resilient request layer for the backend API.
//!
//! Every call goes through [`BackendClient::send_with_retry`], which applies
//! the retry policy:
//!
//! - transport failures retry with backoff until attempts are exhausted
//! - 401/403 are terminal and logged once
//! - 429 and 5xx retry with backoff; 429 waits at least one second
//! - every other status is terminal and returned as-is
//!
//! The endpoint methods never return errors. Reads resolve to `None` and
//! writes to `false` (or a [`PostOutcome`]) after logging the failure.

use crate::config::{trim_trailing_slash, BridgeConfig, RetryConfig};
use crate::error::{is_auth_status, is_retryable_status, BridgeError, BridgeResult};
use crate::http::ReqwestClient;
use crate::transport::{HttpClient, HttpRequest, HttpResponse, Method};
use banbridge_protocol::{
    paths, BanChangesResponse, BanReportRequest, CommandAckRequest, CommandsPollResponse,
    HealthResponse, PresenceRequest, ServerMetricsRequest, StatsBatchRequest,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};
use url::Url;

/// Result of a write whose status code the caller wants to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostOutcome {
    /// True for a 2xx response.
    pub ok: bool,
    /// Status of the final response, if one was received.
    pub status: Option<u16>,
}

impl PostOutcome {
    fn failed() -> Self {
        Self {
            ok: false,
            status: None,
        }
    }
}

/// Whether failures of a call are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Logging {
    Normal,
    Quiet,
}

/// Authenticated JSON client for the backend API.
pub struct BackendClient<C: HttpClient> {
    base_url: String,
    server_key: String,
    server_token: String,
    retry: RetryConfig,
    http: C,
}

impl BackendClient<ReqwestClient> {
    /// Creates a client backed by `reqwest` using the configured timeouts.
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        let http = ReqwestClient::new(config.request_timeout(), config.connect_timeout())?;
        Ok(Self::new(config, http))
    }
}

impl<C: HttpClient> BackendClient<C> {
    /// Creates a client over an arbitrary transport.
    pub fn new(config: &BridgeConfig, http: C) -> Self {
        Self {
            base_url: trim_trailing_slash(config.api.base_url.trim()).to_string(),
            server_key: config.api.server_key.trim().to_string(),
            server_token: config.api.server_token.trim().to_string(),
            retry: config.retry(),
            http,
        }
    }

    /// Returns the normalized base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the instance identity.
    pub fn server_key(&self) -> &str {
        &self.server_key
    }

    /// Returns the retry policy.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns the underlying transport.
    pub fn http(&self) -> &C {
        &self.http
    }

    // ------------------------------------------------------------------
    // Endpoints
    // ------------------------------------------------------------------

    /// `GET /api/server/health`.
    pub async fn health(&self) -> Option<HealthResponse> {
        self.get_json("health", paths::HEALTH, &[]).await
    }

    /// `GET /api/server/bans/changes?since=<cursor>`.
    pub async fn fetch_ban_changes(&self, since: &str) -> Option<BanChangesResponse> {
        self.get_json("banChanges", paths::BAN_CHANGES, &[("since", since)])
            .await
    }

    /// `POST /api/server/stats/batch`.
    pub async fn post_stats_batch(&self, batch: &StatsBatchRequest) -> bool {
        self.post_json("statsBatch", paths::STATS_BATCH, batch, Logging::Normal)
            .await
            .ok
    }

    /// `POST /api/server/presence`.
    pub async fn post_presence(&self, presence: &PresenceRequest) -> bool {
        self.post_json("presence", paths::PRESENCE, presence, Logging::Normal)
            .await
            .ok
    }

    /// `POST /api/server/presence` without logging failures. Used while shutting down.
    pub async fn post_presence_quiet(&self, presence: &PresenceRequest) -> bool {
        self.post_json("presence", paths::PRESENCE, presence, Logging::Quiet)
            .await
            .ok
    }

    /// `POST /api/server/metrics`, surfacing the final status code.
    pub async fn post_metrics(&self, metrics: &ServerMetricsRequest) -> PostOutcome {
        self.post_json("metrics", paths::METRICS, metrics, Logging::Normal)
            .await
    }

    /// `GET /api/server/commands/poll?serverKey=<k>&sinceId=<id>`.
    pub async fn poll_commands(&self, since_id: u64) -> Option<CommandsPollResponse> {
        let since = since_id.to_string();
        self.get_json(
            "commandsPoll",
            paths::COMMANDS_POLL,
            &[("serverKey", self.server_key.as_str()), ("sinceId", &since)],
        )
        .await
    }

    /// `POST /api/server/commands/ack`.
    pub async fn ack_command(&self, id: u64) -> bool {
        let body = CommandAckRequest {
            server_key: self.server_key.clone(),
            id,
        };
        self.post_json("commandsAck", paths::COMMANDS_ACK, &body, Logging::Normal)
            .await
            .ok
    }

    /// `POST /api/server/bans/report`.
    pub async fn report_ban(&self, report: &BanReportRequest) -> bool {
        self.post_json("banReport", paths::BAN_REPORT, report, Logging::Normal)
            .await
            .ok
    }

    // ------------------------------------------------------------------
    // Request layer
    // ------------------------------------------------------------------

    /// Builds the absolute URL for `path` with URL-encoded query pairs.
    pub fn url(&self, path: &str, query: &[(&str, &str)]) -> BridgeResult<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Builds a request carrying the bearer credential and JSON accept header.
    pub fn request(&self, method: Method, url: Url, body: Option<Vec<u8>>) -> HttpRequest {
        let mut headers = vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.server_token),
            ),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        if body.is_some() {
            headers.push((
                "Content-Type".to_string(),
                "application/json; charset=utf-8".to_string(),
            ));
        }
        HttpRequest {
            method,
            url,
            headers,
            body,
        }
    }

    /// Executes a read and decodes its 2xx body.
    ///
    /// Non-2xx responses and undecodable bodies are errors; nothing is
    /// partially decoded.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        op: &str,
        request: &HttpRequest,
    ) -> BridgeResult<T> {
        let response = self.send_with_retry(op, request, Logging::Normal).await?;
        if is_auth_status(response.status) {
            return Err(BridgeError::Authentication {
                status: response.status,
            });
        }
        if !response.is_success() {
            return Err(BridgeError::status(response.status, &response.body));
        }
        serde_json::from_str(&response.body)
            .map_err(|e| BridgeError::decode(e.to_string(), &response.body))
    }

    /// Executes a write. Returns the final response whatever its status.
    pub async fn submit(&self, op: &str, request: &HttpRequest) -> BridgeResult<HttpResponse> {
        self.send_with_retry(op, request, Logging::Normal).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        op: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Option<T> {
        let url = match self.url(path, query) {
            Ok(url) => url,
            Err(e) => {
                log_failure(op, path, &e);
                return None;
            }
        };
        let request = self.request(Method::Get, url, None);

        match self.execute(op, &request).await {
            Ok(value) => Some(value),
            Err(BridgeError::Authentication { .. }) => None,
            Err(e) => {
                log_failure(op, request.url.as_str(), &e);
                None
            }
        }
    }

    async fn post_json<B: Serialize>(
        &self,
        op: &str,
        path: &str,
        body: &B,
        logging: Logging,
    ) -> PostOutcome {
        let prepared = self.url(path, &[]).and_then(|url| {
            let bytes = serde_json::to_vec(body).map_err(|e| BridgeError::Encode(e.to_string()))?;
            Ok(self.request(Method::Post, url, Some(bytes)))
        });
        let request = match prepared {
            Ok(request) => request,
            Err(e) => {
                if logging == Logging::Normal {
                    log_failure(op, path, &e);
                }
                return PostOutcome::failed();
            }
        };

        match self.send_with_retry(op, &request, logging).await {
            Ok(response) => PostOutcome {
                ok: response.is_success(),
                status: Some(response.status),
            },
            Err(e) => {
                if logging == Logging::Normal {
                    log_failure(op, request.url.as_str(), &e);
                }
                PostOutcome::failed()
            }
        }
    }

    /// Sends `request`, retrying per the policy. Returns the first terminal
    /// response, or the last transport error once attempts are exhausted.
    async fn send_with_retry(
        &self,
        op: &str,
        request: &HttpRequest,
        logging: Logging,
    ) -> BridgeResult<HttpResponse> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            let (rate_limited, reason) = match self.http.send(request).await {
                Ok(response) => {
                    let status = response.status;
                    if is_auth_status(status) {
                        if logging == Logging::Normal {
                            error!(op, status, url = %request.url, "backend rejected credentials (auth failed?)");
                        }
                        return Ok(response);
                    }
                    if !is_retryable_status(status) || attempt >= max_attempts {
                        return Ok(response);
                    }
                    (status == 429, format!("HTTP {status}"))
                }
                Err(e) => {
                    if !e.is_retryable() || attempt >= max_attempts {
                        return Err(e);
                    }
                    (false, e.to_string())
                }
            };

            let delay = self.retry.delay_for_attempt(attempt, rate_limited);
            debug!(
                op,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "retrying backend request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn log_failure(op: &str, url: &str, err: &BridgeError) {
    warn!(op, url, kind = err.kind(), error = %err, "backend request failed");
}
