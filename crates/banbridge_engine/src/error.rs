//! Error types for the bridge engine.

use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Maximum number of response body characters carried in an error.
pub const BODY_CLIP_CHARS: usize = 240;

/// Errors that can occur while talking to the backend or persisting state.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Network or transport error (connect, timeout, I/O).
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The backend rejected our credentials (401/403).
    #[error("authentication failed: HTTP {status}")]
    Authentication {
        /// HTTP status code.
        status: u16,
    },

    /// The backend answered with a status we do not treat as success.
    #[error("HTTP {status} body={body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Clipped response body.
        body: String,
    },

    /// A 2xx response whose body could not be decoded.
    #[error("JSON parse failed: {message} body={body}")]
    Decode {
        /// Decoder message.
        message: String,
        /// Clipped response body.
        body: String,
    },

    /// A request body could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Invalid request target.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Local persistence error.
    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// A persisted document could not be decoded.
    #[error("corrupt cache file: {0}")]
    CorruptCache(String),

    /// A remote command could not be executed.
    #[error("command execution failed: {0}")]
    Command(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a decode error carrying a clipped copy of the body.
    pub fn decode(message: impl Into<String>, body: &str) -> Self {
        Self::Decode {
            message: message.into(),
            body: clip(body, BODY_CLIP_CHARS),
        }
    }

    /// Creates a status error carrying a clipped copy of the body.
    pub fn status(status: u16, body: &str) -> Self {
        Self::Status {
            status,
            body: clip(body, BODY_CLIP_CHARS),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Transport { retryable, .. } => *retryable,
            BridgeError::Status { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Short name of the failure kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Transport { .. } => "transport",
            BridgeError::Authentication { .. } => "auth",
            BridgeError::Status { .. } => "status",
            BridgeError::Decode { .. } => "decode",
            BridgeError::Encode(_) => "encode",
            BridgeError::InvalidUrl(_) => "url",
            BridgeError::Persistence(_) => "io",
            BridgeError::CorruptCache(_) => "corrupt",
            BridgeError::Command(_) => "command",
            BridgeError::Config(_) => "config",
        }
    }
}

/// Returns true for statuses worth retrying: 429 and 5xx.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Returns true for credential failures: 401 and 403.
pub fn is_auth_status(status: u16) -> bool {
    status == 401 || status == 403
}

/// Clips `s` to at most `max` characters, appending `...` when cut.
pub fn clip(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(BridgeError::transport_retryable("connection refused").is_retryable());
        assert!(!BridgeError::transport_fatal("invalid certificate").is_retryable());
        assert!(BridgeError::status(503, "").is_retryable());
        assert!(BridgeError::status(429, "").is_retryable());
        assert!(!BridgeError::status(404, "").is_retryable());
        assert!(!BridgeError::Authentication { status: 401 }.is_retryable());
        assert!(!BridgeError::decode("eof", "{").is_retryable());
    }

    #[test]
    fn status_classes() {
        assert!(is_auth_status(401));
        assert!(is_auth_status(403));
        assert!(!is_auth_status(404));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(599));
        assert!(!is_retryable_status(600));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn clip_long_bodies() {
        assert_eq!(clip("short", 10), "short");
        assert_eq!(clip("abcdef", 3), "abc...");

        let body = "x".repeat(1000);
        let err = BridgeError::decode("expected value", &body);
        match err {
            BridgeError::Decode { body, .. } => assert_eq!(body.len(), BODY_CLIP_CHARS + 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("äöü", 2), "äö...");
    }

    #[test]
    fn error_display() {
        let err = BridgeError::Authentication { status: 403 };
        assert_eq!(err.to_string(), "authentication failed: HTTP 403");

        let err = BridgeError::status(500, "boom");
        assert_eq!(err.to_string(), "HTTP 500 body=boom");
        assert_eq!(err.kind(), "status");
    }
}
