use std::fmt;

use crate::types::TargetName;

/// Errors returned when the routing configuration cannot be loaded.
///
/// Any of these halts startup; a partially valid configuration is never
/// returned.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("rule '{event}' references unknown target '{target}'")]
    UnknownTarget { event: String, target: TargetName },

    #[error("target '{0}' is declared more than once")]
    DuplicateTarget(TargetName),

    #[error("rule for event '{0}' is declared more than once")]
    DuplicateRule(String),

    #[error("invalid setting {field}: {reason}")]
    InvalidSetting {
        field: &'static str,
        reason: String,
    },
}

/// Errors raised by the upstream entity source.
///
/// These never reach the dispatch core; the gateway logs them and stops
/// reading.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream connection failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("upstream i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode upstream request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid entity id list: {0}")]
    InvalidEntityIds(String),
}

/// Reasons why an HTTP delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    Network(String),
    RemoteStatus(u16),
    UnsupportedMethod(String),
    InvalidRequest(String),
    Aborted,
}

impl FailureReason {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FailureReason::UnsupportedMethod(_)
                | FailureReason::InvalidRequest(_)
                | FailureReason::Aborted
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout =>
                write!(f, "request timed out"),
            FailureReason::Network(detail) =>
                write!(f, "network error: {}", detail),
            FailureReason::RemoteStatus(status) =>
                write!(f, "HTTP {}", status),
            FailureReason::UnsupportedMethod(method) =>
                write!(f, "Unsupported method {}", method),
            FailureReason::InvalidRequest(detail) =>
                write!(f, "invalid request: {}", detail),
            FailureReason::Aborted =>
                write!(f, "delivery aborted"),
        }
    }
}

impl From<reqwest::Error> for FailureReason {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FailureReason::Timeout
        } else {
            FailureReason::Network(err.to_string())
        }
    }
}
