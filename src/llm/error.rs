//! LLM provider errors and retry policy.

use std::time::Duration;

/// Coarse classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    RateLimited,
    ServerError,
    ClientError,
    NetworkError,
    ParseError,
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate_limited"),
            Self::ServerError => write!(f, "server_error"),
            Self::ClientError => write!(f, "client_error"),
            Self::NetworkError => write!(f, "network_error"),
            Self::ParseError => write!(f, "parse_error"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub status: Option<u16>,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.kind, status, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    fn new(kind: LlmErrorKind, status: Option<u16>, message: String) -> Self {
        Self {
            kind,
            status,
            message,
            retry_after: None,
        }
    }

    pub fn rate_limited(message: String, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(LlmErrorKind::RateLimited, Some(429), message)
        }
    }

    pub fn server_error(status: u16, message: String) -> Self {
        Self::new(LlmErrorKind::ServerError, Some(status), message)
    }

    pub fn client_error(status: u16, message: String) -> Self {
        Self::new(LlmErrorKind::ClientError, Some(status), message)
    }

    pub fn network_error(message: String) -> Self {
        Self::new(LlmErrorKind::NetworkError, None, message)
    }

    pub fn parse_error(message: String) -> Self {
        Self::new(LlmErrorKind::ParseError, None, message)
    }

    /// Transient failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }

    /// Delay before retry `attempt` (0-based): the provider's Retry-After when
    /// given, otherwise exponential backoff from one second capped at 30s.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after;
        }
        let secs = 1u64 << attempt.min(5);
        Duration::from_secs(secs.min(30))
    }
}

/// Map an HTTP status code to an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        500..=599 => LlmErrorKind::ServerError,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}

/// Retry policy for provider requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn should_retry(&self, error: &LlmError) -> bool {
        self.max_retries > 0 && error.is_transient()
    }
}
