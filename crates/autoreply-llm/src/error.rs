//! Text-generation error types.

use autoreply_models::{Classified, ErrorClass};
use thiserror::Error;

/// Result type for backend calls.
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors from a text-generation backend.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Server error {0}: {1}")]
    Server(u16, String),

    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Request rejected with status {0}: {1}")]
    Request(u16, String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 => Self::RateLimited(body),
            503 => Self::Unavailable(body),
            500 | 502 | 504 => Self::Server(status, body),
            404 => Self::NotFound(body),
            409 => Self::Conflict(body),
            _ => Self::Request(status, body),
        }
    }

    /// Map a transport failure (no HTTP status available).
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_http_status(status.as_u16(), err.to_string());
        }
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }

    /// HTTP status this error was built from, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::RateLimited(_) => Some(429),
            Self::Unavailable(_) => Some(503),
            Self::Server(status, _) | Self::Request(status, _) => Some(*status),
            Self::NotFound(_) => Some(404),
            Self::Conflict(_) => Some(409),
            _ => None,
        }
    }

    /// Overload or rate limiting; the fallback model is worth trying.
    pub fn is_overloaded(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Unavailable(_))
    }
}

impl Classified for LlmError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited(_)
            | Self::Unavailable(_)
            | Self::Server(..)
            | Self::Timeout(_)
            | Self::Transport(_) => ErrorClass::Transient,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Conflict(_) => ErrorClass::Conflict,
            Self::Config(_) | Self::Request(..) | Self::InvalidResponse(_) => ErrorClass::Terminal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_http_status_429() {
        let err = LlmError::from_http_status(429, "slow down");
        assert!(matches!(err, LlmError::RateLimited(_)));
        assert!(err.class().is_transient());
        assert!(err.is_overloaded());
    }

    #[test]
    fn test_error_from_http_status_503() {
        let err = LlmError::from_http_status(503, "overloaded");
        assert!(matches!(err, LlmError::Unavailable(_)));
        assert!(err.is_overloaded());
    }

    #[test]
    fn test_server_errors_retry_without_fallback() {
        for status in [500, 502, 504] {
            let err = LlmError::from_http_status(status, "oops");
            assert!(matches!(err, LlmError::Server(s, _) if s == status));
            assert!(err.class().is_transient());
            assert!(!err.is_overloaded());
        }
    }

    #[test]
    fn test_client_errors_are_not_retried() {
        assert_eq!(
            LlmError::from_http_status(400, "bad request").class(),
            ErrorClass::Terminal
        );
        assert_eq!(
            LlmError::from_http_status(401, "bad key").class(),
            ErrorClass::Terminal
        );
        assert_eq!(
            LlmError::from_http_status(404, "no such model").class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            LlmError::from_http_status(409, "conflict").class(),
            ErrorClass::Conflict
        );
    }

    #[test]
    fn test_http_status_getter() {
        assert_eq!(LlmError::RateLimited("x".into()).http_status(), Some(429));
        assert_eq!(LlmError::Server(502, "x".into()).http_status(), Some(502));
        assert_eq!(LlmError::Timeout("x".into()).http_status(), None);
    }
}
