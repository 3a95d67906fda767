//! Fetch-client error types.

use std::time::Duration;

use issuecache_core::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request failed{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Transient {
        status: Option<u16>,
        message: String,
        /// Server-requested delay before the next attempt
        retry_after: Option<Duration>,
    },

    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// A response body that could not be decoded into the expected shape.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::transient(format!("Invalid response: {}", message.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transient {
                retry_after: Some(delay),
                ..
            } => format!("GitHub asked us to slow down. Retrying in {} seconds.", delay.as_secs()),
            other => other.kind().user_message().to_string(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            format!("Request timed out: {}", e)
        } else if e.is_connect() {
            format!("Connection failed: {}", e)
        } else if e.is_decode() {
            format!("Invalid response: {}", e)
        } else {
            e.to_string()
        };
        Self::Transient {
            status: e.status().map(|s| s.as_u16()),
            message,
            retry_after: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let auth = FetchError::Authentication {
            status: 401,
            message: "Bad credentials".into(),
        };
        assert_eq!(auth.kind(), ErrorKind::Authentication);
        assert_eq!(FetchError::NotFound("acme/widgets".into()).kind(), ErrorKind::NotFound);
        assert_eq!(FetchError::transient("boom").kind(), ErrorKind::Transient);
        assert_eq!(FetchError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_display_includes_status() {
        let err = FetchError::Transient {
            status: Some(502),
            message: "Bad Gateway".into(),
            retry_after: None,
        };
        assert_eq!(err.to_string(), "Request failed (502): Bad Gateway");
        assert_eq!(FetchError::transient("reset").to_string(), "Request failed: reset");
    }

    #[test]
    fn test_rate_limit_user_message() {
        let err = FetchError::Transient {
            status: Some(429),
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert!(err.user_message().contains("30"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }
}
