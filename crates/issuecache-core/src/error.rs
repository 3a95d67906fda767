//! Error taxonomy shared by every issuecache crate.
//!
//! Each layer (fetch client, local store, orchestrator) defines its own
//! `thiserror` enum, but all of them classify into the closed [`ErrorKind`]
//! set below. The kind is decided once, at the layer that observed the
//! failure, and is never re-derived from message text further up.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Stable classification of a sync failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or expired credential. Fatal; the UI should prompt for re-auth.
    Authentication,
    /// Repository missing or renamed. Fatal.
    NotFound,
    /// Rate limiting, network blip, 5xx, timeout, or a storage hiccup.
    Transient,
    /// Caller stopped the pass. Not logged as an error.
    Cancelled,
    /// The local database is damaged. Fatal.
    Corrupted,
    /// A pass for the same repository is already in flight.
    Busy,
}

impl ErrorKind {
    /// Whether the orchestrator may retry an operation that failed with this kind.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Whether this kind ends the pass with no point in retrying later
    /// without user intervention.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::Authentication | ErrorKind::NotFound | ErrorKind::Corrupted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Corrupted => "corrupted",
            ErrorKind::Busy => "busy",
        }
    }

    /// Returns a user-friendly message suitable for display in the UI.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "GitHub authentication failed. Please sign in again.",
            ErrorKind::NotFound => "Repository not found. Check the name and try again.",
            ErrorKind::Transient => "Sync failed. Please try again later.",
            ErrorKind::Cancelled => "Sync was cancelled.",
            ErrorKind::Corrupted => "Local data may be corrupted. Consider resetting the cache.",
            ErrorKind::Busy => "A sync for this repository is already running.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),

    #[error("Missing required setting: {0}")]
    MissingSetting(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::NotFound(_) => "Configuration not found. Using defaults.",
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
            ConfigError::MissingSetting(_) => "A required setting is missing. Check your settings.",
        }
    }
}
