//! Orchestrator error types.

use std::time::Duration;

use issuecache_core::{ErrorKind, RepoId};
use issuecache_github::FetchError;
use issuecache_store::StoreError;
use thiserror::Error;

use crate::state::SyncPhase;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("A sync for {0} is already running")]
    AlreadyRunning(RepoId),

    #[error("Invalid sync phase transition: {from} -> {to}")]
    InvalidTransition { from: SyncPhase, to: SyncPhase },

    #[error("Sync task for {0} ended abnormally")]
    TaskFailed(RepoId),
}

impl From<FetchError> for SyncError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => SyncError::Cancelled,
            other => SyncError::Fetch(other),
        }
    }
}

impl SyncError {
    /// Classification carried up unchanged from the layer that failed.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Fetch(e) => e.kind(),
            SyncError::Store(e) => e.kind(),
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::AlreadyRunning(_) => ErrorKind::Busy,
            SyncError::InvalidTransition { .. } | SyncError::TaskFailed(_) => {
                ErrorKind::Transient
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// Server-requested delay, if the failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::Fetch(e) => e.retry_after(),
            _ => None,
        }
    }

    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Fetch(e) => e.user_message(),
            SyncError::Store(e) => e.user_message().to_string(),
            other => other.kind().user_message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_kind_is_preserved() {
        let auth: SyncError = FetchError::Authentication {
            status: 401,
            message: "Bad credentials".into(),
        }
        .into();
        assert_eq!(auth.kind(), ErrorKind::Authentication);

        let missing: SyncError = FetchError::NotFound("acme/widgets".into()).into();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let storage: SyncError = StoreError::Storage("locked".into()).into();
        assert_eq!(storage.kind(), ErrorKind::Transient);

        let corrupt: SyncError = StoreError::Corrupted("bad page".into()).into();
        assert_eq!(corrupt.kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn test_fetch_cancellation_becomes_cancelled() {
        let err: SyncError = FetchError::Cancelled.into();
        assert!(err.is_cancelled());
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_busy_and_retry_after() {
        let busy = SyncError::AlreadyRunning(RepoId::new("acme", "widgets"));
        assert_eq!(busy.kind(), ErrorKind::Busy);
        assert!(busy.to_string().contains("acme/widgets"));

        let limited: SyncError = FetchError::Transient {
            status: Some(429),
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(2)),
        }
        .into();
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));
        assert!(!limited.user_message().is_empty());
    }
}
