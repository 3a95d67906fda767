//! Local store for mirrored issues and comments.
//!
//! The orchestrator talks to the store only through [`LocalStore`]; the
//! production implementation is [`SqliteStore`]. Every write is atomic per
//! record, so a reader never sees a half-written issue, but a sync pass as a
//! whole is not transactional: partial progress survives a cancelled pass.

pub mod error;
pub mod sqlite;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use issuecache_core::{Comment, Issue, RepoId};

pub use error::StoreError;
pub use sqlite::SqliteStore;

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Snapshot of a repository's sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryStatus {
    pub repo: RepoId,
    pub watermark: Option<DateTime<Utc>>,
    pub last_full_sync: Option<DateTime<Utc>>,
    pub issue_count: u64,
    pub comment_count: u64,
}

/// Write-side operations the sync orchestrator needs.
///
/// Implementations must be safe to share across tasks; each call is expected
/// to be fast relative to network latency and is invoked from async code
/// without `spawn_blocking`.
pub trait LocalStore: Send + Sync {
    /// Create the repository row on first configured use. No-op if present.
    fn ensure_repository(&self, repo: &RepoId) -> Result<(), StoreError>;

    /// Insert or replace every mutable field of an issue. Idempotent.
    fn upsert_issue(&self, repo: &RepoId, issue: &Issue) -> Result<UpsertOutcome, StoreError>;

    /// Insert or replace a comment keyed by its id. The owning issue must
    /// already be stored.
    fn upsert_comment(
        &self,
        repo: &RepoId,
        issue_number: u64,
        comment: &Comment,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Delete one issue and its comments. Returns whether a row was removed.
    fn remove_issue(&self, repo: &RepoId, number: u64) -> Result<bool, StoreError>;

    /// Delete every stored issue (and its comments) whose number is absent from
    /// `complete`. Only valid with the complete remote set from a full pass.
    /// Returns the number of issues removed.
    fn replace_issue_set(&self, repo: &RepoId, complete: &BTreeSet<u64>)
        -> Result<usize, StoreError>;

    /// Delete stored comments of one issue whose id is absent from
    /// `complete`, the full remote thread just fetched. Returns the number
    /// removed.
    fn replace_comment_set(
        &self,
        repo: &RepoId,
        issue_number: u64,
        complete: &BTreeSet<u64>,
    ) -> Result<usize, StoreError>;

    fn get_watermark(&self, repo: &RepoId) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Advance the watermark. Never moves it backwards; returns the value now
    /// stored.
    fn set_watermark(
        &self,
        repo: &RepoId,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError>;

    /// Record completion time of a full pass.
    fn record_full_sync(&self, repo: &RepoId, at: DateTime<Utc>) -> Result<(), StoreError>;

    fn issue_count(&self, repo: &RepoId) -> Result<u64, StoreError>;

    /// Number of comments stored locally for one issue.
    fn comment_count(&self, repo: &RepoId, issue_number: u64) -> Result<u32, StoreError>;
}
