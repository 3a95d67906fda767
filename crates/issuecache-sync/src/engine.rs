//! The synchronization orchestrator.
//!
//! One pass per repository: decide full vs incremental from the watermark,
//! stream issue pages into the store, prune on full passes, refresh comment
//! threads whose counts drifted, then advance the watermark to the pass's
//! start time. Every store write happens as soon as its record arrives, so a
//! failed or cancelled pass keeps what it already wrote and leaves the
//! watermark where it was.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use issuecache_core::RepoId;
use issuecache_github::{Cursor, GitHubClient};
use issuecache_store::{LocalStore, StoreError, UpsertOutcome};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::progress::{ProgressPhase, ProgressSender, SyncEvent, SyncProgress};
use crate::retry::RetryPolicy;
use crate::state::SyncPhase;

/// Source of the pass start time, which becomes the next watermark.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Every issue, no time filter; prunes issues gone from the remote.
    Full,
    /// Only issues updated at or after `since`; never prunes.
    Incremental { since: DateTime<Utc> },
}

impl SyncMode {
    pub fn since(self) -> Option<DateTime<Utc>> {
        match self {
            SyncMode::Full => None,
            SyncMode::Incremental { since } => Some(since),
        }
    }

    pub fn is_full(self) -> bool {
        matches!(self, SyncMode::Full)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Incremental { since } => write!(f, "incremental since {}", since),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub repo: RepoId,
    /// Ignore the watermark and run a full pass.
    pub force_full: bool,
}

impl SyncRequest {
    pub fn new(repo: RepoId) -> Self {
        Self {
            repo,
            force_full: false,
        }
    }

    pub fn full(repo: RepoId) -> Self {
        Self {
            repo,
            force_full: true,
        }
    }
}

/// Outcome of a completed pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub repo: RepoId,
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    /// Watermark stored at the end of the pass.
    pub watermark: DateTime<Utc>,
    pub issues_fetched: u64,
    pub issues_inserted: u64,
    pub issues_updated: u64,
    pub issues_pruned: u64,
    /// Issues an incremental window showed leaving the configured state
    /// filter, removed locally.
    pub issues_removed: u64,
    pub comment_threads_refreshed: u64,
    pub comments_fetched: u64,
    pub comments_pruned: u64,
    pub pages_requested: u32,
    pub retries: u32,
}

impl SyncReport {
    fn new(repo: RepoId, mode: SyncMode, started_at: DateTime<Utc>) -> Self {
        Self {
            repo,
            mode,
            started_at,
            watermark: started_at,
            issues_fetched: 0,
            issues_inserted: 0,
            issues_updated: 0,
            issues_pruned: 0,
            issues_removed: 0,
            comment_threads_refreshed: 0,
            comments_fetched: 0,
            comments_pruned: 0,
            pages_requested: 0,
            retries: 0,
        }
    }
}

/// Drives sync passes against one GitHub client and one store.
pub struct SyncEngine<S: LocalStore> {
    client: GitHubClient,
    store: Arc<S>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    running: Mutex<HashSet<RepoId>>,
}

impl<S: LocalStore> SyncEngine<S> {
    pub fn new(client: GitHubClient, store: Arc<S>) -> Self {
        Self {
            client,
            store,
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Whether a pass for `repo` is in flight.
    pub fn is_running(&self, repo: &RepoId) -> bool {
        self.running.lock().contains(repo)
    }

    /// Run one pass for `request.repo`.
    ///
    /// Fails fast with [`SyncError::AlreadyRunning`] if a pass for the same
    /// repository is in flight on this engine.
    #[tracing::instrument(skip(self, cancel, progress), fields(repo = %request.repo))]
    pub async fn sync(
        &self,
        request: SyncRequest,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> Result<SyncReport, SyncError> {
        let _guard = self.claim(&request.repo)?;
        let repo = request.repo;
        let started_at = self.clock.now();
        let mut phases = PhaseTracker::new(&repo, progress);

        match self
            .run(&repo, request.force_full, started_at, cancel, progress, &mut phases)
            .await
        {
            Ok(report) => {
                phases.advance(SyncPhase::Completed)?;
                tracing::info!(
                    mode = %report.mode,
                    fetched = report.issues_fetched,
                    inserted = report.issues_inserted,
                    updated = report.issues_updated,
                    pruned = report.issues_pruned,
                    removed = report.issues_removed,
                    threads = report.comment_threads_refreshed,
                    comments = report.comments_fetched,
                    pages = report.pages_requested,
                    retries = report.retries,
                    "Sync completed"
                );
                Ok(report)
            }
            Err(err) => {
                if err.is_cancelled() {
                    phases.finish(SyncPhase::Cancelled);
                    tracing::info!("Sync cancelled; partial progress kept");
                } else {
                    phases.finish(SyncPhase::Failed);
                    if err.kind().is_fatal() {
                        tracing::error!(kind = %err.kind(), "Sync failed: {}", err);
                    } else {
                        tracing::warn!(kind = %err.kind(), "Sync failed: {}", err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Sync several repositories concurrently, one task each.
    ///
    /// Results come back in request order.
    pub async fn sync_all(
        self: &Arc<Self>,
        requests: Vec<SyncRequest>,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> Vec<(RepoId, Result<SyncReport, SyncError>)>
    where
        S: 'static,
    {
        let repos: Vec<RepoId> = requests.iter().map(|r| r.repo.clone()).collect();
        let mut tasks = JoinSet::new();

        for (index, request) in requests.into_iter().enumerate() {
            let engine = Arc::clone(self);
            let cancel = cancel.clone();
            let progress = progress.clone();
            tasks.spawn(async move { (index, engine.sync(request, &cancel, &progress).await) });
        }

        let mut slots: Vec<Option<Result<SyncReport, SyncError>>> =
            repos.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(result);
                    }
                }
                Err(err) => tracing::error!("Sync task failed: {}", err),
            }
        }

        repos
            .into_iter()
            .zip(slots)
            .map(|(repo, slot)| {
                let result = slot.unwrap_or_else(|| Err(SyncError::TaskFailed(repo.clone())));
                (repo, result)
            })
            .collect()
    }

    fn claim(&self, repo: &RepoId) -> Result<RunningGuard<'_>, SyncError> {
        let mut running = self.running.lock();
        if !running.insert(repo.clone()) {
            tracing::warn!(repo = %repo, "Rejecting sync: already running");
            return Err(SyncError::AlreadyRunning(repo.clone()));
        }
        Ok(RunningGuard {
            running: &self.running,
            repo: repo.clone(),
        })
    }

    async fn run(
        &self,
        repo: &RepoId,
        force_full: bool,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
        progress: &ProgressSender,
        phases: &mut PhaseTracker<'_>,
    ) -> Result<SyncReport, SyncError> {
        check_cancelled(cancel)?;

        let mut retries = 0;
        self.store_op(cancel, &mut retries, |s| s.ensure_repository(repo))
            .await?;
        let watermark = self
            .store_op(cancel, &mut retries, |s| s.get_watermark(repo))
            .await?;

        let mode = match watermark {
            Some(since) if !force_full => SyncMode::Incremental { since },
            _ => SyncMode::Full,
        };
        tracing::info!(mode = %mode, transport = ?self.client.transport(), "Starting sync");

        let mut report = SyncReport::new(repo.clone(), mode, started_at);
        report.retries = retries;

        phases.advance(SyncPhase::FetchingIssues)?;
        let seen = self
            .sync_issues(repo, mode, cancel, progress, &mut report)
            .await?;

        phases.advance(SyncPhase::ReconcilingIssues)?;
        if mode.is_full() {
            let numbers: BTreeSet<u64> = seen.keys().copied().collect();
            let pruned = self
                .store_op(cancel, &mut report.retries, |s| {
                    s.replace_issue_set(repo, &numbers)
                })
                .await?;
            report.issues_pruned = pruned as u64;
        }

        phases.advance(SyncPhase::FetchingComments)?;
        let mut stale = Vec::new();
        for (&number, &remote) in &seen {
            let local = self
                .store_op(cancel, &mut report.retries, |s| s.comment_count(repo, number))
                .await?;
            if local != remote {
                stale.push(number);
            }
        }
        self.sync_comments(repo, &stale, cancel, progress, &mut report)
            .await?;

        phases.advance(SyncPhase::Committing)?;
        check_cancelled(cancel)?;
        report.watermark = self
            .store_op(cancel, &mut report.retries, |s| s.set_watermark(repo, started_at))
            .await?;
        if mode.is_full() {
            self.store_op(cancel, &mut report.retries, |s| {
                s.record_full_sync(repo, started_at)
            })
            .await?;
        }

        Ok(report)
    }

    /// Stream issue pages into the store. Returns the remote comment count of
    /// every issue kept, keyed by number.
    ///
    /// Incremental windows arrive unfiltered by state; an issue that no
    /// longer matches the configured filter is removed instead of stored.
    async fn sync_issues(
        &self,
        repo: &RepoId,
        mode: SyncMode,
        cancel: &CancellationToken,
        progress: &ProgressSender,
        report: &mut SyncReport,
    ) -> Result<BTreeMap<u64, u32>, SyncError> {
        let mut pager = self.client.issues(repo, mode.since());
        let wanted = self.client.issue_state();
        let mut seen = BTreeMap::new();

        loop {
            check_cancelled(cancel)?;

            let mut attempt = 0;
            let page = loop {
                match pager.next_page(cancel).await {
                    Ok(page) => break page,
                    Err(err) => self.retry.backoff(err.into(), &mut attempt, cancel).await?,
                }
            };
            report.retries += attempt;

            let Some(page) = page else { break };

            for issue in &page.items {
                report.issues_fetched += 1;
                if !wanted.matches(issue.state) {
                    let removed = self
                        .store_op(cancel, &mut report.retries, |s| {
                            s.remove_issue(repo, issue.number)
                        })
                        .await?;
                    if removed {
                        tracing::debug!(
                            issue = issue.number,
                            state = issue.state.as_str(),
                            "Issue left the mirror"
                        );
                        report.issues_removed += 1;
                    }
                    continue;
                }

                let outcome = self
                    .store_op(cancel, &mut report.retries, |s| s.upsert_issue(repo, issue))
                    .await?;
                match outcome {
                    UpsertOutcome::Inserted => report.issues_inserted += 1,
                    UpsertOutcome::Updated => report.issues_updated += 1,
                }
                seen.insert(issue.number, issue.comment_count);
            }

            tracing::debug!(
                page = pager.pages_fetched(),
                items = page.items.len(),
                total = ?page.total,
                "Reconciled issue page"
            );
            progress.send(SyncEvent::Progress(SyncProgress {
                repo: repo.clone(),
                phase: ProgressPhase::Issues,
                fetched: report.issues_fetched,
                total: page.total,
                page: pager.pages_fetched(),
                cursor: pager.cursor().map(Cursor::describe),
            }));
        }

        report.pages_requested += pager.requests_issued();
        Ok(seen)
    }

    /// Refresh the complete comment thread of each listed issue.
    async fn sync_comments(
        &self,
        repo: &RepoId,
        issues: &[u64],
        cancel: &CancellationToken,
        progress: &ProgressSender,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let scheduled = issues.len() as u64;
        if scheduled > 0 {
            tracing::info!(threads = scheduled, "Refreshing comment threads");
        }

        for &number in issues {
            check_cancelled(cancel)?;

            let mut pager = self.client.comments(repo, number);
            let mut ids = BTreeSet::new();
            let result = async {
                loop {
                    let mut attempt = 0;
                    let page = loop {
                        match pager.next_page(cancel).await {
                            Ok(page) => break page,
                            Err(err) => {
                                self.retry.backoff(err.into(), &mut attempt, cancel).await?
                            }
                        }
                    };
                    report.retries += attempt;

                    let Some(page) = page else { break };
                    for comment in &page.items {
                        self.store_op(cancel, &mut report.retries, |s| {
                            s.upsert_comment(repo, number, comment)
                        })
                        .await?;
                        ids.insert(comment.id);
                        report.comments_fetched += 1;
                    }
                }
                Ok::<_, SyncError>(())
            }
            .await;
            report.pages_requested += pager.requests_issued();
            result?;

            let pruned = self
                .store_op(cancel, &mut report.retries, |s| {
                    s.replace_comment_set(repo, number, &ids)
                })
                .await?;
            report.comments_pruned += pruned as u64;
            report.comment_threads_refreshed += 1;

            tracing::debug!(
                issue = pager.issue_number(),
                comments = ids.len(),
                "Refreshed comment thread"
            );
            progress.send(SyncEvent::Progress(SyncProgress {
                repo: repo.clone(),
                phase: ProgressPhase::Comments,
                fetched: report.comment_threads_refreshed,
                total: Some(scheduled),
                page: pager.pages_fetched(),
                cursor: None,
            }));
        }
        Ok(())
    }

    /// Run a store operation, retrying transient storage failures under the
    /// same policy as page fetches.
    async fn store_op<T>(
        &self,
        cancel: &CancellationToken,
        retries: &mut u32,
        mut op: impl FnMut(&S) -> Result<T, StoreError>,
    ) -> Result<T, SyncError> {
        let mut attempt = 0;
        loop {
            match op(self.store.as_ref()) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    self.retry.backoff(err.into(), &mut attempt, cancel).await?;
                    *retries += 1;
                }
            }
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

/// Releases a repository's in-flight claim on every exit path, including the
/// sync future being dropped.
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<RepoId>>,
    repo: RepoId,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.lock().remove(&self.repo);
    }
}

/// Validates and publishes phase transitions for one pass.
struct PhaseTracker<'a> {
    repo: &'a RepoId,
    phase: SyncPhase,
    progress: &'a ProgressSender,
}

impl<'a> PhaseTracker<'a> {
    fn new(repo: &'a RepoId, progress: &'a ProgressSender) -> Self {
        Self {
            repo,
            phase: SyncPhase::Idle,
            progress,
        }
    }

    fn advance(&mut self, next: SyncPhase) -> Result<(), SyncError> {
        if !self.phase.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::info!(from = %self.phase, to = %next, "Sync phase");
        self.phase = next;
        self.progress.send(SyncEvent::Phase {
            repo: self.repo.clone(),
            phase: next,
        });
        Ok(())
    }

    /// Move to a terminal phase unless already in one.
    fn finish(&mut self, terminal: SyncPhase) {
        if self.phase.can_transition_to(terminal) {
            self.phase = terminal;
            self.progress.send(SyncEvent::Phase {
                repo: self.repo.clone(),
                phase: terminal,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use chrono::TimeZone;
    use issuecache_store::SqliteStore;

    use crate::progress::progress_channel;

    fn engine() -> SyncEngine<SqliteStore> {
        let client = GitHubClient::builder("token")
            .api_url("http://127.0.0.1:9")
            .build()
            .unwrap();
        SyncEngine::new(client, Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    #[test]
    fn test_mode_helpers() {
        let since = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let incremental = SyncMode::Incremental { since };

        assert_eq!(SyncMode::Full.since(), None);
        assert!(SyncMode::Full.is_full());
        assert_eq!(incremental.since(), Some(since));
        assert!(!incremental.is_full());
        assert!(incremental.to_string().starts_with("incremental since"));
    }

    #[test]
    fn test_claim_is_exclusive_and_released_on_drop() {
        let engine = engine();
        let repo = RepoId::new("acme", "widgets");

        let guard = engine.claim(&repo).unwrap();
        assert!(engine.is_running(&repo));
        assert!(matches!(engine.claim(&repo), Err(SyncError::AlreadyRunning(_))));

        // other repositories are unaffected
        let other = engine.claim(&RepoId::new("acme", "gadgets")).unwrap();

        drop(guard);
        assert!(!engine.is_running(&repo));
        assert!(engine.claim(&repo).is_ok());
        drop(other);
    }

    #[test]
    fn test_phase_tracker_rejects_skips() {
        let repo = RepoId::new("acme", "widgets");
        let (tx, mut rx) = progress_channel();
        let mut phases = PhaseTracker::new(&repo, &tx);

        phases.advance(SyncPhase::FetchingIssues).unwrap();
        assert!(matches!(
            phases.advance(SyncPhase::Committing),
            Err(SyncError::InvalidTransition { .. })
        ));

        phases.finish(SyncPhase::Cancelled);
        phases.finish(SyncPhase::Failed);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SyncEvent::Phase { phase, .. } = event {
                seen.push(phase);
            }
        }
        assert_eq!(seen, vec![SyncPhase::FetchingIssues, SyncPhase::Cancelled]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_touches_nothing() {
        let engine = engine();
        let repo = RepoId::new("acme", "widgets");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .sync(SyncRequest::new(repo.clone()), &cancel, &ProgressSender::disabled())
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!engine.is_running(&repo));
        assert!(engine.store().repository_status(&repo).unwrap().is_none());
    }
}
