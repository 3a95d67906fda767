//! Shared fixtures: an instrumented store, a pinned clock and GitHub mocks.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use issuecache_core::{Comment, Issue, IssueState, IssueStateFilter, RepoId};
use issuecache_github::GitHubClient;
use issuecache_store::{LocalStore, SqliteStore, StoreError, UpsertOutcome};
use issuecache_sync::{Clock, RetryPolicy, SyncEngine};
use parking_lot::Mutex;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn widgets() -> RepoId {
    RepoId::new("acme", "widgets")
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_767_225_600 + secs, 0).unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    UpsertIssue(u64),
    UpsertComment(u64),
    RemoveIssue(u64),
    ReplaceIssueSet(BTreeSet<u64>),
    ReplaceCommentSet(u64),
    SetWatermark(DateTime<Utc>),
    RecordFullSync(DateTime<Utc>),
}

/// Wraps a real store and records every mutation.
pub struct RecordingStore {
    inner: SqliteStore,
    calls: Mutex<Vec<Call>>,
    failing_upserts: AtomicU32,
}

impl RecordingStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            failing_upserts: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &SqliteStore {
        &self.inner
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn replace_issue_set_calls(&self) -> Vec<BTreeSet<u64>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ReplaceIssueSet(set) => Some(set),
                _ => None,
            })
            .collect()
    }

    /// Make the next `n` issue upserts fail with a transient storage error.
    pub fn fail_next_upserts(&self, n: u32) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl LocalStore for RecordingStore {
    fn ensure_repository(&self, repo: &RepoId) -> Result<(), StoreError> {
        self.inner.ensure_repository(repo)
    }

    fn upsert_issue(&self, repo: &RepoId, issue: &Issue) -> Result<UpsertOutcome, StoreError> {
        let pending = self.failing_upserts.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_upserts.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Storage("database is locked".into()));
        }
        self.record(Call::UpsertIssue(issue.number));
        self.inner.upsert_issue(repo, issue)
    }

    fn upsert_comment(
        &self,
        repo: &RepoId,
        issue_number: u64,
        comment: &Comment,
    ) -> Result<UpsertOutcome, StoreError> {
        self.record(Call::UpsertComment(comment.id));
        self.inner.upsert_comment(repo, issue_number, comment)
    }

    fn remove_issue(&self, repo: &RepoId, number: u64) -> Result<bool, StoreError> {
        self.record(Call::RemoveIssue(number));
        self.inner.remove_issue(repo, number)
    }

    fn replace_issue_set(
        &self,
        repo: &RepoId,
        complete: &BTreeSet<u64>,
    ) -> Result<usize, StoreError> {
        self.record(Call::ReplaceIssueSet(complete.clone()));
        self.inner.replace_issue_set(repo, complete)
    }

    fn replace_comment_set(
        &self,
        repo: &RepoId,
        issue_number: u64,
        complete: &BTreeSet<u64>,
    ) -> Result<usize, StoreError> {
        self.record(Call::ReplaceCommentSet(issue_number));
        self.inner.replace_comment_set(repo, issue_number, complete)
    }

    fn get_watermark(&self, repo: &RepoId) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.get_watermark(repo)
    }

    fn set_watermark(
        &self,
        repo: &RepoId,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        self.record(Call::SetWatermark(at));
        self.inner.set_watermark(repo, at)
    }

    fn record_full_sync(&self, repo: &RepoId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.record(Call::RecordFullSync(at));
        self.inner.record_full_sync(repo, at)
    }

    fn issue_count(&self, repo: &RepoId) -> Result<u64, StoreError> {
        self.inner.issue_count(repo)
    }

    fn comment_count(&self, repo: &RepoId, issue_number: u64) -> Result<u32, StoreError> {
        self.inner.comment_count(repo, issue_number)
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn engine(
    server: &MockServer,
    store: Arc<RecordingStore>,
    now: DateTime<Utc>,
) -> SyncEngine<RecordingStore> {
    engine_with_filter(server, store, now, IssueStateFilter::Open)
}

pub fn engine_with_filter(
    server: &MockServer,
    store: Arc<RecordingStore>,
    now: DateTime<Utc>,
    filter: IssueStateFilter,
) -> SyncEngine<RecordingStore> {
    let client = GitHubClient::builder("test-token")
        .api_url(server.uri())
        .per_page(50)
        .issue_state(filter)
        .build()
        .unwrap();
    SyncEngine::new(client, store)
        .with_clock(Arc::new(FixedClock(now)))
        .with_retry_policy(RetryPolicy::new(3, 1, 5))
}

pub fn issue(number: u64, comments: u32) -> Issue {
    Issue {
        number,
        title: format!("Issue {}", number),
        body: None,
        author: "alice".to_string(),
        state: IssueState::Open,
        created_at: ts(0),
        updated_at: ts(number as i64),
        comment_count: comments,
        labels: vec![],
        assignees: vec![],
    }
}

pub fn comment(id: u64, issue_number: u64) -> Comment {
    Comment {
        id,
        issue_number,
        body: format!("comment {}", id),
        author: "bob".to_string(),
        created_at: ts(0),
        updated_at: ts(0),
    }
}

pub fn issue_json(number: u64, comments: u32) -> Value {
    json!({
        "id": 10_000 + number,
        "number": number,
        "title": format!("Issue {}", number),
        "body": null,
        "user": {"login": "alice"},
        "state": "open",
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-02T00:00:00Z",
        "comments": comments,
        "labels": [{"name": "bug"}],
        "assignees": []
    })
}

pub fn comment_json(id: u64) -> Value {
    json!({
        "id": id,
        "body": format!("comment {}", id),
        "user": {"login": "bob"},
        "created_at": "2026-01-03T00:00:00Z",
        "updated_at": "2026-01-03T00:00:00Z"
    })
}

pub fn issues_path(repo: &RepoId) -> String {
    format!("/repos/{}/{}/issues", repo.owner, repo.name)
}

/// Serve `pages` of issues for `repo`, chained with `Link` headers. The
/// first page answers any request without a `page` parameter.
pub async fn mount_issue_pages(server: &MockServer, repo: &RepoId, pages: Vec<Vec<Value>>) {
    let count = pages.len();
    for (index, items) in pages.into_iter().enumerate() {
        let number = index + 1;
        let mut response = ResponseTemplate::new(200).set_body_json(Value::Array(items));
        if number < count {
            let link = format!(
                "<{}{}?per_page=50&page={}>; rel=\"next\"",
                server.uri(),
                issues_path(repo),
                number + 1
            );
            response = response.append_header("Link", link.as_str());
        }

        let mock = Mock::given(method("GET")).and(path(issues_path(repo)));
        let mock = if number == 1 {
            mock.respond_with(response).with_priority(5)
        } else {
            mock.and(query_param("page", number.to_string()))
                .respond_with(response)
                .with_priority(1)
        };
        mock.mount(server).await;
    }
}

/// Serve a single page of comments for one issue, expecting `expected_calls`
/// requests.
pub async fn mount_comments(
    server: &MockServer,
    repo: &RepoId,
    issue_number: u64,
    ids: &[u64],
    expected_calls: u64,
) {
    let body: Vec<Value> = ids.iter().map(|&id| comment_json(id)).collect();
    Mock::given(method("GET"))
        .and(path(format!("{}/{}/comments", issues_path(repo), issue_number)))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(body)))
        .expect(expected_calls)
        .mount(server)
        .await;
}
