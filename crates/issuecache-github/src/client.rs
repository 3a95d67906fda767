//! GitHub API client: authenticated, cancellable page fetches.
//!
//! The client performs no retries. Every failure is classified into a
//! [`FetchError`] and handed back so the orchestrator owns retry policy.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use issuecache_core::{Comment, GitHubConfig, Issue, IssueStateFilter, RepoId, TransportKind};
use reqwest::header::{self, HeaderMap};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::FetchError;
use crate::types::{Cursor, Page};
use crate::{graphql, rest};

const GITHUB_API_URL: &str = "https://api.github.com";
const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "issuecache";

/// GitHub API client. One per orchestrator; holds no cross-repository state.
pub struct GitHubClient {
    http: reqwest::Client,
    token: String,
    api_url: Url,
    graphql_url: Url,
    transport: TransportKind,
    per_page: u32,
    issue_state: IssueStateFilter,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_url", &self.api_url.as_str())
            .field("graphql_url", &self.graphql_url.as_str())
            .field("transport", &self.transport)
            .field("per_page", &self.per_page)
            .field("issue_state", &self.issue_state)
            .finish_non_exhaustive()
    }
}

/// Builder for [`GitHubClient`].
#[derive(Debug, Clone)]
pub struct GitHubClientBuilder {
    token: String,
    api_url: String,
    graphql_url: String,
    transport: TransportKind,
    per_page: u32,
    issue_state: IssueStateFilter,
    timeout: Duration,
}

impl GitHubClientBuilder {
    /// Base URL for REST calls. Also used to derive the GraphQL endpoint
    /// (`{api_url}/graphql`) unless one is set explicitly.
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.graphql_url = format!("{}/graphql", url.trim_end_matches('/'));
        self.api_url = url;
        self
    }

    pub fn graphql_url(mut self, url: impl Into<String>) -> Self {
        self.graphql_url = url.into();
        self
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, 100);
        self
    }

    pub fn issue_state(mut self, state: IssueStateFilter) -> Self {
        self.issue_state = state;
        self
    }

    /// Deadline applied to every request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<GitHubClient> {
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        let api_url = Url::parse(&self.api_url)
            .with_context(|| format!("Invalid GitHub API URL: {}", self.api_url))?;
        if api_url.cannot_be_a_base() {
            anyhow::bail!("GitHub API URL cannot be used as a base: {}", api_url);
        }
        let graphql_url = Url::parse(&self.graphql_url)
            .with_context(|| format!("Invalid GitHub GraphQL URL: {}", self.graphql_url))?;

        Ok(GitHubClient {
            http,
            token: self.token,
            api_url,
            graphql_url,
            transport: self.transport,
            per_page: self.per_page,
            issue_state: self.issue_state,
        })
    }
}

impl GitHubClient {
    pub fn builder(token: impl Into<String>) -> GitHubClientBuilder {
        GitHubClientBuilder {
            token: token.into(),
            api_url: GITHUB_API_URL.to_string(),
            graphql_url: GITHUB_GRAPHQL_URL.to_string(),
            transport: TransportKind::Rest,
            per_page: 100,
            issue_state: IssueStateFilter::Open,
            timeout: Duration::from_secs(30),
        }
    }

    /// Create a client from configuration and a resolved token.
    pub fn from_config(config: &GitHubConfig, token: impl Into<String>) -> Result<Self> {
        Self::builder(token)
            .api_url(config.api_url.clone())
            .graphql_url(config.graphql_url.clone())
            .transport(config.transport)
            .per_page(config.per_page)
            .issue_state(config.issue_state)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Pager over the repository's issues. `since = None` walks the whole
    /// collection under the configured state filter. With `since` the server
    /// returns every issue updated at or after it, whatever its state, so
    /// issues that left the filter inside the window are seen too.
    pub fn issues(&self, repo: &RepoId, since: Option<DateTime<Utc>>) -> IssuePager<'_> {
        IssuePager {
            client: self,
            repo: repo.clone(),
            since,
            state: PageState::default(),
        }
    }

    /// Pager over the comments of one issue.
    pub fn comments(&self, repo: &RepoId, issue_number: u64) -> CommentPager<'_> {
        CommentPager {
            client: self,
            repo: repo.clone(),
            issue_number,
            state: PageState::default(),
        }
    }

    pub(crate) fn per_page(&self) -> u32 {
        self.per_page
    }

    /// Which issues the mirror holds.
    pub fn issue_state(&self) -> IssueStateFilter {
        self.issue_state
    }

    /// State filter sent to the server for a pass.
    pub(crate) fn fetch_state(&self, since: Option<DateTime<Utc>>) -> IssueStateFilter {
        match since {
            Some(_) => IssueStateFilter::All,
            None => self.issue_state,
        }
    }

    pub(crate) fn graphql_url(&self) -> &Url {
        &self.graphql_url
    }

    /// `{api_url}/{segments...}` with each segment percent-encoded.
    pub(crate) fn api_endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::transient(format!("Invalid API base URL: {}", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn get(&self, url: Url) -> RequestBuilder {
        self.authorized(self.http.get(url))
    }

    pub(crate) fn post(&self, url: Url) -> RequestBuilder {
        self.authorized(self.http.post(url))
    }

    /// Build request with auth headers
    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Send a request and decode a JSON body, racing the whole exchange
    /// (connect, headers, body) against `cancel`.
    pub(crate) async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<(HeaderMap, T), FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let headers = response.headers().clone();

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(classify_status(status, &headers, &text));
            }

            let body = response.json::<T>().await?;
            Ok::<_, FetchError>((headers, body))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = exchange => result,
        }
    }
}

/// Map a non-2xx response onto the error taxonomy.
pub(crate) fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> FetchError {
    let message = api_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string()
    });

    match status {
        StatusCode::UNAUTHORIZED => FetchError::Authentication {
            status: status.as_u16(),
            message,
        },
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => match rate_limit_delay(headers) {
            Some(delay) => FetchError::Transient {
                status: Some(status.as_u16()),
                message: format!("Rate limited: {}", message),
                retry_after: Some(delay),
            },
            None if status == StatusCode::TOO_MANY_REQUESTS => FetchError::Transient {
                status: Some(status.as_u16()),
                message: format!("Rate limited: {}", message),
                retry_after: None,
            },
            None => FetchError::Authentication {
                status: status.as_u16(),
                message,
            },
        },
        StatusCode::NOT_FOUND => FetchError::NotFound(message),
        _ => FetchError::Transient {
            status: Some(status.as_u16()),
            message,
            retry_after: None,
        },
    }
}

/// Delay requested by rate-limit headers, if the response carries any.
fn rate_limit_delay(headers: &HeaderMap) -> Option<Duration> {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(secs) = header_str("retry-after").and_then(|s| s.trim().parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }

    if header_str("x-ratelimit-remaining").map(str::trim) == Some("0") {
        let now = Utc::now().timestamp();
        let wait = header_str("x-ratelimit-reset")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(|reset| (reset - now).max(1) as u64)
            .unwrap_or(60);
        return Some(Duration::from_secs(wait));
    }

    None
}

/// GitHub error bodies look like `{"message": "Bad credentials", ...}`.
fn api_message(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.chars().take(200).collect())
        })
}

/// Continuation bookkeeping shared by both pagers.
///
/// Paging stops when the server sends no continuation OR returns an empty
/// page. A failed fetch leaves the cursor untouched so the same page can be
/// requested again.
#[derive(Debug, Default)]
struct PageState {
    cursor: Option<Cursor>,
    finished: bool,
    pages: u32,
    requests: u32,
}

impl PageState {
    fn advance<T>(&mut self, page: &Page<T>) {
        self.pages += 1;
        match (&page.next, page.returned) {
            (Some(next), n) if n > 0 => self.cursor = Some(next.clone()),
            _ => {
                self.cursor = None;
                self.finished = true;
            }
        }
    }
}

/// Walks the issue collection of one repository, page by page.
#[derive(Debug)]
pub struct IssuePager<'c> {
    client: &'c GitHubClient,
    repo: RepoId,
    since: Option<DateTime<Utc>>,
    state: PageState,
}

impl IssuePager<'_> {
    /// Fetch the next page, or `None` once the collection is exhausted.
    #[tracing::instrument(skip(self, cancel), fields(repo = %self.repo, page = self.state.pages + 1))]
    pub async fn next_page(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Page<Issue>>, FetchError> {
        if self.state.finished {
            return Ok(None);
        }
        self.state.requests += 1;

        let cursor = self.state.cursor.as_ref();
        let page = match self.client.transport {
            TransportKind::Rest => {
                rest::issues_page(self.client, &self.repo, self.since, cursor, cancel).await?
            }
            TransportKind::Graphql => {
                graphql::issues_page(self.client, &self.repo, self.since, cursor, cancel).await?
            }
        };

        tracing::debug!(
            items = page.items.len(),
            has_next = page.next.is_some(),
            "Fetched issue page"
        );
        self.state.advance(&page);
        Ok(Some(page))
    }

    /// Drain the remaining pages into one vector.
    pub async fn collect_all(mut self, cancel: &CancellationToken) -> Result<Vec<Issue>, FetchError> {
        let mut issues = Vec::new();
        while let Some(page) = self.next_page(cancel).await? {
            issues.extend(page.items);
        }
        Ok(issues)
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished
    }

    /// Pages successfully fetched so far.
    pub fn pages_fetched(&self) -> u32 {
        self.state.pages
    }

    /// Requests issued so far, including failed ones.
    pub fn requests_issued(&self) -> u32 {
        self.state.requests
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.state.cursor.as_ref()
    }
}

/// Walks the comments of one issue, page by page.
#[derive(Debug)]
pub struct CommentPager<'c> {
    client: &'c GitHubClient,
    repo: RepoId,
    issue_number: u64,
    state: PageState,
}

impl CommentPager<'_> {
    #[tracing::instrument(skip(self, cancel), fields(repo = %self.repo, issue = self.issue_number))]
    pub async fn next_page(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Page<Comment>>, FetchError> {
        if self.state.finished {
            return Ok(None);
        }
        self.state.requests += 1;

        let cursor = self.state.cursor.as_ref();
        let page = match self.client.transport {
            TransportKind::Rest => {
                rest::comments_page(self.client, &self.repo, self.issue_number, cursor, cancel)
                    .await?
            }
            TransportKind::Graphql => {
                graphql::comments_page(self.client, &self.repo, self.issue_number, cursor, cancel)
                    .await?
            }
        };

        self.state.advance(&page);
        Ok(Some(page))
    }

    pub async fn collect_all(
        mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Comment>, FetchError> {
        let mut comments = Vec::new();
        while let Some(page) = self.next_page(cancel).await? {
            comments.extend(page.items);
        }
        Ok(comments)
    }

    pub fn issue_number(&self) -> u64 {
        self.issue_number
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished
    }

    pub fn pages_fetched(&self) -> u32 {
        self.state.pages
    }

    pub fn requests_issued(&self) -> u32 {
        self.state.requests
    }
}
