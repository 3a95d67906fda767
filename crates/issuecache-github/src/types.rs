//! GitHub wire types (REST and GraphQL) and their conversion into the
//! mirrored model.

use chrono::{DateTime, Utc};
use issuecache_core::{Comment, Issue, IssueState, GHOST_AUTHOR};
use serde::Deserialize;
use url::Url;

use crate::error::FetchError;

/// Where the next page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Absolute URL from a REST `Link: rel="next"` header
    Link(Url),
    /// GraphQL `pageInfo.endCursor`
    After(String),
}

impl Cursor {
    /// Short human-readable form for progress reporting.
    pub fn describe(&self) -> String {
        match self {
            Cursor::Link(url) => url
                .query_pairs()
                .find(|(k, _)| k == "page")
                .map(|(_, v)| format!("page={}", v))
                .unwrap_or_else(|| url.to_string()),
            Cursor::After(cursor) => format!("after={}", cursor),
        }
    }
}

/// One decoded page of a collection.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Continuation, `None` when the server signalled the last page
    pub next: Option<Cursor>,
    /// Total size of the collection, when the transport reports it
    pub total: Option<u64>,
    /// Records the server returned before client-side filtering
    pub returned: usize,
}

// ---------------------------------------------------------------------------
// REST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RestUser {
    pub login: String,
}

/// Labels arrive as objects on the issues endpoint but as bare strings in
/// some webhook-shaped payloads.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RestLabel {
    Object { name: String },
    Name(String),
}

impl RestLabel {
    fn into_name(self) -> String {
        match self {
            RestLabel::Object { name } | RestLabel::Name(name) => name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestIssue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub user: Option<RestUser>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub comments: u32,
    #[serde(default)]
    pub labels: Vec<RestLabel>,
    #[serde(default)]
    pub assignees: Vec<RestUser>,
    /// Present when the "issue" is actually a pull request
    pub pull_request: Option<serde_json::Value>,
}

impl RestIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn into_issue(self) -> Result<Issue, FetchError> {
        let state = IssueState::parse(&self.state).ok_or_else(|| {
            FetchError::decode(format!("issue #{} has unknown state '{}'", self.number, self.state))
        })?;

        Ok(Issue {
            number: self.number,
            title: self.title,
            body: non_empty(self.body),
            author: login_or_ghost(self.user.map(|u| u.login)),
            state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            comment_count: self.comments,
            labels: self.labels.into_iter().map(RestLabel::into_name).collect(),
            assignees: self.assignees.into_iter().map(|u| u.login).collect(),
        }
        .normalized())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestComment {
    pub id: u64,
    pub body: Option<String>,
    pub user: Option<RestUser>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RestComment {
    pub fn into_comment(self, issue_number: u64) -> Comment {
        Comment {
            id: self.id,
            issue_number,
            body: self.body.unwrap_or_default(),
            author: login_or_ghost(self.user.map(|u| u.login)),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// GraphQL
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

impl PageInfo {
    pub fn into_cursor(self) -> Option<Cursor> {
        if self.has_next_page {
            self.end_cursor.map(Cursor::After)
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Connection<T> {
    #[serde(rename = "totalCount")]
    pub total_count: Option<u64>,
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct Actor {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct Count {
    #[serde(rename = "totalCount")]
    pub total_count: u32,
}

#[derive(Debug, Deserialize)]
pub struct Nodes<T> {
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct NamedNode {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlIssue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: Option<Actor>,
    pub comments: Count,
    pub labels: Option<Nodes<NamedNode>>,
    pub assignees: Option<Nodes<Actor>>,
}

impl GraphQlIssue {
    pub fn into_issue(self) -> Result<Issue, FetchError> {
        let state = IssueState::parse(&self.state).ok_or_else(|| {
            FetchError::decode(format!("issue #{} has unknown state '{}'", self.number, self.state))
        })?;

        Ok(Issue {
            number: self.number,
            title: self.title,
            body: non_empty(self.body),
            author: login_or_ghost(self.author.map(|a| a.login)),
            state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            comment_count: self.comments.total_count,
            labels: self
                .labels
                .map(|l| l.nodes.into_iter().map(|n| n.name).collect())
                .unwrap_or_default(),
            assignees: self
                .assignees
                .map(|a| a.nodes.into_iter().map(|n| n.login).collect())
                .unwrap_or_default(),
        }
        .normalized())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlComment {
    pub database_id: Option<u64>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: Option<Actor>,
}

impl GraphQlComment {
    pub fn into_comment(self, issue_number: u64) -> Result<Comment, FetchError> {
        let id = self
            .database_id
            .ok_or_else(|| FetchError::decode("comment without databaseId"))?;
        Ok(Comment {
            id,
            issue_number,
            body: self.body,
            author: login_or_ghost(self.author.map(|a| a.login)),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct IssuesData {
    pub repository: Option<IssuesRepository>,
}

#[derive(Debug, Deserialize)]
pub struct IssuesRepository {
    pub issues: Connection<GraphQlIssue>,
}

#[derive(Debug, Deserialize)]
pub struct CommentsData {
    pub repository: Option<CommentsRepository>,
}

#[derive(Debug, Deserialize)]
pub struct CommentsRepository {
    pub issue: Option<CommentsIssue>,
}

#[derive(Debug, Deserialize)]
pub struct CommentsIssue {
    pub comments: Connection<GraphQlComment>,
}

/// Both transports store an empty issue body as `None`.
fn non_empty(body: Option<String>) -> Option<String> {
    body.filter(|b| !b.is_empty())
}

fn login_or_ghost(login: Option<String>) -> String {
    login
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| GHOST_AUTHOR.to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_rest_issue_conversion() {
        let json = serde_json::json!({
            "number": 42,
            "title": "Crash on start",
            "body": "It crashes",
            "user": {"login": "alice"},
            "state": "open",
            "created_at": "2026-01-21T00:00:00Z",
            "updated_at": "2026-01-22T00:00:00Z",
            "comments": 3,
            "labels": [{"id": 1, "name": "ui", "color": "00ff00"}, {"id": 2, "name": "bug", "color": "ff0000"}],
            "assignees": [{"login": "bob"}]
        });
        let rest: RestIssue = serde_json::from_value(json).unwrap();
        assert!(!rest.is_pull_request());

        let issue = rest.into_issue().unwrap();
        assert_eq!(issue.number, 42);
        assert_eq!(issue.author, "alice");
        assert_eq!(issue.comment_count, 3);
        assert_eq!(issue.labels, vec!["bug", "ui"]);
        assert_eq!(issue.assignees, vec!["bob"]);
    }

    #[test]
    fn test_rest_pull_request_and_ghost() {
        let json = serde_json::json!({
            "number": 7,
            "title": "PR",
            "body": null,
            "user": null,
            "state": "closed",
            "created_at": "2026-01-21T00:00:00Z",
            "updated_at": "2026-01-21T00:00:00Z",
            "pull_request": {"url": "https://api.github.com/repos/acme/widgets/pulls/7"}
        });
        let rest: RestIssue = serde_json::from_value(json).unwrap();
        assert!(rest.is_pull_request());
        let issue = rest.into_issue().unwrap();
        assert_eq!(issue.author, GHOST_AUTHOR);
        assert_eq!(issue.state, IssueState::Closed);
    }

    #[test]
    fn test_unknown_state_is_decode_error() {
        let json = serde_json::json!({
            "number": 1, "title": "x", "body": null, "user": null, "state": "merged",
            "created_at": "2026-01-21T00:00:00Z", "updated_at": "2026-01-21T00:00:00Z"
        });
        let rest: RestIssue = serde_json::from_value(json).unwrap();
        assert!(matches!(rest.into_issue(), Err(FetchError::Transient { .. })));
    }

    #[test]
    fn test_empty_body_normalized_across_transports() {
        let rest: RestIssue = serde_json::from_value(serde_json::json!({
            "number": 3, "title": "x", "body": "", "user": {"login": "alice"}, "state": "open",
            "created_at": "2026-01-21T00:00:00Z", "updated_at": "2026-01-21T00:00:00Z"
        }))
        .unwrap();
        let graphql: GraphQlIssue = serde_json::from_value(serde_json::json!({
            "number": 3, "title": "x", "body": "", "state": "OPEN",
            "createdAt": "2026-01-21T00:00:00Z", "updatedAt": "2026-01-21T00:00:00Z",
            "author": {"login": "alice"}, "comments": {"totalCount": 0},
            "labels": null, "assignees": null
        }))
        .unwrap();

        let from_rest = rest.into_issue().unwrap();
        let from_graphql = graphql.into_issue().unwrap();
        assert_eq!(from_rest.body, None);
        assert_eq!(from_rest, from_graphql);
    }

    #[test]
    fn test_graphql_connection_without_nodes() {
        let connection: Connection<GraphQlIssue> = serde_json::from_value(serde_json::json!({
            "totalCount": 0,
            "pageInfo": {"hasNextPage": false, "endCursor": null}
        }))
        .unwrap();
        assert!(connection.nodes.is_empty());

        let labels: Nodes<NamedNode> = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(labels.nodes.is_empty());
    }

    #[test]
    fn test_graphql_page_info() {
        let more = PageInfo {
            has_next_page: true,
            end_cursor: Some("Y3Vyc29y".into()),
        };
        assert_eq!(more.into_cursor(), Some(Cursor::After("Y3Vyc29y".into())));

        let done = PageInfo {
            has_next_page: false,
            end_cursor: Some("Y3Vyc29y".into()),
        };
        assert_eq!(done.into_cursor(), None);
    }

    #[test]
    fn test_cursor_describe() {
        let url = Url::parse("https://api.github.com/repos/a/b/issues?per_page=100&page=3").unwrap();
        assert_eq!(Cursor::Link(url).describe(), "page=3");
        assert_eq!(Cursor::After("abc".into()).describe(), "after=abc");
    }
}
