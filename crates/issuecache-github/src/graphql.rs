//! GraphQL transport: one `POST /graphql` per page, paged by `endCursor`.

use chrono::{DateTime, SecondsFormat, Utc};
use issuecache_core::{Comment, Issue, IssueStateFilter, RepoId};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::client::GitHubClient;
use crate::error::FetchError;
use crate::types::{
    CommentsData, Cursor, GraphQlComment, GraphQlError, GraphQlIssue, GraphQlResponse, IssuesData,
    Page,
};

const ISSUES_QUERY: &str = r#"
query($owner: String!, $name: String!, $first: Int!, $after: String, $since: DateTime, $states: [IssueState!]) {
  repository(owner: $owner, name: $name) {
    issues(first: $first, after: $after, states: $states, filterBy: {since: $since}, orderBy: {field: UPDATED_AT, direction: ASC}) {
      totalCount
      pageInfo { hasNextPage endCursor }
      nodes {
        number title body state createdAt updatedAt
        author { login }
        comments { totalCount }
        labels(first: 100) { nodes { name } }
        assignees(first: 100) { nodes { login } }
      }
    }
  }
}
"#;

const COMMENTS_QUERY: &str = r#"
query($owner: String!, $name: String!, $number: Int!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    issue(number: $number) {
      comments(first: $first, after: $after) {
        totalCount
        pageInfo { hasNextPage endCursor }
        nodes { databaseId body createdAt updatedAt author { login } }
      }
    }
  }
}
"#;

pub(crate) async fn issues_page(
    client: &GitHubClient,
    repo: &RepoId,
    since: Option<DateTime<Utc>>,
    cursor: Option<&Cursor>,
    cancel: &CancellationToken,
) -> Result<Page<Issue>, FetchError> {
    let states = match client.fetch_state(since) {
        IssueStateFilter::Open => json!(["OPEN"]),
        IssueStateFilter::Closed => json!(["CLOSED"]),
        IssueStateFilter::All => Value::Null,
    };
    let variables = json!({
        "owner": repo.owner,
        "name": repo.name,
        "first": client.per_page(),
        "after": after(cursor)?,
        "since": since.map(|s| s.to_rfc3339_opts(SecondsFormat::Secs, true)),
        "states": states,
    });

    let data: IssuesData = query(client, ISSUES_QUERY, variables, cancel).await?;
    let connection = data
        .repository
        .ok_or_else(|| FetchError::NotFound(format!("repository {}", repo)))?
        .issues;

    let returned = connection.nodes.len();
    let items = connection
        .nodes
        .into_iter()
        .map(GraphQlIssue::into_issue)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        next: connection.page_info.into_cursor(),
        total: connection.total_count,
        returned,
    })
}

pub(crate) async fn comments_page(
    client: &GitHubClient,
    repo: &RepoId,
    issue_number: u64,
    cursor: Option<&Cursor>,
    cancel: &CancellationToken,
) -> Result<Page<Comment>, FetchError> {
    let variables = json!({
        "owner": repo.owner,
        "name": repo.name,
        "number": issue_number,
        "first": client.per_page(),
        "after": after(cursor)?,
    });

    let data: CommentsData = query(client, COMMENTS_QUERY, variables, cancel).await?;
    let connection = data
        .repository
        .ok_or_else(|| FetchError::NotFound(format!("repository {}", repo)))?
        .issue
        .ok_or_else(|| FetchError::NotFound(format!("issue {}#{}", repo, issue_number)))?
        .comments;

    let returned = connection.nodes.len();
    let items = connection
        .nodes
        .into_iter()
        .map(|c: GraphQlComment| c.into_comment(issue_number))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        next: connection.page_info.into_cursor(),
        total: connection.total_count,
        returned,
    })
}

fn after(cursor: Option<&Cursor>) -> Result<Option<String>, FetchError> {
    match cursor {
        None => Ok(None),
        Some(Cursor::After(c)) => Ok(Some(c.clone())),
        Some(Cursor::Link(_)) => Err(FetchError::transient(
            "REST link handed to the GraphQL transport",
        )),
    }
}

async fn query<T: DeserializeOwned>(
    client: &GitHubClient,
    query: &str,
    variables: Value,
    cancel: &CancellationToken,
) -> Result<T, FetchError> {
    let request = client
        .post(client.graphql_url().clone())
        .json(&json!({ "query": query, "variables": variables }));

    let (_headers, response): (HeaderMap, GraphQlResponse<T>) =
        client.execute(request, cancel).await?;

    if let Some(error) = response.errors.first() {
        return Err(classify_graphql_error(error));
    }

    response
        .data
        .ok_or_else(|| FetchError::decode("GraphQL response without data"))
}

/// GraphQL reports most failures with HTTP 200 and an `errors` array.
pub(crate) fn classify_graphql_error(error: &GraphQlError) -> FetchError {
    match error.error_type.as_deref() {
        Some("NOT_FOUND") => FetchError::NotFound(error.message.clone()),
        Some("FORBIDDEN") | Some("UNAUTHENTICATED") => FetchError::Authentication {
            status: 200,
            message: error.message.clone(),
        },
        Some("RATE_LIMITED") => FetchError::Transient {
            status: None,
            message: format!("Rate limited: {}", error.message),
            retry_after: None,
        },
        _ => FetchError::transient(format!("GraphQL error: {}", error.message)),
    }
}
