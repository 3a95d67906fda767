//! REST transport: `GET /repos/{owner}/{name}/issues` paged by `Link` headers.

use chrono::{DateTime, SecondsFormat, Utc};
use issuecache_core::{Comment, Issue, RepoId};
use reqwest::header::{HeaderMap, LINK};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::GitHubClient;
use crate::error::FetchError;
use crate::link::next_link;
use crate::types::{Cursor, Page, RestComment, RestIssue};

pub(crate) async fn issues_page(
    client: &GitHubClient,
    repo: &RepoId,
    since: Option<DateTime<Utc>>,
    cursor: Option<&Cursor>,
    cancel: &CancellationToken,
) -> Result<Page<Issue>, FetchError> {
    let url = match cursor {
        Some(cursor) => link_target(cursor)?,
        None => first_issues_url(client, repo, since)?,
    };

    let (headers, raw): (HeaderMap, Vec<RestIssue>) =
        client.execute(client.get(url), cancel).await?;

    let returned = raw.len();
    let items = raw
        .into_iter()
        .filter(|issue| !issue.is_pull_request())
        .map(RestIssue::into_issue)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        next: next_cursor(&headers),
        total: None,
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
    let url = match cursor {
        Some(cursor) => link_target(cursor)?,
        None => {
            let number = issue_number.to_string();
            let mut url = client.api_endpoint(&[
                "repos",
                &repo.owner,
                &repo.name,
                "issues",
                &number,
                "comments",
            ])?;
            url.query_pairs_mut()
                .append_pair("per_page", &client.per_page().to_string());
            url
        }
    };

    let (headers, raw): (HeaderMap, Vec<RestComment>) =
        client.execute(client.get(url), cancel).await?;

    let returned = raw.len();
    Ok(Page {
        items: raw.into_iter().map(|c| c.into_comment(issue_number)).collect(),
        next: next_cursor(&headers),
        total: None,
        returned,
    })
}

fn first_issues_url(
    client: &GitHubClient,
    repo: &RepoId,
    since: Option<DateTime<Utc>>,
) -> Result<Url, FetchError> {
    let mut url = client.api_endpoint(&["repos", &repo.owner, &repo.name, "issues"])?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("state", client.fetch_state(since).as_str())
            .append_pair("sort", "updated")
            .append_pair("direction", "asc")
            .append_pair("per_page", &client.per_page().to_string());
        if let Some(since) = since {
            query.append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
    }
    Ok(url)
}

fn link_target(cursor: &Cursor) -> Result<Url, FetchError> {
    match cursor {
        Cursor::Link(url) => Ok(url.clone()),
        Cursor::After(_) => Err(FetchError::transient(
            "GraphQL cursor handed to the REST transport",
        )),
    }
}

fn next_cursor(headers: &HeaderMap) -> Option<Cursor> {
    headers
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(next_link)
        .map(Cursor::Link)
}
