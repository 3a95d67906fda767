//! Domain records mirrored from the remote tracker.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Author recorded when the remote account no longer exists.
pub const GHOST_AUTHOR: &str = "ghost";

/// Repository identity: `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid repository id '{0}', expected owner/name")]
pub struct InvalidRepoId(pub String);

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// The `owner/name` form, used as the store key.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoId {
    type Err = InvalidRepoId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut parts = trimmed.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
                Ok(RepoId::new(owner, name))
            }
            _ => Err(InvalidRepoId(s.to_string())),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Issue state as reported by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        }
    }

    /// Parse either the REST (`open`) or GraphQL (`OPEN`) spelling.
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("open") {
            Some(IssueState::Open)
        } else if s.eq_ignore_ascii_case("closed") {
            Some(IssueState::Closed)
        } else {
            None
        }
    }
}

/// Which issues a sync mirrors. Applies to full and incremental passes alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStateFilter {
    #[default]
    Open,
    Closed,
    All,
}

impl IssueStateFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueStateFilter::Open => "open",
            IssueStateFilter::Closed => "closed",
            IssueStateFilter::All => "all",
        }
    }

    pub fn matches(self, state: IssueState) -> bool {
        match self {
            IssueStateFilter::Open => state == IssueState::Open,
            IssueStateFilter::Closed => state == IssueState::Closed,
            IssueStateFilter::All => true,
        }
    }
}

/// Issue as mirrored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub author: String,
    pub state: IssueState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Comment count as reported by the remote.
    pub comment_count: u32,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
}

impl Issue {
    /// Sort and de-duplicate the label and assignee sets.
    pub fn normalized(mut self) -> Self {
        self.labels.sort();
        self.labels.dedup();
        self.assignees.sort();
        self.assignees.dedup();
        self
    }
}

/// Comment on an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub issue_number: u64,
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn parse_repo_id() {
        let repo: RepoId = "acme/widgets".parse().unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.name, "widgets");
        assert_eq!(repo.to_string(), "acme/widgets");
        assert_eq!(repo.full_name(), "acme/widgets");
    }

    #[test]
    fn reject_malformed_repo_ids() {
        for bad in ["", "acme", "acme/", "/widgets", "acme/widgets/extra"] {
            assert!(bad.parse::<RepoId>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn issue_state_accepts_both_spellings() {
        assert_eq!(IssueState::parse("open"), Some(IssueState::Open));
        assert_eq!(IssueState::parse("CLOSED"), Some(IssueState::Closed));
        assert_eq!(IssueState::parse("merged"), None);
    }

    #[test]
    fn state_filter_matches() {
        assert!(IssueStateFilter::Open.matches(IssueState::Open));
        assert!(!IssueStateFilter::Open.matches(IssueState::Closed));
        assert!(IssueStateFilter::All.matches(IssueState::Closed));
    }

    #[test]
    fn normalized_sorts_and_dedups() {
        let issue = Issue {
            number: 1,
            title: "t".into(),
            body: None,
            author: "a".into(),
            state: IssueState::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            comment_count: 0,
            labels: vec!["bug".into(), "ui".into(), "bug".into()],
            assignees: vec!["zoe".into(), "al".into()],
        }
        .normalized();
        assert_eq!(issue.labels, vec!["bug", "ui"]);
        assert_eq!(issue.assignees, vec!["al", "zoe"]);
    }
}
