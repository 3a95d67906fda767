//! Paginated GitHub fetch client for issuecache.
//!
//! Walks issue and comment collections over either the REST API (`Link`
//! headers) or the GraphQL API (`endCursor`), normalizing both into
//! [`Page`]s with an optional [`Cursor`]. Requests observe a
//! `CancellationToken` for their whole duration.

pub mod client;
pub mod error;
mod graphql;
pub mod link;
mod rest;
pub mod types;

pub use client::{CommentPager, GitHubClient, GitHubClientBuilder, IssuePager};
pub use error::FetchError;
pub use types::{Cursor, Page};
