//! Shared model, configuration and error taxonomy for issuecache.

pub mod config;
pub mod error;
pub mod model;

pub use config::{Config, GitHubConfig, StorageConfig, SyncConfig, TransportKind, ValidationResult};
pub use error::{ConfigError, ErrorKind};
pub use model::{Comment, InvalidRepoId, Issue, IssueState, IssueStateFilter, RepoId, GHOST_AUTHOR};

use anyhow::Result;

/// Initialize tracing/logging. `RUST_LOG` overrides the default `info` filter.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    tracing::debug!("issuecache core initialized");
    Ok(())
}
