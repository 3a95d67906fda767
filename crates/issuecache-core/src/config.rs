use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;
use crate::model::{IssueStateFilter, RepoId};

/// Environment variable that overrides every other token source.
pub const TOKEN_ENV_OVERRIDE: &str = "ISSUECACHE_TOKEN";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote API settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Retry/backoff settings for sync passes
    #[serde(default)]
    pub sync: SyncConfig,

    /// Local database settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Repositories to mirror, as `owner/name`
    #[serde(default)]
    pub repositories: Vec<String>,
}

/// Pagination transport used by the fetch client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// REST endpoints paged through `Link: rel="next"` headers
    #[default]
    Rest,
    /// GraphQL endpoint paged through `pageInfo.endCursor`
    Graphql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,

    #[serde(default)]
    pub transport: TransportKind,

    /// Name of the environment variable holding the bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Per-request deadline applied to every HTTP call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Page size requested from the API (GitHub caps this at 100)
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Which issues to mirror
    #[serde(default)]
    pub issue_state: IssueStateFilter,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_graphql_url() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_per_page() -> u32 {
    100
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            graphql_url: default_graphql_url(),
            transport: TransportKind::default(),
            token_env: default_token_env(),
            request_timeout_secs: default_request_timeout_secs(),
            per_page: default_per_page(),
            issue_state: IssueStateFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Retries for a transient page failure before the pass fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Longest server `Retry-After` to wait out; longer ones fail the pass
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_max_retry_after_secs() -> u64 {
    60
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_retry_after_secs: default_max_retry_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file; defaults to `{data_dir}/issuecache/cache.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `path`, writing defaults there if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Warnings are logged; errors fail the load.
    pub fn load_validated(path: Option<&Path>) -> Result<(Self, ValidationResult)> {
        let config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        validate_url(&self.github.api_url, "github.api_url", &mut result);
        validate_url(&self.github.graphql_url, "github.graphql_url", &mut result);

        if self.github.token_env.trim().is_empty() {
            result.add_error("github.token_env", "Token variable name must not be empty");
        }

        if self.github.request_timeout_secs == 0 {
            result.add_error(
                "github.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        } else if self.github.request_timeout_secs > 300 {
            result.add_warning(
                "github.request_timeout_secs",
                "Request timeout is unusually long (>300s)",
            );
        }

        if self.github.per_page == 0 || self.github.per_page > 100 {
            result.add_error("github.per_page", "Page size must be between 1 and 100");
        }

        if self.sync.max_retries > 10 {
            result.add_warning("sync.max_retries", "More than 10 retries per page");
        }

        if self.sync.initial_backoff_ms > self.sync.max_backoff_ms {
            result.add_error(
                "sync.initial_backoff_ms",
                "Initial backoff must not exceed max backoff",
            );
        }

        if self.sync.max_retry_after_secs > 3600 {
            result.add_warning(
                "sync.max_retry_after_secs",
                "A sync may wait more than an hour on a rate limit",
            );
        }

        if self.repositories.is_empty() {
            result.add_warning("repositories", "No repositories configured - nothing to sync");
        }

        for (i, repo) in self.repositories.iter().enumerate() {
            if let Err(e) = repo.parse::<RepoId>() {
                result.add_error(format!("repositories[{}]", i), e.to_string());
            }
        }

        result
    }

    /// Parsed repository ids, in configuration order
    pub fn repository_ids(&self) -> Result<Vec<RepoId>, ConfigError> {
        self.repositories
            .iter()
            .map(|r| r.parse::<RepoId>().map_err(|e| ConfigError::Invalid(e.to_string())))
            .collect()
    }

    /// Resolve the bearer token from the environment.
    ///
    /// `ISSUECACHE_TOKEN` wins over the variable named by `github.token_env`.
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        [TOKEN_ENV_OVERRIDE, self.github.token_env.as_str()]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
            .ok_or_else(|| {
                ConfigError::MissingSetting(format!(
                    "set {} or {} to a GitHub token",
                    TOKEN_ENV_OVERRIDE, self.github.token_env
                ))
            })
    }

    /// Database file location
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.database_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir().context("Failed to get data directory")?;
        Ok(data_dir.join("issuecache").join("cache.db"))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("issuecache");

        Ok(config_dir.join("config.toml"))
    }
}

fn validate_url(url_str: &str, field_name: &str, result: &mut ValidationResult) {
    match Url::parse(url_str) {
        Ok(url) => {
            if url.scheme() != "http" && url.scheme() != "https" {
                result.add_error(
                    field_name,
                    format!("URL must use http or https scheme, got: {}", url.scheme()),
                );
            }

            if url.host().is_none() {
                result.add_error(field_name, "URL must have a host");
            }
        }
        Err(e) => {
            result.add_error(field_name, format!("Invalid URL: {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn config_with_repo() -> Config {
        Config {
            repositories: vec!["acme/widgets".to_string()],
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_default_config() {
        let result = config_with_repo().validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_no_repositories_is_warning() {
        let result = Config::default().validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "repositories"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = config_with_repo();
        config.github.api_url = "ftp://api.github.com".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_bad_repository_id() {
        let mut config = config_with_repo();
        config.repositories.push("not-a-repo".to_string());
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "repositories[1]"));
    }

    #[test]
    fn test_per_page_bounds() {
        let mut config = config_with_repo();
        config.github.per_page = 0;
        assert!(!config.validate().is_valid());
        config.github.per_page = 101;
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn test_backoff_order() {
        let mut config = config_with_repo();
        config.sync.initial_backoff_ms = 10_000;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "sync.initial_backoff_ms"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            repositories = ["acme/widgets"]

            [github]
            transport = "graphql"
            issue_state = "all"
            "#,
        )
        .unwrap();

        assert_eq!(config.github.transport, TransportKind::Graphql);
        assert_eq!(config.github.issue_state, IssueStateFilter::All);
        assert_eq!(config.github.per_page, 100);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.max_retry_after_secs, 60);
        assert_eq!(config.repository_ids().unwrap()[0].name, "widgets");
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.github.api_url, "https://api.github.com");

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.github.token_env, "GITHUB_TOKEN");
    }

    #[test]
    fn test_explicit_database_path() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/tmp/issues.db"));
        assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/issues.db"));
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
