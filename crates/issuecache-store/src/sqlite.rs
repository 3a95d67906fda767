//! SQLite-backed [`LocalStore`].

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use issuecache_core::{Comment, Issue, IssueState, IssueStateFilter, RepoId};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::error::StoreError;
use crate::{LocalStore, RepositoryStatus, UpsertOutcome};

const SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    full_name TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    watermark_ms INTEGER,
    last_full_sync_ms INTEGER,
    created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS issues (
    repo TEXT NOT NULL REFERENCES repositories(full_name) ON DELETE CASCADE,
    number INTEGER NOT NULL,
    title TEXT NOT NULL,
    body TEXT,
    author TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    comment_count INTEGER NOT NULL,
    labels TEXT NOT NULL,
    assignees TEXT NOT NULL,
    PRIMARY KEY (repo, number)
);

CREATE TABLE IF NOT EXISTS comments (
    repo TEXT NOT NULL,
    id INTEGER NOT NULL,
    issue_number INTEGER NOT NULL,
    body TEXT NOT NULL,
    author TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    PRIMARY KEY (repo, id),
    FOREIGN KEY (repo, issue_number) REFERENCES issues(repo, number) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_issues_updated ON issues(repo, updated_at_ms DESC);
CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(repo, issue_number);
"#;

const ISSUE_COLUMNS: &str = "number, title, body, author, state, created_at_ms, updated_at_ms, \
                             comment_count, labels, assignees";

/// SQLite store for mirrored issues and comments.
///
/// One connection, serialized behind a mutex. Browsing readers in other
/// processes open their own connection with [`SqliteStore::open_read_only`];
/// WAL mode lets them read while a sync is writing.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn)?;
        tracing::debug!(path = %path.display(), "Opened issue store");
        Ok(store)
    }

    /// Open an existing database for reading only. Writes through this
    /// handle fail with a storage error.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        check_version(schema_version(&conn)?)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get one issue.
    pub fn get_issue(&self, repo: &RepoId, number: u64) -> Result<Option<Issue>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM issues WHERE repo = ?1 AND number = ?2",
            ISSUE_COLUMNS
        );
        let row = conn
            .query_row(&sql, params![repo.full_name(), number], IssueRow::from_row)
            .optional()?;
        row.map(IssueRow::into_issue).transpose()
    }

    /// List issues, most recently updated first.
    pub fn list_issues(
        &self,
        repo: &RepoId,
        filter: IssueStateFilter,
    ) -> Result<Vec<Issue>, StoreError> {
        let state = match filter {
            IssueStateFilter::All => None,
            other => Some(other.as_str()),
        };

        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM issues
             WHERE repo = ?1 AND (?2 IS NULL OR state = ?2)
             ORDER BY updated_at_ms DESC, number DESC",
            ISSUE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![repo.full_name(), state], IssueRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(IssueRow::into_issue).collect()
    }

    /// List comments of one issue, oldest first.
    pub fn list_comments(&self, repo: &RepoId, issue_number: u64) -> Result<Vec<Comment>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, issue_number, body, author, created_at_ms, updated_at_ms
             FROM comments
             WHERE repo = ?1 AND issue_number = ?2
             ORDER BY created_at_ms ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![repo.full_name(), issue_number], |row| {
                Ok((
                    row.get::<_, u64>(0)?,
                    row.get::<_, u64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, issue_number, body, author, created, updated)| {
                Ok(Comment {
                    id,
                    issue_number,
                    body,
                    author,
                    created_at: from_ms(created)?,
                    updated_at: from_ms(updated)?,
                })
            })
            .collect()
    }

    /// Numbers of every issue stored for `repo`.
    pub fn issue_numbers(&self, repo: &RepoId) -> Result<BTreeSet<u64>, StoreError> {
        let conn = self.conn.lock();
        stored_numbers(&conn, &repo.full_name()).map(|v| v.into_iter().collect())
    }

    /// Every repository that has a row, sorted by name.
    pub fn repositories(&self) -> Result<Vec<RepoId>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT owner, name FROM repositories ORDER BY full_name")?;
        let rows = stmt
            .query_map([], |row| Ok(RepoId::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn repository_status(&self, repo: &RepoId) -> Result<Option<RepositoryStatus>, StoreError> {
        let conn = self.conn.lock();
        let key = repo.full_name();
        let marks = conn
            .query_row(
                "SELECT watermark_ms, last_full_sync_ms FROM repositories WHERE full_name = ?1",
                params![key],
                |row| Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?)),
            )
            .optional()?;

        let Some((watermark, last_full_sync)) = marks else {
            return Ok(None);
        };

        let issue_count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM issues WHERE repo = ?1",
            params![key],
            |row| row.get(0),
        )?;
        let comment_count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM comments WHERE repo = ?1",
            params![key],
            |row| row.get(0),
        )?;

        Ok(Some(RepositoryStatus {
            repo: repo.clone(),
            watermark: watermark.map(from_ms).transpose()?,
            last_full_sync: last_full_sync.map(from_ms).transpose()?,
            issue_count,
            comment_count,
        }))
    }

    /// Drop every issue and comment of `repo` and forget its watermark, so the
    /// next pass is a full rebuild. Returns the number of issues removed.
    pub fn clear_repository(&self, repo: &RepoId) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let key = repo.full_name();
        let removed = tx.execute("DELETE FROM issues WHERE repo = ?1", params![key])?;
        tx.execute(
            "UPDATE repositories SET watermark_ms = NULL, last_full_sync_ms = NULL
             WHERE full_name = ?1",
            params![key],
        )?;
        tx.commit()?;

        tracing::info!(repo = %repo, removed, "Cleared repository");
        Ok(removed)
    }
}

impl LocalStore for SqliteStore {
    fn ensure_repository(&self, repo: &RepoId) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        ensure_repository_row(&conn, repo)
    }

    fn upsert_issue(&self, repo: &RepoId, issue: &Issue) -> Result<UpsertOutcome, StoreError> {
        let labels = serde_json::to_string(&issue.labels)?;
        let assignees = serde_json::to_string(&issue.assignees)?;
        let key = repo.full_name();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        ensure_repository_row(&tx, repo)?;

        let existed = tx
            .query_row(
                "SELECT 1 FROM issues WHERE repo = ?1 AND number = ?2",
                params![key, issue.number],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        // REPLACE would delete the row and cascade to its comments.
        tx.execute(
            r#"
            INSERT INTO issues
            (repo, number, title, body, author, state, created_at_ms, updated_at_ms, comment_count, labels, assignees)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(repo, number) DO UPDATE SET
                title = excluded.title,
                body = excluded.body,
                author = excluded.author,
                state = excluded.state,
                created_at_ms = excluded.created_at_ms,
                updated_at_ms = excluded.updated_at_ms,
                comment_count = excluded.comment_count,
                labels = excluded.labels,
                assignees = excluded.assignees
            "#,
            params![
                key,
                issue.number,
                issue.title,
                issue.body,
                issue.author,
                issue.state.as_str(),
                issue.created_at.timestamp_millis(),
                issue.updated_at.timestamp_millis(),
                issue.comment_count,
                labels,
                assignees,
            ],
        )?;
        tx.commit()?;

        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    fn upsert_comment(
        &self,
        repo: &RepoId,
        issue_number: u64,
        comment: &Comment,
    ) -> Result<UpsertOutcome, StoreError> {
        let key = repo.full_name();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existed = tx
            .query_row(
                "SELECT 1 FROM comments WHERE repo = ?1 AND id = ?2",
                params![key, comment.id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        tx.execute(
            r#"
            INSERT INTO comments
            (repo, id, issue_number, body, author, created_at_ms, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(repo, id) DO UPDATE SET
                issue_number = excluded.issue_number,
                body = excluded.body,
                author = excluded.author,
                created_at_ms = excluded.created_at_ms,
                updated_at_ms = excluded.updated_at_ms
            "#,
            params![
                key,
                comment.id,
                issue_number,
                comment.body,
                comment.author,
                comment.created_at.timestamp_millis(),
                comment.updated_at.timestamp_millis(),
            ],
        )?;
        tx.commit()?;

        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    fn remove_issue(&self, repo: &RepoId, number: u64) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM issues WHERE repo = ?1 AND number = ?2",
            params![repo.full_name(), number],
        )?;
        Ok(removed > 0)
    }

    fn replace_issue_set(
        &self,
        repo: &RepoId,
        complete: &BTreeSet<u64>,
    ) -> Result<usize, StoreError> {
        let key = repo.full_name();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let stale: Vec<u64> = stored_numbers(&tx, &key)?
            .into_iter()
            .filter(|n| !complete.contains(n))
            .collect();

        let mut pruned = 0;
        {
            let mut delete = tx.prepare("DELETE FROM issues WHERE repo = ?1 AND number = ?2")?;
            for number in &stale {
                pruned += delete.execute(params![key, number])?;
            }
        }
        tx.commit()?;

        if pruned > 0 {
            tracing::info!(repo = %repo, pruned, "Pruned issues absent from remote");
        }
        Ok(pruned)
    }

    fn replace_comment_set(
        &self,
        repo: &RepoId,
        issue_number: u64,
        complete: &BTreeSet<u64>,
    ) -> Result<usize, StoreError> {
        let key = repo.full_name();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let stale: Vec<u64> = {
            let mut stmt =
                tx.prepare("SELECT id FROM comments WHERE repo = ?1 AND issue_number = ?2")?;
            let ids = stmt
                .query_map(params![key, issue_number], |row| row.get::<_, u64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.into_iter().filter(|id| !complete.contains(id)).collect()
        };

        let mut pruned = 0;
        {
            let mut delete = tx.prepare("DELETE FROM comments WHERE repo = ?1 AND id = ?2")?;
            for id in &stale {
                pruned += delete.execute(params![key, id])?;
            }
        }
        tx.commit()?;
        Ok(pruned)
    }

    fn get_watermark(&self, repo: &RepoId) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn.lock();
        let ms = conn
            .query_row(
                "SELECT watermark_ms FROM repositories WHERE full_name = ?1",
                params![repo.full_name()],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        ms.map(from_ms).transpose()
    }

    fn set_watermark(&self, repo: &RepoId, at: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        let key = repo.full_name();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        ensure_repository_row(&tx, repo)?;

        tx.execute(
            "UPDATE repositories SET watermark_ms = MAX(COALESCE(watermark_ms, ?2), ?2)
             WHERE full_name = ?1",
            params![key, at.timestamp_millis()],
        )?;
        let stored: i64 = tx.query_row(
            "SELECT watermark_ms FROM repositories WHERE full_name = ?1",
            params![key],
            |row| row.get(0),
        )?;
        tx.commit()?;

        let effective = from_ms(stored)?;
        if effective > at {
            tracing::warn!(
                repo = %repo,
                requested = %at,
                stored = %effective,
                "Refusing to move watermark backwards"
            );
        }
        Ok(effective)
    }

    fn record_full_sync(&self, repo: &RepoId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        ensure_repository_row(&conn, repo)?;
        conn.execute(
            "UPDATE repositories SET last_full_sync_ms = ?2 WHERE full_name = ?1",
            params![repo.full_name(), at.timestamp_millis()],
        )?;
        Ok(())
    }

    fn issue_count(&self, repo: &RepoId) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM issues WHERE repo = ?1",
            params![repo.full_name()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn comment_count(&self, repo: &RepoId, issue_number: u64) -> Result<u32, StoreError> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM comments WHERE repo = ?1 AND issue_number = ?2",
            params![repo.full_name(), issue_number],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version = schema_version(conn)?;
    check_version(version)?;

    conn.execute_batch(SCHEMA)?;

    if version < SCHEMA_VERSION {
        conn.execute("DELETE FROM schema_version", [])?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        tracing::info!(from = version, to = SCHEMA_VERSION, "Initialized store schema");
    }
    Ok(())
}

fn schema_version(conn: &Connection) -> Result<i64, StoreError> {
    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?
        .unwrap_or(0);
    Ok(version)
}

fn check_version(version: i64) -> Result<(), StoreError> {
    if version > SCHEMA_VERSION {
        return Err(StoreError::Corrupted(format!(
            "database schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }
    Ok(())
}

fn ensure_repository_row(conn: &Connection, repo: &RepoId) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO repositories (full_name, owner, name, created_at_ms)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            repo.full_name(),
            repo.owner,
            repo.name,
            Utc::now().timestamp_millis()
        ],
    )?;
    Ok(())
}

fn stored_numbers(conn: &Connection, key: &str) -> Result<Vec<u64>, StoreError> {
    let mut stmt = conn.prepare("SELECT number FROM issues WHERE repo = ?1 ORDER BY number")?;
    let numbers = stmt
        .query_map(params![key], |row| row.get::<_, u64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(numbers)
}

fn from_ms(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupted(format!("timestamp out of range: {}", ms)))
}

/// Raw `issues` row; decoding into [`Issue`] can fail on damaged data.
struct IssueRow {
    number: u64,
    title: String,
    body: Option<String>,
    author: String,
    state: String,
    created_at_ms: i64,
    updated_at_ms: i64,
    comment_count: u32,
    labels: String,
    assignees: String,
}

impl IssueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            number: row.get(0)?,
            title: row.get(1)?,
            body: row.get(2)?,
            author: row.get(3)?,
            state: row.get(4)?,
            created_at_ms: row.get(5)?,
            updated_at_ms: row.get(6)?,
            comment_count: row.get(7)?,
            labels: row.get(8)?,
            assignees: row.get(9)?,
        })
    }

    fn into_issue(self) -> Result<Issue, StoreError> {
        let state = IssueState::parse(&self.state).ok_or_else(|| {
            StoreError::Corrupted(format!("issue #{} has state '{}'", self.number, self.state))
        })?;

        Ok(Issue {
            number: self.number,
            title: self.title,
            body: self.body,
            author: self.author,
            state,
            created_at: from_ms(self.created_at_ms)?,
            updated_at: from_ms(self.updated_at_ms)?,
            comment_count: self.comment_count,
            labels: serde_json::from_str(&self.labels)?,
            assignees: serde_json::from_str(&self.assignees)?,
        })
    }
}
