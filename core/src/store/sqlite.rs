//! SQLite-backed tracker store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_rfc3339, Hook, Issue, IssueStore, IssueUpdate, PullRequestLink, BUILTIN_STATUSES};
use crate::error::{Error, Result};

static STATUS_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("valid status name regex"));

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS issues (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'todo',
    priority TEXT NOT NULL DEFAULT 'p2',
    assignee TEXT,
    due TEXT,
    labels_json TEXT NOT NULL DEFAULT '[]',
    next_action TEXT,
    body TEXT,
    order_index INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS hooks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event TEXT NOT NULL,
    run_cmd TEXT NOT NULL,
    cwd TEXT,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS github_links (
    issue_id TEXT PRIMARY KEY,
    pr_ref TEXT NOT NULL,
    repo TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS statuses (
    name TEXT PRIMARY KEY,
    system INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Tracker database opened with `rusqlite`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        init_schema(&conn)?;
        tracing::debug!(path = ?path, "opened tracker database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory database with the tracker schema.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("database lock poisoned".to_string()))
    }

    /// Inserts an issue as-is.
    pub fn insert_issue(&self, issue: &Issue) -> Result<()> {
        let labels = serde_json::to_string(&issue.labels)?;
        self.conn()?.execute(
            "INSERT INTO issues(id, title, status, priority, labels_json, body, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                issue.id,
                issue.title,
                issue.status,
                issue.priority,
                labels,
                issue.body,
                issue.created_at,
                issue.updated_at
            ],
        )?;
        Ok(())
    }

    /// Registers a hook command for `event` and returns its id.
    pub fn add_hook(&self, event: &str, run_cmd: &str, cwd: Option<&str>) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO hooks(event, run_cmd, cwd, created_at) VALUES(?1, ?2, ?3, ?4)",
            params![event, run_cmd, cwd, now_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    let now = now_rfc3339();
    for name in BUILTIN_STATUSES {
        conn.execute(
            "INSERT INTO statuses(name, system, created_at, updated_at)
             VALUES(?1, 1, ?2, ?2)
             ON CONFLICT(name) DO NOTHING",
            params![name, now],
        )?;
    }
    Ok(())
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<(Issue, String)> {
    let labels_json: String = row.get(4)?;
    Ok((
        Issue {
            id: row.get(0)?,
            title: row.get(1)?,
            status: row.get(2)?,
            priority: row.get(3)?,
            labels: Vec::new(),
            body: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        },
        labels_json,
    ))
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<PullRequestLink> {
    let repo: Option<String> = row.get(2)?;
    Ok(PullRequestLink {
        issue_id: row.get(0)?,
        pr_ref: row.get(1)?,
        repo: repo.filter(|r| !r.is_empty()),
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn load_issue(conn: &Connection, id: &str) -> Result<Issue> {
    let found = conn
        .query_row(
            "SELECT id, title, status, priority, labels_json, body, created_at, updated_at
             FROM issues WHERE id = ?1",
            params![id],
            issue_from_row,
        )
        .optional()?;
    let (mut issue, labels_json) = found.ok_or_else(|| Error::NotFound(format!("issue {}", id)))?;
    issue.labels = serde_json::from_str(&labels_json)?;
    Ok(issue)
}

fn status_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM statuses WHERE name = ?1",
            params![name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl IssueStore for SqliteStore {
    async fn get_issue(&self, id: &str) -> Result<Issue> {
        let conn = self.conn()?;
        load_issue(&conn, id)
    }

    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<Issue> {
        let conn = self.conn()?;
        let mut issue = load_issue(&conn, id)?;

        if let Some(title) = update.title {
            issue.title = title;
        }
        if let Some(status) = update.status {
            if !status_exists(&conn, &status)? {
                return Err(Error::Store(format!("invalid status: {}", status)));
            }
            issue.status = status;
        }
        issue.updated_at = now_rfc3339();

        conn.execute(
            "UPDATE issues SET title = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
            params![issue.title, issue.status, issue.updated_at, id],
        )?;
        tracing::debug!(issue_id = %id, status = %issue.status, "updated issue");
        Ok(issue)
    }

    async fn add_status(&self, name: &str) -> Result<()> {
        let name = name.trim().to_lowercase();
        if !STATUS_NAME_RE.is_match(&name) {
            return Err(Error::Store(format!("invalid status name: {}", name)));
        }
        let conn = self.conn()?;
        if status_exists(&conn, &name)? {
            return Err(Error::StatusExists(name));
        }
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO statuses(name, system, created_at, updated_at) VALUES(?1, 0, ?2, ?2)",
            params![name, now],
        )?;
        Ok(())
    }

    async fn list_statuses(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM statuses
             ORDER BY CASE name
                 WHEN 'todo' THEN 0
                 WHEN 'ready' THEN 1
                 WHEN 'in_progress' THEN 2
                 WHEN 'done' THEN 3
                 WHEN 'archived' THEN 4
                 ELSE 5
             END, name ASC",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    async fn list_pr_links(&self, repo: Option<&str>) -> Result<Vec<PullRequestLink>> {
        let conn = self.conn()?;
        let links = match repo.filter(|r| !r.is_empty()) {
            Some(repo) => {
                let mut stmt = conn.prepare(
                    "SELECT issue_id, pr_ref, repo, created_at, updated_at FROM github_links
                     WHERE repo = ?1 ORDER BY issue_id ASC",
                )?;
                let rows = stmt.query_map(params![repo], link_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT issue_id, pr_ref, repo, created_at, updated_at FROM github_links
                     ORDER BY issue_id ASC",
                )?;
                let rows = stmt.query_map([], link_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(links)
    }

    async fn get_pr_link(&self, issue_id: &str) -> Result<PullRequestLink> {
        self.conn()?
            .query_row(
                "SELECT issue_id, pr_ref, repo, created_at, updated_at FROM github_links
                 WHERE issue_id = ?1",
                params![issue_id],
                link_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("pull request link for {}", issue_id)))
    }

    async fn upsert_pr_link(&self, issue_id: &str, pr_ref: &str, repo: Option<&str>) -> Result<()> {
        let now = now_rfc3339();
        self.conn()?.execute(
            "INSERT INTO github_links(issue_id, pr_ref, repo, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(issue_id) DO UPDATE SET
                 pr_ref = excluded.pr_ref,
                 repo = excluded.repo,
                 updated_at = excluded.updated_at",
            params![issue_id, pr_ref, repo.filter(|r| !r.is_empty()), now],
        )?;
        Ok(())
    }

    async fn list_hooks(&self, event: &str) -> Result<Vec<Hook>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, event, run_cmd, cwd FROM hooks WHERE event = ?1 ORDER BY id ASC")?;
        let hooks = stmt
            .query_map(params![event], |row| {
                let cwd: Option<String> = row.get(3)?;
                Ok(Hook {
                    id: row.get(0)?,
                    event: row.get(1)?,
                    run_cmd: row.get(2)?,
                    cwd: cwd.filter(|c| !c.is_empty()),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hooks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{STATUS_DONE, STATUS_FINISHED, STATUS_IN_PROGRESS};
    use tempfile::TempDir;

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut issue = Issue::new("TRK-1", "add dispatch command");
        issue.labels = vec!["cli".to_string()];
        store.insert_issue(&issue).unwrap();
        store
    }

    #[tokio::test]
    async fn opens_file_database_and_seeds_statuses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("track.db");
        let store = SqliteStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(
            store.list_statuses().await.unwrap(),
            vec!["todo", "ready", "in_progress", "done", "archived"]
        );

        drop(store);
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.list_statuses().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn get_issue_round_trips_labels() {
        let store = seeded();
        let issue = store.get_issue("TRK-1").await.unwrap();
        assert_eq!(issue.title, "add dispatch command");
        assert_eq!(issue.labels, vec!["cli"]);
        assert!(matches!(
            store.get_issue("TRK-9").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_validates_against_registered_statuses() {
        let store = seeded();
        let updated = store
            .update_issue("TRK-1", IssueUpdate::status(STATUS_IN_PROGRESS))
            .await
            .unwrap();
        assert_eq!(updated.status, STATUS_IN_PROGRESS);

        let err = store
            .update_issue("TRK-1", IssueUpdate::status(STATUS_FINISHED))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid status: finished"));

        store.add_status(STATUS_FINISHED).await.unwrap();
        let updated = store
            .update_issue("TRK-1", IssueUpdate::status(STATUS_FINISHED))
            .await
            .unwrap();
        assert_eq!(updated.status, STATUS_FINISHED);
        assert_eq!(store.get_issue("TRK-1").await.unwrap().status, STATUS_FINISHED);
    }

    #[tokio::test]
    async fn add_status_rejects_duplicates_and_bad_names() {
        let store = seeded();
        store.add_status(" Finished ").await.unwrap();
        assert!(matches!(
            store.add_status("finished").await,
            Err(Error::StatusExists(_))
        ));
        assert!(matches!(
            store.add_status(STATUS_DONE).await,
            Err(Error::StatusExists(_))
        ));
        assert!(matches!(store.add_status("9lives").await, Err(Error::Store(_))));
        assert_eq!(store.list_statuses().await.unwrap().last().unwrap(), "finished");
    }

    #[tokio::test]
    async fn pr_links_upsert_and_filter() {
        let store = seeded();
        store.upsert_pr_link("TRK-2", "7", Some("o/b")).await.unwrap();
        store.upsert_pr_link("TRK-1", "3", None).await.unwrap();
        store.upsert_pr_link("TRK-1", "4", Some("o/a")).await.unwrap();

        let all = store.list_pr_links(None).await.unwrap();
        assert_eq!(
            all.iter().map(|l| l.issue_id.as_str()).collect::<Vec<_>>(),
            vec!["TRK-1", "TRK-2"]
        );
        assert_eq!(all[0].pr_ref, "4");
        assert_eq!(all[0].repo.as_deref(), Some("o/a"));

        let only_b = store.list_pr_links(Some("o/b")).await.unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].issue_id, "TRK-2");

        assert!(matches!(
            store.get_pr_link("TRK-5").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn hooks_listed_in_registration_order() {
        let store = seeded();
        let first = store.add_hook("issue.updated", "echo one", None).unwrap();
        store.add_hook("issue.completed", "echo other", None).unwrap();
        let second = store.add_hook("issue.updated", "echo two", Some("/tmp")).unwrap();

        let hooks = store.list_hooks("issue.updated").await.unwrap();
        assert_eq!(hooks.iter().map(|h| h.id).collect::<Vec<_>>(), vec![first, second]);
        assert_eq!(hooks[1].cwd.as_deref(), Some("/tmp"));
    }
}
