//! Tracker state consumed by dispatch and the PR monitor.
//!
//! The tracker owns issues, statuses, PR links and hook registrations. This
//! crate only reads and updates them through [`IssueStore`].

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const STATUS_TODO: &str = "todo";
pub const STATUS_READY: &str = "ready";
pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_DONE: &str = "done";
pub const STATUS_ARCHIVED: &str = "archived";

/// Custom status marking that a PR exists and is waiting on CI or merge.
pub const STATUS_FINISHED: &str = "finished";

/// Statuses every tracker database starts with.
pub const BUILTIN_STATUSES: &[&str] = &[
    STATUS_TODO,
    STATUS_READY,
    STATUS_IN_PROGRESS,
    STATUS_DONE,
    STATUS_ARCHIVED,
];

/// Prefix of tracker issue ids.
pub const ISSUE_ID_PREFIX: &str = "TRK";

/// Expands a bare issue number to a full id (`12` becomes `TRK-12`).
pub fn normalize_issue_id(arg: &str) -> String {
    let arg = arg.trim();
    if !arg.is_empty() && arg.chars().all(|c| c.is_ascii_digit()) {
        format!("{}-{}", ISSUE_ID_PREFIX, arg)
    } else {
        arg.to_string()
    }
}

/// A tracked work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub status: String,
    pub priority: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Issue {
    /// A fresh `todo` issue.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            id: id.into(),
            title: title.into(),
            status: STATUS_TODO.to_string(),
            priority: "p2".to_string(),
            labels: Vec::new(),
            body: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Fields to change on an issue. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub status: Option<String>,
}

impl IssueUpdate {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }
}

/// Association between an issue and its pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestLink {
    pub issue_id: String,
    pub pr_ref: String,
    /// `owner/name` when the PR lives outside the current repository.
    pub repo: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl PullRequestLink {
    pub fn new(issue_id: impl Into<String>, pr_ref: impl Into<String>, repo: Option<String>) -> Self {
        let now = now_rfc3339();
        Self {
            issue_id: issue_id.into(),
            pr_ref: pr_ref.into(),
            repo,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// A registered lifecycle hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub id: i64,
    pub event: String,
    pub run_cmd: String,
    pub cwd: Option<String>,
}

/// Read/write access to tracker state.
#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn get_issue(&self, id: &str) -> Result<Issue>;

    /// Applies `update` and returns the stored issue.
    ///
    /// Statuses must be registered in the tracker.
    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<Issue>;

    /// Registers a custom status.
    ///
    /// Fails with [`crate::Error::StatusExists`] if the name is taken.
    async fn add_status(&self, name: &str) -> Result<()>;

    async fn list_statuses(&self) -> Result<Vec<String>>;

    /// All PR links ordered by issue id, optionally only those for `repo`.
    async fn list_pr_links(&self, repo: Option<&str>) -> Result<Vec<PullRequestLink>>;

    async fn get_pr_link(&self, issue_id: &str) -> Result<PullRequestLink>;

    async fn upsert_pr_link(&self, issue_id: &str, pr_ref: &str, repo: Option<&str>) -> Result<()>;

    /// Hooks registered for `event`, in registration order.
    async fn list_hooks(&self, event: &str) -> Result<Vec<Hook>>;
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
