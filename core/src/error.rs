//! Error types for dispatch and PR monitoring.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for dispatch and monitor operations.
#[derive(Error, Debug)]
pub enum Error {
    /// An external program could not be started.
    #[error("failed to start {command}: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An external program exited unsuccessfully.
    ///
    /// `detail` is the captured output, or the exit status when the program
    /// printed nothing.
    #[error("{command} failed: {detail}")]
    CommandFailed { command: String, detail: String },

    /// Git produced output we could not interpret.
    #[error("git operation failed: {0}")]
    Git(String),

    /// GitHub CLI produced output we could not interpret.
    #[error("GitHub operation failed: {0}")]
    GitHub(String),

    /// A check link does not point at a GitHub Actions run.
    #[error("unsupported check link: {0}")]
    UnsupportedCheckLink(String),

    /// The worktree location is occupied by something that is not a directory.
    #[error("worktree path exists and is not a directory: {}", .0.display())]
    WorktreeNotDirectory(PathBuf),

    /// Issue store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Lookup in the issue store found nothing.
    #[error("{0} not found")]
    NotFound(String),

    /// A custom status was registered twice.
    #[error("status already exists: {0}")]
    StatusExists(String),

    /// A lifecycle hook failed.
    #[error("hook({id}) failed: {reason}")]
    Hook { id: i64, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A dispatch step failed. Carries the step number and its name.
    #[error("step {index} ({name}): {source}")]
    Step {
        index: usize,
        name: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding error.
    #[error("decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;
