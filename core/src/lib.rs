//! track-dispatch - issue delivery for the track issue tracker
//!
//! Takes a tracked issue through worktree, implementation agent, commit,
//! pull request, CI and merge, and watches linked pull requests so issues
//! close themselves once their PR lands.

pub mod checks;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod hooks;
pub mod lifecycle;
pub mod monitor;
pub mod pr;
pub mod runner;
pub mod store;
pub mod worktree;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{Error, Result};

pub use checks::{summarize_checks, Check, CheckSummary};
pub use config::{parse_interval, Settings, Validate, ValidationResult};
pub use dispatch::{DispatchOptions, DispatchOutcome, Dispatcher, Step};
pub use exec::{CommandRunner, InteractiveIo, SystemCommandRunner};
pub use hooks::{HookEvent, HookRunner, ShellHooks};
pub use monitor::{PrMonitor, PollReport, WatchOptions};
pub use pr::{normalize_pr_ref, MergeMethod};
pub use runner::{RunnerKind, WorkMode};
pub use store::{normalize_issue_id, Issue, IssueStore, PullRequestLink, SqliteStore};
pub use worktree::issue_slug;
