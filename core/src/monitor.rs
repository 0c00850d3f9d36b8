//! PR monitoring for linked issues.
//!
//! Polls every issue/PR link, reports CI failures with a tail of the failing
//! job's log, and moves issues to `done` once their PR is merged.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::checks::{self, Check, LOG_TAIL_LINES};
use crate::error::Result;
use crate::exec::CommandRunner;
use crate::hooks::HookRunner;
use crate::lifecycle;
use crate::store::{IssueStore, PullRequestLink, STATUS_DONE};

/// Poll interval used by `watch` when none is given.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Options for the watch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    /// Only links for this repository are polled.
    pub repo: Option<String>,
    pub interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            repo: None,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// What one poll observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub links: usize,
    /// Failing checks reported for the first time.
    pub new_failures: usize,
    /// Issues moved to `done`.
    pub completed: Vec<String>,
}

/// Key identifying one failing check of one issue.
pub fn failure_key(issue_id: &str, check: &Check) -> String {
    format!("{}::{}::{}", issue_id, check.name, check.link)
}

/// Watches linked PRs. Remembers reported failures for its own lifetime.
pub struct PrMonitor<'a> {
    store: &'a dyn IssueStore,
    hooks: &'a dyn HookRunner,
    commands: &'a dyn CommandRunner,
    workdir: PathBuf,
    repo_filter: Option<String>,
    default_repo: Option<String>,
    seen_failures: HashSet<String>,
}

impl<'a> PrMonitor<'a> {
    /// `workdir` is where `gh` runs.
    pub fn new(
        store: &'a dyn IssueStore,
        hooks: &'a dyn HookRunner,
        commands: &'a dyn CommandRunner,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            hooks,
            commands,
            workdir: workdir.into(),
            repo_filter: None,
            default_repo: None,
            seen_failures: HashSet::new(),
        }
    }

    /// Restricts polling to links for `repo`.
    pub fn with_repo_filter(mut self, repo: Option<String>) -> Self {
        self.repo_filter = repo.filter(|r| !r.trim().is_empty());
        self
    }

    /// Repository for links that do not name one.
    pub fn with_default_repo(mut self, repo: Option<String>) -> Self {
        self.default_repo = repo.filter(|r| !r.trim().is_empty());
        self
    }

    pub fn seen_failures(&self) -> &HashSet<String> {
        &self.seen_failures
    }

    fn repo_for(&self, link: &PullRequestLink) -> Option<String> {
        checks::repo_for_link(
            link,
            self.repo_filter.as_deref(),
            self.default_repo.as_deref(),
        )
    }

    /// Inspects every link once.
    ///
    /// Check and log fetch errors are printed and skipped. Merge status,
    /// store and hook errors end the poll.
    pub async fn poll_once(&mut self, out: &mut (dyn Write + Send)) -> Result<PollReport> {
        let links = self
            .store
            .list_pr_links(self.repo_filter.as_deref())
            .await?;
        let mut report = PollReport {
            links: links.len(),
            ..PollReport::default()
        };

        for link in &links {
            let repo = self.repo_for(link);
            report.new_failures += self.report_failures(link, repo.as_deref(), out).await?;

            let merged =
                checks::fetch_pr_merged(self.commands, &self.workdir, &link.pr_ref, repo.as_deref())
                    .await?;
            if !merged {
                continue;
            }
            lifecycle::transition(self.store, self.hooks, &link.issue_id, STATUS_DONE).await?;
            writeln!(out, "updated {} -> done (pr {})", link.issue_id, link.pr_ref)?;
            report.completed.push(link.issue_id.clone());
        }

        tracing::debug!(
            links = report.links,
            new_failures = report.new_failures,
            completed = report.completed.len(),
            "poll finished"
        );
        Ok(report)
    }

    async fn report_failures(
        &mut self,
        link: &PullRequestLink,
        repo: Option<&str>,
        out: &mut (dyn Write + Send),
    ) -> Result<usize> {
        let checks =
            match checks::fetch_pr_checks(self.commands, &self.workdir, &link.pr_ref, repo).await {
                Ok(checks) => checks,
                Err(e) => {
                    writeln!(out, "checks error for {} (pr {}): {}", link.issue_id, link.pr_ref, e)?;
                    return Ok(0);
                }
            };

        let mut reported = 0;
        for check in checks.iter().filter(|c| c.is_failure()) {
            if !self.seen_failures.insert(failure_key(&link.issue_id, check)) {
                continue;
            }
            reported += 1;
            writeln!(out, "failure: {} ({})", check.name, check.link)?;
            tracing::warn!(issue_id = %link.issue_id, check = %check.name, "check failed");

            match checks::fetch_failure_log(self.commands, &self.workdir, check, repo).await {
                Ok(log) => writeln!(
                    out,
                    "--- log: {} ---\n{}",
                    check.name,
                    checks::tail_lines(&log, LOG_TAIL_LINES)
                )?,
                Err(e) => writeln!(out, "log fetch error: {}", e)?,
            }
        }
        Ok(reported)
    }

    /// Polls now, then every `interval` until `cancel` fires.
    ///
    /// An error from the first poll is returned. Later errors are written to
    /// `err_out` and the loop keeps going. Cancellation is only observed
    /// between polls.
    pub async fn run(
        &mut self,
        interval: Duration,
        cancel: CancellationToken,
        out: &mut (dyn Write + Send),
        err_out: &mut (dyn Write + Send),
    ) -> Result<()> {
        self.poll_once(out).await?;

        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("watch cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(out).await {
                        tracing::warn!(error = %e, "poll failed");
                        writeln!(err_out, "watch error: {}", e)?;
                    }
                }
            }
        }
    }
}
