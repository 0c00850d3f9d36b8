//! Pull request publishing.
//!
//! Change detection, commit and push, PR creation or reuse, the CI gate and
//! the final merge. Every operation runs inside the issue's worktree.

use std::fmt;
use std::path::Path;

use clap::ValueEnum;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::exec::CommandRunner;

static PR_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]+)$").expect("valid PR number regex"));

/// Reduces a PR reference to its number.
///
/// Works for bare numbers, PR URLs and `owner/repo#N`. Input without a
/// trailing number is returned trimmed.
pub fn normalize_pr_ref(value: &str) -> String {
    let value = value.trim();
    match PR_NUMBER_RE.captures(value).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().to_string(),
        None => value.to_string(),
    }
}

/// How a pull request gets merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    #[default]
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }

    /// The `gh pr merge` flag for this method.
    pub fn flag(&self) -> &'static str {
        match self {
            MergeMethod::Merge => "--merge",
            MergeMethod::Squash => "--squash",
            MergeMethod::Rebase => "--rebase",
        }
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the worktree holds that has not reached the remote yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeSet {
    pub has_uncommitted_changes: bool,
    pub has_unpushed_commits: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        !self.has_uncommitted_changes && !self.has_unpushed_commits
    }
}

/// Commit message used for work produced by the runner.
pub fn commit_message(issue_id: &str) -> String {
    format!("chore: apply {} via track dispatch", issue_id)
}

pub fn pr_title(issue_id: &str, issue_title: &str) -> String {
    format!("{}: {}", issue_id, issue_title)
}

pub fn pr_body(issue_id: &str) -> String {
    format!(
        "## Summary\n- Automated by `track dispatch`\n\nCloses {}\n",
        issue_id
    )
}

#[derive(Debug, Deserialize)]
struct PrListItem {
    number: u64,
}

/// Drives git and `gh` for one worktree.
pub struct PrPublisher<'a> {
    runner: &'a dyn CommandRunner,
    worktree: &'a Path,
}

impl<'a> PrPublisher<'a> {
    pub fn new(runner: &'a dyn CommandRunner, worktree: &'a Path) -> Self {
        Self { runner, worktree }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        self.runner.run(self.worktree, "git", args).await
    }

    async fn gh(&self, args: &[&str]) -> Result<String> {
        self.runner.run(self.worktree, "gh", args).await
    }

    /// Looks for uncommitted changes and commits ahead of `base`.
    pub async fn detect_changes(&self, base: &str) -> Result<ChangeSet> {
        let status = self.git(&["status", "--porcelain"]).await?;
        let range = format!("{}..HEAD", base);
        let count = self.git(&["rev-list", "--count", &range]).await?;
        let ahead: u64 = count.trim().parse().map_err(|e| {
            Error::Git(format!("parse ahead commit count {:?}: {}", count.trim(), e))
        })?;

        let changes = ChangeSet {
            has_uncommitted_changes: !status.trim().is_empty(),
            has_unpushed_commits: ahead > 0,
        };
        tracing::debug!(
            worktree = ?self.worktree,
            uncommitted = changes.has_uncommitted_changes,
            ahead,
            "detected changes"
        );
        Ok(changes)
    }

    /// Commits everything if the worktree is dirty, then pushes the branch.
    pub async fn commit_and_push(
        &self,
        changes: ChangeSet,
        branch: &str,
        issue_id: &str,
    ) -> Result<()> {
        if changes.has_uncommitted_changes {
            self.git(&["add", "-A"]).await?;
            self.git(&["commit", "-m", &commit_message(issue_id)]).await?;
        }
        self.git(&["push", "-u", "origin", branch]).await?;
        tracing::info!(branch = %branch, "pushed branch");
        Ok(())
    }

    /// Returns the open PR for `branch`, creating one when none exists.
    pub async fn ensure_pr(
        &self,
        branch: &str,
        base: &str,
        issue_id: &str,
        issue_title: &str,
    ) -> Result<String> {
        let listed = self
            .gh(&["pr", "list", "--head", branch, "--state", "open", "--json", "number"])
            .await?;
        let open: Vec<PrListItem> = serde_json::from_str(listed.trim())
            .map_err(|e| Error::GitHub(format!("decode gh pr list output: {}", e)))?;
        if let Some(existing) = open.first() {
            tracing::info!(branch = %branch, pr = existing.number, "reusing open pull request");
            return Ok(existing.number.to_string());
        }

        let title = pr_title(issue_id, issue_title);
        let body = pr_body(issue_id);
        let created = self
            .gh(&[
                "pr", "create", "--head", branch, "--base", base, "--title", &title, "--body",
                &body,
            ])
            .await?;
        let pr_ref = normalize_pr_ref(&created);
        if pr_ref.is_empty() {
            return Err(Error::GitHub(
                "failed to resolve PR number from gh pr create output".to_string(),
            ));
        }
        tracing::info!(branch = %branch, pr = %pr_ref, "created pull request");
        Ok(pr_ref)
    }

    /// Blocks until CI resolves. Any failing check is an error.
    pub async fn watch_checks(&self, pr_ref: &str) -> Result<()> {
        self.gh(&["pr", "checks", pr_ref, "--watch"]).await?;
        Ok(())
    }

    /// Merges the PR and deletes its branch.
    pub async fn merge(&self, pr_ref: &str, method: MergeMethod) -> Result<()> {
        self.gh(&["pr", "merge", pr_ref, method.flag(), "--delete-branch"])
            .await?;
        tracing::info!(pr = %pr_ref, method = %method, "merged pull request");
        Ok(())
    }
}

/// Turns on GitHub auto-merge for a PR.
pub async fn enable_auto_merge(
    runner: &dyn CommandRunner,
    dir: &Path,
    pr_ref: &str,
    method: MergeMethod,
    repo: Option<&str>,
) -> Result<()> {
    let mut args = vec!["pr", "merge", pr_ref, "--auto", method.flag()];
    if let Some(repo) = repo {
        args.push("--repo");
        args.push(repo);
    }
    runner.run(dir, "gh", &args).await?;
    Ok(())
}
