//! Per-issue git worktrees.
//!
//! Each work item gets a deterministic branch (`codex/<slug>`) and a
//! worktree under `<repo-root>/.worktree/<slug>`. Preparing an existing
//! worktree is a no-op, so a failed dispatch can simply be re-run.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::exec::CommandRunner;

/// Prefix for branches created by dispatch.
pub const BRANCH_PREFIX: &str = "codex/";

/// Directory under the repository root that holds dispatch worktrees.
pub const WORKTREE_DIR: &str = ".worktree";

/// Derives a filesystem- and branch-safe slug from an issue id.
///
/// Keeps `[a-z0-9._-]` after lowercasing; every run of other characters
/// becomes a single `-`. Falls back to `issue` when nothing survives.
pub fn issue_slug(issue_id: &str) -> String {
    let raw = issue_id.trim().to_lowercase();
    let mut slug = String::with_capacity(raw.len());
    let mut prev_dash = false;

    for c in raw.chars() {
        let allowed = c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-');
        if allowed {
            if c == '-' {
                if prev_dash {
                    continue;
                }
                prev_dash = true;
            } else {
                prev_dash = false;
            }
            slug.push(c);
        } else if !prev_dash && !slug.is_empty() {
            slug.push('-');
            prev_dash = true;
        }
    }

    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "issue".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Branch name used for an issue.
pub fn branch_name(issue_id: &str) -> String {
    format!("{}{}", BRANCH_PREFIX, issue_slug(issue_id))
}

/// Worktree location for an issue under `repo_root`.
pub fn worktree_path(repo_root: &Path, issue_id: &str) -> PathBuf {
    repo_root.join(WORKTREE_DIR).join(issue_slug(issue_id))
}

/// Resolves the top-level directory of the repository containing `cwd`.
pub async fn repo_root(runner: &dyn CommandRunner, cwd: &Path) -> Result<PathBuf> {
    let out = runner
        .run(cwd, "git", &["rev-parse", "--show-toplevel"])
        .await?;
    let root = out.trim();
    if root.is_empty() {
        return Err(Error::Git("resolve repository root".to_string()));
    }
    Ok(PathBuf::from(root))
}

/// A worktree ready for the implementation runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedWorktree {
    pub repo_root: PathBuf,
    pub path: PathBuf,
    pub branch: String,
    /// False when an existing worktree was reused.
    pub created: bool,
}

/// Ensures the worktree for `issue_id` exists.
///
/// The branch is attached if it already exists, otherwise it is created
/// from `base` in the same `git worktree add` call.
pub async fn prepare_worktree(
    runner: &dyn CommandRunner,
    cwd: &Path,
    issue_id: &str,
    base: &str,
) -> Result<PreparedWorktree> {
    let root = repo_root(runner, cwd).await?;
    let branch = branch_name(issue_id);
    let path = worktree_path(&root, issue_id);

    tokio::fs::create_dir_all(root.join(WORKTREE_DIR)).await?;

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_dir() => {
            tracing::info!(path = ?path, branch = %branch, "reusing existing worktree");
            return Ok(PreparedWorktree {
                repo_root: root,
                path,
                branch,
                created: false,
            });
        }
        Ok(_) => return Err(Error::WorktreeNotDirectory(path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let path_arg = path.to_string_lossy().into_owned();
    let branch_ref = format!("refs/heads/{}", branch);
    let branch_exists = runner
        .run(&root, "git", &["show-ref", "--verify", "--quiet", &branch_ref])
        .await
        .is_ok();

    if branch_exists {
        runner
            .run(&root, "git", &["worktree", "add", &path_arg, &branch])
            .await?;
    } else {
        runner
            .run(
                &root,
                "git",
                &["worktree", "add", "-b", &branch, &path_arg, base],
            )
            .await?;
    }

    tracing::info!(path = ?path, branch = %branch, existing_branch = branch_exists, "created worktree");
    Ok(PreparedWorktree {
        repo_root: root,
        path,
        branch,
        created: true,
    })
}
