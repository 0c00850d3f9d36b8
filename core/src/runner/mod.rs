//! Implementation runner invocation.
//!
//! The runner is an external coding agent wrapped by an `exec_<runner>`
//! script. A copy checked into the worktree wins over one on `PATH`.

use std::fmt;
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::exec::{CommandRunner, InteractiveIo};

/// Which agent implements the issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    #[default]
    Codex,
    Claude,
}

impl RunnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerKind::Codex => "codex",
            RunnerKind::Claude => "claude",
        }
    }

    /// Name of the wrapper executable, e.g. `exec_codex`.
    pub fn executable_name(&self) -> String {
        format!("exec_{}", self.as_str())
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the agent is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkMode {
    #[default]
    Execution,
    Plan,
}

impl WorkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkMode::Execution => "execution",
            WorkMode::Plan => "plan",
        }
    }
}

impl fmt::Display for WorkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks `<worktree>/exec_<runner>` if present, else the bare name.
pub fn resolve_executable(worktree: &Path, kind: RunnerKind) -> String {
    let name = kind.executable_name();
    let local = worktree.join(&name);
    if local.exists() {
        local.to_string_lossy().into_owned()
    } else {
        name
    }
}

/// Arguments passed to the runner wrapper.
pub fn build_args(mode: WorkMode, issue_id: &str) -> Vec<String> {
    vec![
        "--sandbox".to_string(),
        "danger-full-access".to_string(),
        mode.as_str().to_string(),
        issue_id.to_string(),
    ]
}

/// Runs the agent interactively inside the worktree.
///
/// The agent's exit status is taken at face value.
pub async fn invoke(
    commands: &dyn CommandRunner,
    worktree: &Path,
    kind: RunnerKind,
    mode: WorkMode,
    issue_id: &str,
    io: InteractiveIo,
) -> Result<()> {
    let program = resolve_executable(worktree, kind);
    let args = build_args(mode, issue_id);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    tracing::info!(runner = %kind, mode = %mode, issue_id = %issue_id, program = %program, "starting implementation runner");
    commands
        .run_interactive(worktree, io, &program, &args)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn executable_names() {
        assert_eq!(RunnerKind::Codex.executable_name(), "exec_codex");
        assert_eq!(RunnerKind::Claude.executable_name(), "exec_claude");
    }

    #[test]
    fn value_enum_rejects_unknown_values() {
        assert_eq!(RunnerKind::from_str("claude", false), Ok(RunnerKind::Claude));
        assert!(RunnerKind::from_str("gemini", false).is_err());
        assert_eq!(WorkMode::from_str("plan", false), Ok(WorkMode::Plan));
        assert!(WorkMode::from_str("review", false).is_err());
    }

    #[test]
    fn build_args_puts_mode_before_issue() {
        assert_eq!(
            build_args(WorkMode::Plan, "TRK-9"),
            vec!["--sandbox", "danger-full-access", "plan", "TRK-9"]
        );
    }

    #[test]
    fn prefers_worktree_copy() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_executable(dir.path(), RunnerKind::Codex), "exec_codex");

        let local = dir.path().join("exec_codex");
        std::fs::write(&local, "#!/bin/sh\n").unwrap();
        assert_eq!(
            resolve_executable(dir.path(), RunnerKind::Codex),
            local.to_string_lossy()
        );
        assert_eq!(resolve_executable(dir.path(), RunnerKind::Claude), "exec_claude");
    }
}
