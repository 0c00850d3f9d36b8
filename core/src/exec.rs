//! External command execution.
//!
//! Every side effect the orchestrator and monitor have on the outside world
//! goes through [`CommandRunner`]: git, the GitHub CLI and the implementation
//! agent are all plain subprocesses. Tests swap in a scripted runner and
//! assert on exactly which commands were issued, in which order.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Standard streams handed to an interactive subprocess.
#[derive(Debug)]
pub struct InteractiveIo {
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
}

impl InteractiveIo {
    /// Attaches the child to this process's own terminal streams.
    pub fn inherit() -> Self {
        Self {
            stdin: Stdio::inherit(),
            stdout: Stdio::inherit(),
            stderr: Stdio::inherit(),
        }
    }

    /// Detaches the child from all streams.
    pub fn null() -> Self {
        Self {
            stdin: Stdio::null(),
            stdout: Stdio::null(),
            stderr: Stdio::null(),
        }
    }
}

impl Default for InteractiveIo {
    fn default() -> Self {
        Self::inherit()
    }
}

/// Capability to run external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program args..` in `dir` and returns its trimmed combined output.
    ///
    /// A non-zero exit becomes [`Error::CommandFailed`] carrying the program,
    /// the arguments and the captured output.
    async fn run(&self, dir: &Path, program: &str, args: &[&str]) -> Result<String>;

    /// Runs `program args..` in `dir` with the given streams attached.
    ///
    /// Nothing is captured; only the exit status matters.
    async fn run_interactive(
        &self,
        dir: &Path,
        io: InteractiveIo,
        program: &str,
        args: &[&str],
    ) -> Result<()>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

/// Formats a command line for error messages.
pub fn display_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, dir: &Path, program: &str, args: &[&str]) -> Result<String> {
        let command = display_command(program, args);
        tracing::debug!(dir = ?dir, command = %command, "running command");

        let output = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| Error::CommandSpawn {
                command: command.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let trimmed = combined.trim().to_string();

        if !output.status.success() {
            tracing::debug!(command = %command, status = %output.status, "command failed");
            let detail = if trimmed.is_empty() {
                output.status.to_string()
            } else {
                trimmed
            };
            return Err(Error::CommandFailed { command, detail });
        }

        Ok(trimmed)
    }

    async fn run_interactive(
        &self,
        dir: &Path,
        io: InteractiveIo,
        program: &str,
        args: &[&str],
    ) -> Result<()> {
        let command = display_command(program, args);
        tracing::info!(dir = ?dir, command = %command, "running interactive command");

        let status = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdin(io.stdin)
            .stdout(io.stdout)
            .stderr(io.stderr)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| Error::CommandSpawn {
                command: command.clone(),
                source,
            })?;

        if !status.success() {
            return Err(Error::CommandFailed {
                command,
                detail: status.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn display_command_joins_arguments() {
        assert_eq!(display_command("git", &[]), "git");
        assert_eq!(
            display_command("git", &["status", "--porcelain"]),
            "git status --porcelain"
        );
    }

    #[tokio::test]
    async fn run_trims_captured_output() {
        let dir = TempDir::new().unwrap();
        let out = SystemCommandRunner::new()
            .run(dir.path(), "sh", &["-c", "printf '  hello \\n\\n'"])
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn run_captures_stderr_alongside_stdout() {
        let dir = TempDir::new().unwrap();
        let out = SystemCommandRunner::new()
            .run(dir.path(), "sh", &["-c", "echo out; echo err >&2"])
            .await
            .unwrap();
        assert!(out.contains("out"));
        assert!(out.contains("err"));
    }

    #[tokio::test]
    async fn run_failure_embeds_command_and_output() {
        let dir = TempDir::new().unwrap();
        let err = SystemCommandRunner::new()
            .run(dir.path(), "sh", &["-c", "echo boom; exit 3"])
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("sh -c echo boom; exit 3"), "{msg}");
        assert!(msg.ends_with("failed: boom"), "{msg}");
    }

    #[tokio::test]
    async fn run_failure_without_output_reports_status() {
        let dir = TempDir::new().unwrap();
        let err = SystemCommandRunner::new()
            .run(dir.path(), "sh", &["-c", "exit 2"])
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed { detail, .. } => assert!(detail.contains('2'), "{detail}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn run_reports_missing_program() {
        let dir = TempDir::new().unwrap();
        let err = SystemCommandRunner::new()
            .run(dir.path(), "definitely-not-a-real-program-xyz", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandSpawn { .. }));
    }

    #[tokio::test]
    async fn run_interactive_returns_exit_error() {
        let dir = TempDir::new().unwrap();
        let runner = SystemCommandRunner::new();
        runner
            .run_interactive(dir.path(), InteractiveIo::null(), "sh", &["-c", "exit 0"])
            .await
            .unwrap();
        let err = runner
            .run_interactive(dir.path(), InteractiveIo::null(), "sh", &["-c", "exit 1"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }
}
