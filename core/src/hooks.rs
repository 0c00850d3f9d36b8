//! Lifecycle hook execution.
//!
//! Hooks are shell commands registered in the tracker for an event. They
//! run through `sh -c`, one at a time in registration order, with
//! `TRACK_EVENT` and `TRACK_ISSUE_ID` set.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::store::{Hook, IssueStore};

/// Events fired when dispatch or the monitor changes an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    IssueUpdated,
    IssueStatusChanged,
    IssueCompleted,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::IssueUpdated => "issue.updated",
            HookEvent::IssueStatusChanged => "issue.status_changed",
            HookEvent::IssueCompleted => "issue.completed",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fires lifecycle events.
#[async_trait]
pub trait HookRunner: Send + Sync {
    /// Runs every hook registered for `event`. The first failure stops the
    /// remaining hooks and is returned.
    async fn fire(&self, event: HookEvent, issue_id: &str) -> Result<()>;
}

/// Runs the hooks stored in the tracker as shell commands.
pub struct ShellHooks {
    store: Arc<dyn IssueStore>,
    inherit_output: bool,
}

impl ShellHooks {
    pub fn new(store: Arc<dyn IssueStore>) -> Self {
        Self {
            store,
            inherit_output: true,
        }
    }

    /// Discards hook output instead of passing it through.
    pub fn quiet(mut self) -> Self {
        self.inherit_output = false;
        self
    }

    async fn run_one(&self, hook: &Hook, event: HookEvent, issue_id: &str) -> Result<()> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&hook.run_cmd)
            .env("TRACK_EVENT", event.as_str())
            .env("TRACK_ISSUE_ID", issue_id)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &hook.cwd {
            cmd.current_dir(cwd);
        }
        if !self.inherit_output {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let status = cmd.status().await.map_err(|e| Error::Hook {
            id: hook.id,
            reason: e.to_string(),
        })?;
        if !status.success() {
            return Err(Error::Hook {
                id: hook.id,
                reason: status.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HookRunner for ShellHooks {
    async fn fire(&self, event: HookEvent, issue_id: &str) -> Result<()> {
        let hooks = self.store.list_hooks(event.as_str()).await?;
        for hook in &hooks {
            tracing::debug!(hook_id = hook.id, event = %event, issue_id = %issue_id, "running hook");
            self.run_one(hook, event, issue_id).await?;
        }
        Ok(())
    }
}
