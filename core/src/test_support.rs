//! Test doubles for the command runner, the tracker store and hooks.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::exec::{display_command, CommandRunner, InteractiveIo};
use crate::hooks::{HookEvent, HookRunner};
use crate::store::{
    now_rfc3339, Hook, Issue, IssueStore, IssueUpdate, PullRequestLink, BUILTIN_STATUSES,
};

type SideEffect = Box<dyn FnOnce() + Send>;

/// One command the code under test is expected to issue.
pub struct Expectation {
    interactive: bool,
    dir: PathBuf,
    program: String,
    args: Vec<String>,
    output: String,
    error: Option<String>,
    after: Option<SideEffect>,
}

impl Expectation {
    /// A captured command.
    pub fn run(dir: impl AsRef<Path>, program: &str, args: &[&str]) -> Self {
        Self {
            interactive: false,
            dir: dir.as_ref().to_path_buf(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            output: String::new(),
            error: None,
            after: None,
        }
    }

    /// An interactive command.
    pub fn interactive(dir: impl AsRef<Path>, program: &str, args: &[&str]) -> Self {
        Self {
            interactive: true,
            ..Self::run(dir, program, args)
        }
    }

    pub fn output(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }

    /// Makes the command exit non-zero with `detail` as its output.
    pub fn fail(mut self, detail: &str) -> Self {
        self.error = Some(detail.to_string());
        self
    }

    /// Runs `f` when the command is issued, e.g. to create files it would.
    pub fn then(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.after = Some(Box::new(f));
        self
    }

    fn describe(&self) -> String {
        format!(
            "{}{} in {}",
            if self.interactive { "interactive " } else { "" },
            display_command(&self.program, &self.args.iter().map(String::as_str).collect::<Vec<_>>()),
            self.dir.display()
        )
    }
}

/// Command runner that checks every call against a script, in order.
///
/// Any mismatch panics with the expected and actual command.
#[derive(Default)]
pub struct ScriptedRunner {
    expected: Mutex<VecDeque<Expectation>>,
    issued: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(expected: Vec<Expectation>) -> Self {
        Self {
            expected: Mutex::new(expected.into()),
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Panics unless every expected command was issued.
    pub fn assert_done(&self) {
        let remaining = self.expected.lock().unwrap();
        if let Some(next) = remaining.front() {
            panic!(
                "{} expected command(s) not issued; next: {}",
                remaining.len(),
                next.describe()
            );
        }
    }

    /// Commands issued so far, as `program args..`.
    pub fn issued(&self) -> Vec<String> {
        self.issued.lock().unwrap().clone()
    }

    fn next(&self, interactive: bool, dir: &Path, program: &str, args: &[&str]) -> Result<String> {
        let command = display_command(program, args);
        self.issued.lock().unwrap().push(command.clone());

        let exp = self.expected.lock().unwrap().pop_front();
        let exp = match exp {
            Some(exp) => exp,
            None => panic!("unexpected extra command: {} in {}", command, dir.display()),
        };

        let actual_args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        if exp.interactive != interactive
            || exp.dir != dir
            || exp.program != program
            || exp.args != actual_args
        {
            panic!(
                "command mismatch\n  expected: {}\n       got: {}{} in {}",
                exp.describe(),
                if interactive { "interactive " } else { "" },
                command,
                dir.display()
            );
        }

        if let Some(after) = exp.after {
            after();
        }
        match exp.error {
            Some(detail) => Err(Error::CommandFailed { command, detail }),
            None => Ok(exp.output),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, dir: &Path, program: &str, args: &[&str]) -> Result<String> {
        self.next(false, dir, program, args)
    }

    async fn run_interactive(
        &self,
        dir: &Path,
        _io: InteractiveIo,
        program: &str,
        args: &[&str],
    ) -> Result<()> {
        self.next(true, dir, program, args).map(|_| ())
    }
}

#[derive(Default)]
struct MemoryState {
    issues: BTreeMap<String, Issue>,
    statuses: Vec<String>,
    links: BTreeMap<String, PullRequestLink>,
    hooks: Vec<Hook>,
}

/// In-memory tracker with the same rules as the SQLite store.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                statuses: BUILTIN_STATUSES.iter().map(|s| s.to_string()).collect(),
                ..MemoryState::default()
            }),
        }
    }

    pub fn with_issue(id: &str, title: &str) -> Self {
        let store = Self::new();
        store.add_issue(id, title);
        store
    }

    pub fn add_issue(&self, id: &str, title: &str) {
        self.state
            .lock()
            .unwrap()
            .issues
            .insert(id.to_string(), Issue::new(id, title));
    }

    pub fn add_link(&self, issue_id: &str, pr_ref: &str, repo: Option<&str>) {
        self.state.lock().unwrap().links.insert(
            issue_id.to_string(),
            PullRequestLink::new(issue_id, pr_ref, repo.map(str::to_string)),
        );
    }

    pub fn status_of(&self, id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .issues
            .get(id)
            .map(|i| i.status.clone())
    }
}

#[async_trait]
impl IssueStore for MemoryStore {
    async fn get_issue(&self, id: &str) -> Result<Issue> {
        self.state
            .lock()
            .unwrap()
            .issues
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("issue {}", id)))
    }

    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<Issue> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = &update.status {
            if !state.statuses.contains(status) {
                return Err(Error::Store(format!("invalid status: {}", status)));
            }
        }
        let issue = state
            .issues
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("issue {}", id)))?;
        if let Some(title) = update.title {
            issue.title = title;
        }
        if let Some(status) = update.status {
            issue.status = status;
        }
        issue.updated_at = now_rfc3339();
        Ok(issue.clone())
    }

    async fn add_status(&self, name: &str) -> Result<()> {
        let name = name.trim().to_lowercase();
        let mut state = self.state.lock().unwrap();
        if state.statuses.contains(&name) {
            return Err(Error::StatusExists(name));
        }
        state.statuses.push(name);
        Ok(())
    }

    async fn list_statuses(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().statuses.clone())
    }

    async fn list_pr_links(&self, repo: Option<&str>) -> Result<Vec<PullRequestLink>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .links
            .values()
            .filter(|l| repo.map_or(true, |r| l.repo.as_deref() == Some(r)))
            .cloned()
            .collect())
    }

    async fn get_pr_link(&self, issue_id: &str) -> Result<PullRequestLink> {
        self.state
            .lock()
            .unwrap()
            .links
            .get(issue_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("pull request link for {}", issue_id)))
    }

    async fn upsert_pr_link(&self, issue_id: &str, pr_ref: &str, repo: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let repo = repo.filter(|r| !r.is_empty()).map(str::to_string);
        match state.links.get_mut(issue_id) {
            Some(link) => {
                link.pr_ref = pr_ref.to_string();
                link.repo = repo;
                link.updated_at = now_rfc3339();
            }
            None => {
                state.links.insert(
                    issue_id.to_string(),
                    PullRequestLink::new(issue_id, pr_ref, repo),
                );
            }
        }
        Ok(())
    }

    async fn list_hooks(&self, event: &str) -> Result<Vec<Hook>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .hooks
            .iter()
            .filter(|h| h.event == event)
            .cloned()
            .collect())
    }
}

/// Hook runner that records events and can be told to fail one of them.
#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<(HookEvent, String)>>,
    fail_on: Option<HookEvent>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with a hook error whenever `event` fires.
    pub fn failing_on(event: HookEvent) -> Self {
        Self {
            fail_on: Some(event),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<(HookEvent, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn fired(&self, event: HookEvent) -> bool {
        self.events.lock().unwrap().iter().any(|(e, _)| *e == event)
    }
}

#[async_trait]
impl HookRunner for RecordingHooks {
    async fn fire(&self, event: HookEvent, issue_id: &str) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((event, issue_id.to_string()));
        if self.fail_on == Some(event) {
            return Err(Error::Hook {
                id: 1,
                reason: format!("{} rejected {}", event, issue_id),
            });
        }
        Ok(())
    }
}
