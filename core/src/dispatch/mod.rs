//! Issue dispatch: worktree, implementation, PR, CI and merge in one run.
//!
//! A run walks the [`STEPS`] table in order and stops at the first failing
//! step. Nothing is rolled back, so the branch, worktree, commits and PR left
//! behind by a failed run are picked up again by the next one.

mod options;
mod steps;

pub use options::{DispatchOptions, DEFAULT_BASE_BRANCH};
pub use steps::{Step, STEPS};

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, InteractiveIo};
use crate::hooks::HookRunner;
use crate::lifecycle;
use crate::pr::{ChangeSet, PrPublisher};
use crate::runner;
use crate::store::{IssueStore, STATUS_DONE, STATUS_FINISHED, STATUS_IN_PROGRESS};
use crate::worktree;

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The runner produced nothing to publish. The issue stays in progress.
    NoChanges,
    /// CI passed but merging was skipped. The issue is `finished`.
    AwaitingMerge { pr_ref: String },
    /// The PR was merged and the issue is `done`.
    Merged { pr_ref: String },
}

/// State accumulated while a run progresses.
#[derive(Debug, Default)]
pub struct DispatchRun {
    pub issue_id: String,
    pub issue_title: String,
    pub repo_root: PathBuf,
    pub worktree: PathBuf,
    pub branch: String,
    pub pr_ref: String,
    pub has_uncommitted_changes: bool,
    pub has_unpushed_commits: bool,
    /// Number of the step currently running.
    pub step: usize,
    runner_io: Option<InteractiveIo>,
}

impl DispatchRun {
    fn new(issue_id: &str, runner_io: InteractiveIo) -> Self {
        Self {
            issue_id: issue_id.to_string(),
            runner_io: Some(runner_io),
            ..Self::default()
        }
    }

    fn changes(&self) -> ChangeSet {
        ChangeSet {
            has_uncommitted_changes: self.has_uncommitted_changes,
            has_unpushed_commits: self.has_unpushed_commits,
        }
    }
}

enum StepFlow {
    Continue,
    Stop(DispatchOutcome),
}

/// Runs dispatch against a store, hooks and a command runner.
pub struct Dispatcher<'a> {
    store: &'a dyn IssueStore,
    hooks: &'a dyn HookRunner,
    commands: &'a dyn CommandRunner,
    options: DispatchOptions,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        store: &'a dyn IssueStore,
        hooks: &'a dyn HookRunner,
        commands: &'a dyn CommandRunner,
        options: DispatchOptions,
    ) -> Self {
        Self {
            store,
            hooks,
            commands,
            options,
        }
    }

    /// Dispatches `issue_id` from the repository containing `cwd`.
    ///
    /// Progress lines go to `out`; `runner_io` is handed to the agent.
    /// A failing step is reported on `out` and returned as [`Error::Step`].
    pub async fn run(
        &self,
        cwd: &Path,
        issue_id: &str,
        runner_io: InteractiveIo,
        out: &mut (dyn Write + Send),
    ) -> Result<DispatchOutcome> {
        let mut run = DispatchRun::new(issue_id, runner_io);
        tracing::info!(issue_id = %issue_id, runner = %self.options.runner, base = %self.options.base, "starting dispatch");

        for step in STEPS {
            if step == Step::MergePr && self.options.no_merge {
                writeln!(out, "dispatch complete with --no-merge (issue status: finished)")?;
                return Ok(DispatchOutcome::AwaitingMerge {
                    pr_ref: run.pr_ref,
                });
            }

            run.step += 1;
            writeln!(out, "step {}: {}", run.step, step.name())?;

            match self.execute(step, cwd, &mut run).await {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Stop(outcome)) => {
                    if outcome == DispatchOutcome::NoChanges {
                        writeln!(out, "no changes detected; skipping commit/push/pr")?;
                    }
                    return Ok(outcome);
                }
                Err(e) => {
                    writeln!(out, "failed step {} ({}): {}", run.step, step.name(), e)?;
                    tracing::debug!(issue_id = %issue_id, step = run.step, name = step.name(), error = %e, "dispatch step failed");
                    return Err(Error::Step {
                        index: run.step,
                        name: step.name(),
                        source: Box::new(e),
                    });
                }
            }
        }

        writeln!(out, "dispatch complete: {} -> done", run.issue_id)?;
        Ok(DispatchOutcome::Merged { pr_ref: run.pr_ref })
    }

    async fn execute(&self, step: Step, cwd: &Path, run: &mut DispatchRun) -> Result<StepFlow> {
        let opts = &self.options;
        match step {
            Step::PrepareIssueStatus => {
                let issue = self.store.get_issue(&run.issue_id).await?;
                run.issue_title = issue.title;
                lifecycle::transition(self.store, self.hooks, &run.issue_id, STATUS_IN_PROGRESS)
                    .await?;
                lifecycle::ensure_finished_status(self.store).await?;
            }
            Step::PrepareWorktree => {
                let prepared =
                    worktree::prepare_worktree(self.commands, cwd, &run.issue_id, &opts.base)
                        .await?;
                run.repo_root = prepared.repo_root;
                run.worktree = prepared.path;
                run.branch = prepared.branch;
            }
            Step::RunImplementation => {
                let io = run.runner_io.take().unwrap_or_default();
                runner::invoke(
                    self.commands,
                    &run.worktree,
                    opts.runner,
                    opts.mode,
                    &run.issue_id,
                    io,
                )
                .await?;
            }
            Step::DetectChanges => {
                let changes = self.publisher(run).detect_changes(&opts.base).await?;
                run.has_uncommitted_changes = changes.has_uncommitted_changes;
                run.has_unpushed_commits = changes.has_unpushed_commits;
                if changes.is_empty() {
                    return Ok(StepFlow::Stop(DispatchOutcome::NoChanges));
                }
            }
            Step::CommitAndPush => {
                self.publisher(run)
                    .commit_and_push(run.changes(), &run.branch, &run.issue_id)
                    .await?;
            }
            Step::CreateOrReusePr => {
                let pr_ref = self
                    .publisher(run)
                    .ensure_pr(&run.branch, &opts.base, &run.issue_id, &run.issue_title)
                    .await?;
                run.pr_ref = pr_ref;
            }
            Step::MarkFinished => {
                lifecycle::transition(self.store, self.hooks, &run.issue_id, STATUS_FINISHED)
                    .await?;
            }
            Step::WatchChecks => {
                self.publisher(run).watch_checks(&run.pr_ref).await?;
            }
            Step::MergePr => {
                self.publisher(run)
                    .merge(&run.pr_ref, opts.merge_method)
                    .await?;
            }
            Step::MarkDone => {
                lifecycle::transition(self.store, self.hooks, &run.issue_id, STATUS_DONE).await?;
            }
        }
        Ok(StepFlow::Continue)
    }

    fn publisher<'r>(&'r self, run: &'r DispatchRun) -> PrPublisher<'r> {
        PrPublisher::new(self.commands, &run.worktree)
    }
}
