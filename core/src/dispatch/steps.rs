//! The ordered step table a dispatch run walks through.

use std::fmt;

/// One numbered stage of a dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    PrepareIssueStatus,
    PrepareWorktree,
    RunImplementation,
    DetectChanges,
    CommitAndPush,
    CreateOrReusePr,
    MarkFinished,
    WatchChecks,
    MergePr,
    MarkDone,
}

/// Steps in execution order.
pub const STEPS: [Step; 10] = [
    Step::PrepareIssueStatus,
    Step::PrepareWorktree,
    Step::RunImplementation,
    Step::DetectChanges,
    Step::CommitAndPush,
    Step::CreateOrReusePr,
    Step::MarkFinished,
    Step::WatchChecks,
    Step::MergePr,
    Step::MarkDone,
];

impl Step {
    /// Human-readable name shown in progress output and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Step::PrepareIssueStatus => "prepare issue status",
            Step::PrepareWorktree => "prepare worktree",
            Step::RunImplementation => "run implementation runner",
            Step::DetectChanges => "detect changes",
            Step::CommitAndPush => "commit and push",
            Step::CreateOrReusePr => "create or reuse PR",
            Step::MarkFinished => "mark issue finished",
            Step::WatchChecks => "watch CI checks",
            Step::MergePr => "merge PR",
            Step::MarkDone => "mark issue done",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
