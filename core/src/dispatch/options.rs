use serde::{Deserialize, Serialize};

use crate::pr::MergeMethod;
use crate::runner::{RunnerKind, WorkMode};

/// Base branch used when none is given.
pub const DEFAULT_BASE_BRANCH: &str = "main";

/// Caller-supplied settings for one dispatch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOptions {
    /// Agent that implements the issue.
    pub runner: RunnerKind,
    /// Mode passed to the agent.
    pub mode: WorkMode,
    /// Branch the work is based on and merged into.
    pub base: String,
    pub merge_method: MergeMethod,
    /// Stop after CI passes and leave the PR open.
    pub no_merge: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            runner: RunnerKind::default(),
            mode: WorkMode::default(),
            base: DEFAULT_BASE_BRANCH.to_string(),
            merge_method: MergeMethod::default(),
            no_merge: false,
        }
    }
}

impl DispatchOptions {
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    pub fn with_merge_method(mut self, method: MergeMethod) -> Self {
        self.merge_method = method;
        self
    }

    pub fn without_merge(mut self) -> Self {
        self.no_merge = true;
        self
    }
}
