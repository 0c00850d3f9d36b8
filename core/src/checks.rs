//! CI check inspection through the GitHub CLI.

use std::fmt;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::pr::normalize_pr_ref;
use crate::store::PullRequestLink;

/// Number of log lines shown for a failing job.
pub const LOG_TAIL_LINES: usize = 200;

static RUN_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"actions/runs/([0-9]+)(?:/job/([0-9]+))?").expect("valid run link regex")
});

const FAILURE_STATES: &[&str] = &[
    "failure",
    "failed",
    "error",
    "timed_out",
    "cancelled",
    "action_required",
    "startup_failure",
];

const PENDING_STATES: &[&str] = &["pending", "queued", "in_progress", "waiting", "requested"];

/// One CI check as reported by `gh pr checks --json name,state,link`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Check {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub link: String,
}

impl Check {
    pub fn new(name: impl Into<String>, state: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
            link: link.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        is_failure_state(&self.state)
    }
}

fn normalized_state(state: &str) -> String {
    state.trim().to_ascii_lowercase()
}

pub fn is_failure_state(state: &str) -> bool {
    FAILURE_STATES.contains(&normalized_state(state).as_str())
}

pub fn is_pending_state(state: &str) -> bool {
    PENDING_STATES.contains(&normalized_state(state).as_str())
}

/// Aggregate outcome of all checks on a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckSummary {
    Success,
    Pending,
    Failure,
}

impl CheckSummary {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckSummary::Success => "success",
            CheckSummary::Pending => "pending",
            CheckSummary::Failure => "failure",
        }
    }
}

impl fmt::Display for CheckSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure wins, then any pending. No checks at all counts as pending.
pub fn summarize_checks(checks: &[Check]) -> CheckSummary {
    if checks.is_empty() {
        return CheckSummary::Pending;
    }
    let mut pending = false;
    for check in checks {
        if is_failure_state(&check.state) {
            return CheckSummary::Failure;
        }
        if is_pending_state(&check.state) {
            pending = true;
        }
    }
    if pending {
        CheckSummary::Pending
    } else {
        CheckSummary::Success
    }
}

/// Extracts `(run_id, job_id)` from a GitHub Actions check link.
///
/// The job id is empty when the link points at a whole run.
pub fn parse_run_and_job(link: &str) -> Option<(String, String)> {
    let caps = RUN_LINK_RE.captures(link)?;
    let run = caps.get(1)?.as_str().to_string();
    let job = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
    Some((run, job))
}

/// Last `n` lines of `raw`, ignoring trailing newlines.
pub fn tail_lines(raw: &str, n: usize) -> String {
    let raw = raw.trim_end_matches('\n');
    if raw.is_empty() {
        return String::new();
    }
    let lines: Vec<&str> = raw.split('\n').collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Repository for `gh` calls about a link: override, then the link's own
/// repository, then the configured default. `None` lets `gh` infer it.
pub fn repo_for_link(
    link: &PullRequestLink,
    repo_override: Option<&str>,
    default_repo: Option<&str>,
) -> Option<String> {
    [repo_override, link.repo.as_deref(), default_repo]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|r| !r.is_empty())
        .map(str::to_string)
}

fn with_repo<'a>(mut args: Vec<&'a str>, repo: Option<&'a str>) -> Vec<&'a str> {
    if let Some(repo) = repo {
        args.push("--repo");
        args.push(repo);
    }
    args
}

/// Fetches the checks for a pull request.
pub async fn fetch_pr_checks(
    runner: &dyn CommandRunner,
    dir: &Path,
    pr_ref: &str,
    repo: Option<&str>,
) -> Result<Vec<Check>> {
    let pr = normalize_pr_ref(pr_ref);
    let args = with_repo(vec!["pr", "checks", &pr, "--json", "name,state,link"], repo);
    let raw = runner.run(dir, "gh", &args).await?;
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw)
        .map_err(|e| Error::GitHub(format!("decode gh checks response for {}: {}", pr, e)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrState {
    #[serde(default)]
    state: String,
    #[serde(default)]
    merged_at: Option<String>,
}

/// Whether the pull request has been merged.
///
/// A merge timestamp is authoritative; otherwise the state string decides.
pub async fn fetch_pr_merged(
    runner: &dyn CommandRunner,
    dir: &Path,
    pr_ref: &str,
    repo: Option<&str>,
) -> Result<bool> {
    let pr = normalize_pr_ref(pr_ref);
    let args = with_repo(vec!["pr", "view", &pr, "--json", "state,mergedAt"], repo);
    let raw = runner.run(dir, "gh", &args).await?;
    let state: PrState = serde_json::from_str(&raw)
        .map_err(|e| Error::GitHub(format!("decode gh pr view response for {}: {}", pr, e)))?;

    if state.merged_at.as_deref().is_some_and(|t| !t.trim().is_empty()) {
        return Ok(true);
    }
    Ok(state.state.eq_ignore_ascii_case("MERGED"))
}

/// Fetches the log of the run (or job) behind a failing check.
pub async fn fetch_failure_log(
    runner: &dyn CommandRunner,
    dir: &Path,
    check: &Check,
    repo: Option<&str>,
) -> Result<String> {
    let (run, job) = parse_run_and_job(&check.link)
        .ok_or_else(|| Error::UnsupportedCheckLink(check.link.clone()))?;

    let mut args = vec!["run", "view", run.as_str(), "--log"];
    if !job.is_empty() {
        args.push("--job");
        args.push(job.as_str());
    }
    let args = with_repo(args, repo);
    runner.run(dir, "gh", &args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Expectation, ScriptedRunner};

    fn link(repo: Option<&str>) -> PullRequestLink {
        PullRequestLink::new("TRK-1", "42", repo.map(str::to_string))
    }

    #[test]
    fn classifies_states_case_insensitively() {
        assert!(is_failure_state("FAILURE"));
        assert!(is_failure_state(" timed_out "));
        assert!(is_failure_state("Startup_Failure"));
        assert!(!is_failure_state("success"));
        assert!(is_pending_state("IN_PROGRESS"));
        assert!(is_pending_state("queued"));
        assert!(!is_pending_state("skipped"));
    }

    #[test]
    fn summary_prefers_failure_then_pending() {
        assert_eq!(summarize_checks(&[]), CheckSummary::Pending);
        assert_eq!(
            summarize_checks(&[Check::new("build", "SUCCESS", "")]),
            CheckSummary::Success
        );
        assert_eq!(
            summarize_checks(&[Check::new("build", "in_progress", "")]),
            CheckSummary::Pending
        );
        assert_eq!(
            summarize_checks(&[
                Check::new("lint", "pending", ""),
                Check::new("build", "success", ""),
                Check::new("test", "failure", ""),
            ]),
            CheckSummary::Failure
        );
        assert_eq!(CheckSummary::Failure.to_string(), "failure");
    }

    #[test]
    fn parses_run_and_job_links() {
        assert_eq!(
            parse_run_and_job("https://github.com/a/b/actions/runs/123456/job/9876"),
            Some(("123456".to_string(), "9876".to_string()))
        );
        assert_eq!(
            parse_run_and_job("https://github.com/a/b/actions/runs/55"),
            Some(("55".to_string(), String::new()))
        );
        assert_eq!(parse_run_and_job("https://ci.example.com/build/1"), None);
    }

    #[test]
    fn tails_last_lines() {
        assert_eq!(tail_lines("a\nb\nc\nd\ne\n", 2), "d\ne");
        assert_eq!(tail_lines("a\nb", 5), "a\nb");
        assert_eq!(tail_lines("\n\n", 3), "");
    }

    #[test]
    fn repo_precedence() {
        assert_eq!(
            repo_for_link(&link(Some("o/link")), Some("o/override"), Some("o/default")),
            Some("o/override".to_string())
        );
        assert_eq!(
            repo_for_link(&link(Some("o/link")), None, Some("o/default")),
            Some("o/link".to_string())
        );
        assert_eq!(
            repo_for_link(&link(None), Some("  "), Some("o/default")),
            Some("o/default".to_string())
        );
        assert_eq!(repo_for_link(&link(None), None, None), None);
    }

    #[tokio::test]
    async fn fetches_checks_with_repo() {
        let dir = std::env::temp_dir();
        let runner = ScriptedRunner::new(vec![Expectation::run(
            &dir,
            "gh",
            &["pr", "checks", "42", "--json", "name,state,link", "--repo", "o/r"],
        )
        .output(r#"[{"name":"build","state":"FAILURE","link":"https://x/actions/runs/1"}]"#)]);

        let checks = fetch_pr_checks(&runner, &dir, "https://github.com/o/r/pull/42", Some("o/r"))
            .await
            .unwrap();
        runner.assert_done();
        assert_eq!(checks, vec![Check::new("build", "FAILURE", "https://x/actions/runs/1")]);
    }

    #[tokio::test]
    async fn merged_detection() {
        let dir = std::env::temp_dir();
        let runner = ScriptedRunner::new(vec![
            Expectation::run(&dir, "gh", &["pr", "view", "7", "--json", "state,mergedAt"])
                .output(r#"{"state":"CLOSED","mergedAt":"2024-01-01T00:00:00Z"}"#),
            Expectation::run(&dir, "gh", &["pr", "view", "7", "--json", "state,mergedAt"])
                .output(r#"{"state":"merged","mergedAt":null}"#),
            Expectation::run(&dir, "gh", &["pr", "view", "7", "--json", "state,mergedAt"])
                .output(r#"{"state":"OPEN","mergedAt":""}"#),
        ]);

        assert!(fetch_pr_merged(&runner, &dir, "7", None).await.unwrap());
        assert!(fetch_pr_merged(&runner, &dir, "7", None).await.unwrap());
        assert!(!fetch_pr_merged(&runner, &dir, "7", None).await.unwrap());
        runner.assert_done();
    }

    #[tokio::test]
    async fn failure_log_uses_job_when_present() {
        let dir = std::env::temp_dir();
        let runner = ScriptedRunner::new(vec![Expectation::run(
            &dir,
            "gh",
            &["run", "view", "10", "--log", "--job", "20", "--repo", "o/r"],
        )
        .output("line")]);

        let check = Check::new("test", "failure", "https://github.com/o/r/actions/runs/10/job/20");
        let log = fetch_failure_log(&runner, &dir, &check, Some("o/r")).await.unwrap();
        runner.assert_done();
        assert_eq!(log, "line");
    }

    #[tokio::test]
    async fn failure_log_rejects_foreign_links() {
        let dir = std::env::temp_dir();
        let runner = ScriptedRunner::new(vec![]);
        let check = Check::new("ext", "failure", "https://ci.example.com/1");
        let err = fetch_failure_log(&runner, &dir, &check, None).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedCheckLink(_)));
        runner.assert_done();
    }
}
