//! track-dispatch CLI
//!
//! Dispatches tracker issues through the worktree-to-merge cycle and watches
//! linked pull requests.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use track_dispatch::checks::{fetch_pr_checks, repo_for_link, summarize_checks};
use track_dispatch::pr::enable_auto_merge;
use track_dispatch::{
    normalize_issue_id, normalize_pr_ref, parse_interval, DispatchOptions, Dispatcher,
    InteractiveIo, IssueStore, MergeMethod, PrMonitor, Result, RunnerKind, Settings, ShellHooks,
    SqliteStore, SystemCommandRunner, Validate, WatchOptions, WorkMode,
};

#[derive(Parser)]
#[command(
    name = "track-dispatch",
    version,
    about = "Deliver tracker issues from worktree to merged pull request"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an issue through worktree, runner, PR, CI and merge.
    Dispatch {
        /// Issue id, or a bare number for TRK-<n>.
        issue_id: String,
        #[arg(long, value_enum, default_value_t = RunnerKind::Codex)]
        runner: RunnerKind,
        #[arg(long, value_enum, default_value_t = WorkMode::Execution)]
        mode: WorkMode,
        /// Base branch.
        #[arg(long, default_value = "main")]
        base: String,
        #[arg(long, value_enum, default_value_t = MergeMethod::Merge)]
        merge_method: MergeMethod,
        /// Stop once CI passes and leave the PR open.
        #[arg(long)]
        no_merge: bool,
    },
    /// Watch linked PRs, report CI failures and close merged issues.
    Watch {
        /// Only watch links for this owner/name.
        #[arg(long)]
        repo: Option<String>,
        /// Poll interval, e.g. 30s or 2m.
        #[arg(long, default_value = "30s", value_parser = interval_arg)]
        interval: Duration,
    },
    /// Show the CI checks of an issue's linked PR.
    Status {
        issue_id: String,
        #[arg(long)]
        repo: Option<String>,
    },
    /// Link an issue to a PR.
    Link {
        issue_id: String,
        /// PR number or URL.
        #[arg(long)]
        pr: String,
        /// owner/name
        #[arg(long)]
        repo: Option<String>,
    },
    /// Enable auto-merge on an issue's linked PR.
    AutoMerge {
        issue_id: String,
        #[arg(long, value_enum, default_value_t = MergeMethod::Squash)]
        method: MergeMethod,
        #[arg(long)]
        repo: Option<String>,
    },
}

fn interval_arg(raw: &str) -> std::result::Result<Duration, String> {
    parse_interval(raw).map_err(|e| e.to_string())
}

/// `RUST_LOG` directives when present and valid, else `info`.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load()?;
    let store: Arc<dyn IssueStore> = Arc::new(SqliteStore::open(&settings.db_path)?);
    let hooks = ShellHooks::new(store.clone());
    let commands = SystemCommandRunner::new();
    let cwd = std::env::current_dir()?;
    let mut stdout = std::io::stdout();

    match cli.command {
        Command::Dispatch {
            issue_id,
            runner,
            mode,
            base,
            merge_method,
            no_merge,
        } => {
            let options = DispatchOptions {
                runner,
                mode,
                base,
                merge_method,
                no_merge,
            };
            for warning in options.validate().into_result()? {
                tracing::warn!("{}", warning);
            }
            let issue_id = normalize_issue_id(&issue_id);
            let outcome = Dispatcher::new(store.as_ref(), &hooks, &commands, options)
                .run(&cwd, &issue_id, InteractiveIo::inherit(), &mut stdout)
                .await?;
            tracing::info!(issue_id = %issue_id, outcome = ?outcome, "dispatch finished");
        }
        Command::Watch { repo, interval } => {
            let options = WatchOptions { repo, interval };
            for warning in options.validate().into_result()? {
                tracing::warn!("{}", warning);
            }

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let mut stderr = std::io::stderr();
            PrMonitor::new(store.as_ref(), &hooks, &commands, &cwd)
                .with_repo_filter(options.repo)
                .with_default_repo(settings.gh_repo)
                .run(options.interval, cancel, &mut stdout, &mut stderr)
                .await?;
        }
        Command::Status { issue_id, repo } => {
            let issue_id = normalize_issue_id(&issue_id);
            let link = store.get_pr_link(&issue_id).await?;
            let repo = repo_for_link(&link, repo.as_deref(), settings.gh_repo.as_deref());
            let mut checks = fetch_pr_checks(&commands, &cwd, &link.pr_ref, repo.as_deref()).await?;

            writeln!(
                stdout,
                "issue: {}\npr: {}\nrepo: {}",
                link.issue_id,
                link.pr_ref,
                repo.as_deref().unwrap_or_default()
            )?;
            if checks.is_empty() {
                writeln!(stdout, "no checks found")?;
                writeln!(stdout, "overall: pending")?;
                return Ok(());
            }
            checks.sort_by(|a, b| a.name.cmp(&b.name));
            for check in &checks {
                writeln!(
                    stdout,
                    "{}\t{}\t{}",
                    check.name,
                    check.state.to_lowercase(),
                    check.link
                )?;
            }
            writeln!(stdout, "overall: {}", summarize_checks(&checks))?;
        }
        Command::Link { issue_id, pr, repo } => {
            let issue_id = normalize_issue_id(&issue_id);
            store.get_issue(&issue_id).await?;
            store
                .upsert_pr_link(&issue_id, &normalize_pr_ref(&pr), repo.as_deref())
                .await?;
            writeln!(stdout, "ok")?;
        }
        Command::AutoMerge {
            issue_id,
            method,
            repo,
        } => {
            let issue_id = normalize_issue_id(&issue_id);
            let link = store.get_pr_link(&issue_id).await?;
            let pr = normalize_pr_ref(&link.pr_ref);
            let repo = repo_for_link(&link, repo.as_deref(), settings.gh_repo.as_deref());
            enable_auto_merge(&commands, &cwd, &pr, method, repo.as_deref()).await?;
            writeln!(stdout, "auto-merge enabled for pr {} (method={})", pr, method)?;
        }
    }
    Ok(())
}
