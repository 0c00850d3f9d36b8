//! Configuration loading and validation.
//!
//! Settings come from the tracker home (`TRACK_HOME`, else `~/.track`):
//! the database lives at `track.db` and `config.toml` may name a default
//! GitHub repository. Options are validated before any command runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::DispatchOptions;
use crate::error::{Error, Result};
use crate::monitor::WatchOptions;

/// Environment variable overriding the tracker home.
pub const TRACK_HOME_ENV: &str = "TRACK_HOME";

const DB_FILE: &str = "track.db";
const CONFIG_FILE: &str = "config.toml";

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Fatal problems.
    pub errors: Vec<String>,
    /// Suspicious but usable settings.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Returns the warnings, or all errors joined into [`Error::Config`].
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Types that can check their own settings.
pub trait Validate {
    fn validate(&self) -> ValidationResult;
}

fn is_valid_ref_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.contains("..")
        && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

impl Validate for DispatchOptions {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        let base = self.base.trim();
        if base.is_empty() {
            result.add_error("base branch cannot be empty");
        } else if !is_valid_ref_name(base) {
            result.add_error(format!("invalid base branch: {}", self.base));
        }

        result
    }
}

impl Validate for WatchOptions {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.interval.is_zero() {
            result.add_error("interval must be greater than zero");
        } else if self.interval < Duration::from_secs(5) {
            result.add_warning("interval under 5 seconds may hit GitHub rate limits");
        }

        if let Some(repo) = &self.repo {
            let mut parts = repo.trim().split('/');
            let owner = parts.next().unwrap_or_default();
            let name = parts.next().unwrap_or_default();
            if owner.is_empty() || name.is_empty() || parts.next().is_some() {
                result.add_error(format!("repo must be owner/name: {}", repo));
            }
        }

        result
    }
}

/// Parses a poll interval such as `30s`, `2m` or `1h30m`.
pub fn parse_interval(raw: &str) -> Result<Duration> {
    let interval = humantime::parse_duration(raw.trim())
        .map_err(|e| Error::Config(format!("invalid interval {:?}: {}", raw, e)))?;
    if interval.is_zero() {
        return Err(Error::Config(format!(
            "invalid interval {:?}: must be greater than zero",
            raw
        )));
    }
    Ok(interval)
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    gh_repo: Option<String>,
}

/// Resolved tracker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub home: PathBuf,
    pub db_path: PathBuf,
    /// Default `owner/name` for `gh` calls.
    pub gh_repo: Option<String>,
}

impl Settings {
    /// Loads settings from the tracker home.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::home_dir()?)
    }

    /// `TRACK_HOME` if set, else `~/.track`.
    pub fn home_dir() -> Result<PathBuf> {
        if let Some(home) = std::env::var_os(TRACK_HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(home));
        }
        dirs::home_dir()
            .map(|h| h.join(".track"))
            .ok_or_else(|| Error::Config("cannot resolve home directory".to_string()))
    }

    /// Loads settings rooted at `home`. A missing `config.toml` is fine.
    pub fn load_from(home: impl AsRef<Path>) -> Result<Self> {
        let home = home.as_ref().to_path_buf();
        let config_path = home.join(CONFIG_FILE);

        let file = match std::fs::read_to_string(&config_path) {
            Ok(raw) => toml::from_str::<FileConfig>(&raw).map_err(|e| {
                Error::Config(format!("parse {}: {}", config_path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(e) => return Err(e.into()),
        };

        let gh_repo = file
            .gh_repo
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        tracing::debug!(home = ?home, gh_repo = ?gh_repo, "loaded settings");

        Ok(Self {
            db_path: home.join(DB_FILE),
            home,
            gh_repo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn validation_result_collects_errors_and_warnings() {
        let mut result = ValidationResult::default();
        assert!(result.is_valid());
        result.add_warning("w");
        assert_eq!(result.clone().into_result().unwrap(), vec!["w"]);

        let mut other = ValidationResult::default();
        other.add_error("a");
        other.add_error("b");
        result.merge(other);
        assert!(!result.is_valid());
        match result.into_result() {
            Err(Error::Config(msg)) => assert_eq!(msg, "a; b"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn dispatch_options_require_base_branch() {
        assert!(DispatchOptions::default().validate().is_valid());
        assert!(!DispatchOptions::default().with_base("  ").validate().is_valid());
        assert!(!DispatchOptions::default()
            .with_base("main..dev")
            .validate()
            .is_valid());
        assert!(!DispatchOptions::default()
            .with_base("--force")
            .validate()
            .is_valid());
        assert!(DispatchOptions::default()
            .with_base("release/1.2")
            .validate()
            .is_valid());
    }

    #[test]
    fn watch_options_check_interval_and_repo() {
        assert!(WatchOptions::default().validate().is_valid());

        let zero = WatchOptions {
            interval: Duration::ZERO,
            ..WatchOptions::default()
        };
        assert!(!zero.validate().is_valid());

        let fast = WatchOptions {
            interval: Duration::from_secs(1),
            ..WatchOptions::default()
        };
        let result = fast.validate();
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);

        let bad_repo = WatchOptions {
            repo: Some("just-a-name".to_string()),
            ..WatchOptions::default()
        };
        assert!(!bad_repo.validate().is_valid());

        let good_repo = WatchOptions {
            repo: Some("owner/name".to_string()),
            ..WatchOptions::default()
        };
        assert!(good_repo.validate().is_valid());
    }

    #[test]
    fn parses_human_intervals() {
        assert_eq!(parse_interval("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_interval("1h30m").unwrap(), Duration::from_secs(5400));
        assert!(parse_interval("soon").is_err());
        assert!(parse_interval("0s").is_err());
    }

    #[test]
    fn settings_without_config_file() {
        let home = TempDir::new().unwrap();
        let settings = Settings::load_from(home.path()).unwrap();
        assert_eq!(settings.db_path, home.path().join("track.db"));
        assert_eq!(settings.gh_repo, None);
    }

    #[test]
    fn settings_read_gh_repo() {
        let home = TempDir::new().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "ui_port = 8787\ngh_repo = \" myuon/track \"\n",
        )
        .unwrap();
        let settings = Settings::load_from(home.path()).unwrap();
        assert_eq!(settings.gh_repo.as_deref(), Some("myuon/track"));
    }

    #[test]
    fn settings_reject_malformed_toml() {
        let home = TempDir::new().unwrap();
        std::fs::write(home.path().join("config.toml"), "gh_repo = [").unwrap();
        assert!(matches!(
            Settings::load_from(home.path()),
            Err(Error::Config(_))
        ));
    }
}
