//! Engine configuration.
//!
//! [`EngineSettings`] is the raw, deserializable shape that callers load from
//! files and the environment. It is turned into an [`EngineConfig`] exactly
//! once by [`EngineSettings::validate`]; the engine and every component only
//! ever see the validated, immutable form.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::{
    CommitClassifier, DEFAULT_AUTHOR_PATTERNS, DEFAULT_EMAIL_PATTERNS, DEFAULT_MESSAGE_PATTERNS,
};
use crate::health::{DEFAULT_PROBE_HOSTS, HealthConfig};
use crate::priority::Thresholds;
use crate::retry::RetryConfig;

/// Default remote name.
pub const DEFAULT_REMOTE: &str = "origin";
/// Default branch list.
pub const DEFAULT_BRANCH: &str = "main";
/// Default time-sync threshold in seconds.
pub const DEFAULT_TIME_SYNC_SECS: u64 = 60;
/// Default emergency threshold in seconds.
pub const DEFAULT_EMERGENCY_SECS: u64 = 1800;
/// Default per-command timeout for backend calls.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;
/// Default number of backup refs kept per branch.
pub const DEFAULT_BACKUP_KEEP: usize = 10;
/// Name of the state directory inside the git directory.
pub const STATE_DIR_NAME: &str = "chronosync";

/// Configuration problems. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "emergency threshold ({emergency_secs}s) must be greater than time-sync threshold ({time_sync_secs}s)"
    )]
    InvalidThresholds {
        time_sync_secs: u64,
        emergency_secs: u64,
    },

    #[error("at least one branch must be configured")]
    EmptyBranches,

    #[error("invalid {field} pattern {pattern:?}: {source}")]
    InvalidPattern {
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid retry settings: {0}")]
    InvalidRetry(String),

    #[error("at least one network probe host must be configured")]
    NoProbeHosts,

    #[error("version-control backend unavailable: {0}")]
    MissingBackend(String),

    #[error("failed to load configuration: {0}")]
    Load(String),
}

/// Which repository and branches to synchronize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySettings {
    pub path: PathBuf,
    pub remote: String,
    pub branches: Vec<String>,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            remote: DEFAULT_REMOTE.to_string(),
            branches: vec![DEFAULT_BRANCH.to_string()],
        }
    }
}

/// Priority thresholds, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritySettings {
    pub time_sync_threshold_secs: u64,
    pub emergency_threshold_secs: u64,
}

impl Default for PrioritySettings {
    fn default() -> Self {
        Self {
            time_sync_threshold_secs: DEFAULT_TIME_SYNC_SECS,
            emergency_threshold_secs: DEFAULT_EMERGENCY_SECS,
        }
    }
}

/// Case-insensitive regex patterns for recognising automated commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub message_patterns: Vec<String>,
    pub author_patterns: Vec<String>,
    pub email_patterns: Vec<String>,
}

fn owned(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|p| (*p).to_string()).collect()
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            message_patterns: owned(DEFAULT_MESSAGE_PATTERNS),
            author_patterns: owned(DEFAULT_AUTHOR_PATTERNS),
            email_patterns: owned(DEFAULT_EMAIL_PATTERNS),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            jitter: defaults.with_jitter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub probe_hosts: Vec<String>,
    pub connect_timeout_ms: u64,
    pub status_timeout_ms: u64,
    pub remote_timeout_ms: u64,
    /// How long to wait for an unavailable repository before giving up.
    pub max_wait_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        let defaults = HealthConfig::default();
        Self {
            probe_hosts: owned(DEFAULT_PROBE_HOSTS),
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            status_timeout_ms: defaults.status_timeout.as_millis() as u64,
            remote_timeout_ms: defaults.remote_timeout.as_millis() as u64,
            max_wait_secs: defaults.max_wait.as_secs(),
            poll_interval_secs: defaults.poll_interval.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Push a branch after a local-favored resolution.
    pub push: bool,
    /// Backup refs kept per branch.
    pub backup_keep: usize,
    pub command_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            push: false,
            backup_keep: DEFAULT_BACKUP_KEEP,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

/// Raw engine settings as loaded from configuration sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub repository: RepositorySettings,
    pub priority: PrioritySettings,
    pub classifier: ClassifierSettings,
    pub retry: RetrySettings,
    pub health: HealthSettings,
    pub sync: SyncSettings,
    /// Directory for durable state. Defaults to `<git-dir>/chronosync`.
    pub state_dir: Option<PathBuf>,
}

impl EngineSettings {
    /// Validate these settings into an immutable [`EngineConfig`].
    pub fn validate(self) -> Result<EngineConfig, ConfigError> {
        let thresholds = Thresholds::new(
            Duration::from_secs(self.priority.time_sync_threshold_secs),
            Duration::from_secs(self.priority.emergency_threshold_secs),
        )?;

        let branches: Vec<String> = self
            .repository
            .branches
            .iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if branches.is_empty() {
            return Err(ConfigError::EmptyBranches);
        }

        let classifier = CommitClassifier::new(
            &self.classifier.message_patterns,
            &self.classifier.author_patterns,
            &self.classifier.email_patterns,
        )?;

        let retry = RetryConfig::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.initial_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
        )
        .with_jitter(self.retry.jitter);
        retry.validate()?;

        if self.health.probe_hosts.is_empty() {
            return Err(ConfigError::NoProbeHosts);
        }
        let health = HealthConfig {
            probe_hosts: self.health.probe_hosts,
            connect_timeout: Duration::from_millis(self.health.connect_timeout_ms),
            status_timeout: Duration::from_millis(self.health.status_timeout_ms),
            remote_timeout: Duration::from_millis(self.health.remote_timeout_ms),
            max_wait: Duration::from_secs(self.health.max_wait_secs),
            poll_interval: Duration::from_secs(self.health.poll_interval_secs.max(1)),
        };

        Ok(EngineConfig {
            repo_path: self.repository.path,
            remote: self.repository.remote,
            branches,
            thresholds,
            classifier,
            retry,
            health,
            push: self.sync.push,
            backup_keep: self.sync.backup_keep.max(1),
            command_timeout: Duration::from_secs(self.sync.command_timeout_secs.max(1)),
            state_dir: self.state_dir,
        })
    }
}

/// Validated, immutable engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    repo_path: PathBuf,
    remote: String,
    branches: Vec<String>,
    thresholds: Thresholds,
    classifier: CommitClassifier,
    retry: RetryConfig,
    health: HealthConfig,
    push: bool,
    backup_keep: usize,
    command_timeout: Duration,
    state_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Shorthand for [`EngineSettings::validate`].
    pub fn validate(settings: EngineSettings) -> Result<Self, ConfigError> {
        settings.validate()
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn branches(&self) -> &[String] {
        &self.branches
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn classifier(&self) -> &CommitClassifier {
        &self.classifier
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn health(&self) -> &HealthConfig {
        &self.health
    }

    pub fn push_enabled(&self) -> bool {
        self.push
    }

    pub fn backup_keep(&self) -> usize {
        self.backup_keep
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Resolve the state directory, defaulting to `<git_dir>/chronosync`.
    pub fn state_dir(&self, git_dir: &Path) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| git_dir.join(STATE_DIR_NAME))
    }

    #[cfg(test)]
    pub(crate) fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = EngineSettings::default().validate().unwrap();
        assert_eq!(config.remote(), "origin");
        assert_eq!(config.branches(), ["main".to_string()]);
        assert_eq!(config.thresholds().time_sync(), Duration::from_secs(60));
        assert_eq!(config.thresholds().emergency(), Duration::from_secs(1800));
        assert_eq!(config.retry().max_attempts, 5);
        assert!(!config.push_enabled());
        assert_eq!(config.backup_keep(), 10);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut settings = EngineSettings::default();
        settings.priority.time_sync_threshold_secs = 600;
        settings.priority.emergency_threshold_secs = 600;
        let err = settings.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidThresholds {
                time_sync_secs: 600,
                emergency_secs: 600
            }
        ));
    }

    #[test]
    fn rejects_blank_branches() {
        let mut settings = EngineSettings::default();
        settings.repository.branches = vec!["  ".to_string()];
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::EmptyBranches)
        ));
    }

    #[test]
    fn rejects_bad_pattern() {
        let mut settings = EngineSettings::default();
        settings.classifier.author_patterns = vec!["(unclosed".to_string()];
        match settings.validate() {
            Err(ConfigError::InvalidPattern { field, pattern, .. }) => {
                assert_eq!(field, "author");
                assert_eq!(pattern, "(unclosed");
            }
            other => panic!("expected InvalidPattern, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_retry_settings() {
        let mut settings = EngineSettings::default();
        settings.retry.max_attempts = 0;
        assert!(matches!(
            settings.clone().validate(),
            Err(ConfigError::InvalidRetry(_))
        ));

        settings.retry.max_attempts = 3;
        settings.retry.initial_delay_ms = 10_000;
        settings.retry.max_delay_ms = 1_000;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidRetry(_))
        ));
    }

    #[test]
    fn rejects_empty_probe_hosts() {
        let mut settings = EngineSettings::default();
        settings.health.probe_hosts.clear();
        assert!(matches!(settings.validate(), Err(ConfigError::NoProbeHosts)));
    }

    #[test]
    fn state_dir_defaults_under_git_dir() {
        let config = EngineSettings::default().validate().unwrap();
        assert_eq!(
            config.state_dir(Path::new("/repo/.git")),
            PathBuf::from("/repo/.git/chronosync")
        );

        let settings = EngineSettings {
            state_dir: Some(PathBuf::from("/var/lib/chronosync")),
            ..EngineSettings::default()
        };
        let config = settings.validate().unwrap();
        assert_eq!(
            config.state_dir(Path::new("/repo/.git")),
            PathBuf::from("/var/lib/chronosync")
        );
    }

    #[test]
    fn deserializes_partial_sections() {
        let json = r#"{"priority": {"time_sync_threshold_secs": 30}, "sync": {"push": true}}"#;
        let settings: EngineSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.priority.time_sync_threshold_secs, 30);
        assert_eq!(settings.priority.emergency_threshold_secs, 1800);
        assert!(settings.sync.push);
        assert_eq!(settings.repository.remote, "origin");
    }
}
