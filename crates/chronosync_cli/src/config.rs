//! Configuration loading for the CLI.
//!
//! Settings are layered with the following precedence (highest to lowest):
//! 1. CLI flags (`--repo`, `--branch`)
//! 2. Environment variables (prefixed with `CHRONOSYNC_`, sections joined by
//!    `__`, e.g. `CHRONOSYNC_REPOSITORY__REMOTE`)
//! 3. Local config file (`./chronosync.toml`)
//! 4. XDG config file (`~/.config/chronosync/config.toml`)
//! 5. Built-in defaults
//!
//! A configuration that fails to build or deserialize is an error; it is never
//! silently replaced by defaults.
//!
//! Example config file:
//! ```toml
//! [repository]
//! path = "/home/ada/notes"
//! remote = "origin"
//! branches = ["main", "drafts"]
//!
//! [priority]
//! time_sync_threshold_secs = 60
//! emergency_threshold_secs = 1800
//!
//! [retry]
//! max_attempts = 5
//! initial_delay_ms = 1000
//! max_delay_ms = 60000
//!
//! [health]
//! probe_hosts = ["github.com:443"]
//!
//! [sync]
//! push = true
//! ```

use std::path::PathBuf;

use chronosync::{ConfigError, EngineSettings};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;

/// Environment variable prefix.
const ENV_PREFIX: &str = "CHRONOSYNC";

/// Name of the per-directory config file.
const LOCAL_CONFIG_FILE: &str = "chronosync.toml";

/// Keys whose environment values are comma-separated lists.
const LIST_KEYS: &[&str] = &[
    "repository.branches",
    "health.probe_hosts",
    "classifier.message_patterns",
    "classifier.author_patterns",
    "classifier.email_patterns",
];

/// Load settings from every configured source.
pub fn load() -> Result<EngineSettings, ConfigError> {
    let mut builder = Config::builder();

    if let Some(xdg_config) = default_config_path()
        && xdg_config.exists()
    {
        tracing::debug!("Loading config from {:?}", xdg_config);
        builder = builder.add_source(
            File::from(xdg_config)
                .format(FileFormat::Toml)
                .required(false),
        );
    }

    let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
    if local_config.exists() {
        tracing::debug!("Loading config from ./{}", LOCAL_CONFIG_FILE);
        builder = builder.add_source(
            File::from(local_config)
                .format(FileFormat::Toml)
                .required(false),
        );
    }

    builder = builder.add_source(environment());
    deserialize(builder)
}

fn environment() -> Environment {
    let env = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .try_parsing(true);
    LIST_KEYS
        .iter()
        .fold(env, |env, key| env.with_list_parse_key(key))
}

fn deserialize(builder: ConfigBuilder<DefaultState>) -> Result<EngineSettings, ConfigError> {
    builder
        .build()
        .and_then(|settings| settings.try_deserialize::<EngineSettings>())
        .map_err(|e| ConfigError::Load(e.to_string()))
}

/// Apply command-line overrides on top of loaded settings.
pub fn apply_overrides(settings: &mut EngineSettings, repo: Option<PathBuf>, branches: Vec<String>) {
    if let Some(repo) = repo {
        settings.repository.path = repo;
    }
    if !branches.is_empty() {
        settings.repository.branches = branches;
    }
}

/// Get the default config file path.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "chronosync").map(|dirs| dirs.config_dir().join("config.toml"))
}
