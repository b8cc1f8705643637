//! Health prober.
//!
//! Runs four independent checks (no in-progress markers, a bounded status
//! query, general network reachability, and a lightweight remote query) and
//! reports every failure rather than stopping at the first. Timeouts and
//! unreachability are ordinary results here, not errors.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::vcs::{LocalRepo, NetworkProbe, RemoteClient};

/// Hosts probed for general connectivity.
pub const DEFAULT_PROBE_HOSTS: &[&str] = &["1.1.1.1:443", "8.8.8.8:53", "github.com:443"];

/// Timeouts and wait budget for health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    pub probe_hosts: Vec<String>,
    pub connect_timeout: Duration,
    pub status_timeout: Duration,
    pub remote_timeout: Duration,
    /// How long the orchestrator waits for an unavailable repository.
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_hosts: DEFAULT_PROBE_HOSTS.iter().map(|h| (*h).to_string()).collect(),
            connect_timeout: Duration::from_secs(3),
            status_timeout: Duration::from_secs(10),
            remote_timeout: Duration::from_secs(10),
            max_wait: Duration::from_secs(300),
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum HealthIssue {
    /// Another operation holds or left behind repository markers.
    InProgressMarkers { markers: Vec<String> },
    /// The local status query failed or timed out.
    StatusFailed { message: String },
    /// None of the probe hosts accepted a connection.
    NetworkUnreachable,
    /// The remote did not answer a reference query.
    RemoteUnreachable { message: String },
}

impl HealthIssue {
    /// Whether this issue concerns the local repository rather than the network.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::InProgressMarkers { .. } | Self::StatusFailed { .. })
    }
}

impl fmt::Display for HealthIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgressMarkers { markers } => {
                write!(f, "operation in progress ({})", markers.join(", "))
            }
            Self::StatusFailed { message } => write!(f, "status query failed: {message}"),
            Self::NetworkUnreachable => f.write_str("network unreachable"),
            Self::RemoteUnreachable { message } => write!(f, "remote unreachable: {message}"),
        }
    }
}

/// Overall reading of a [`HealthStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assessment {
    Healthy,
    /// The local repository is locked, mid-operation, or unreadable.
    RepositoryUnavailable,
    /// The repository is fine but the remote cannot be reached.
    Offline,
}

/// Result of one probe. Healthy only when every check passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub checked_at: DateTime<Utc>,
    pub lock_free: bool,
    pub status_ok: bool,
    pub network_reachable: bool,
    pub remote_reachable: bool,
    pub issues: Vec<HealthIssue>,
}

impl HealthStatus {
    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn assessment(&self) -> Assessment {
        if !self.lock_free || !self.status_ok {
            Assessment::RepositoryUnavailable
        } else if !self.network_reachable || !self.remote_reachable {
            Assessment::Offline
        } else {
            Assessment::Healthy
        }
    }
}

/// Read-only health checks against the backend.
#[derive(Clone)]
pub struct HealthProber {
    local: Arc<dyn LocalRepo>,
    remote: Arc<dyn RemoteClient>,
    network: Arc<dyn NetworkProbe>,
    remote_name: String,
    config: HealthConfig,
}

impl HealthProber {
    pub fn new(
        local: Arc<dyn LocalRepo>,
        remote: Arc<dyn RemoteClient>,
        network: Arc<dyn NetworkProbe>,
        remote_name: impl Into<String>,
        config: HealthConfig,
    ) -> Self {
        Self {
            local,
            remote,
            network,
            remote_name: remote_name.into(),
            config,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Run all checks concurrently.
    pub async fn probe(&self) -> HealthStatus {
        let (markers, status, network, remote) = tokio::join!(
            self.check_markers(),
            self.check_status(),
            self.check_network(),
            self.check_remote(),
        );

        let mut issues = Vec::new();
        let lock_free = markers.is_none();
        if let Some(issue) = markers {
            issues.push(issue);
        }
        let status_ok = status.is_none();
        if let Some(issue) = status {
            issues.push(issue);
        }
        let network_reachable = network.is_none();
        if let Some(issue) = network {
            issues.push(issue);
        }
        let remote_reachable = remote.is_none();
        if let Some(issue) = remote {
            issues.push(issue);
        }

        let status = HealthStatus {
            checked_at: Utc::now(),
            lock_free,
            status_ok,
            network_reachable,
            remote_reachable,
            issues,
        };
        debug!(healthy = status.is_healthy(), issues = status.issues.len(), "health probed");
        status
    }

    /// Precondition for local operations.
    pub async fn repository_available(&self) -> Result<(), String> {
        let (markers, status) = tokio::join!(self.check_markers(), self.check_status());
        match markers.or(status) {
            Some(issue) => Err(issue.to_string()),
            None => Ok(()),
        }
    }

    /// Precondition for remote operations: the repository is usable and the
    /// network is up.
    pub async fn remote_available(&self) -> Result<(), String> {
        self.repository_available().await?;
        match self.check_network().await {
            Some(issue) => Err(issue.to_string()),
            None => Ok(()),
        }
    }

    async fn check_markers(&self) -> Option<HealthIssue> {
        match self.local.in_progress_markers().await {
            Ok(markers) if markers.is_empty() => None,
            Ok(markers) => Some(HealthIssue::InProgressMarkers { markers }),
            Err(e) => Some(HealthIssue::StatusFailed {
                message: e.to_string(),
            }),
        }
    }

    async fn check_status(&self) -> Option<HealthIssue> {
        let timeout = self.config.status_timeout;
        match tokio::time::timeout(timeout, self.local.status_check(timeout)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(HealthIssue::StatusFailed {
                message: e.to_string(),
            }),
            Err(_) => Some(HealthIssue::StatusFailed {
                message: format!("timed out after {timeout:?}"),
            }),
        }
    }

    async fn check_network(&self) -> Option<HealthIssue> {
        // Hosts are tried concurrently, so one connect timeout plus slack bounds it.
        let budget = self.config.connect_timeout + Duration::from_secs(1);
        match tokio::time::timeout(budget, self.network.reachable()).await {
            Ok(true) => None,
            _ => Some(HealthIssue::NetworkUnreachable),
        }
    }

    async fn check_remote(&self) -> Option<HealthIssue> {
        let timeout = self.config.remote_timeout;
        let query = self.remote.probe(&self.remote_name, timeout);
        match tokio::time::timeout(timeout, query).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(HealthIssue::RemoteUnreachable {
                message: e.to_string(),
            }),
            Err(_) => Some(HealthIssue::RemoteUnreachable {
                message: format!("timed out after {timeout:?}"),
            }),
        }
    }
}
