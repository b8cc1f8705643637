//! Priority resolution between a local and a remote commit.
//!
//! Rules, first applicable wins:
//!
//! 1. Either timestamp missing: remote ([`Rationale::MissingTimestamp`]).
//! 2. Remote commit automatic: remote ([`Rationale::RemoteAutomatic`]).
//! 3. Local commit automatic: remote ([`Rationale::LocalAutomatic`]).
//! 4. Both manual, with `delta = local - remote`:
//!    - `delta > emergency`: remote ([`Rationale::EmergencyOverride`])
//!    - `delta > time_sync`: local ([`Rationale::ManualLocalNewer`])
//!    - otherwise remote ([`Rationale::WithinThreshold`])
//! 5. Anything else: remote ([`Rationale::DefaultFallback`]).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::{CommitClass, CommitClassifier};
use crate::config::ConfigError;
use crate::vcs::{CommitRef, Side};

/// Why a side was favored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rationale {
    MissingTimestamp,
    RemoteAutomatic,
    LocalAutomatic,
    EmergencyOverride,
    ManualLocalNewer,
    WithinThreshold,
    DefaultFallback,
    /// Remote could not be consulted; local is the only authority.
    OfflineFallback,
}

impl fmt::Display for Rationale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::MissingTimestamp => "MissingTimestamp",
            Self::RemoteAutomatic => "RemoteAutomatic",
            Self::LocalAutomatic => "LocalAutomatic",
            Self::EmergencyOverride => "EmergencyOverride",
            Self::ManualLocalNewer => "ManualLocalNewer",
            Self::WithinThreshold => "WithinThreshold",
            Self::DefaultFallback => "DefaultFallback",
            Self::OfflineFallback => "OfflineFallback",
        };
        f.write_str(tag)
    }
}

/// Time-sync and emergency thresholds. Emergency is always strictly greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    time_sync: Duration,
    emergency: Duration,
}

impl Thresholds {
    pub fn new(time_sync: Duration, emergency: Duration) -> Result<Self, ConfigError> {
        if emergency <= time_sync {
            return Err(ConfigError::InvalidThresholds {
                time_sync_secs: time_sync.as_secs(),
                emergency_secs: emergency.as_secs(),
            });
        }
        Ok(Self {
            time_sync,
            emergency,
        })
    }

    pub fn time_sync(&self) -> Duration {
        self.time_sync
    }

    pub fn emergency(&self) -> Duration {
        self.emergency
    }
}

/// The outcome of comparing a local/remote commit pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityDecision {
    pub favored: Side,
    pub rationale: Rationale,
    pub local: CommitRef,
    pub remote: CommitRef,
    pub local_class: CommitClass,
    pub remote_class: CommitClass,
}

impl PriorityDecision {
    /// A local-favored decision for when the remote cannot be consulted.
    ///
    /// Both sides are still classified; `remote` is whatever the last fetch
    /// left in the remote-tracking ref.
    pub fn offline(classifier: &CommitClassifier, local: CommitRef, remote: CommitRef) -> Self {
        Self {
            favored: Side::Local,
            rationale: Rationale::OfflineFallback,
            local_class: classifier.classify(&local),
            remote_class: classifier.classify(&remote),
            local,
            remote,
        }
    }
}

/// Decides which side wins for a divergent branch pair.
#[derive(Debug, Clone)]
pub struct PriorityResolver<'a> {
    classifier: &'a CommitClassifier,
    thresholds: Thresholds,
}

impl<'a> PriorityResolver<'a> {
    pub fn new(classifier: &'a CommitClassifier, thresholds: Thresholds) -> Self {
        Self {
            classifier,
            thresholds,
        }
    }

    pub fn resolve(&self, local: CommitRef, remote: CommitRef) -> PriorityDecision {
        let local_class = self.classifier.classify(&local);
        let remote_class = self.classifier.classify(&remote);
        let (favored, rationale) = self.decide(&local, &remote, local_class, remote_class);

        debug!(
            local = %local.short_id(),
            remote = %remote.short_id(),
            %local_class,
            %remote_class,
            %favored,
            %rationale,
            "priority resolved"
        );

        PriorityDecision {
            favored,
            rationale,
            local,
            remote,
            local_class,
            remote_class,
        }
    }

    fn decide(
        &self,
        local: &CommitRef,
        remote: &CommitRef,
        local_class: CommitClass,
        remote_class: CommitClass,
    ) -> (Side, Rationale) {
        let (Some(local_ts), Some(remote_ts)) = (local.timestamp, remote.timestamp) else {
            return (Side::Remote, Rationale::MissingTimestamp);
        };

        if remote_class == CommitClass::Automatic {
            return (Side::Remote, Rationale::RemoteAutomatic);
        }
        if local_class == CommitClass::Automatic {
            return (Side::Remote, Rationale::LocalAutomatic);
        }

        let Some(delta) = local_ts.checked_sub(remote_ts) else {
            return (Side::Remote, Rationale::DefaultFallback);
        };
        let emergency = i64::try_from(self.thresholds.emergency.as_secs()).unwrap_or(i64::MAX);
        let time_sync = i64::try_from(self.thresholds.time_sync.as_secs()).unwrap_or(i64::MAX);

        if delta > emergency {
            (Side::Remote, Rationale::EmergencyOverride)
        } else if delta > time_sync {
            (Side::Local, Rationale::ManualLocalNewer)
        } else {
            (Side::Remote, Rationale::WithinThreshold)
        }
    }
}
