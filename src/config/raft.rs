use std::fmt::Debug;
use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Configuration parameters for the Raft consensus core
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct RaftConfig {
    /// Configuration settings for the leader election mechanism
    /// Controls timeouts and randomization for election timing
    #[serde(default)]
    pub election: ElectionConfig,

    /// Configuration settings related to log replication
    /// Includes batch limits and the client wait bound
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Configuration settings for background log compaction
    #[serde(default)]
    pub compaction: CompactionConfig,

    /// Configuration settings for the snapshot feature
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

impl Debug for RaftConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RaftConfig").finish()
    }
}

impl RaftConfig {
    /// Validates all subsystem configurations
    pub fn validate(&self) -> Result<()> {
        self.election.validate()?;
        self.replication.validate()?;
        self.compaction.validate()?;
        self.snapshot.validate()?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ElectionConfig {
    #[serde(default = "default_election_timeout_min")]
    pub election_timeout_min: u64,

    #[serde(default = "default_election_timeout_max")]
    pub election_timeout_max: u64,

    /// Optional fixed seed for the election jitter source. Leaving it unset
    /// seeds from entropy; setting it makes timer behavior reproducible.
    #[serde(default)]
    pub timer_seed: Option<u64>,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: default_election_timeout_min(),
            election_timeout_max: default_election_timeout_max(),
            timer_seed: None,
        }
    }
}

impl ElectionConfig {
    fn validate(&self) -> Result<()> {
        if self.election_timeout_min >= self.election_timeout_max {
            return Err(Error::Config(ConfigError::Message(format!(
                "election_timeout_min {}ms must be less than election_timeout_max {}ms",
                self.election_timeout_min, self.election_timeout_max
            ))));
        }
        Ok(())
    }
}

// in ms
fn default_election_timeout_min() -> u64 {
    1500
}
fn default_election_timeout_max() -> u64 {
    3000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReplicationConfig {
    #[serde(default = "default_entries_per_replication")]
    pub max_entries_per_replication: u64,

    #[serde(default = "default_bytes_per_replication")]
    pub max_bytes_per_replication: u64,

    /// Upper bound on how long a client write blocks waiting for commitment.
    /// `0` disables the bound and the caller waits until the entry commits or
    /// leadership is lost.
    #[serde(default)]
    pub replicate_timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_entries_per_replication: default_entries_per_replication(),
            max_bytes_per_replication: default_bytes_per_replication(),
            replicate_timeout_ms: 0,
        }
    }
}

impl ReplicationConfig {
    fn validate(&self) -> Result<()> {
        if self.max_entries_per_replication == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_entries_per_replication must be > 0".into(),
            )));
        }
        if self.max_bytes_per_replication == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_bytes_per_replication must be > 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_entries_per_replication() -> u64 {
    10_000
}
fn default_bytes_per_replication() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CompactionConfig {
    /// Retained entry count above which a background compaction run is
    /// triggered after a client write.
    #[serde(default = "default_max_log_count")]
    pub max_log_count: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_log_count: default_max_log_count(),
        }
    }
}

impl CompactionConfig {
    fn validate(&self) -> Result<()> {
        if self.max_log_count == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_log_count must be > 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_max_log_count() -> u64 {
    5
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SnapshotConfig {
    /// Directory holding `.snapshot` files and at most one in-progress
    /// `.snapshot_tmp` receive file.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

impl SnapshotConfig {
    fn validate(&self) -> Result<()> {
        if self.snapshot_dir.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "snapshot_dir must not be empty".into(),
            )));
        }
        Ok(())
    }
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("snapshots")
}
