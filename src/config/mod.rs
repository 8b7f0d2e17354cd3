//! Configuration for the consensus core.
//!
//! Loading is layered, lowest priority first:
//! 1. Hardcoded defaults
//! 2. Optional TOML config file
//! 3. Environment variables with the `RAFT` prefix (highest priority)

mod raft;
pub use raft::*;


use config::Config;
use config::Environment;
use config::File;

use crate::Result;

impl RaftConfig {
    /// Load configuration, merging an optional TOML file and `RAFT`-prefixed
    /// environment variables over the defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("RAFT")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: RaftConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
