//! StateMachine
//!
//! The application side of the consensus core:
//! - Applying committed log entries
//! - Producing snapshot files of its current state
//! - Restoring itself from a snapshot file

use std::path::Path;
use std::path::PathBuf;

#[cfg(test)]
use mockall::automock;

use crate::Result;
use crate::Version;

#[cfg_attr(test, automock)]
pub trait StateMachine: Send + Sync + 'static {
    /// Applies one committed payload. `version` is the `(index, term)` of the
    /// entry being applied; implementations may persist it as their recovery
    /// watermark.
    fn apply(
        &self,
        payload: &[u8],
        version: Version,
    ) -> Result<()>;

    /// Writes a snapshot of the current state into `dir` and returns the path
    /// of the produced temp file. The file must start with a serialized
    /// [`Version`] header describing the snapshot watermark; the node renames
    /// it into its final `<index>.snapshot` name.
    fn make_snapshot(
        &self,
        dir: &Path,
    ) -> Result<PathBuf>;

    /// Resets the state machine from the snapshot file at `path`.
    fn load_snapshot(
        &self,
        path: &Path,
    ) -> Result<()>;
}
