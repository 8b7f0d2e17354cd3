//! The receive side of one chunked snapshot transfer.
//!
//! At most one receive file exists per node at a time; the handle owns it for
//! the duration of the transfer. Replacing the handle (a new transfer
//! identity arrived) discards the partial file.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use tracing::warn;

use crate::storage::snapshot_tmp_file_name;
use crate::Result;
use crate::SnapshotInfo;
use crate::StorageError;

pub(crate) struct SnapshotReceiver {
    info: SnapshotInfo,
    path: PathBuf,
    file: File,
}

impl SnapshotReceiver {
    /// Opens (truncating) the receive file for the transfer identified by
    /// `info`.
    pub(crate) fn open(
        dir: &Path,
        info: SnapshotInfo,
    ) -> Result<Self> {
        let path = dir.join(snapshot_tmp_file_name(info.last_included.index));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| StorageError::PathError {
                path: path.clone(),
                source: e,
            })?;
        Ok(Self { info, path, file })
    }

    pub(crate) fn info(&self) -> &SnapshotInfo {
        &self.info
    }

    /// Bytes durably stored so far.
    pub(crate) fn size(&self) -> Result<u64> {
        let metadata = self.file.metadata().map_err(|e| StorageError::PathError {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(metadata.len())
    }

    /// Appends one chunk and returns the new file size.
    pub(crate) fn append(
        &mut self,
        data: &[u8],
    ) -> Result<u64> {
        self.file.write_all(data).map_err(|e| StorageError::PathError {
            path: self.path.clone(),
            source: e,
        })?;
        self.file.flush().map_err(|e| StorageError::PathError {
            path: self.path.clone(),
            source: e,
        })?;
        self.size()
    }

    /// Closes the file and hands the path over for finalization.
    pub(crate) fn into_path(self) -> PathBuf {
        self.path
    }

    /// Abandons the transfer, removing the partial file.
    pub(crate) fn discard(self) {
        let path = self.path.clone();
        drop(self);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("remove partial snapshot file {:?} failed: {:?}", path, e);
        }
    }
}
