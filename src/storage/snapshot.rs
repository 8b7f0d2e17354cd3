//! Snapshot file helpers.
//!
//! A snapshot file is a serialized [`Version`] header followed by the state
//! machine's opaque payload. Committed snapshots live in the configured
//! snapshot directory as `<index>.snapshot`; at most one in-progress receive
//! file (`<index>.snapshot_tmp`) exists at a time.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use tracing::warn;

use crate::Result;
use crate::StorageError;
use crate::Version;

pub const SNAPSHOT_EXT: &str = "snapshot";
pub const SNAPSHOT_TMP_EXT: &str = "snapshot_tmp";

/// File name of a committed snapshot at `index`. Zero-padded so
/// lexicographic directory order matches index order.
pub fn snapshot_file_name(index: u64) -> String {
    format!("{:020}.{}", index, SNAPSHOT_EXT)
}

/// File name of the in-progress receive file for a transfer ending at
/// `index`.
pub fn snapshot_tmp_file_name(index: u64) -> String {
    format!("{:020}.{}", index, SNAPSHOT_TMP_EXT)
}

/// Serializes the watermark header at the current position of `writer`.
pub fn write_version_header<W: Write>(
    writer: &mut W,
    version: &Version,
) -> Result<()> {
    bincode::serialize_into(writer, version)?;
    Ok(())
}

/// Reads the watermark header from the current position of `reader`.
pub fn read_version_header<R: Read>(reader: &mut R) -> Result<Version> {
    let version = bincode::deserialize_from(reader)?;
    Ok(version)
}

/// Reads the watermark header of the snapshot file at `path`.
pub fn read_version_from(path: &Path) -> Result<Version> {
    let mut file = File::open(path).map_err(|e| StorageError::PathError {
        path: path.to_path_buf(),
        source: e,
    })?;
    read_version_header(&mut file)
}

/// Scans `dir` for committed snapshot files, keyed by their watermark index.
///
/// Files that cannot be opened or whose header does not parse are skipped
/// with a warning so one corrupt file does not hide the rest.
pub fn scan_snapshots(dir: &Path) -> Result<BTreeMap<u64, (Version, PathBuf)>> {
    let mut snapshots = BTreeMap::new();
    if !dir.exists() {
        return Ok(snapshots);
    }

    for dir_entry in std::fs::read_dir(dir).map_err(|e| StorageError::PathError {
        path: dir.to_path_buf(),
        source: e,
    })? {
        let path = dir_entry
            .map_err(|e| StorageError::PathError {
                path: dir.to_path_buf(),
                source: e,
            })?
            .path();

        if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
            continue;
        }

        match read_version_from(&path) {
            Ok(version) => {
                snapshots.insert(version.index, (version, path));
            }
            Err(e) => {
                warn!("skip unreadable snapshot file {:?}: {:?}", path, e);
            }
        }
    }
    Ok(snapshots)
}

/// The newest committed snapshot in `dir`, if any.
pub fn latest_snapshot(dir: &Path) -> Result<Option<(Version, PathBuf)>> {
    let mut snapshots = scan_snapshots(dir)?;
    Ok(snapshots.pop_last().map(|(_, found)| found))
}
