//! Durable progress markers for checkpointed sinks.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Progress marker of one sink: everything up to this point has been
/// flushed and must not be re-emitted after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMarker {
    /// Greatest window end boundary flushed so far
    pub flushed_up_to: DateTime<Utc>,
    /// Byte length of the sink's data file after the flush
    pub offset: u64,
    /// Total rows written so far
    pub rows_written: u64,
}

/// Failure while reading or writing a checkpoint.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The marker file could not be read or written
    #[error("Checkpoint at {path} is unreadable")]
    Io {
        /// Marker path
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },
    /// The marker file exists but does not decode. Requires operator
    /// intervention, resuming blindly would risk silent data loss.
    #[error("Checkpoint at {path} is corrupt")]
    Corrupt {
        /// Marker path
        path: PathBuf,
        /// Underlying decode failure
        #[source]
        source: rmp_serde::decode::Error,
    },
    /// The marker could not be encoded
    #[error("Checkpoint marker could not be encoded")]
    Encode(#[source] rmp_serde::encode::Error),
}

/// A checkpoint marker persisted as a single file.
///
/// Writes go to a sibling temp file first and are moved into place with a
/// rename, so a reader never observes a half-written marker.
#[derive(Debug)]
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    /// Checkpoint stored at the given path. The file is created on the
    /// first [store](Self::store).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the marker. A missing file means no flush has happened yet and
    /// returns `None`; a file that exists but does not decode is fatal.
    pub fn load(&self) -> Result<Option<CheckpointMarker>, CheckpointError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        rmp_serde::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CheckpointError::Corrupt {
                path: self.path.clone(),
                source: e,
            })
    }

    /// Atomically replace the marker
    pub fn store(&mut self, marker: &CheckpointMarker) -> Result<(), CheckpointError> {
        let encoded = rmp_serde::to_vec(marker).map_err(CheckpointError::Encode)?;
        let tmp = self.path.with_extension("tmp");
        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&encoded).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn marker() -> CheckpointMarker {
        CheckpointMarker {
            flushed_up_to: Utc.with_ymd_and_hms(2020, 9, 18, 12, 1, 0).unwrap(),
            offset: 512,
            rows_written: 4,
        }
    }

    #[test]
    fn missing_marker_is_a_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = FileCheckpoint::new(dir.path().join("cp"));
        assert_eq!(checkpoint.load().unwrap(), None);
    }

    #[test]
    fn marker_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpoint = FileCheckpoint::new(dir.path().join("cp"));
        checkpoint.store(&marker()).unwrap();
        assert_eq!(checkpoint.load().unwrap(), Some(marker()));
    }

    #[test]
    fn store_overwrites_previous_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpoint = FileCheckpoint::new(dir.path().join("cp"));
        checkpoint.store(&marker()).unwrap();
        let newer = CheckpointMarker {
            flushed_up_to: marker().flushed_up_to + chrono::TimeDelta::minutes(1),
            offset: 1024,
            rows_written: 8,
        };
        checkpoint.store(&newer).unwrap();
        assert_eq!(checkpoint.load().unwrap(), Some(newer));
    }

    #[test]
    fn corrupt_marker_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp");
        fs::write(&path, b"definitely not msgpack").unwrap();
        let checkpoint = FileCheckpoint::new(&path);
        assert!(matches!(
            checkpoint.load(),
            Err(CheckpointError::Corrupt { .. })
        ));
    }
}
