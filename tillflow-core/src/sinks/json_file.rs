//! Append-only JSON-lines sink with a durable progress marker.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::checkpoint::{CheckpointMarker, FileCheckpoint};

use super::{RowSink, SinkError};

/// Writes each row as one JSON document per line to an append-only file and
/// persists a [CheckpointMarker] after every committed batch.
///
/// On construction the marker is loaded; if the data file is longer than
/// the committed offset (a crash hit between write and commit) the excess
/// is truncated, so restarts never leave rows beyond the checkpoint behind.
#[derive(Debug)]
pub struct JsonFileSink<R> {
    path: PathBuf,
    checkpoint: FileCheckpoint,
    marker: Option<CheckpointMarker>,
    /// File length after the last successful write, pending commit
    offset: u64,
    rows_written: u64,
    retry_budget: u32,
    _row: PhantomData<R>,
}

impl<R> JsonFileSink<R> {
    /// Open a sink writing to `path` with its marker at `checkpoint_path`.
    ///
    /// Fails on an unreadable or corrupt marker; a missing marker is a
    /// fresh start.
    pub fn new(
        path: impl Into<PathBuf>,
        checkpoint_path: impl Into<PathBuf>,
        retry_budget: u32,
    ) -> Result<Self, SinkError> {
        let path = path.into();
        let checkpoint_path = checkpoint_path.into();
        for target in [&path, &checkpoint_path] {
            if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                    path: target.clone(),
                    source,
                })?;
            }
        }
        let checkpoint = FileCheckpoint::new(checkpoint_path);
        let marker = checkpoint.load()?;
        let offset = marker.as_ref().map(|m| m.offset).unwrap_or(0);
        let rows_written = marker.as_ref().map(|m| m.rows_written).unwrap_or(0);
        if let Some(marker) = marker.as_ref() {
            truncate_to(&path, marker.offset)?;
            info!(
                path = %path.display(),
                flushed_up_to = %marker.flushed_up_to,
                "Resuming sink from checkpoint"
            );
        }
        Ok(Self {
            path,
            checkpoint,
            marker,
            offset,
            rows_written,
            retry_budget: retry_budget.max(1),
            _row: PhantomData,
        })
    }

    fn encode_batch(rows: &[R]) -> Result<Vec<u8>, SinkError>
    where
        R: Serialize,
    {
        let mut buf = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buf, row).map_err(SinkError::Serialize)?;
            buf.push(b'\n');
        }
        Ok(buf)
    }

    /// Append the encoded batch, rewinding to the last good offset before
    /// every attempt so a partially written batch is never duplicated.
    fn try_append(&self, encoded: &[u8]) -> std::io::Result<u64> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;
        file.set_len(self.offset)?;
        file.seek(SeekFrom::Start(self.offset))?;
        file.write_all(encoded)?;
        file.sync_data()?;
        Ok(self.offset + encoded.len() as u64)
    }
}

fn truncate_to(path: &Path, offset: u64) -> Result<(), SinkError> {
    let io_err = |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > offset => {
            warn!(
                path = %path.display(),
                found = meta.len(),
                committed = offset,
                "Truncating rows written after the last committed checkpoint"
            );
            let file = OpenOptions::new().write(true).open(path).map_err(io_err)?;
            file.set_len(offset).map_err(io_err)?;
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(e)),
    }
}

#[async_trait::async_trait]
impl<R> RowSink<R> for JsonFileSink<R>
where
    R: Serialize + Send + Sync + 'static,
{
    fn resume_from(&self) -> Option<DateTime<Utc>> {
        self.marker.as_ref().map(|m| m.flushed_up_to)
    }

    async fn write_batch(&mut self, rows: &[R]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let encoded = Self::encode_batch(rows)?;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_append(&encoded) {
                Ok(new_offset) => {
                    self.offset = new_offset;
                    self.rows_written += rows.len() as u64;
                    return Ok(());
                }
                Err(e) if attempt < self.retry_budget => {
                    warn!(
                        path = %self.path.display(),
                        attempt,
                        error = %e,
                        "Sink write failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(e) => {
                    return Err(SinkError::RetriesExhausted {
                        path: self.path.clone(),
                        attempts: attempt,
                        source: e,
                    })
                }
            }
        }
    }

    async fn commit(&mut self, flushed_up_to: DateTime<Utc>) -> Result<(), SinkError> {
        let marker = CheckpointMarker {
            flushed_up_to,
            offset: self.offset,
            rows_written: self.rows_written,
        };
        self.checkpoint.store(&marker)?;
        self.marker = Some(marker);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        value: f64,
    }

    fn row(name: &str, value: f64) -> Row {
        Row {
            name: name.to_owned(),
            value,
        }
    }

    fn boundary(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 9, 18, 12, minute, 0).unwrap()
    }

    fn read_rows(path: &std::path::Path) -> Vec<Row> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn appends_one_json_document_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        let mut sink: JsonFileSink<Row> =
            JsonFileSink::new(&path, dir.path().join("cp"), 3).unwrap();

        sink.write_batch(&[row("a", 1.0), row("b", 2.0)]).await.unwrap();
        sink.commit(boundary(1)).await.unwrap();
        sink.write_batch(&[row("c", 3.0)]).await.unwrap();
        sink.commit(boundary(2)).await.unwrap();

        assert_eq!(
            read_rows(&path),
            vec![row("a", 1.0), row("b", 2.0), row("c", 3.0)]
        );
    }

    #[tokio::test]
    async fn resumes_from_committed_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        let cp = dir.path().join("cp");
        {
            let mut sink: JsonFileSink<Row> = JsonFileSink::new(&path, &cp, 3).unwrap();
            sink.write_batch(&[row("a", 1.0)]).await.unwrap();
            sink.commit(boundary(1)).await.unwrap();
        }
        let sink: JsonFileSink<Row> = JsonFileSink::new(&path, &cp, 3).unwrap();
        assert_eq!(sink.resume_from(), Some(boundary(1)));
    }

    #[tokio::test]
    async fn truncates_rows_written_after_the_last_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        let cp = dir.path().join("cp");
        {
            let mut sink: JsonFileSink<Row> = JsonFileSink::new(&path, &cp, 3).unwrap();
            sink.write_batch(&[row("a", 1.0)]).await.unwrap();
            sink.commit(boundary(1)).await.unwrap();
            // written but never committed, as if the job crashed here
            sink.write_batch(&[row("b", 2.0)]).await.unwrap();
        }
        let _sink: JsonFileSink<Row> = JsonFileSink::new(&path, &cp, 3).unwrap();
        assert_eq!(read_rows(&path), vec![row("a", 1.0)]);
    }

    #[tokio::test]
    async fn failing_writes_exhaust_the_retry_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        let mut sink: JsonFileSink<Row> =
            JsonFileSink::new(&path, dir.path().join("cp"), 3).unwrap();
        // a directory at the data path makes every append attempt fail
        std::fs::create_dir(&path).unwrap();

        let err = sink.write_batch(&[row("a", 1.0)]).await.unwrap_err();
        match err {
            SinkError::RetriesExhausted { attempts, path: failed, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(failed, path);
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fresh_sink_has_no_resume_point() {
        let dir = tempfile::tempdir().unwrap();
        let sink: JsonFileSink<Row> =
            JsonFileSink::new(dir.path().join("rows.json"), dir.path().join("cp"), 3).unwrap();
        assert_eq!(sink.resume_from(), None);
    }
}
