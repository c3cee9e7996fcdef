//! Sinks receiving enriched records and KPI rows from a tillflow job.
mod console;
mod json_file;
mod vec_sink;

use chrono::{DateTime, Utc};
pub use console::ConsoleSink;
pub use json_file::JsonFileSink;
use std::path::PathBuf;
use thiserror::Error;
pub use vec_sink::VecRowSink;

use crate::checkpoint::CheckpointError;

/// Failure while emitting rows or committing progress
#[derive(Debug, Error)]
pub enum SinkError {
    /// A row could not be serialized
    #[error("Row could not be serialized")]
    Serialize(#[source] serde_json::Error),
    /// I/O on the sink's data file failed outside the retried write path
    #[error("I/O failure on sink file {path}")]
    Io {
        /// Data file path
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },
    /// The batch write kept failing until the retry budget ran out
    #[error("Write to {path} failed after {attempts} attempts")]
    RetriesExhausted {
        /// Data file path
        path: PathBuf,
        /// Attempts made
        attempts: u32,
        /// Last failure
        #[source]
        source: std::io::Error,
    },
    /// The sink's progress marker failed
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// A sink for the rows of one aggregation pipeline.
///
/// The pipeline writes every batch of closed windows with `write_batch` and
/// then calls `commit` with the greatest emitted window end. A durable sink
/// reports the committed boundary back through `resume_from` after a
/// restart so the pipeline never re-emits those windows.
#[async_trait::async_trait]
pub trait RowSink<R>: Send + 'static {
    /// Boundary up to which rows were already flushed in a previous run
    fn resume_from(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Emit one batch of rows
    async fn write_batch(&mut self, rows: &[R]) -> Result<(), SinkError>;

    /// Durably record that everything up to `flushed_up_to` has been
    /// emitted
    async fn commit(&mut self, flushed_up_to: DateTime<Utc>) -> Result<(), SinkError>;
}
