use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::{RowSink, SinkError};

/// A sink which captures all rows into a shared vector.
///
/// Clone the sink before handing it to a job, then read the captured rows
/// from the clone once the job is done. Test-oriented, no durability.
#[derive(Debug)]
pub struct VecRowSink<R> {
    rows: Arc<Mutex<Vec<R>>>,
    commits: Arc<Mutex<Vec<DateTime<Utc>>>>,
}

impl<R> Clone for VecRowSink<R> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
            commits: Arc::clone(&self.commits),
        }
    }
}

impl<R> Default for VecRowSink<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> VecRowSink<R> {
    /// New empty sink
    pub fn new() -> Self {
        Self {
            rows: Arc::new(Mutex::new(Vec::new())),
            commits: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Snapshot of all captured rows
    pub fn rows(&self) -> Vec<R>
    where
        R: Clone,
    {
        #[allow(clippy::unwrap_used)]
        self.rows.lock().unwrap().clone()
    }

    /// All committed boundaries in commit order
    pub fn commits(&self) -> Vec<DateTime<Utc>> {
        #[allow(clippy::unwrap_used)]
        self.commits.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl<R> RowSink<R> for VecRowSink<R>
where
    R: Clone + Send + Sync + 'static,
{
    async fn write_batch(&mut self, rows: &[R]) -> Result<(), SinkError> {
        #[allow(clippy::unwrap_used)]
        self.rows.lock().unwrap().extend_from_slice(rows);
        Ok(())
    }

    async fn commit(&mut self, flushed_up_to: DateTime<Utc>) -> Result<(), SinkError> {
        #[allow(clippy::unwrap_used)]
        self.commits.lock().unwrap().push(flushed_up_to);
        Ok(())
    }
}
