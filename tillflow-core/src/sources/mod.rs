//! Sources feeding raw events into a tillflow job.
mod iterator;

pub use iterator::IteratorSource;
use thiserror::Error;

use crate::types::RawEvent;

/// Failure while reading from the message bus
#[derive(Debug, Error)]
#[error("Source failed: {0}")]
pub struct SourceError(
    /// Underlying bus failure
    #[source]
    pub Box<dyn std::error::Error + Send + Sync>,
);

impl SourceError {
    /// Wrap any error as a source failure
    pub fn new(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(source))
    }
}

/// Anything which can supply raw events to the ingest loop.
///
/// `poll` returning `Ok(None)` means "nothing available right now", not end
/// of stream; a finite source signals the end by returning `true` from
/// `is_finished`. Unbounded sources like a message bus subscription never
/// finish.
#[async_trait::async_trait]
pub trait EventSource: Send + 'static {
    /// Fetch the next raw event if one is available
    async fn poll(&mut self) -> Result<Option<RawEvent>, SourceError>;

    /// True once this source will never yield another event
    fn is_finished(&self) -> bool {
        false
    }
}
