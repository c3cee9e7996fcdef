use crate::types::RawEvent;

use super::{EventSource, SourceError};

/// A finite source yielding payloads from an iterator. Useful in tests and
/// demos where no message bus is around.
pub struct IteratorSource<I> {
    payloads: I,
    finished: bool,
}

impl<I> IteratorSource<I>
where
    I: Iterator<Item = Vec<u8>>,
{
    /// Source yielding the given payloads in order, then finishing
    pub fn new<It>(payloads: It) -> Self
    where
        It: IntoIterator<Item = Vec<u8>, IntoIter = I>,
    {
        Self {
            payloads: payloads.into_iter(),
            finished: false,
        }
    }
}

#[async_trait::async_trait]
impl<I> EventSource for IteratorSource<I>
where
    I: Iterator<Item = Vec<u8>> + Send + 'static,
{
    async fn poll(&mut self) -> Result<Option<RawEvent>, SourceError> {
        match self.payloads.next() {
            Some(payload) => Ok(Some(RawEvent::new(payload))),
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}
