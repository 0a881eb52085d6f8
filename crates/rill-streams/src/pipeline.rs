//! Deliver-then-acknowledge pipeline
//!
//! Auto-ack is two backend calls with a failure window between them. The
//! first step's result is held as a [`DeliveredBatch`]; the second step
//! acknowledges it one id at a time and, on failure, reports the whole
//! batch together with how far acknowledgment got.

use std::future::Future;
use std::time::Duration;

use rill_core::{
    Entry, EntryId, LogPosition, Operation, PartialAck, StreamBackend, StreamError, StreamResult,
};
use tracing::{trace, warn};

/// Run `fut` under a deadline, mapping expiry to [`StreamError::Timeout`]
pub(crate) async fn with_deadline<T, F>(op: Operation, after: Duration, fut: F) -> StreamResult<T>
where
    F: Future<Output = StreamResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(StreamError::Timeout { op, after }),
    }
}

/// Entries handed out by one group read or claim, not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredBatch {
    op: Operation,
    entries: Vec<Entry>,
    next_cursor: Option<LogPosition>,
}

impl DeliveredBatch {
    /// Batch delivered by a group read
    pub fn delivered(entries: Vec<Entry>) -> Self {
        Self {
            op: Operation::ReadGroup,
            entries,
            next_cursor: None,
        }
    }

    /// Batch reassigned by a claim scan that stopped at `next_cursor`
    pub fn claimed(entries: Vec<Entry>, next_cursor: LogPosition) -> Self {
        Self {
            op: Operation::Claim,
            entries,
            next_cursor: Some(next_cursor),
        }
    }

    /// The operation that produced the batch
    pub fn operation(&self) -> Operation {
        self.op
    }

    /// Delivered entries in delivery order
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Ids in delivery order
    pub fn ids(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.entries.iter().map(|entry| entry.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Give up the batch without acknowledging; the entries stay pending
    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    /// Acknowledge every entry, in order, one request per id
    ///
    /// Stops at the first failure and returns
    /// [`StreamError::AckAfterDelivery`] carrying the full batch, the ids
    /// already acknowledged and the id that failed. Ids after the failed
    /// one are left pending.
    pub async fn acknowledge(
        self,
        backend: &dyn StreamBackend,
        stream: &str,
        group: &str,
        deadline: Duration,
    ) -> StreamResult<Vec<Entry>> {
        let ids: Vec<EntryId> = self.ids().collect();
        let mut acknowledged = Vec::with_capacity(ids.len());

        for id in ids {
            let single = [id];
            let attempt = with_deadline(Operation::Ack, deadline, backend.ack(stream, group, &single));
            match attempt.await {
                Ok(_) => acknowledged.push(id),
                Err(cause) => {
                    warn!(
                        stream,
                        group,
                        id = %id,
                        delivered = self.entries.len(),
                        acknowledged = acknowledged.len(),
                        error = %cause,
                        "Acknowledgment failed after delivery"
                    );
                    return Err(StreamError::AckAfterDelivery(Box::new(PartialAck {
                        op: self.op,
                        delivered: self.entries,
                        acknowledged,
                        failed: id,
                        next_cursor: self.next_cursor,
                        cause,
                    })));
                }
            }
        }

        trace!(stream, group, acknowledged = acknowledged.len(), "Batch acknowledged");
        Ok(self.entries)
    }
}
