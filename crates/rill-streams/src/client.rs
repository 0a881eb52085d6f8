//! High-level stream client API

use std::sync::Arc;
use std::time::Duration;

use rill_core::{
    AppendId, ClaimArgs, ClaimPage, DEFAULT_APPEND_ID, DEFAULT_GROUP_READ_POSITION,
    DEFAULT_GROUP_START, DEFAULT_READ_POSITION, Entry, EntryId, Fields, GroupReadArgs,
    LogPosition, Operation, PendingEntry, ReadArgs, StreamBackend, StreamError, StreamResult,
};
use tracing::{debug, trace, warn};

use crate::config::{ClaimOptions, ClientConfig, GroupReadOptions, ReadOptions};
use crate::pipeline::{DeliveredBatch, with_deadline};

/// Outcome of a full pending-list sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSweep {
    /// Every entry claimed across all pages, in scan order
    pub claimed: Vec<Entry>,
    /// Pending ids dropped because their entries were deleted
    pub deleted: Vec<EntryId>,
    /// Claim calls issued
    pub pages: usize,
    /// Whether the scan reached the end of the pending list
    pub complete: bool,
}

/// Consumer-group client over a [`StreamBackend`]
///
/// Each method issues its request(s) under the configured deadline, extended
/// by the block window for blocking reads. Nothing is retried.
#[derive(Clone)]
pub struct StreamClient {
    backend: Arc<dyn StreamBackend>,
    config: ClientConfig,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a client with default settings
    pub fn new(backend: Arc<dyn StreamBackend>) -> Self {
        Self::with_config(backend, ClientConfig::default())
    }

    /// Create a client with custom settings
    pub fn with_config(backend: Arc<dyn StreamBackend>, config: ClientConfig) -> Self {
        Self { backend, config }
    }

    /// The backing service handle
    pub fn backend(&self) -> &Arc<dyn StreamBackend> {
        &self.backend
    }

    /// Client settings
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn deadline(&self, block: Option<Duration>) -> Duration {
        self.config.timeout() + block.unwrap_or_default()
    }

    /// Check that the backing service answers
    pub async fn ping(&self) -> StreamResult<()> {
        with_deadline(Operation::Ping, self.deadline(None), self.backend.ping()).await
    }

    /// Append an entry with an id assigned by the log
    pub async fn append(&self, stream: &str, fields: &Fields) -> StreamResult<EntryId> {
        self.append_with_id(stream, DEFAULT_APPEND_ID, fields).await
    }

    /// Append an entry, optionally with an explicit id
    ///
    /// An explicit id must be greater than the stream's last id, otherwise
    /// [`StreamError::IdNotIncreasing`] is returned.
    pub async fn append_with_id(
        &self,
        stream: &str,
        id: AppendId,
        fields: &Fields,
    ) -> StreamResult<EntryId> {
        let op = Operation::Append;
        let assigned =
            with_deadline(op, self.deadline(None), self.backend.append(stream, id, fields)).await?;
        trace!(stream, requested = %id, id = %assigned, "Appended entry");
        Ok(assigned)
    }

    /// Read entries after a position without a consumer group
    ///
    /// An elapsed block window yields an empty result, not an error.
    pub async fn read(&self, stream: &str, options: ReadOptions) -> StreamResult<Vec<Entry>> {
        let op = Operation::Read;
        let block = non_zero(options.block);
        let args = ReadArgs {
            stream,
            from: options.from.unwrap_or(DEFAULT_READ_POSITION),
            count: non_zero_count(options.count),
            block,
        };
        let entries = with_deadline(op, self.deadline(block), self.backend.read(args)).await?;
        trace!(stream, from = %args.from, returned = entries.len(), "Read entries");
        Ok(entries)
    }

    /// Create a consumer group, creating the stream if needed
    ///
    /// `start` defaults to new entries only. Fails with
    /// [`StreamError::GroupExists`] when the group is already there.
    pub async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: Option<LogPosition>,
    ) -> StreamResult<()> {
        let op = Operation::CreateGroup;
        let start = start.unwrap_or(DEFAULT_GROUP_START);
        with_deadline(
            op,
            self.deadline(None),
            self.backend.create_group(stream, group, start, true),
        )
        .await?;
        debug!(stream, group, start = %start, "Consumer group created");
        Ok(())
    }

    /// Create a consumer group unless it already exists
    ///
    /// Returns `true` when the group was created by this call.
    pub async fn create_group_or_reuse(
        &self,
        stream: &str,
        group: &str,
        start: Option<LogPosition>,
    ) -> StreamResult<bool> {
        match self.create_group(stream, group, start).await {
            Ok(()) => Ok(true),
            Err(StreamError::GroupExists { .. }) => {
                debug!(stream, group, "Reusing existing consumer group");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// First step of a group read: deliver entries without acknowledging
    ///
    /// With the default cursor only entries never delivered to the group are
    /// returned; an explicit position replays this consumer's pending
    /// entries after it. Each returned entry is pending for `consumer`.
    pub async fn deliver(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        options: GroupReadOptions,
    ) -> StreamResult<DeliveredBatch> {
        let op = Operation::ReadGroup;
        let block = non_zero(options.block);
        let args = GroupReadArgs {
            stream,
            group,
            consumer,
            from: options.from.unwrap_or(DEFAULT_GROUP_READ_POSITION),
            count: non_zero_count(options.count),
            block,
        };
        let entries = with_deadline(op, self.deadline(block), self.backend.read_group(args)).await?;
        trace!(
            stream,
            group,
            consumer,
            from = %args.from,
            delivered = entries.len(),
            "Delivered entries"
        );
        Ok(DeliveredBatch::delivered(entries))
    }

    /// Read from a consumer group
    ///
    /// With `auto_ack` every delivered entry is acknowledged before
    /// returning; if that fails the call returns
    /// [`StreamError::AckAfterDelivery`] with the delivered batch.
    pub async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        options: GroupReadOptions,
    ) -> StreamResult<Vec<Entry>> {
        let batch = self.deliver(stream, group, consumer, options).await?;
        if options.auto_ack && !batch.is_empty() {
            batch
                .acknowledge(self.backend.as_ref(), stream, group, self.deadline(None))
                .await
        } else {
            Ok(batch.into_entries())
        }
    }

    /// Acknowledge one entry
    ///
    /// Returns 0 when the id was not pending, so retries are harmless.
    pub async fn ack(&self, stream: &str, group: &str, id: EntryId) -> StreamResult<u64> {
        let ids = [id];
        let removed = with_deadline(
            Operation::Ack,
            self.deadline(None),
            self.backend.ack(stream, group, &ids),
        )
        .await?;
        trace!(stream, group, id = %id, removed, "Acknowledged entry");
        Ok(removed)
    }

    /// Scan one page of the pending list and claim idle entries
    ///
    /// Feed `next_cursor` back until it returns [`LogPosition::Beginning`];
    /// the scan advances even when nothing qualifies.
    pub async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        options: ClaimOptions,
    ) -> StreamResult<ClaimPage> {
        let op = Operation::Claim;
        let count = if options.count == 0 {
            self.config.claim_count()
        } else {
            options.count
        };
        let args = ClaimArgs {
            stream,
            group,
            consumer,
            min_idle: options.min_idle,
            cursor: options.cursor,
            count,
        };
        let page = with_deadline(op, self.deadline(None), self.backend.auto_claim(args)).await?;
        debug!(
            stream,
            group,
            consumer,
            cursor = %options.cursor,
            claimed = page.claimed.len(),
            next = %page.next_cursor,
            "Claimed pending entries"
        );

        if !options.auto_ack || page.claimed.is_empty() {
            return Ok(page);
        }
        let ClaimPage {
            claimed,
            next_cursor,
            deleted,
        } = page;
        let claimed = DeliveredBatch::claimed(claimed, next_cursor)
            .acknowledge(self.backend.as_ref(), stream, group, self.deadline(None))
            .await?;
        Ok(ClaimPage {
            claimed,
            next_cursor,
            deleted,
        })
    }

    /// Claim idle entries across the whole pending list
    ///
    /// Chains [`StreamClient::claim`] pages from the start until the scan is
    /// exhausted or the configured page guard is hit. Claimed entries are
    /// not acknowledged.
    pub async fn claim_all(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> StreamResult<ClaimSweep> {
        let max_pages = self.config.max_claim_pages();
        let mut sweep = ClaimSweep::default();
        let mut cursor = LogPosition::Beginning;

        while sweep.pages < max_pages {
            let options = ClaimOptions::new(min_idle).cursor(cursor);
            let page = self.claim(stream, group, consumer, options).await?;
            let exhausted = page.is_exhausted();
            let next = page.next_cursor;
            sweep.pages += 1;
            sweep.claimed.extend(page.claimed);
            sweep.deleted.extend(page.deleted);

            if exhausted {
                sweep.complete = true;
                break;
            }
            if next <= cursor {
                return Err(StreamError::protocol(
                    Operation::Claim,
                    format!("claim cursor did not advance past {cursor}"),
                ));
            }
            cursor = next;
        }

        if !sweep.complete {
            warn!(stream, group, pages = sweep.pages, "Claim sweep stopped at page limit");
        }
        Ok(sweep)
    }

    /// List pending entries, optionally for one consumer
    pub async fn pending(
        &self,
        stream: &str,
        group: &str,
        consumer: Option<&str>,
        count: usize,
    ) -> StreamResult<Vec<PendingEntry>> {
        with_deadline(
            Operation::Pending,
            self.deadline(None),
            self.backend.pending(stream, group, consumer, count),
        )
        .await
    }
}

fn non_zero(block: Duration) -> Option<Duration> {
    (!block.is_zero()).then_some(block)
}

fn non_zero_count(count: usize) -> Option<usize> {
    (count > 0).then_some(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::ManualClock;
    use rill_storage::InMemoryStreamBackend;

    fn client_with(backend: Arc<InMemoryStreamBackend>) -> StreamClient {
        StreamClient::new(backend)
    }

    fn order(n: u32) -> Fields {
        Fields::new().with("order", n.to_string())
    }

    #[tokio::test]
    async fn test_read_defaults_to_beginning() {
        let backend = Arc::new(InMemoryStreamBackend::new());
        let client = client_with(backend);
        for n in 0..3 {
            client.append("orders", &order(n)).await.unwrap();
        }

        let entries = client.read("orders", ReadOptions::new()).await.unwrap();
        assert_eq!(entries.len(), 3);

        let page = client
            .read("orders", ReadOptions::new().count(2))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);

        let rest = client
            .read("orders", ReadOptions::new().from_position(page[1].position()))
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, entries[2].id);
    }

    #[tokio::test]
    async fn test_create_group_defaults_to_new_only() {
        let backend = Arc::new(InMemoryStreamBackend::new());
        let client = client_with(backend.clone());
        client.append("orders", &order(1)).await.unwrap();

        client.create_group("orders", "g1", None).await.unwrap();
        let entries = client
            .read_group("orders", "g1", "c1", GroupReadOptions::new())
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_create_group_provisions_stream() {
        let backend = Arc::new(InMemoryStreamBackend::new());
        let client = client_with(backend.clone());
        client.create_group("fresh", "g1", None).await.unwrap();
        assert!(backend.contains_stream("fresh"));
    }

    #[tokio::test]
    async fn test_create_group_or_reuse() {
        let backend = Arc::new(InMemoryStreamBackend::new());
        let client = client_with(backend);
        assert!(client.create_group_or_reuse("orders", "g1", None).await.unwrap());
        assert!(!client.create_group_or_reuse("orders", "g1", None).await.unwrap());

        let err = client.create_group("orders", "g1", None).await.unwrap_err();
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_append_with_explicit_id() {
        let backend = Arc::new(InMemoryStreamBackend::new());
        let client = client_with(backend);
        let id = EntryId::new(10, 0);
        assert_eq!(
            client
                .append_with_id("orders", AppendId::Explicit(id), &order(1))
                .await
                .unwrap(),
            id
        );
        let err = client
            .append_with_id("orders", AppendId::Explicit(EntryId::new(9, 0)), &order(2))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::IdNotIncreasing { .. }));
    }

    #[tokio::test]
    async fn test_auto_ack_clears_pending() {
        let backend = Arc::new(InMemoryStreamBackend::new());
        let client = client_with(backend.clone());
        client.create_group("orders", "g1", None).await.unwrap();
        for n in 0..2 {
            client.append("orders", &order(n)).await.unwrap();
        }

        let entries = client
            .read_group("orders", "g1", "c1", GroupReadOptions::new().auto_ack(true))
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(backend.pending_len("orders", "g1"), 0);
    }

    #[tokio::test]
    async fn test_claim_uses_configured_batch() {
        let backend = Arc::new(InMemoryStreamBackend::new());
        let config = ClientConfig::default().with_claim_count(2);
        let client = StreamClient::with_config(backend.clone(), config);
        client
            .create_group("orders", "g1", Some(LogPosition::Beginning))
            .await
            .unwrap();
        for n in 0..5 {
            client.append("orders", &order(n)).await.unwrap();
        }
        client
            .read_group("orders", "g1", "c1", GroupReadOptions::new())
            .await
            .unwrap();

        let page = client
            .claim("orders", "g1", "c2", ClaimOptions::new(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(page.claimed.len(), 2);
        assert!(!page.is_exhausted());
    }

    #[tokio::test]
    async fn test_claim_all_sweeps_every_page() {
        let clock = Arc::new(ManualClock::new());
        let backend = Arc::new(InMemoryStreamBackend::with_clock(clock.clone()));
        let client = StreamClient::with_config(
            backend.clone(),
            ClientConfig::default().with_claim_count(3),
        );
        client
            .create_group("orders", "g1", Some(LogPosition::Beginning))
            .await
            .unwrap();
        for n in 0..10 {
            client.append("orders", &order(n)).await.unwrap();
        }
        client
            .read_group("orders", "g1", "dead", GroupReadOptions::new())
            .await
            .unwrap();
        clock.advance(Duration::from_secs(120));

        let sweep = client
            .claim_all("orders", "g1", "rescuer", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(sweep.complete);
        assert_eq!(sweep.claimed.len(), 10);
        assert_eq!(sweep.pages, 4);

        let pending = client.pending("orders", "g1", Some("rescuer"), 100).await.unwrap();
        assert_eq!(pending.len(), 10);
    }

    #[tokio::test]
    async fn test_claim_all_collects_deleted_across_pages() {
        let backend = Arc::new(InMemoryStreamBackend::new());
        let client = StreamClient::with_config(
            backend.clone(),
            ClientConfig::default().with_claim_count(1),
        );
        client
            .create_group("orders", "g1", Some(LogPosition::Beginning))
            .await
            .unwrap();
        let mut ids = Vec::new();
        for n in 0..4 {
            ids.push(client.append("orders", &order(n)).await.unwrap());
        }
        client
            .read_group("orders", "g1", "c1", GroupReadOptions::new())
            .await
            .unwrap();
        assert_eq!(backend.delete_entries("orders", &[ids[1], ids[3]]), 2);

        let sweep = client
            .claim_all("orders", "g1", "c2", Duration::ZERO)
            .await
            .unwrap();
        assert!(sweep.complete);
        assert_eq!(sweep.pages, 3);
        assert_eq!(
            sweep.claimed.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![ids[0], ids[2]]
        );
        assert_eq!(sweep.deleted, vec![ids[1], ids[3]]);
        assert_eq!(backend.pending_len("orders", "g1"), 2);
    }

    #[tokio::test]
    async fn test_claim_all_page_guard() {
        let backend = Arc::new(InMemoryStreamBackend::new());
        let config = ClientConfig::default()
            .with_claim_count(1)
            .with_max_claim_pages(2);
        let client = StreamClient::with_config(backend.clone(), config);
        client
            .create_group("orders", "g1", Some(LogPosition::Beginning))
            .await
            .unwrap();
        for n in 0..5 {
            client.append("orders", &order(n)).await.unwrap();
        }
        client
            .read_group("orders", "g1", "c1", GroupReadOptions::new())
            .await
            .unwrap();

        let sweep = client
            .claim_all("orders", "g1", "c2", Duration::ZERO)
            .await
            .unwrap();
        assert!(!sweep.complete);
        assert_eq!(sweep.pages, 2);
        assert_eq!(sweep.claimed.len(), 2);
    }

    #[tokio::test]
    async fn test_backend_failure_is_not_retried() {
        let backend = Arc::new(InMemoryStreamBackend::new());
        let client = client_with(backend.clone());
        backend.inject_failures(Operation::Read, 1);

        let err = client.read("orders", ReadOptions::new()).await.unwrap_err();
        assert!(matches!(err, StreamError::Backend { op: Operation::Read, .. }));
        assert!(client.read("orders", ReadOptions::new()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_window_extends_deadline() {
        let backend = Arc::new(InMemoryStreamBackend::new());
        let config = ClientConfig::default().with_timeout(Duration::from_millis(100));
        let client = StreamClient::with_config(backend, config);

        // A block window longer than the base timeout is not cut short
        let started = tokio::time::Instant::now();
        let entries = client
            .read(
                "orders",
                ReadOptions::new()
                    .from_position(LogPosition::NewOnly)
                    .block(Duration::from_millis(500)),
            )
            .await
            .unwrap();
        assert!(entries.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
