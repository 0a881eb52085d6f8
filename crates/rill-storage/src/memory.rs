//! In-memory stream backend
//!
//! Keeps every stream, consumer group and pending entry list in process,
//! with the same observable semantics as the production backing service:
//! monotonically increasing ids, group cursors that only advance on
//! delivery, blocking reads woken by appends, and bounded claim scans.
//! Suitable for tests, simulation and local development.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use rill_core::{
    AppendId, ClaimArgs, ClaimPage, Clock, Entry, EntryId, Fields, GroupReadArgs, LogPosition,
    Operation, PendingEntry, ReadArgs, StreamBackend, StreamError, StreamResult, SystemClock,
};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Pending-list attempts scanned per claimed slot, matching the production service
const CLAIM_SCAN_FACTOR: usize = 10;

/// Scheduled failures for one operation
#[derive(Debug, Clone, Copy, Default)]
struct FaultPlan {
    /// Calls that still succeed before failures start
    skip: usize,
    /// Calls that fail after the skipped ones
    fail: usize,
}

/// One pending-list row
#[derive(Debug, Clone)]
struct PendingRecord {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

/// A consumer group: cursor plus pending entry list
#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingRecord>,
}

/// One stream key
#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<EntryId, Fields>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

/// In-memory implementation of [`StreamBackend`]
///
/// Uses `DashMap` for concurrent access; each operation holds the stream's
/// shard lock for its whole read-modify-write, so deliveries and claims on
/// one stream are serialized the way the backing service serializes them.
#[derive(Debug)]
pub struct InMemoryStreamBackend {
    /// Stream key -> stream state
    streams: DashMap<String, StreamState>,
    /// Time source for ids and idle times
    clock: Arc<dyn Clock>,
    /// Wakes blocked readers after every append
    appended: Notify,
    /// Remaining injected failures per operation
    faults: DashMap<Operation, FaultPlan>,
}

impl Default for InMemoryStreamBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStreamBackend {
    /// Create an empty backend on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty backend on a custom clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            streams: DashMap::new(),
            clock,
            appended: Notify::new(),
            faults: DashMap::new(),
        }
    }

    /// Make the next `times` calls of `op` fail with a backend error
    pub fn inject_failures(&self, op: Operation, times: usize) {
        self.inject_failures_after(op, 0, times);
    }

    /// Let `skip` calls of `op` succeed, then fail the following `times`
    pub fn inject_failures_after(&self, op: Operation, skip: usize, times: usize) {
        self.faults.insert(op, FaultPlan { skip, fail: times });
    }

    /// Drop all pending injected failures
    pub fn clear_failures(&self) {
        self.faults.clear();
    }

    /// Number of entries in a stream (0 when the key does not exist)
    pub fn stream_len(&self, stream: &str) -> usize {
        self.streams.get(stream).map_or(0, |s| s.entries.len())
    }

    /// Whether the stream key exists
    pub fn contains_stream(&self, stream: &str) -> bool {
        self.streams.contains_key(stream)
    }

    /// A group's last-delivered id
    pub fn last_delivered(&self, stream: &str, group: &str) -> Option<EntryId> {
        self.streams
            .get(stream)
            .and_then(|s| s.groups.get(group).map(|g| g.last_delivered))
    }

    /// Number of rows in a group's pending list
    pub fn pending_len(&self, stream: &str, group: &str) -> usize {
        self.streams
            .get(stream)
            .and_then(|s| s.groups.get(group).map(|g| g.pending.len()))
            .unwrap_or(0)
    }

    /// Remove entries from a stream, leaving any pending rows dangling
    ///
    /// Returns how many entries existed.
    pub fn delete_entries(&self, stream: &str, ids: &[EntryId]) -> usize {
        match self.streams.get_mut(stream) {
            Some(mut state) => ids
                .iter()
                .filter(|id| state.entries.remove(id).is_some())
                .count(),
            None => 0,
        }
    }

    fn check_fault(&self, op: Operation) -> StreamResult<()> {
        let Some(mut plan) = self.faults.get_mut(&op) else {
            return Ok(());
        };
        if plan.skip > 0 {
            plan.skip -= 1;
            return Ok(());
        }
        if plan.fail > 0 {
            plan.fail -= 1;
            return Err(StreamError::backend(op, "injected failure"));
        }
        Ok(())
    }

    fn no_group(stream: &str, group: &str) -> StreamError {
        StreamError::NoSuchGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        }
    }

    fn next_auto_id(&self, last: EntryId) -> StreamResult<EntryId> {
        let millis = self.clock.now_millis();
        if millis > last.millis {
            Ok(EntryId::new(millis, 0))
        } else {
            last.next()
                .ok_or_else(|| StreamError::backend(Operation::Append, "stream id space exhausted"))
        }
    }

    /// Retry `attempt` until it yields entries or the block window closes
    async fn wait_for<F>(&self, block: Option<Duration>, mut attempt: F) -> StreamResult<Vec<Entry>>
    where
        F: FnMut() -> StreamResult<Vec<Entry>> + Send,
    {
        let deadline = block.map(|d| tokio::time::Instant::now() + d);
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            // Register before checking so an append between check and wait is not lost
            notified.as_mut().enable();

            let entries = attempt()?;
            if !entries.is_empty() {
                return Ok(entries);
            }
            let Some(deadline) = deadline else {
                return Ok(entries);
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    fn entries_after(&self, stream: &str, after: EntryId, count: Option<usize>) -> Vec<Entry> {
        match self.streams.get(stream) {
            Some(state) => state
                .entries
                .range((Excluded(after), Unbounded))
                .take(count.unwrap_or(usize::MAX))
                .map(|(id, fields)| Entry::new(*id, fields.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    fn deliver_new(&self, args: &GroupReadArgs<'_>) -> StreamResult<Vec<Entry>> {
        let now = self.clock.now();
        let mut state = self
            .streams
            .get_mut(args.stream)
            .ok_or_else(|| Self::no_group(args.stream, args.group))?;
        let StreamState { entries, groups, .. } = &mut *state;
        let group = groups
            .get_mut(args.group)
            .ok_or_else(|| Self::no_group(args.stream, args.group))?;

        let batch: Vec<Entry> = entries
            .range((Excluded(group.last_delivered), Unbounded))
            .take(args.count.unwrap_or(usize::MAX))
            .map(|(id, fields)| Entry::new(*id, fields.clone()))
            .collect();

        for entry in &batch {
            group.last_delivered = entry.id;
            group.pending.insert(
                entry.id,
                PendingRecord {
                    consumer: args.consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
        }

        if !batch.is_empty() {
            trace!(
                stream = args.stream,
                group = args.group,
                consumer = args.consumer,
                delivered = batch.len(),
                "Delivered new entries"
            );
        }
        Ok(batch)
    }

    /// Re-deliver this consumer's pending entries after `after`
    fn replay_history(&self, args: &GroupReadArgs<'_>, after: EntryId) -> StreamResult<Vec<Entry>> {
        let now = self.clock.now();
        let mut state = self
            .streams
            .get_mut(args.stream)
            .ok_or_else(|| Self::no_group(args.stream, args.group))?;
        let StreamState { entries, groups, .. } = &mut *state;
        let group = groups
            .get_mut(args.group)
            .ok_or_else(|| Self::no_group(args.stream, args.group))?;

        let mut batch = Vec::new();
        let limit = args.count.unwrap_or(usize::MAX);
        for (id, record) in group.pending.range_mut((Excluded(after), Unbounded)) {
            if batch.len() >= limit {
                break;
            }
            if record.consumer != args.consumer {
                continue;
            }
            // Deleted entries stay pending and replay without a payload
            let Some(fields) = entries.get(id) else {
                batch.push(Entry::deleted(*id));
                continue;
            };
            record.delivered_at = now;
            record.delivery_count += 1;
            batch.push(Entry::new(*id, fields.clone()));
        }
        Ok(batch)
    }
}

#[async_trait]
impl StreamBackend for InMemoryStreamBackend {
    async fn ping(&self) -> StreamResult<()> {
        self.check_fault(Operation::Ping)
    }

    async fn append(&self, stream: &str, id: AppendId, fields: &Fields) -> StreamResult<EntryId> {
        self.check_fault(Operation::Append)?;
        if fields.is_empty() {
            return Err(StreamError::EmptyFields);
        }

        if let AppendId::Explicit(requested) = id {
            let last = self.streams.get(stream).map_or(EntryId::MIN, |s| s.last_id);
            if requested == EntryId::MIN || requested <= last {
                return Err(StreamError::IdNotIncreasing {
                    stream: stream.to_string(),
                    id: requested,
                });
            }
        }

        let assigned = {
            let mut state = self.streams.entry(stream.to_string()).or_default();
            let assigned = match id {
                AppendId::Auto => self.next_auto_id(state.last_id)?,
                AppendId::Explicit(requested) => {
                    if requested == EntryId::MIN || requested <= state.last_id {
                        return Err(StreamError::IdNotIncreasing {
                            stream: stream.to_string(),
                            id: requested,
                        });
                    }
                    requested
                }
            };
            state.entries.insert(assigned, fields.clone());
            state.last_id = assigned;
            assigned
        };

        trace!(stream, id = %assigned, fields = fields.len(), "Appended entry");
        self.appended.notify_waiters();
        Ok(assigned)
    }

    async fn read(&self, args: ReadArgs<'_>) -> StreamResult<Vec<Entry>> {
        self.check_fault(Operation::Read)?;
        let after = match args.from {
            LogPosition::Beginning => EntryId::MIN,
            LogPosition::At(id) => id,
            // Resolved once, so a blocking read waits for entries appended after the call
            LogPosition::NewOnly => self
                .streams
                .get(args.stream)
                .map_or(EntryId::MIN, |s| s.last_id),
            LogPosition::Undelivered => {
                return Err(StreamError::InvalidPosition {
                    op: Operation::Read,
                    position: args.from,
                });
            }
        };

        self.wait_for(args.block, || {
            Ok(self.entries_after(args.stream, after, args.count))
        })
        .await
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: LogPosition,
        mkstream: bool,
    ) -> StreamResult<()> {
        self.check_fault(Operation::CreateGroup)?;

        let mut state = if mkstream {
            self.streams.entry(stream.to_string()).or_default()
        } else {
            self.streams
                .get_mut(stream)
                .ok_or_else(|| StreamError::NoSuchStream {
                    stream: stream.to_string(),
                })?
        };

        if state.groups.contains_key(group) {
            return Err(StreamError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }

        let last_delivered = match start {
            LogPosition::Beginning => EntryId::MIN,
            LogPosition::At(id) => id,
            LogPosition::NewOnly => state.last_id,
            LogPosition::Undelivered => {
                return Err(StreamError::InvalidPosition {
                    op: Operation::CreateGroup,
                    position: start,
                });
            }
        };

        state.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        debug!(stream, group, start = %start, "Created consumer group");
        Ok(())
    }

    async fn read_group(&self, args: GroupReadArgs<'_>) -> StreamResult<Vec<Entry>> {
        self.check_fault(Operation::ReadGroup)?;
        match args.from {
            LogPosition::Undelivered => self.wait_for(args.block, || self.deliver_new(&args)).await,
            // History reads answer immediately, whatever the block window
            LogPosition::Beginning => self.replay_history(&args, EntryId::MIN),
            LogPosition::At(id) => self.replay_history(&args, id),
            LogPosition::NewOnly => Err(StreamError::InvalidPosition {
                op: Operation::ReadGroup,
                position: args.from,
            }),
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> StreamResult<u64> {
        self.check_fault(Operation::Ack)?;
        let Some(mut state) = self.streams.get_mut(stream) else {
            return Ok(0);
        };
        let Some(group_state) = state.groups.get_mut(group) else {
            return Ok(0);
        };

        let removed = ids
            .iter()
            .filter(|id| group_state.pending.remove(id).is_some())
            .count();
        trace!(stream, group, requested = ids.len(), removed, "Acknowledged entries");
        Ok(removed as u64)
    }

    async fn auto_claim(&self, args: ClaimArgs<'_>) -> StreamResult<ClaimPage> {
        self.check_fault(Operation::Claim)?;
        let start = args.cursor.as_id().ok_or(StreamError::InvalidPosition {
            op: Operation::Claim,
            position: args.cursor,
        })?;
        let count = args.count.max(1);
        let now = self.clock.now();

        let mut state = self
            .streams
            .get_mut(args.stream)
            .ok_or_else(|| Self::no_group(args.stream, args.group))?;
        let StreamState { entries, groups, .. } = &mut *state;
        let group = groups
            .get_mut(args.group)
            .ok_or_else(|| Self::no_group(args.stream, args.group))?;

        let mut attempts = count.saturating_mul(CLAIM_SCAN_FACTOR);
        let candidates: Vec<EntryId> = group
            .pending
            .range(start..)
            .map(|(id, _)| *id)
            .take(attempts.saturating_add(1))
            .collect();

        let mut claimed = Vec::new();
        let mut deleted = Vec::new();
        let mut next_cursor = LogPosition::Beginning;

        for id in candidates {
            if attempts == 0 || claimed.len() >= count {
                next_cursor = LogPosition::at(id);
                break;
            }
            attempts -= 1;

            let Some(record) = group.pending.get_mut(&id) else {
                continue;
            };
            if now.saturating_duration_since(record.delivered_at) < args.min_idle {
                continue;
            }
            match entries.get(&id) {
                Some(fields) => {
                    record.consumer = args.consumer.to_string();
                    record.delivered_at = now;
                    record.delivery_count += 1;
                    claimed.push(Entry::new(id, fields.clone()));
                }
                None => {
                    group.pending.remove(&id);
                    deleted.push(id);
                }
            }
        }

        debug!(
            stream = args.stream,
            group = args.group,
            consumer = args.consumer,
            claimed = claimed.len(),
            deleted = deleted.len(),
            next = %next_cursor,
            "Claim scan finished"
        );
        Ok(ClaimPage {
            claimed,
            next_cursor,
            deleted,
        })
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        consumer: Option<&str>,
        count: usize,
    ) -> StreamResult<Vec<PendingEntry>> {
        self.check_fault(Operation::Pending)?;
        let now = self.clock.now();
        let state = self
            .streams
            .get(stream)
            .ok_or_else(|| Self::no_group(stream, group))?;
        let group_state = state
            .groups
            .get(group)
            .ok_or_else(|| Self::no_group(stream, group))?;

        Ok(group_state
            .pending
            .iter()
            .filter(|(_, record)| consumer.is_none_or(|c| c == record.consumer))
            .take(count)
            .map(|(id, record)| PendingEntry {
                entry_id: *id,
                consumer: record.consumer.clone(),
                idle: now.saturating_duration_since(record.delivered_at),
                delivery_count: record.delivery_count,
            })
            .collect())
    }
}
