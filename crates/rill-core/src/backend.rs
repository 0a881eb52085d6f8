//! Capability trait for the service that owns the log
//!
//! The log, the consumer groups and their pending entry lists live in an
//! external backing service. Everything in this workspace talks to it
//! through [`StreamBackend`], one request per call: implementations never
//! retry and never hold authoritative state on the caller's behalf.

use std::time::Duration;

use async_trait::async_trait;

use crate::entry::{ClaimPage, Entry, Fields, PendingEntry};
use crate::error::StreamResult;
use crate::id::{AppendId, EntryId, LogPosition};

/// Arguments of a direct (group-less) read
#[derive(Debug, Clone, Copy)]
pub struct ReadArgs<'a> {
    pub stream: &'a str,
    /// Entries strictly after this position are returned
    pub from: LogPosition,
    /// Page size; `None` lets the backing service decide
    pub count: Option<usize>,
    /// Wait up to this long for at least one entry; `None` returns at once
    pub block: Option<Duration>,
}

/// Arguments of a consumer-group read
#[derive(Debug, Clone, Copy)]
pub struct GroupReadArgs<'a> {
    pub stream: &'a str,
    pub group: &'a str,
    pub consumer: &'a str,
    /// [`LogPosition::Undelivered`] for new entries, or a concrete position
    /// to replay this consumer's pending history
    pub from: LogPosition,
    pub count: Option<usize>,
    pub block: Option<Duration>,
}

/// Arguments of one pending-list claim scan
#[derive(Debug, Clone, Copy)]
pub struct ClaimArgs<'a> {
    pub stream: &'a str,
    pub group: &'a str,
    /// Consumer the qualifying entries are reassigned to
    pub consumer: &'a str,
    /// Only entries idle at least this long are claimed
    pub min_idle: Duration,
    /// Pending-list scan position (inclusive)
    pub cursor: LogPosition,
    /// Upper bound on entries claimed by this call
    pub count: usize,
}

/// Request/response access to a backing log service
///
/// The backing service must deliver each undelivered entry to exactly one
/// consumer per group and serialize claims against deliveries; this trait
/// assumes that guarantee and does not enforce it.
#[async_trait]
pub trait StreamBackend: Send + Sync {
    /// Check that the service is reachable
    async fn ping(&self) -> StreamResult<()>;

    /// Append an entry and return the id the log assigned
    async fn append(&self, stream: &str, id: AppendId, fields: &Fields) -> StreamResult<EntryId>;

    /// Read entries after a position without a consumer group
    async fn read(&self, args: ReadArgs<'_>) -> StreamResult<Vec<Entry>>;

    /// Create a consumer group positioned at `start`
    ///
    /// With `mkstream` the stream key is created when missing.
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: LogPosition,
        mkstream: bool,
    ) -> StreamResult<()>;

    /// Deliver entries to a consumer, recording each in the pending list
    async fn read_group(&self, args: GroupReadArgs<'_>) -> StreamResult<Vec<Entry>>;

    /// Remove ids from the group's pending list, returning how many were present
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> StreamResult<u64>;

    /// Scan the pending list and reassign entries idle for at least `min_idle`
    async fn auto_claim(&self, args: ClaimArgs<'_>) -> StreamResult<ClaimPage>;

    /// List pending entries in id order, optionally for one consumer
    async fn pending(
        &self,
        stream: &str,
        group: &str,
        consumer: Option<&str>,
        count: usize,
    ) -> StreamResult<Vec<PendingEntry>>;
}
