//! # Rill Streams
//!
//! Reliable consumption of append-only logs through named consumer groups.
//!
//! [`StreamClient`] exposes the six log operations over any
//! [`rill_core::StreamBackend`]:
//!
//! - `append`: add an entry, auto-assigning its id (`"*"`) unless one is given
//! - `read`: read after a position without a group (defaults to `"0"`)
//! - `create_group`: create a group and its stream (defaults to `"$"`)
//! - `read_group`: deliver undelivered entries (`">"`), optionally auto-acking
//! - `ack`: remove one id from the group's pending list
//! - `claim`: reassign idle pending entries, one bounded page per call
//!
//! Delivery is at-least-once. Nothing is retried inside a call; a blocking
//! read that times out returns an empty batch. Auto-ack is a two-step
//! [`DeliveredBatch`] pipeline: if acknowledging fails after delivery the
//! error carries the delivered batch and how far acknowledgment got.
//!
//! [`Subscriber`] and [`Reclaimer`] wrap the client in cancellable polling
//! loops for long-running consumers and their supervisors.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rill_core::Fields;
//! use rill_storage::InMemoryStreamBackend;
//! use rill_streams::{GroupReadOptions, StreamClient};
//!
//! let client = StreamClient::new(Arc::new(InMemoryStreamBackend::new()));
//! client.create_group_or_reuse("orders", "billing", None).await?;
//! client.append("orders", &Fields::new().with("sku", "A-1")).await?;
//!
//! for entry in client
//!     .read_group("orders", "billing", "worker-1", GroupReadOptions::new().count(10))
//!     .await?
//! {
//!     process(&entry)?;
//!     client.ack("orders", "billing", entry.id).await?;
//! }
//! ```

pub mod client;
pub mod config;
pub mod pipeline;
pub mod reclaim;
pub mod subscribe;

pub use client::{ClaimSweep, StreamClient};
pub use config::{ClaimOptions, ClientConfig, DEFAULT_MAX_CLAIM_PAGES, GroupReadOptions, ReadOptions};
pub use pipeline::DeliveredBatch;
pub use reclaim::{Reclaimer, ReclaimerConfig};
pub use subscribe::{Subscriber, SubscriberConfig, Subscription};

// Re-export the core vocabulary so callers need only this crate
pub use rill_core::{
    AppendId, ClaimPage, Entry, EntryId, Fields, LogPosition, Operation, PartialAck,
    PendingEntry, StreamBackend, StreamError, StreamResult,
};
