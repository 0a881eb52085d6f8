//! # Rill Storage
//!
//! In-process backing service for rill streams.
//!
//! [`InMemoryStreamBackend`] implements [`rill_core::StreamBackend`] with the
//! full consumer-group model: an append-only log per stream key, group
//! cursors, pending entry lists with delivery counts and idle times,
//! blocking reads and bounded claim scans. It backs the test suites and
//! local runs where no external service is available.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rill_core::{AppendId, Fields, LogPosition, StreamBackend};
//! use rill_storage::InMemoryStreamBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = InMemoryStreamBackend::new();
//!     backend
//!         .create_group("orders", "billing", LogPosition::NewOnly, true)
//!         .await
//!         .unwrap();
//!
//!     let id = backend
//!         .append("orders", AppendId::Auto, &Fields::new().with("sku", "A-1"))
//!         .await
//!         .unwrap();
//!     assert_eq!(backend.stream_len("orders"), 1);
//! }
//! ```
//!
//! Fault injection ([`InMemoryStreamBackend::inject_failures`]) makes the
//! next calls of one operation fail with a backend error, which is how the
//! partial-success paths are exercised.

pub mod memory;

pub use memory::InMemoryStreamBackend;
