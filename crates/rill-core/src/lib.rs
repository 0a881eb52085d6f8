//! # Rill Core
//!
//! Core types, errors and the backend capability trait for reliable
//! consumption of append-only logs through named consumer groups.
//!
//! ## Key Types
//!
//! - [`EntryId`]: totally ordered id assigned by the log
//! - [`LogPosition`]: read cursor, including the `"0"`, `"$"` and `">"` sentinels
//! - [`Entry`] / [`Fields`]: an immutable record and its ordered field map
//! - [`PendingEntry`]: one row of a consumer group's pending entry list
//! - [`ClaimPage`]: result of one claim scan over the pending list
//!
//! ## Key Traits
//!
//! - [`StreamBackend`]: request/response access to the service owning the log
//! - [`Clock`]: time abstraction for testability

pub mod backend;
pub mod clock;
pub mod constants;
pub mod entry;
pub mod error;
pub mod id;

pub use backend::*;
pub use clock::*;
pub use constants::*;
pub use entry::*;
pub use error::*;
pub use id::*;
