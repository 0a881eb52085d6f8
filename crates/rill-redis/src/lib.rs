//! # Rill Redis
//!
//! Production backend for rill streams, speaking the Redis stream commands.
//!
//! | Primitive | Command |
//! |---|---|
//! | append | `XADD key id field value ...` |
//! | read | `XREAD [COUNT n] [BLOCK ms] STREAMS key id` |
//! | create group | `XGROUP CREATE key group id [MKSTREAM]` |
//! | group read | `XREADGROUP GROUP group consumer [COUNT n] [BLOCK ms] STREAMS key id` |
//! | ack | `XACK key group id ...` |
//! | claim | `XAUTOCLAIM key group consumer min-idle-ms start COUNT n` |
//! | pending | `XPENDING key group - + count [consumer]` |
//!
//! Server error codes map onto [`rill_core::StreamError`]: `BUSYGROUP`
//! becomes `GroupExists`, `NOGROUP` becomes `NoSuchGroup`, a rejected
//! explicit id becomes `IdNotIncreasing`. Everything else is a backend
//! failure carrying the server's message.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rill_redis::{RedisBackend, RedisConfig};
//!
//! let backend = RedisBackend::connect(RedisConfig::with_address("localhost:6379")).await?;
//! ```

pub mod backend;
pub mod config;
pub mod pool;
pub mod reply;

pub use backend::RedisBackend;
pub use config::RedisConfig;
pub use pool::{ConnectionPool, PooledConnection};
