//! Client configuration and per-call options

use std::time::Duration;

use rill_core::{DEFAULT_CLAIM_COUNT, DEFAULT_TIMEOUT, LogPosition};
use serde::{Deserialize, Serialize};

/// Upper bound on claim pages walked by one [`crate::StreamClient::claim_all`]
pub const DEFAULT_MAX_CLAIM_PAGES: usize = 10_000;

/// Settings shared by every call of a [`crate::StreamClient`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-call deadline in milliseconds, extended by any block window
    pub timeout_ms: u64,
    /// Claim batch size used when a claim asks for 0 entries
    pub claim_count: usize,
    /// Page guard for full pending-list sweeps
    pub max_claim_pages: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: u64::try_from(DEFAULT_TIMEOUT.as_millis()).unwrap_or(5_000),
            claim_count: DEFAULT_CLAIM_COUNT,
            max_claim_pages: DEFAULT_MAX_CLAIM_PAGES,
        }
    }
}

impl ClientConfig {
    /// Set the per-call deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the default claim batch size
    pub fn with_claim_count(mut self, count: usize) -> Self {
        self.claim_count = count;
        self
    }

    /// Set the sweep page guard
    pub fn with_max_claim_pages(mut self, pages: usize) -> Self {
        self.max_claim_pages = pages;
        self
    }

    /// Effective per-call deadline
    pub fn timeout(&self) -> Duration {
        if self.timeout_ms == 0 {
            DEFAULT_TIMEOUT
        } else {
            Duration::from_millis(self.timeout_ms)
        }
    }

    /// Effective claim batch size
    pub fn claim_count(&self) -> usize {
        if self.claim_count == 0 {
            DEFAULT_CLAIM_COUNT
        } else {
            self.claim_count
        }
    }

    /// Effective sweep page guard
    pub fn max_claim_pages(&self) -> usize {
        if self.max_claim_pages == 0 {
            DEFAULT_MAX_CLAIM_PAGES
        } else {
            self.max_claim_pages
        }
    }
}

/// Options of a direct read
///
/// A zero `count` leaves the page size to the backing service; a zero
/// `block` returns immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub count: usize,
    pub block: Duration,
    /// Defaults to the start of the log
    pub from: Option<LogPosition>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn from_position(mut self, from: LogPosition) -> Self {
        self.from = Some(from);
        self
    }
}

/// Options of a consumer-group read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupReadOptions {
    pub count: usize,
    pub block: Duration,
    /// Defaults to entries never delivered to this group
    pub from: Option<LogPosition>,
    /// Acknowledge every delivered entry before returning
    pub auto_ack: bool,
}

impl GroupReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn from_position(mut self, from: LogPosition) -> Self {
        self.from = Some(from);
        self
    }

    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }
}

/// Options of one claim scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimOptions {
    /// Only entries idle at least this long are claimed
    pub min_idle: Duration,
    /// Pending-list scan position; start with [`LogPosition::Beginning`]
    pub cursor: LogPosition,
    /// Zero uses the client's claim batch size
    pub count: usize,
    /// Acknowledge every claimed entry before returning
    pub auto_ack: bool,
}

impl Default for ClaimOptions {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl ClaimOptions {
    /// Claim entries idle for at least `min_idle`, scanning from the start
    pub fn new(min_idle: Duration) -> Self {
        Self {
            min_idle,
            cursor: LogPosition::Beginning,
            count: 0,
            auto_ack: false,
        }
    }

    pub fn cursor(mut self, cursor: LogPosition) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }
}
