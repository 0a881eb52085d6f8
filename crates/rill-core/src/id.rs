//! Entry identifiers and log positions
//!
//! An [`EntryId`] is assigned by the backing log at append time and is
//! totally ordered within one stream key. A [`LogPosition`] is the cursor
//! type handed to reads, group creation and claim scans; besides concrete
//! ids it carries the reserved sentinels understood by the backing service.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Identifier of one entry in a stream: `<millis>-<seq>`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct EntryId {
    /// Millisecond part (wall clock of the backing service at append time)
    pub millis: u64,
    /// Sequence number within the same millisecond
    pub seq: u64,
}

impl EntryId {
    /// The smallest id, `0-0`. No entry can ever carry it.
    pub const MIN: EntryId = EntryId { millis: 0, seq: 0 };

    /// The largest representable id
    pub const MAX: EntryId = EntryId {
        millis: u64::MAX,
        seq: u64::MAX,
    };

    /// Create an id from its two components
    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// The smallest id strictly greater than this one
    ///
    /// Returns `None` for [`EntryId::MAX`].
    pub fn next(self) -> Option<Self> {
        if self.seq < u64::MAX {
            Some(Self::new(self.millis, self.seq + 1))
        } else if self.millis < u64::MAX {
            Some(Self::new(self.millis + 1, 0))
        } else {
            None
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StreamError::InvalidId(s.to_string());
        match s.split_once('-') {
            Some((millis, seq)) => Ok(Self::new(
                millis.parse().map_err(|_| invalid())?,
                seq.parse().map_err(|_| invalid())?,
            )),
            None => Ok(Self::new(s.parse().map_err(|_| invalid())?, 0)),
        }
    }
}

impl From<EntryId> for String {
    fn from(id: EntryId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for EntryId {
    type Error = StreamError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Cursor into a stream
///
/// Ordering is total: `Beginning < At(_) < NewOnly < Undelivered`, with
/// concrete ids ordered among themselves. `0-0` and `Beginning` denote the
/// same position; construct concrete positions through [`LogPosition::at`]
/// or `From<EntryId>` so the two spellings compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum LogPosition {
    /// Start of the log (`"0"`)
    Beginning,
    /// Strictly after the given entry id
    At(EntryId),
    /// Only entries appended from now on (`"$"`)
    NewOnly,
    /// Entries never delivered to any consumer of the group (`">"`)
    Undelivered,
}

impl LogPosition {
    /// Position just after `id`, normalizing `0-0` to [`LogPosition::Beginning`]
    pub fn at(id: EntryId) -> Self {
        if id == EntryId::MIN {
            Self::Beginning
        } else {
            Self::At(id)
        }
    }

    /// The concrete id this position names, if any
    pub fn as_id(&self) -> Option<EntryId> {
        match self {
            Self::Beginning => Some(EntryId::MIN),
            Self::At(id) => Some(*id),
            Self::NewOnly | Self::Undelivered => None,
        }
    }

    /// Whether this is one of the reserved sentinel tokens
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Self::At(_))
    }
}

impl From<EntryId> for LogPosition {
    fn from(id: EntryId) -> Self {
        Self::at(id)
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beginning => f.write_str("0"),
            Self::At(id) => write!(f, "{id}"),
            Self::NewOnly => f.write_str("$"),
            Self::Undelivered => f.write_str(">"),
        }
    }
}

impl FromStr for LogPosition {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Self::Beginning),
            "$" => Ok(Self::NewOnly),
            ">" => Ok(Self::Undelivered),
            other => other.parse::<EntryId>().map(Self::at),
        }
    }
}

impl From<LogPosition> for String {
    fn from(pos: LogPosition) -> Self {
        pos.to_string()
    }
}

impl TryFrom<String> for LogPosition {
    type Error = StreamError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Id requested for an append
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AppendId {
    /// Let the log assign the next id (`"*"`)
    #[default]
    Auto,
    /// Caller-supplied id; must be greater than the stream's last id
    Explicit(EntryId),
}

impl fmt::Display for AppendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("*"),
            Self::Explicit(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for AppendId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "*" => Ok(Self::Auto),
            other => other.parse().map(Self::Explicit),
        }
    }
}
