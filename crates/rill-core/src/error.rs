//! Error types for rill streams
//!
//! Failures fall into three groups:
//!
//! - backing-service failures ([`StreamError::Backend`], [`StreamError::Timeout`],
//!   [`StreamError::Protocol`]), never retried inside a call
//! - precondition failures (group already exists, missing stream or group,
//!   non-increasing explicit id), which callers usually branch on
//! - partial success ([`StreamError::AckAfterDelivery`]): entries were
//!   delivered or claimed but acknowledging them failed

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::entry::Entry;
use crate::id::{EntryId, LogPosition};

/// The stream operation a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Ping,
    Append,
    Read,
    CreateGroup,
    ReadGroup,
    Ack,
    Claim,
    Pending,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ping => "ping backing service",
            Self::Append => "add entry to stream",
            Self::Read => "read from stream",
            Self::CreateGroup => "create consumer group",
            Self::ReadGroup => "read from consumer group",
            Self::Ack => "acknowledge message",
            Self::Claim => "claim pending messages",
            Self::Pending => "inspect pending entries",
        };
        f.write_str(text)
    }
}

/// Errors returned by stream operations
#[derive(Debug, Error)]
pub enum StreamError {
    /// Transport or backing-service failure
    #[error("failed to {op}: {message}")]
    Backend { op: Operation, message: String },

    /// The per-call deadline elapsed before the backing service answered
    #[error("failed to {op}: deadline of {after:?} exceeded")]
    Timeout { op: Operation, after: Duration },

    /// The backing service answered with something we could not decode
    #[error("failed to {op}: malformed response: {message}")]
    Protocol { op: Operation, message: String },

    /// A consumer group with this name already exists on the stream
    #[error("consumer group '{group}' already exists on stream '{stream}'")]
    GroupExists { stream: String, group: String },

    /// The stream key does not exist
    #[error("stream '{stream}' does not exist")]
    NoSuchStream { stream: String },

    /// The stream key or the consumer group does not exist
    #[error("no consumer group '{group}' on stream '{stream}'")]
    NoSuchGroup { stream: String, group: String },

    /// An explicit append id was not greater than the stream's last id
    #[error("id {id} is equal or smaller than the top item of stream '{stream}'")]
    IdNotIncreasing { stream: String, id: EntryId },

    /// A position sentinel was used with an operation that does not accept it
    #[error("failed to {op}: position '{position}' is not valid here")]
    InvalidPosition { op: Operation, position: LogPosition },

    /// An entry must carry at least one field
    #[error("entry must carry at least one field")]
    EmptyFields,

    /// Text that does not parse as an entry id
    #[error("invalid entry id: {0}")]
    InvalidId(String),

    /// Entries were delivered but acknowledging them failed
    #[error("{0}")]
    AckAfterDelivery(Box<PartialAck>),
}

impl StreamError {
    /// Create a backing-service error
    pub fn backend(op: Operation, message: impl Into<String>) -> Self {
        Self::Backend {
            op,
            message: message.into(),
        }
    }

    /// Create a malformed-response error
    pub fn protocol(op: Operation, message: impl Into<String>) -> Self {
        Self::Protocol {
            op,
            message: message.into(),
        }
    }

    /// Whether this is an expected condition callers usually handle
    /// (group exists, missing stream/group, non-increasing id)
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::GroupExists { .. }
                | Self::NoSuchStream { .. }
                | Self::NoSuchGroup { .. }
                | Self::IdNotIncreasing { .. }
        )
    }

    /// Whether the failure came from the transport or the deadline
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Timeout { .. })
    }

    /// Whether side effects already happened before the call failed
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::AckAfterDelivery(_))
    }

    /// The partial-success details, if this is an ack-after-delivery failure
    pub fn partial(&self) -> Option<&PartialAck> {
        match self {
            Self::AckAfterDelivery(partial) => Some(partial),
            _ => None,
        }
    }
}

/// What an auto-ack call achieved before acknowledging failed
///
/// The delivered batch is complete; `acknowledged` lists the ids that were
/// confirmed before `failed` was rejected. Entries after `failed` were not
/// attempted and remain pending.
#[derive(Debug)]
pub struct PartialAck {
    /// The operation that delivered the batch (group read or claim)
    pub op: Operation,
    /// Every entry the backing service delivered in this call
    pub delivered: Vec<Entry>,
    /// Ids acknowledged before the failure, in delivery order
    pub acknowledged: Vec<EntryId>,
    /// The id whose acknowledgment failed
    pub failed: EntryId,
    /// Scan cursor returned by a claim, so the caller can keep scanning
    pub next_cursor: Option<LogPosition>,
    /// The acknowledgment error
    pub cause: StreamError,
}

impl PartialAck {
    /// Ids delivered in this call that are still pending
    pub fn unacknowledged(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.delivered
            .iter()
            .map(|entry| entry.id)
            .filter(|id| !self.acknowledged.contains(id))
    }
}

impl fmt::Display for PartialAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to acknowledge message after {}: {} delivered, {} acknowledged, {} failed: {}",
            self.op,
            self.delivered.len(),
            self.acknowledged.len(),
            self.failed,
            self.cause
        )
    }
}

/// Result type alias for stream operations
pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Fields;

    #[test]
    fn test_backend_error_display() {
        let err = StreamError::backend(Operation::ReadGroup, "connection reset");
        let msg = err.to_string();
        assert!(msg.contains("failed to read from consumer group"));
        assert!(msg.contains("connection reset"));
        assert!(err.is_transient());
        assert!(!err.is_precondition());
    }

    #[test]
    fn test_precondition_errors() {
        let err = StreamError::GroupExists {
            stream: "orders".to_string(),
            group: "g1".to_string(),
        };
        assert!(err.is_precondition());
        assert!(err.to_string().contains("already exists"));

        let err = StreamError::NoSuchGroup {
            stream: "orders".to_string(),
            group: "g2".to_string(),
        };
        assert!(err.is_precondition());
        assert!(err.to_string().contains("g2"));
    }

    #[test]
    fn test_timeout_display() {
        let err = StreamError::Timeout {
            op: Operation::Read,
            after: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("deadline"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_partial_ack_reports_progress() {
        let delivered: Vec<_> = (1..=3)
            .map(|i| Entry::new(EntryId::new(i, 0), Fields::new().with("n", i.to_string())))
            .collect();
        let err = StreamError::AckAfterDelivery(Box::new(PartialAck {
            op: Operation::ReadGroup,
            delivered,
            acknowledged: vec![EntryId::new(1, 0)],
            failed: EntryId::new(2, 0),
            next_cursor: None,
            cause: StreamError::backend(Operation::Ack, "broken pipe"),
        }));

        assert!(err.is_partial());
        let partial = err.partial().unwrap();
        let pending: Vec<_> = partial.unacknowledged().collect();
        assert_eq!(pending, vec![EntryId::new(2, 0), EntryId::new(3, 0)]);

        let msg = err.to_string();
        assert!(msg.contains("3 delivered"));
        assert!(msg.contains("1 acknowledged"));
        assert!(msg.contains("broken pipe"));
    }

    #[test]
    fn test_operation_display_matches_messages() {
        assert_eq!(Operation::Append.to_string(), "add entry to stream");
        assert_eq!(Operation::Claim.to_string(), "claim pending messages");
    }
}
