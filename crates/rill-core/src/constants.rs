//! Defaults shared with existing deployments of the backing service

use std::time::Duration;

use crate::id::{AppendId, LogPosition};

/// Per-call deadline when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum connections held for blocking calls
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Connections opened eagerly for blocking calls
pub const DEFAULT_MIN_IDLE_CONNS: usize = 2;

/// Append id when the caller does not supply one (`"*"`)
pub const DEFAULT_APPEND_ID: AppendId = AppendId::Auto;

/// Cursor for direct reads when unset (`"0"`)
pub const DEFAULT_READ_POSITION: LogPosition = LogPosition::Beginning;

/// Cursor for group reads when unset (`">"`)
pub const DEFAULT_GROUP_READ_POSITION: LogPosition = LogPosition::Undelivered;

/// Start position for new consumer groups when unset (`"$"`)
pub const DEFAULT_GROUP_START: LogPosition = LogPosition::NewOnly;

/// Claim batch size used when the caller passes zero
pub const DEFAULT_CLAIM_COUNT: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_defaults() {
        assert_eq!(DEFAULT_APPEND_ID.to_string(), "*");
        assert_eq!(DEFAULT_READ_POSITION.to_string(), "0");
        assert_eq!(DEFAULT_GROUP_READ_POSITION.to_string(), ">");
        assert_eq!(DEFAULT_GROUP_START.to_string(), "$");
        assert_eq!(DEFAULT_CLAIM_COUNT, 100);
    }
}
