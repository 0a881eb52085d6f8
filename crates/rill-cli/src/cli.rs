use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rill_core::{AppendId, EntryId, LogPosition};

#[derive(Debug, Parser)]
#[command(name = "rill", about = "Consumer groups over Redis streams", version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "RILL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Redis address (host:port), overrides the configuration file
    #[arg(long, global = true, env = "RILL_ADDRESS")]
    pub address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Human-readable logs instead of JSONL
    #[arg(long, global = true)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Append one entry and print its id
    Append {
        stream: String,
        /// Entry fields as key=value
        #[arg(required = true, value_parser = parse_field)]
        fields: Vec<(String, String)>,
        /// Explicit id; "*" lets the log assign one
        #[arg(long, default_value = "*")]
        id: AppendId,
    },

    /// Read entries without a consumer group
    Read {
        stream: String,
        /// Read after this position: "0", "$" or an entry id
        #[arg(long, default_value = "0")]
        from: LogPosition,
        #[command(flatten)]
        window: ReadWindow,
    },

    /// Create a consumer group (and its stream)
    GroupCreate {
        stream: String,
        group: String,
        /// Start position: "$" for new entries only, "0" for the whole log
        #[arg(long, default_value = "$")]
        start: LogPosition,
        /// Succeed if the group already exists
        #[arg(long)]
        reuse: bool,
    },

    /// Read from a consumer group
    ReadGroup {
        stream: String,
        group: String,
        consumer: String,
        /// ">" for undelivered entries, or a position to replay own pending entries
        #[arg(long, default_value = ">")]
        from: LogPosition,
        #[command(flatten)]
        window: ReadWindow,
        /// Acknowledge everything delivered before printing
        #[arg(long)]
        auto_ack: bool,
    },

    /// Acknowledge entries
    Ack {
        stream: String,
        group: String,
        #[arg(required = true)]
        ids: Vec<EntryId>,
    },

    /// Claim idle pending entries for a consumer
    Claim {
        stream: String,
        group: String,
        consumer: String,
        /// Minimum idle time in milliseconds
        #[arg(long, default_value_t = 60_000)]
        min_idle_ms: u64,
        /// Pending-list scan position
        #[arg(long, default_value = "0-0")]
        cursor: LogPosition,
        /// Entries per scan; 0 uses the configured default
        #[arg(long, default_value_t = 0)]
        count: usize,
        /// Acknowledge claimed entries before printing
        #[arg(long, conflicts_with = "all")]
        auto_ack: bool,
        /// Follow the cursor until the pending list is exhausted
        #[arg(long)]
        all: bool,
    },

    /// List pending entries of a group
    Pending {
        stream: String,
        group: String,
        /// Only entries owned by this consumer
        #[arg(long)]
        consumer: Option<String>,
        #[arg(long, default_value_t = 10)]
        count: usize,
    },

    /// Follow a consumer group until interrupted
    Tail(TailArgs),
}

/// Page size and block window of a read
#[derive(Debug, Clone, Copy, Args)]
pub struct ReadWindow {
    /// Maximum entries; 0 leaves it to the server
    #[arg(long, default_value_t = 10)]
    pub count: usize,
    /// Block up to this many milliseconds waiting for entries; 0 returns at once
    #[arg(long, default_value_t = 0)]
    pub block_ms: u64,
}

#[derive(Debug, Clone, Args)]
pub struct TailArgs {
    pub stream: String,
    pub group: String,
    /// Consumer name; a random one is generated when omitted
    #[arg(long)]
    pub consumer: Option<String>,
    /// Create the group at this position if it does not exist
    #[arg(long)]
    pub create: Option<LogPosition>,
    /// Acknowledge each entry once printed
    #[arg(long)]
    pub ack: bool,
    #[arg(long, default_value_t = 10)]
    pub batch: usize,
    #[arg(long, default_value_t = 5_000)]
    pub block_ms: u64,
    /// Also reclaim entries idle this long from other consumers
    #[arg(long)]
    pub reclaim_idle_ms: Option<u64>,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field() {
        assert_eq!(
            parse_field("sku=A-1").unwrap(),
            ("sku".to_string(), "A-1".to_string())
        );
        assert_eq!(parse_field("note=a=b").unwrap().1, "a=b");
        assert_eq!(parse_field("empty=").unwrap().1, "");
        assert!(parse_field("novalue").is_err());
        assert!(parse_field("=x").is_err());
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["rill", "read-group", "orders", "g1", "c1"]).unwrap();
        match cli.command {
            Command::ReadGroup {
                from,
                window,
                auto_ack,
                ..
            } => {
                assert_eq!(from, LogPosition::Undelivered);
                assert_eq!(window.count, 10);
                assert_eq!(window.block_ms, 0);
                assert!(!auto_ack);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["rill", "group-create", "orders", "g1"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::GroupCreate {
                start: LogPosition::NewOnly,
                reuse: false,
                ..
            }
        ));

        let cli = Cli::try_parse_from(["rill", "append", "orders", "sku=A-1"]).unwrap();
        assert!(matches!(cli.command, Command::Append { id: AppendId::Auto, .. }));
    }

    #[test]
    fn test_claim_arguments() {
        let cli = Cli::try_parse_from([
            "rill", "claim", "orders", "g1", "c2", "--min-idle-ms", "0", "--count", "10",
        ])
        .unwrap();
        match cli.command {
            Command::Claim {
                min_idle_ms,
                cursor,
                count,
                all,
                ..
            } => {
                assert_eq!(min_idle_ms, 0);
                assert_eq!(cursor, LogPosition::Beginning);
                assert_eq!(count, 10);
                assert!(!all);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let conflict = Cli::try_parse_from([
            "rill", "claim", "orders", "g1", "c2", "--all", "--auto-ack",
        ]);
        assert!(conflict.is_err());
    }

    #[test]
    fn test_rejects_bad_ids() {
        assert!(Cli::try_parse_from(["rill", "ack", "orders", "g1", "not-an-id"]).is_err());
        assert!(Cli::try_parse_from(["rill", "append", "orders"]).is_err());
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "rill", "pending", "orders", "g1", "--address", "redis:6380", "--pretty",
        ])
        .unwrap();
        assert_eq!(cli.address.as_deref(), Some("redis:6380"));
        assert!(cli.pretty);
    }
}
