//! [`StreamBackend`] over a Redis server

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, RedisError, RedisResult, Value, cmd};
use rill_core::{
    AppendId, ClaimArgs, ClaimPage, Entry, EntryId, Fields, GroupReadArgs, LogPosition,
    Operation, PendingEntry, ReadArgs, StreamBackend, StreamError, StreamResult,
};
use tracing::{debug, trace};

use crate::config::RedisConfig;
use crate::pool::ConnectionPool;
use crate::reply;

/// Names a failed command refers to, for precondition errors
#[derive(Clone, Copy)]
struct Target<'a> {
    stream: &'a str,
    group: &'a str,
}

/// Translate a server error into the stream error taxonomy
fn map_error(op: Operation, target: Target<'_>, err: RedisError) -> StreamError {
    let detail = err.detail().unwrap_or_default();
    match err.code() {
        Some("BUSYGROUP") => StreamError::GroupExists {
            stream: target.stream.to_string(),
            group: target.group.to_string(),
        },
        Some("NOGROUP") => StreamError::NoSuchGroup {
            stream: target.stream.to_string(),
            group: target.group.to_string(),
        },
        _ if detail.contains("requires the key to exist") => StreamError::NoSuchStream {
            stream: target.stream.to_string(),
        },
        _ => StreamError::backend(op, err.to_string()),
    }
}

fn is_id_not_increasing(err: &RedisError) -> bool {
    err.detail()
        .is_some_and(|d| d.contains("equal or smaller") || d.contains("must be greater than"))
}

/// Block windows are sent in whole milliseconds; zero would block forever
fn block_millis(block: Duration) -> u64 {
    u64::try_from(block.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Redis-backed stream service
///
/// Non-blocking commands share one multiplexed connection. Blocking reads
/// check out a dedicated connection from a bounded pool.
pub struct RedisBackend {
    shared: MultiplexedConnection,
    blocking: ConnectionPool,
    config: RedisConfig,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("address", &self.config.address)
            .field("db", &self.config.db)
            .field("blocking", &self.blocking)
            .finish()
    }
}

impl RedisBackend {
    /// Dial the server, pre-open the blocking pool and verify with `PING`
    pub async fn connect(config: RedisConfig) -> StreamResult<Self> {
        let info = config.connection_info()?;
        let client =
            Client::open(info).map_err(|e| StreamError::backend(Operation::Ping, e.to_string()))?;
        let timeout = config.timeout();

        let dial = client.get_multiplexed_async_connection();
        let shared = match tokio::time::timeout(timeout, dial).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(StreamError::backend(Operation::Ping, e.to_string())),
            Err(_) => {
                return Err(StreamError::Timeout {
                    op: Operation::Ping,
                    after: timeout,
                });
            }
        };

        let blocking = ConnectionPool::new(client, config.pool_size(), timeout);
        blocking.warm(config.min_idle_conns()).await?;

        let backend = Self {
            shared,
            blocking,
            config,
        };
        backend.ping().await?;
        debug!(address = %backend.config.address, db = backend.config.db, "Connected to redis");
        Ok(backend)
    }

    /// The configuration this backend was built from
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    async fn run(&self, op: Operation, target: Target<'_>, command: &Cmd) -> StreamResult<Value> {
        let mut conn = self.shared.clone();
        let reply: RedisResult<Value> = command.query_async(&mut conn).await;
        reply.map_err(|e| map_error(op, target, e))
    }

    async fn run_blocking(
        &self,
        op: Operation,
        target: Target<'_>,
        command: &Cmd,
    ) -> StreamResult<Value> {
        let mut pooled = self.blocking.get(op).await?;
        let reply: RedisResult<Value> = command.query_async(pooled.conn()).await;
        let value = reply.map_err(|e| map_error(op, target, e))?;
        pooled.release();
        Ok(value)
    }
}

#[async_trait]
impl StreamBackend for RedisBackend {
    async fn ping(&self) -> StreamResult<()> {
        let target = Target { stream: "", group: "" };
        match self.run(Operation::Ping, target, &cmd("PING")).await? {
            Value::SimpleString(_) | Value::BulkString(_) | Value::Okay => Ok(()),
            other => Err(StreamError::protocol(
                Operation::Ping,
                format!("unexpected reply {other:?}"),
            )),
        }
    }

    async fn append(&self, stream: &str, id: AppendId, fields: &Fields) -> StreamResult<EntryId> {
        if fields.is_empty() {
            return Err(StreamError::EmptyFields);
        }
        let mut command = cmd("XADD");
        command.arg(stream).arg(id.to_string());
        for (key, value) in fields.iter() {
            command.arg(key).arg(&value[..]);
        }

        let mut conn = self.shared.clone();
        let result: RedisResult<Value> = command.query_async(&mut conn).await;
        let reply = match result {
            Ok(reply) => reply,
            Err(e) if is_id_not_increasing(&e) => {
                return Err(StreamError::IdNotIncreasing {
                    stream: stream.to_string(),
                    id: match id {
                        AppendId::Explicit(requested) => requested,
                        AppendId::Auto => EntryId::MIN,
                    },
                });
            }
            Err(e) => return Err(map_error(Operation::Append, Target { stream, group: "" }, e)),
        };
        let assigned = reply::entry_id(Operation::Append, &reply)?;
        trace!(stream, id = %assigned, "Appended entry");
        Ok(assigned)
    }

    async fn read(&self, args: ReadArgs<'_>) -> StreamResult<Vec<Entry>> {
        let op = Operation::Read;
        if args.from == LogPosition::Undelivered {
            return Err(StreamError::InvalidPosition {
                op,
                position: args.from,
            });
        }

        let mut command = cmd("XREAD");
        if let Some(count) = args.count {
            command.arg("COUNT").arg(count);
        }
        if let Some(block) = args.block {
            command.arg("BLOCK").arg(block_millis(block));
        }
        command.arg("STREAMS").arg(args.stream).arg(args.from.to_string());

        let target = Target {
            stream: args.stream,
            group: "",
        };
        let reply = if args.block.is_some() {
            self.run_blocking(op, target, &command).await?
        } else {
            self.run(op, target, &command).await?
        };
        reply::stream_entries(op, args.stream, &reply)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: LogPosition,
        mkstream: bool,
    ) -> StreamResult<()> {
        let op = Operation::CreateGroup;
        if start == LogPosition::Undelivered {
            return Err(StreamError::InvalidPosition {
                op,
                position: start,
            });
        }

        let mut command = cmd("XGROUP");
        command.arg("CREATE").arg(stream).arg(group).arg(start.to_string());
        if mkstream {
            command.arg("MKSTREAM");
        }
        self.run(op, Target { stream, group }, &command).await?;
        debug!(stream, group, start = %start, "Created consumer group");
        Ok(())
    }

    async fn read_group(&self, args: GroupReadArgs<'_>) -> StreamResult<Vec<Entry>> {
        let op = Operation::ReadGroup;
        if args.from == LogPosition::NewOnly {
            return Err(StreamError::InvalidPosition {
                op,
                position: args.from,
            });
        }

        // The server ignores BLOCK for history reads
        let block = args.block.filter(|_| args.from == LogPosition::Undelivered);

        let mut command = cmd("XREADGROUP");
        command.arg("GROUP").arg(args.group).arg(args.consumer);
        if let Some(count) = args.count {
            command.arg("COUNT").arg(count);
        }
        if let Some(block) = block {
            command.arg("BLOCK").arg(block_millis(block));
        }
        command.arg("STREAMS").arg(args.stream).arg(args.from.to_string());

        let target = Target {
            stream: args.stream,
            group: args.group,
        };
        let reply = if block.is_some() {
            self.run_blocking(op, target, &command).await?
        } else {
            self.run(op, target, &command).await?
        };
        let entries = reply::stream_entries(op, args.stream, &reply)?;
        trace!(
            stream = args.stream,
            group = args.group,
            consumer = args.consumer,
            delivered = entries.len(),
            "Group read"
        );
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> StreamResult<u64> {
        let mut command = cmd("XACK");
        command.arg(stream).arg(group);
        for id in ids {
            command.arg(id.to_string());
        }
        let reply = self.run(Operation::Ack, Target { stream, group }, &command).await?;
        reply::count(Operation::Ack, &reply)
    }

    async fn auto_claim(&self, args: ClaimArgs<'_>) -> StreamResult<ClaimPage> {
        let op = Operation::Claim;
        let Some(start) = args.cursor.as_id() else {
            return Err(StreamError::InvalidPosition {
                op,
                position: args.cursor,
            });
        };

        let mut command = cmd("XAUTOCLAIM");
        command
            .arg(args.stream)
            .arg(args.group)
            .arg(args.consumer)
            .arg(u64::try_from(args.min_idle.as_millis()).unwrap_or(u64::MAX))
            .arg(start.to_string())
            .arg("COUNT")
            .arg(args.count.max(1));

        let target = Target {
            stream: args.stream,
            group: args.group,
        };
        let reply = self.run(op, target, &command).await?;
        let page = reply::claim_page(op, &reply)?;
        debug!(
            stream = args.stream,
            group = args.group,
            consumer = args.consumer,
            claimed = page.claimed.len(),
            deleted = page.deleted.len(),
            next = %page.next_cursor,
            "Claim scan finished"
        );
        Ok(page)
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        consumer: Option<&str>,
        count: usize,
    ) -> StreamResult<Vec<PendingEntry>> {
        let mut command = cmd("XPENDING");
        command.arg(stream).arg(group).arg("-").arg("+").arg(count);
        if let Some(consumer) = consumer {
            command.arg(consumer);
        }
        let reply = self
            .run(Operation::Pending, Target { stream, group }, &command)
            .await?;
        reply::pending(Operation::Pending, &reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::ErrorKind;

    fn target() -> Target<'static> {
        Target {
            stream: "orders",
            group: "billing",
        }
    }

    #[test]
    fn test_block_millis_never_zero() {
        assert_eq!(block_millis(Duration::from_micros(10)), 1);
        assert_eq!(block_millis(Duration::from_secs(2)), 2_000);
    }

    #[test]
    fn test_io_errors_are_transport_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = map_error(Operation::ReadGroup, target(), RedisError::from(io));
        assert!(err.is_transient());
        assert!(err.to_string().contains("read from consumer group"));
    }

    #[test]
    fn test_missing_key_detail_maps_to_no_such_stream() {
        let err = RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            "The XGROUP subcommand requires the key to exist".to_string(),
        ));
        let mapped = map_error(Operation::CreateGroup, target(), err);
        assert!(matches!(mapped, StreamError::NoSuchStream { ref stream } if stream == "orders"));
    }

    #[test]
    fn test_smaller_id_detail_is_recognized() {
        let err = RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            "The ID specified in XADD is equal or smaller than the target stream top item"
                .to_string(),
        ));
        assert!(is_id_not_increasing(&err));
    }

    #[test]
    fn test_zero_id_detail_is_recognized() {
        let err = RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            "The ID specified in XADD must be greater than 0-0".to_string(),
        ));
        assert!(is_id_not_increasing(&err));
    }

    #[test]
    fn test_response_errors_without_known_code() {
        let err = RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
        ));
        let mapped = map_error(Operation::Append, target(), err);
        assert!(matches!(mapped, StreamError::Backend { op: Operation::Append, .. }));
    }
}
