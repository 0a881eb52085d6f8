//! Decoding of stream command replies
//!
//! Replies arrive as untyped [`redis::Value`] trees. Both RESP2 (arrays of
//! pairs) and RESP3 (maps) shapes are accepted for the multi-stream reads.

use std::time::Duration;

use redis::Value;
use rill_core::{
    ClaimPage, Entry, EntryId, Fields, LogPosition, Operation, PendingEntry, StreamError,
    StreamResult,
};

fn malformed(op: Operation, what: &str, value: &Value) -> StreamError {
    StreamError::protocol(op, format!("expected {what}, got {value:?}"))
}

/// Raw bytes of a string-like value
fn bytes(op: Operation, value: &Value) -> StreamResult<&[u8]> {
    match value {
        Value::BulkString(data) => Ok(data.as_slice()),
        Value::SimpleString(text) => Ok(text.as_bytes()),
        other => Err(malformed(op, "string", other)),
    }
}

fn text(op: Operation, value: &Value) -> StreamResult<&str> {
    std::str::from_utf8(bytes(op, value)?)
        .map_err(|_| StreamError::protocol(op, "expected UTF-8 text"))
}

fn array(op: Operation, value: &Value) -> StreamResult<&[Value]> {
    match value {
        Value::Array(items) | Value::Set(items) => Ok(items.as_slice()),
        other => Err(malformed(op, "array", other)),
    }
}

fn int(op: Operation, value: &Value) -> StreamResult<i64> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::BulkString(_) | Value::SimpleString(_) => text(op, value)?
            .parse()
            .map_err(|_| malformed(op, "integer", value)),
        other => Err(malformed(op, "integer", other)),
    }
}

fn unsigned(op: Operation, value: &Value) -> StreamResult<u64> {
    u64::try_from(int(op, value)?).map_err(|_| malformed(op, "non-negative integer", value))
}

/// Parse an entry id
pub fn entry_id(op: Operation, value: &Value) -> StreamResult<EntryId> {
    text(op, value)?
        .parse()
        .map_err(|_| malformed(op, "entry id", value))
}

/// Parse an integer reply, as returned by `XACK`
pub fn count(op: Operation, value: &Value) -> StreamResult<u64> {
    unsigned(op, value)
}

/// Parse a flat field/value list (or a RESP3 map)
pub fn fields(op: Operation, value: &Value) -> StreamResult<Fields> {
    let mut fields = Fields::new();
    match value {
        Value::Map(pairs) => {
            for (k, v) in pairs {
                fields.insert(text(op, k)?, bytes(op, v)?);
            }
        }
        other => {
            let items = array(op, other)?;
            if items.len() % 2 != 0 {
                return Err(StreamError::protocol(op, "odd number of field items"));
            }
            for pair in items.chunks_exact(2) {
                fields.insert(text(op, &pair[0])?, bytes(op, &pair[1])?);
            }
        }
    }
    Ok(fields)
}

/// Parse a list of `[id, fields]` entries
///
/// A nil payload (deleted from the stream but still pending) decodes to an
/// [`Entry::deleted`] so the id is not lost.
pub fn entries(op: Operation, value: &Value) -> StreamResult<Vec<Entry>> {
    let mut out = Vec::new();
    for item in array(op, value)? {
        let parts = array(op, item)?;
        let [id, payload] = parts else {
            return Err(malformed(op, "[id, fields] pair", item));
        };
        let id = entry_id(op, id)?;
        match payload {
            Value::Nil => out.push(Entry::deleted(id)),
            payload => out.push(Entry::new(id, fields(op, payload)?)),
        }
    }
    Ok(out)
}

/// Parse an `XREAD`/`XREADGROUP` reply for a single requested stream
///
/// A nil reply (block window elapsed) decodes to no entries.
pub fn stream_entries(op: Operation, stream: &str, value: &Value) -> StreamResult<Vec<Entry>> {
    let matches_key = |key: &Value| bytes(op, key).map(|k| k == stream.as_bytes());
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Map(streams) => {
            for (key, list) in streams {
                if matches_key(key)? {
                    return entries(op, list);
                }
            }
            Ok(Vec::new())
        }
        other => {
            for item in array(op, other)? {
                let parts = array(op, item)?;
                let [key, list] = parts else {
                    return Err(malformed(op, "[stream, entries] pair", item));
                };
                if matches_key(key)? {
                    return entries(op, list);
                }
            }
            Ok(Vec::new())
        }
    }
}

/// Parse an `XAUTOCLAIM` reply: `[next-cursor, entries, deleted-ids?]`
///
/// Servers before 7.0 omit the deleted list.
pub fn claim_page(op: Operation, value: &Value) -> StreamResult<ClaimPage> {
    let parts = array(op, value)?;
    let (cursor, claimed, deleted) = match parts {
        [cursor, claimed] => (cursor, claimed, None),
        [cursor, claimed, deleted] => (cursor, claimed, Some(deleted)),
        _ => return Err(malformed(op, "claim reply", value)),
    };

    let mut deleted = match deleted {
        Some(list) => array(op, list)?
            .iter()
            .map(|id| entry_id(op, id))
            .collect::<StreamResult<Vec<_>>>()?,
        None => Vec::new(),
    };

    // Older servers report deleted entries inline with a nil payload
    let (gone, claimed): (Vec<Entry>, Vec<Entry>) =
        entries(op, claimed)?.into_iter().partition(Entry::is_deleted);
    deleted.extend(gone.into_iter().map(|entry| entry.id));

    Ok(ClaimPage {
        claimed,
        next_cursor: LogPosition::at(entry_id(op, cursor)?),
        deleted,
    })
}

/// Parse the extended `XPENDING` reply: `[[id, consumer, idle-ms, deliveries], ...]`
pub fn pending(op: Operation, value: &Value) -> StreamResult<Vec<PendingEntry>> {
    array(op, value)?
        .iter()
        .map(|row| {
            let parts = array(op, row)?;
            let [id, consumer, idle, deliveries] = parts else {
                return Err(malformed(op, "pending row", row));
            };
            Ok(PendingEntry {
                entry_id: entry_id(op, id)?,
                consumer: String::from_utf8_lossy(bytes(op, consumer)?).into_owned(),
                idle: Duration::from_millis(unsigned(op, idle)?),
                delivery_count: unsigned(op, deliveries)?,
            })
        })
        .collect()
}
