//! JSON-lines rendering of stream data
//!
//! Field values that are not UTF-8 are written as `{"b64": "..."}`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rill_core::{ClaimPage, Entry, EntryId, Fields, PendingEntry};
use serde_json::{Map, Value, json};

use rill_streams::ClaimSweep;

pub fn fields_json(fields: &Fields) -> Value {
    let mut map = Map::with_capacity(fields.len());
    for (key, value) in fields.iter() {
        let rendered = match std::str::from_utf8(value) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => json!({ "b64": STANDARD.encode(value) }),
        };
        map.insert(key.to_string(), rendered);
    }
    Value::Object(map)
}

pub fn entry_json(entry: &Entry) -> Value {
    json!({
        "id": entry.id.to_string(),
        "fields": fields_json(&entry.fields),
    })
}

pub fn pending_json(row: &PendingEntry) -> Value {
    json!({
        "id": row.entry_id.to_string(),
        "consumer": row.consumer,
        "idle_ms": u64::try_from(row.idle.as_millis()).unwrap_or(u64::MAX),
        "deliveries": row.delivery_count,
    })
}

fn ids_json(ids: &[EntryId]) -> Value {
    Value::Array(ids.iter().map(|id| Value::String(id.to_string())).collect())
}

/// Summary line printed after the claimed entries of one page
pub fn claim_page_json(page: &ClaimPage) -> Value {
    json!({
        "claimed": page.claimed.len(),
        "next_cursor": page.next_cursor.to_string(),
        "deleted": ids_json(&page.deleted),
    })
}

/// Summary line printed after the claimed entries of a sweep
pub fn claim_sweep_json(sweep: &ClaimSweep) -> Value {
    json!({
        "claimed": sweep.claimed.len(),
        "pages": sweep.pages,
        "complete": sweep.complete,
        "deleted": ids_json(&sweep.deleted),
    })
}

pub fn print_line(value: &Value) {
    println!("{value}");
}

pub fn print_entries(entries: &[Entry]) {
    for entry in entries {
        print_line(&entry_json(entry));
    }
}
