//! Stream entries and the field-map codec
//!
//! The backing log stores each entry as a flat list of field/value pairs.
//! [`Fields`] keeps them in insertion order and converts application values
//! to and from that representation.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::id::{EntryId, LogPosition};

/// Ordered mapping of field names to raw values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    pairs: Vec<(String, Bytes)>,
}

impl Fields {
    /// Create an empty field map
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a field, replacing an existing value in place
    ///
    /// Returns the previous value if the key was already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl AsRef<[u8]>) -> Option<Bytes> {
        let key = key.into();
        let value = Bytes::copy_from_slice(value.as_ref());
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.pairs.push((key, value));
                None
            }
        }
    }

    /// Insert a field holding the JSON encoding of `value`
    pub fn insert_json<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        let encoded = serde_json::to_vec(value)?;
        self.insert(key, encoded);
        Ok(())
    }

    /// Raw value of a field
    pub fn get(&self, key: &str) -> Option<&Bytes> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Value of a field as UTF-8 text
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Decode a field written with [`Fields::insert_json`]
    ///
    /// Returns `None` when the field is absent.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<Result<T, serde_json::Error>> {
        self.get(key).map(|v| serde_json::from_slice(v))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the map has no fields
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterate fields in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field names in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    /// Consume into the underlying pairs
    pub fn into_pairs(self) -> Vec<(String, Bytes)> {
        self.pairs
    }
}

impl<K, V> FromIterator<(K, V)> for Fields
where
    K: Into<String>,
    V: AsRef<[u8]>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

impl IntoIterator for Fields {
    type Item = (String, Bytes);
    type IntoIter = std::vec::IntoIter<(String, Bytes)>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.into_iter()
    }
}

/// One immutable record of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Id assigned by the log at append time
    pub id: EntryId,
    /// The entry's payload
    pub fields: Fields,
}

impl Entry {
    /// Create an entry
    pub fn new(id: EntryId, fields: Fields) -> Self {
        Self { id, fields }
    }

    /// A pending entry whose payload was deleted from the stream
    pub fn deleted(id: EntryId) -> Self {
        Self::new(id, Fields::new())
    }

    /// Whether the payload is gone
    ///
    /// Appends never accept empty field maps, so only a history replay of a
    /// deleted-but-pending entry yields one.
    pub fn is_deleted(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position just after this entry, for chaining direct reads
    pub fn position(&self) -> LogPosition {
        LogPosition::at(self.id)
    }
}

/// A row of a consumer group's pending entry list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Id of the delivered entry
    pub entry_id: EntryId,
    /// Consumer currently owning the entry
    pub consumer: String,
    /// Time since the entry was last delivered
    pub idle: Duration,
    /// How many times the entry has been delivered
    pub delivery_count: u64,
}

/// One page of a pending-entry claim scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPage {
    /// Entries reassigned to the claiming consumer
    pub claimed: Vec<Entry>,
    /// Where the next scan should start; [`LogPosition::Beginning`] once the
    /// pending list has been fully scanned
    pub next_cursor: LogPosition,
    /// Pending ids whose entries no longer exist in the stream; the backing
    /// service dropped them from the pending list
    pub deleted: Vec<EntryId>,
}

impl ClaimPage {
    /// An empty, exhausted page
    pub fn exhausted() -> Self {
        Self {
            claimed: Vec::new(),
            next_cursor: LogPosition::Beginning,
            deleted: Vec::new(),
        }
    }

    /// Whether the pending list scan is complete
    pub fn is_exhausted(&self) -> bool {
        self.next_cursor == LogPosition::Beginning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_fields_preserve_insertion_order() {
        let fields = Fields::new()
            .with("zeta", "1")
            .with("alpha", "2")
            .with("mid", "3");
        let keys: Vec<_> = fields.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_fields_replace_in_place() {
        let mut fields = Fields::new().with("a", "1").with("b", "2");
        let previous = fields.insert("a", "10");
        assert_eq!(previous, Some(Bytes::from_static(b"1")));
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get_str("a"), Some("10"));
        assert_eq!(fields.keys().next(), Some("a"));
    }

    #[test]
    fn test_fields_binary_values() {
        let fields = Fields::new().with("blob", [0xff_u8, 0x00, 0x10]);
        assert_eq!(fields.get("blob").unwrap().as_ref(), &[0xff, 0x00, 0x10]);
        assert_eq!(fields.get_str("blob"), None);
        assert!(fields.get("missing").is_none());
    }

    #[test]
    fn test_fields_json_codec() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Order {
            sku: String,
            qty: u32,
        }

        let order = Order {
            sku: "A-1".to_string(),
            qty: 3,
        };
        let mut fields = Fields::new();
        fields.insert_json("order", &order).unwrap();

        let decoded: Order = fields.get_json("order").unwrap().unwrap();
        assert_eq!(decoded, order);
        assert!(fields.get_json::<Order>("nope").is_none());
    }

    #[test]
    fn test_fields_from_iterator() {
        let fields: Fields = vec![("k1", "v1"), ("k2", "v2")].into_iter().collect();
        assert_eq!(fields.len(), 2);
        let pairs = fields.into_pairs();
        assert_eq!(pairs[1].0, "k2");
    }

    #[test]
    fn test_claim_page_exhausted() {
        let page = ClaimPage::exhausted();
        assert!(page.is_exhausted());

        let page = ClaimPage {
            claimed: Vec::new(),
            next_cursor: LogPosition::at(EntryId::new(4, 0)),
            deleted: Vec::new(),
        };
        assert!(!page.is_exhausted());
    }

    #[test]
    fn test_deleted_entry_keeps_id() {
        let entry = Entry::deleted(EntryId::new(2, 0));
        assert!(entry.is_deleted());
        assert_eq!(entry.position(), LogPosition::At(EntryId::new(2, 0)));
        assert!(!Entry::new(EntryId::new(3, 0), Fields::new().with("k", "v")).is_deleted());
    }
}
