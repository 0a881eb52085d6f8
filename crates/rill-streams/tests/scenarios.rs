//! End-to-end consumer-group walkthroughs against the in-memory backend
//!
//! Each test follows one `orders` stream from appends through group
//! delivery, reassignment and acknowledgment.

use std::sync::Arc;
use std::time::Duration;

use rill_core::{EntryId, Fields, LogPosition};
use rill_storage::InMemoryStreamBackend;
use rill_streams::{ClaimOptions, GroupReadOptions, ReadOptions, StreamClient};

fn setup() -> (Arc<InMemoryStreamBackend>, StreamClient) {
    let backend = Arc::new(InMemoryStreamBackend::new());
    let client = StreamClient::new(backend.clone());
    (backend, client)
}

async fn append_orders(client: &StreamClient) -> Vec<EntryId> {
    let mut ids = Vec::new();
    for (sku, qty) in [("A-1", "2"), ("B-7", "1"), ("C-3", "5")] {
        let fields = Fields::new().with("sku", sku).with("qty", qty);
        ids.push(client.append("orders", &fields).await.unwrap());
    }
    ids
}

/// Group `g1` created at the start of the log, everything delivered to `c1`
async fn delivered_to_c1(client: &StreamClient) -> Vec<EntryId> {
    let ids = append_orders(client).await;
    client
        .create_group("orders", "g1", Some(LogPosition::Beginning))
        .await
        .unwrap();
    let delivered = client
        .read_group("orders", "g1", "c1", GroupReadOptions::new().count(10))
        .await
        .unwrap();
    assert_eq!(delivered.len(), 3);
    ids
}

// ============================================================================
// Direct reads
// ============================================================================

#[tokio::test]
async fn test_read_returns_appends_in_order() {
    let (_backend, client) = setup();
    let ids = append_orders(&client).await;

    let entries = client
        .read(
            "orders",
            ReadOptions::new()
                .count(10)
                .from_position(LogPosition::Beginning),
        )
        .await
        .unwrap();

    assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
    let skus: Vec<_> = entries.iter().filter_map(|e| e.fields.get_str("sku")).collect();
    assert_eq!(skus, vec!["A-1", "B-7", "C-3"]);
}

#[tokio::test]
async fn test_read_missing_stream_is_empty() {
    let (_backend, client) = setup();
    let entries = client.read("nowhere", ReadOptions::new()).await.unwrap();
    assert!(entries.is_empty());
}

// ============================================================================
// Group delivery
// ============================================================================

#[tokio::test]
async fn test_group_read_marks_entries_pending() {
    let (backend, client) = setup();
    let ids = delivered_to_c1(&client).await;

    let pending = client.pending("orders", "g1", None, 10).await.unwrap();
    assert_eq!(pending.len(), 3);
    for (row, id) in pending.iter().zip(&ids) {
        assert_eq!(row.entry_id, *id);
        assert_eq!(row.consumer, "c1");
        assert_eq!(row.delivery_count, 1);
    }
    assert_eq!(backend.last_delivered("orders", "g1"), ids.last().copied());

    let again = client
        .read_group("orders", "g1", "c1", GroupReadOptions::new().count(10))
        .await
        .unwrap();
    assert!(again.is_empty());
}

// ============================================================================
// Reassignment
// ============================================================================

#[tokio::test]
async fn test_claim_reassigns_everything_to_second_consumer() {
    let (_backend, client) = setup();
    let ids = delivered_to_c1(&client).await;

    let page = client
        .claim(
            "orders",
            "g1",
            "c2",
            ClaimOptions::new(Duration::ZERO)
                .cursor(LogPosition::at(EntryId::MIN))
                .count(10),
        )
        .await
        .unwrap();

    assert_eq!(page.claimed.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
    assert!(page.is_exhausted());
    assert!(page.deleted.is_empty());

    let owned_by_c2 = client.pending("orders", "g1", Some("c2"), 10).await.unwrap();
    assert_eq!(owned_by_c2.len(), 3);
    assert!(owned_by_c2.iter().all(|row| row.delivery_count == 2));
    let owned_by_c1 = client.pending("orders", "g1", Some("c1"), 10).await.unwrap();
    assert!(owned_by_c1.is_empty());
}

// ============================================================================
// Acknowledgment
// ============================================================================

#[tokio::test]
async fn test_ack_then_repeat_ack() {
    let (backend, client) = setup();
    let ids = delivered_to_c1(&client).await;

    assert_eq!(client.ack("orders", "g1", ids[0]).await.unwrap(), 1);
    assert_eq!(client.ack("orders", "g1", ids[0]).await.unwrap(), 0);
    assert_eq!(backend.pending_len("orders", "g1"), 2);

    // The log itself is untouched by acknowledgment
    assert_eq!(backend.stream_len("orders"), 3);
}

#[tokio::test]
async fn test_full_lifecycle_drains_pending_list() {
    let (backend, client) = setup();
    delivered_to_c1(&client).await;

    let page = client
        .claim(
            "orders",
            "g1",
            "c2",
            ClaimOptions::new(Duration::ZERO).auto_ack(true),
        )
        .await
        .unwrap();
    assert_eq!(page.claimed.len(), 3);
    assert_eq!(backend.pending_len("orders", "g1"), 0);

    let later = client.append("orders", &Fields::new().with("sku", "D-9")).await.unwrap();
    let delivered = client
        .read_group(
            "orders",
            "g1",
            "c2",
            GroupReadOptions::new().auto_ack(true),
        )
        .await
        .unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id, later);
    assert_eq!(backend.pending_len("orders", "g1"), 0);
}
