//! Periodic recovery of entries left pending by dead consumers
//!
//! The reclaimer wakes on a fixed interval, sweeps the group's pending list
//! with [`StreamClient::claim_all`] and forwards whatever it claimed. The
//! idle threshold is what separates a slow consumer from a dead one, so it
//! should comfortably exceed the longest expected processing time.

use std::time::Duration;

use rill_core::Entry;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::client::StreamClient;
use crate::subscribe::{Subscription, ack_or_warn};

/// Settings of a [`Reclaimer`]
#[derive(Debug, Clone)]
pub struct ReclaimerConfig {
    pub stream: String,
    pub group: String,
    /// Consumer the claimed entries are reassigned to
    pub consumer: String,
    /// Entries idle at least this long are claimed
    pub min_idle: Duration,
    /// Time between sweeps
    pub interval: Duration,
    /// Capacity of the delivery channel
    pub channel_capacity: usize,
    /// Acknowledge each entry once the channel accepted it
    pub ack_on_handoff: bool,
}

impl ReclaimerConfig {
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        min_idle: Duration,
    ) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            min_idle,
            interval: Duration::from_secs(30),
            channel_capacity: 64,
            ack_on_handoff: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_ack_on_handoff(mut self, ack: bool) -> Self {
        self.ack_on_handoff = ack;
        self
    }
}

/// Background supervisor that claims stale pending entries
pub struct Reclaimer;

impl Reclaimer {
    /// Spawn the sweep task
    pub fn spawn(client: StreamClient, config: ReclaimerConfig) -> Subscription {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_reclaimer(client, config, tx, cancel.clone()));
        Subscription::new(rx, cancel, handle)
    }
}

async fn run_reclaimer(
    client: StreamClient,
    config: ReclaimerConfig,
    tx: mpsc::Sender<Entry>,
    cancel: CancellationToken,
) {
    let stream = config.stream.as_str();
    let group = config.group.as_str();
    let consumer = config.consumer.as_str();

    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        stream,
        group,
        consumer,
        min_idle_ms = u64::try_from(config.min_idle.as_millis()).unwrap_or(u64::MAX),
        interval_ms = u64::try_from(config.interval.as_millis()).unwrap_or(u64::MAX),
        "Reclaimer started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(stream, group, "Reclaimer shutting down");
                break;
            }
            _ = ticker.tick() => {}
        }

        let sweep = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.claim_all(stream, group, consumer, config.min_idle) => result,
        };
        let sweep = match sweep {
            Ok(sweep) => sweep,
            Err(e) => {
                error!(stream, group, error = %e, "Claim sweep failed");
                continue;
            }
        };

        if sweep.claimed.is_empty() {
            debug!(stream, group, pages = sweep.pages, "Nothing to reclaim");
            continue;
        }
        info!(
            stream,
            group,
            claimed = sweep.claimed.len(),
            deleted = sweep.deleted.len(),
            pages = sweep.pages,
            "Reclaimed stale entries"
        );

        for entry in sweep.claimed {
            let id = entry.id;
            let sent = tokio::select! {
                _ = cancel.cancelled() => return,
                sent = tx.send(entry) => sent,
            };
            if sent.is_err() {
                debug!(stream, group, "Receiver dropped, stopping reclaimer");
                return;
            }
            if config.ack_on_handoff {
                ack_or_warn(&client, stream, group, id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rill_core::{Fields, LogPosition, ManualClock};
    use rill_storage::InMemoryStreamBackend;

    use crate::config::GroupReadOptions;

    #[tokio::test]
    async fn test_reclaimer_recovers_dead_consumer_entries() {
        let clock = Arc::new(ManualClock::new());
        let backend = Arc::new(InMemoryStreamBackend::with_clock(clock.clone()));
        let client = StreamClient::new(backend.clone());
        client
            .create_group("orders", "g1", Some(LogPosition::Beginning))
            .await
            .unwrap();
        for n in 0..4 {
            client
                .append("orders", &Fields::new().with("n", n.to_string()))
                .await
                .unwrap();
        }
        client
            .read_group("orders", "g1", "crashed", GroupReadOptions::new())
            .await
            .unwrap();
        clock.advance(Duration::from_secs(600));

        let config = ReclaimerConfig::new("orders", "g1", "rescuer", Duration::from_secs(300))
            .with_interval(Duration::from_millis(20))
            .with_ack_on_handoff(true);
        let mut sub = Reclaimer::spawn(client.clone(), config);

        for _ in 0..4 {
            tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .unwrap()
                .unwrap();
        }
        sub.shutdown().await;
        assert_eq!(backend.pending_len("orders", "g1"), 0);
    }

    #[tokio::test]
    async fn test_reclaimer_leaves_fresh_entries() {
        let backend = Arc::new(InMemoryStreamBackend::new());
        let client = StreamClient::new(backend.clone());
        client
            .create_group("orders", "g1", Some(LogPosition::Beginning))
            .await
            .unwrap();
        client
            .append("orders", &Fields::new().with("n", "1"))
            .await
            .unwrap();
        client
            .read_group("orders", "g1", "busy", GroupReadOptions::new())
            .await
            .unwrap();

        let config = ReclaimerConfig::new("orders", "g1", "rescuer", Duration::from_secs(3600))
            .with_interval(Duration::from_millis(10));
        let mut sub = Reclaimer::spawn(client.clone(), config);

        let waited = tokio::time::timeout(Duration::from_millis(100), sub.recv()).await;
        assert!(waited.is_err());
        sub.shutdown().await;

        let pending = client.pending("orders", "g1", None, 10).await.unwrap();
        assert_eq!(pending[0].consumer, "busy");
    }

    #[test]
    fn test_default_config() {
        let config = ReclaimerConfig::new("s", "g", "c", Duration::from_secs(60));
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.channel_capacity, 64);
        assert!(!config.ack_on_handoff);
    }
}
