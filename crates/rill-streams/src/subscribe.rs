//! Polling consumer loop
//!
//! A [`Subscriber`] owns a background task that reads a consumer group in a
//! loop and forwards entries over a bounded channel. Fetch errors are logged
//! and retried after a jittered backoff; the loop never gives up on its own.

use std::time::Duration;

use rand::Rng;
use rill_core::{Entry, EntryId, LogPosition};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::StreamClient;
use crate::config::GroupReadOptions;

/// Settings of a [`Subscriber`]
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    /// Entries requested per read
    pub batch_size: usize,
    /// Block window of each read
    pub block: Duration,
    /// Capacity of the delivery channel
    pub channel_capacity: usize,
    /// Acknowledge each entry once the channel accepted it
    pub ack_on_handoff: bool,
    /// Drain this consumer's own pending entries before reading new ones
    pub recover_pending: bool,
    /// Create the group at this start position if it does not exist
    pub ensure_group: Option<LogPosition>,
    /// Pause after a failed read
    pub error_backoff: Duration,
}

impl SubscriberConfig {
    /// Defaults for one consumer of a group
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            batch_size: 10,
            block: Duration::from_secs(5),
            channel_capacity: 64,
            ack_on_handoff: false,
            recover_pending: true,
            ensure_group: None,
            error_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
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

    pub fn with_recover_pending(mut self, recover: bool) -> Self {
        self.recover_pending = recover;
        self
    }

    pub fn with_ensure_group(mut self, start: LogPosition) -> Self {
        self.ensure_group = Some(start);
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

/// Handle to a running polling task
///
/// Dropping the handle does not stop the task; call
/// [`Subscription::shutdown`] or cancel the token.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<Entry>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(
        receiver: mpsc::Receiver<Entry>,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            receiver,
            cancel,
            handle,
        }
    }

    /// Next delivered entry; `None` once the task has stopped
    pub async fn recv(&mut self) -> Option<Entry> {
        self.receiver.recv().await
    }

    /// Token that stops the task when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the background task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task and wait for it to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Polling task ended abnormally");
        }
    }
}

/// Sleep for `base` plus up to 25% jitter, or until cancelled
///
/// Returns `false` when cancelled.
pub(crate) async fn backoff(base: Duration, cancel: &CancellationToken) -> bool {
    let jitter_ms = u64::try_from(base.as_millis() / 4).unwrap_or(0);
    let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_ms));
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(base + jitter) => true,
    }
}

/// Consumer-group polling loop
pub struct Subscriber;

impl Subscriber {
    /// Spawn the polling task
    pub fn spawn(client: StreamClient, config: SubscriberConfig) -> Subscription {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_subscriber(client, config, tx, cancel.clone()));
        Subscription::new(rx, cancel, handle)
    }
}

async fn run_subscriber(
    client: StreamClient,
    config: SubscriberConfig,
    tx: mpsc::Sender<Entry>,
    cancel: CancellationToken,
) {
    let stream = config.stream.as_str();
    let group = config.group.as_str();
    let consumer = config.consumer.as_str();

    if let Some(start) = config.ensure_group {
        loop {
            let created = tokio::select! {
                _ = cancel.cancelled() => return,
                result = client.create_group_or_reuse(stream, group, Some(start)) => result,
            };
            match created {
                Ok(_) => break,
                Err(e) => {
                    error!(stream, group, error = %e, "Failed to ensure consumer group");
                    if !backoff(config.error_backoff, &cancel).await {
                        return;
                    }
                }
            }
        }
    }

    // Own pending history first, then new entries
    let mut cursor = if config.recover_pending {
        LogPosition::Beginning
    } else {
        LogPosition::Undelivered
    };
    info!(stream, group, consumer, "Subscriber started");

    loop {
        let recovering = cursor != LogPosition::Undelivered;
        let options = GroupReadOptions::new()
            .count(config.batch_size)
            .block(if recovering { Duration::ZERO } else { config.block })
            .from_position(cursor);

        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.read_group(stream, group, consumer, options) => result,
        };

        let entries = match fetched {
            Ok(entries) => entries,
            Err(e) => {
                error!(stream, group, consumer, error = %e, "Failed to fetch entries");
                if !backoff(config.error_backoff, &cancel).await {
                    break;
                }
                continue;
            }
        };

        if recovering {
            match entries.last() {
                Some(last) => cursor = last.position(),
                None => {
                    debug!(stream, group, consumer, "Pending history drained");
                    cursor = LogPosition::Undelivered;
                }
            }
        }

        for entry in entries {
            let id = entry.id;
            if entry.is_deleted() {
                // Nothing to hand off; drop the id from the pending list
                debug!(stream, group, consumer, id = %id, "Acknowledging deleted pending entry");
                ack_or_warn(&client, stream, group, id).await;
                continue;
            }
            let sent = tokio::select! {
                _ = cancel.cancelled() => None,
                sent = tx.send(entry) => Some(sent.is_ok()),
            };
            match sent {
                Some(true) => {}
                Some(false) => {
                    debug!(stream, group, consumer, "Receiver dropped, stopping subscriber");
                    return;
                }
                None => {
                    info!(stream, group, consumer, "Subscriber cancelled");
                    return;
                }
            }
            if config.ack_on_handoff {
                ack_or_warn(&client, stream, group, id).await;
            }
        }
    }

    info!(stream, group, consumer, "Subscriber stopped");
}

pub(crate) async fn ack_or_warn(client: &StreamClient, stream: &str, group: &str, id: EntryId) {
    if let Err(e) = client.ack(stream, group, id).await {
        warn!(stream, group, id = %id, error = %e, "Failed to acknowledge entry");
    }
}
