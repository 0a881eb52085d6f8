//! One-shot subcommands
//!
//! Each command returns the JSON lines it wants printed, so the same code
//! runs against any backend.

use std::time::Duration;

use anyhow::{Context, bail};
use rill_core::{Fields, StreamError};
use rill_streams::{ClaimOptions, GroupReadOptions, ReadOptions, StreamClient};
use serde_json::{Value, json};
use tracing::info;

use crate::cli::{Command, ReadWindow};
use crate::output::{claim_page_json, claim_sweep_json, entry_json, pending_json};

fn fields_from(pairs: Vec<(String, String)>) -> Fields {
    pairs.into_iter().collect()
}

fn entries_json(entries: &[rill_core::Entry]) -> Vec<Value> {
    entries.iter().map(entry_json).collect()
}

/// Turn an acknowledgment failure after delivery into printable output plus
/// an error naming what is still pending
fn partial_failure(err: StreamError, printed: &mut Vec<Value>) -> anyhow::Error {
    let Some(partial) = err.partial() else {
        return anyhow::Error::new(err);
    };
    printed.extend(entries_json(&partial.delivered));
    let pending: Vec<String> = partial.unacknowledged().map(|id| id.to_string()).collect();
    let message = format!(
        "delivered {} entries but left {} pending: {}",
        partial.delivered.len(),
        pending.len(),
        pending.join(" ")
    );
    anyhow::Error::new(err).context(message)
}

/// Run a one-shot command
///
/// On an acknowledgment failure after delivery, the delivered entries are
/// still returned through `printed` before the error.
pub async fn execute(
    client: &StreamClient,
    command: Command,
    printed: &mut Vec<Value>,
) -> anyhow::Result<()> {
    match command {
        Command::Append { stream, fields, id } => {
            let id = client
                .append_with_id(&stream, id, &fields_from(fields))
                .await
                .with_context(|| format!("append to {stream} failed"))?;
            printed.push(json!({ "id": id.to_string() }));
        }

        Command::Read {
            stream,
            from,
            window: ReadWindow { count, block_ms },
        } => {
            let options = ReadOptions::new()
                .count(count)
                .block(Duration::from_millis(block_ms))
                .from_position(from);
            let entries = client.read(&stream, options).await?;
            printed.extend(entries_json(&entries));
        }

        Command::GroupCreate {
            stream,
            group,
            start,
            reuse,
        } => {
            let created = if reuse {
                client.create_group_or_reuse(&stream, &group, Some(start)).await?
            } else {
                client.create_group(&stream, &group, Some(start)).await?;
                true
            };
            info!(stream = %stream, group = %group, created, "Group ready");
            printed.push(json!({ "group": group, "created": created }));
        }

        Command::ReadGroup {
            stream,
            group,
            consumer,
            from,
            window: ReadWindow { count, block_ms },
            auto_ack,
        } => {
            let options = GroupReadOptions::new()
                .count(count)
                .block(Duration::from_millis(block_ms))
                .from_position(from)
                .auto_ack(auto_ack);
            match client.read_group(&stream, &group, &consumer, options).await {
                Ok(entries) => printed.extend(entries_json(&entries)),
                Err(e) => return Err(partial_failure(e, printed)),
            }
        }

        Command::Ack { stream, group, ids } => {
            let mut removed = 0;
            for id in &ids {
                removed += client.ack(&stream, &group, *id).await?;
            }
            printed.push(json!({ "acknowledged": removed, "requested": ids.len() }));
        }

        Command::Claim {
            stream,
            group,
            consumer,
            min_idle_ms,
            cursor,
            count,
            auto_ack,
            all,
        } => {
            let min_idle = Duration::from_millis(min_idle_ms);
            if all {
                let sweep = client.claim_all(&stream, &group, &consumer, min_idle).await?;
                printed.extend(entries_json(&sweep.claimed));
                printed.push(claim_sweep_json(&sweep));
            } else {
                let options = ClaimOptions::new(min_idle)
                    .cursor(cursor)
                    .count(count)
                    .auto_ack(auto_ack);
                match client.claim(&stream, &group, &consumer, options).await {
                    Ok(page) => {
                        printed.extend(entries_json(&page.claimed));
                        printed.push(claim_page_json(&page));
                    }
                    Err(e) => return Err(partial_failure(e, printed)),
                }
            }
        }

        Command::Pending {
            stream,
            group,
            consumer,
            count,
        } => {
            let rows = client
                .pending(&stream, &group, consumer.as_deref(), count)
                .await?;
            printed.extend(rows.iter().map(pending_json));
        }

        Command::Tail(_) => bail!("tail is a streaming command"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use clap::Parser;
    use rill_core::Operation;
    use rill_storage::InMemoryStreamBackend;

    use crate::cli::Cli;

    async fn run(client: &StreamClient, args: &[&str]) -> anyhow::Result<Vec<Value>> {
        let cli = Cli::try_parse_from(std::iter::once("rill").chain(args.iter().copied()))?;
        let mut printed = Vec::new();
        execute(client, cli.command, &mut printed).await?;
        Ok(printed)
    }

    fn setup() -> (Arc<InMemoryStreamBackend>, StreamClient) {
        let backend = Arc::new(InMemoryStreamBackend::new());
        let client = StreamClient::new(backend.clone());
        (backend, client)
    }

    #[tokio::test]
    async fn test_append_then_read() {
        let (_backend, client) = setup();
        let appended = run(&client, &["append", "orders", "sku=A-1", "qty=2"])
            .await
            .unwrap();
        let id = appended[0]["id"].as_str().unwrap().to_string();

        let lines = run(&client, &["read", "orders"]).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["id"], id.as_str());
        assert_eq!(lines[0]["fields"]["qty"], "2");
    }

    #[tokio::test]
    async fn test_group_workflow() {
        let (backend, client) = setup();
        for sku in ["A-1", "B-7", "C-3"] {
            run(&client, &["append", "orders", &format!("sku={sku}")])
                .await
                .unwrap();
        }

        let created = run(&client, &["group-create", "orders", "g1", "--start", "0"])
            .await
            .unwrap();
        assert_eq!(created[0]["created"], true);
        assert!(run(&client, &["group-create", "orders", "g1"]).await.is_err());
        let reused = run(&client, &["group-create", "orders", "g1", "--reuse"])
            .await
            .unwrap();
        assert_eq!(reused[0]["created"], false);

        let delivered = run(&client, &["read-group", "orders", "g1", "c1"]).await.unwrap();
        assert_eq!(delivered.len(), 3);

        let claimed = run(
            &client,
            &["claim", "orders", "g1", "c2", "--min-idle-ms", "0", "--count", "10"],
        )
        .await
        .unwrap();
        assert_eq!(claimed.len(), 4);
        assert_eq!(claimed[3]["claimed"], 3);
        assert_eq!(claimed[3]["next_cursor"], "0");

        let first = delivered[0]["id"].as_str().unwrap();
        let acked = run(&client, &["ack", "orders", "g1", first, first]).await.unwrap();
        assert_eq!(acked[0]["acknowledged"], 1);
        assert_eq!(acked[0]["requested"], 2);

        let pending = run(&client, &["pending", "orders", "g1", "--consumer", "c2"])
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(backend.pending_len("orders", "g1"), 2);
    }

    #[tokio::test]
    async fn test_partial_ack_still_prints_entries() {
        let (backend, client) = setup();
        run(&client, &["group-create", "orders", "g1", "--start", "0"])
            .await
            .unwrap();
        run(&client, &["append", "orders", "n=1"]).await.unwrap();
        backend.inject_failures(Operation::Ack, 1);

        let cli = Cli::try_parse_from(["rill", "read-group", "orders", "g1", "c1", "--auto-ack"])
            .unwrap();
        let mut printed = Vec::new();
        let err = execute(&client, cli.command, &mut printed).await.unwrap_err();

        assert_eq!(printed.len(), 1);
        assert!(format!("{err:#}").contains("left 1 pending"));
        assert_eq!(backend.pending_len("orders", "g1"), 1);
    }
}
