//! `rill`: command-line client for consumer groups over Redis streams
//!
//! Every command prints JSON lines on stdout; logs go to stderr.

mod cli;
mod commands;
mod config;
mod output;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rill_redis::RedisBackend;
use rill_streams::{
    Reclaimer, ReclaimerConfig, StreamClient, Subscriber, SubscriberConfig, Subscription,
};
use tracing::{info, warn};

use crate::cli::{Cli, Command, TailArgs};
use crate::config::CliConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::resolve(&cli)?;

    let _log_guard = rill_logging::RillSubscriberBuilder::new()
        .with_config(config.logging.clone())
        .try_init()
        .context("failed to initialize logging")?;

    let address = config.redis.address.clone();
    let backend = RedisBackend::connect(config.redis)
        .await
        .with_context(|| format!("failed to connect to {address}"))?;
    let client = StreamClient::with_config(Arc::new(backend), config.client);

    match cli.command {
        Command::Tail(args) => tail(client, args).await,
        command => {
            let mut printed = Vec::new();
            let result = commands::execute(&client, command, &mut printed).await;
            for line in &printed {
                output::print_line(line);
            }
            result
        }
    }
}

/// Print a group's entries as they arrive until Ctrl-C
async fn tail(client: StreamClient, args: TailArgs) -> anyhow::Result<()> {
    let consumer = args
        .consumer
        .clone()
        .unwrap_or_else(|| format!("rill-{}", uuid::Uuid::new_v4().simple()));

    let mut config = SubscriberConfig::new(&args.stream, &args.group, &consumer)
        .with_batch_size(args.batch)
        .with_block(Duration::from_millis(args.block_ms));
    if let Some(start) = args.create {
        config = config.with_ensure_group(start);
    }
    let mut subscription = Subscriber::spawn(client.clone(), config);

    let mut reclaimer: Option<Subscription> = args.reclaim_idle_ms.map(|idle_ms| {
        let config = ReclaimerConfig::new(
            &args.stream,
            &args.group,
            &consumer,
            Duration::from_millis(idle_ms),
        );
        Reclaimer::spawn(client.clone(), config)
    });

    info!(stream = %args.stream, group = %args.group, consumer = %consumer, "Tailing");

    loop {
        let entry = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            entry = subscription.recv() => entry,
            Some(entry) = next_reclaimed(&mut reclaimer) => Some(entry),
        };
        let Some(entry) = entry else {
            warn!("Subscriber stopped");
            break;
        };

        output::print_line(&output::entry_json(&entry));
        if args.ack
            && let Err(e) = client.ack(&args.stream, &args.group, entry.id).await
        {
            warn!(id = %entry.id, error = %e, "Failed to acknowledge entry");
        }
    }

    subscription.shutdown().await;
    if let Some(reclaimer) = reclaimer {
        reclaimer.shutdown().await;
    }
    Ok(())
}

/// Next reclaimed entry, or never when no reclaimer runs
async fn next_reclaimed(reclaimer: &mut Option<Subscription>) -> Option<rill_core::Entry> {
    match reclaimer {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
