//! livesync-replay - drive the live-sync core from recorded traffic.
//!
//! Loads a membership snapshot, replays each configured NDJSON stream on
//! its own poller task and reports what the receivers were handed.

use anyhow::Context as _;
use livesync::config::{self, Config};
use livesync::replay::{self, CountingReceiver, DeliveryStats};
use livesync::telemetry::spans;
use livesync::{Dispatcher, SyncContext, metrics};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Instrument, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "livesync.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    if config.log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    if let Err(errors) = config::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("configuration has {} error(s)", errors.len());
    }

    if config.metrics.enabled {
        metrics::init();
    }

    let dispatcher = Arc::new(Dispatcher::new());
    let stats = Arc::new(DeliveryStats::default());
    let global_stats = Arc::new(DeliveryStats::default());
    let ctx = SyncContext::current();

    // Startup membership must be in place before any poller runs
    let snapshot = match &config.replay.snapshot {
        Some(path) => replay::load_snapshot(path).await?,
        None => Default::default(),
    };
    dispatcher.startup(&snapshot)?;

    dispatcher.register_global(
        &ctx,
        Arc::new(CountingReceiver::new(Arc::clone(&global_stats))),
    )?;
    let users: HashSet<&String> = snapshot.values().flatten().collect();
    for user_id in &users {
        dispatcher.register(
            &ctx,
            user_id,
            Arc::new(CountingReceiver::new(Arc::clone(&stats))),
        )?;
    }
    info!(
        rooms = snapshot.len(),
        users = users.len(),
        streams = config.replay.streams.len(),
        "Starting livesync replay"
    );

    let mut handles = Vec::with_capacity(config.replay.streams.len());
    for path in config.replay.streams.clone() {
        let dispatcher = Arc::clone(&dispatcher);
        let stats = Arc::clone(&stats);
        let span = spans::poller(&path.display().to_string());
        handles.push(tokio::spawn(
            async move { replay::run_stream(dispatcher, stats, &path).await }.instrument(span),
        ));
    }

    let mut applied = 0usize;
    for handle in handles {
        applied += handle.await.context("poller task panicked")??;
    }

    println!("applied {applied} envelopes");
    println!("global: {}", global_stats.summary());
    println!("users:  {}", stats.summary());
    if config.metrics.enabled && config.replay.report_metrics {
        print!("{}", metrics::gather_metrics());
    }
    Ok(())
}
