//! Dispatch Express — anti-ban paced campaign dispatch engine.
//!
//! Main entry point that wires the store, queue, scheduler, and worker,
//! then runs until interrupted.

use clap::Parser;
use dispatch_channels::ProviderFactory;
use dispatch_core::config::AppConfig;
use dispatch_core::event_bus::noop_sink;
use dispatch_engine::{
    spawn_scheduled_tick, CampaignService, DispatchWorker, ProgressNotifier, StepScheduler,
};
use dispatch_personalization::MessagePersonalizer;
use dispatch_queue::DelayedJobQueue;
use dispatch_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dispatch-express")]
#[command(about = "Anti-ban paced campaign dispatch engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "DISPATCH_EXPRESS__NODE_ID")]
    node_id: Option<String>,

    /// Scheduled-campaign tick cadence in seconds (overrides config)
    #[arg(long, env = "DISPATCH_EXPRESS__SCHEDULER__TICK_INTERVAL_SECS")]
    tick_interval_secs: Option<u64>,

    /// Anti-burst stagger per scheduling-pass candidate, in milliseconds
    /// (overrides config)
    #[arg(long, env = "DISPATCH_EXPRESS__SCHEDULER__STAGGER_MS")]
    stagger_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dispatch_express=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Dispatch Express starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(secs) = cli.tick_interval_secs {
        config.scheduler.tick_interval_secs = secs;
    }
    if let Some(ms) = cli.stagger_ms {
        config.scheduler.stagger_ms = ms;
    }

    info!(
        node_id = %config.node_id,
        tick_interval_secs = config.scheduler.tick_interval_secs,
        stagger_ms = config.scheduler.stagger_ms,
        worker_concurrency = config.worker.concurrency,
        ai_enabled = config.personalization.ai_enabled,
        "Configuration loaded"
    );

    // Wire the dispatch core. The realtime transport and AI provider are
    // external collaborators; the host process runs without them until
    // they are attached.
    let store = Arc::new(Store::new());
    let queue = Arc::new(DelayedJobQueue::new());
    let scheduler = Arc::new(
        StepScheduler::new(Arc::clone(&store), Arc::clone(&queue))
            .with_stagger_ms(config.scheduler.stagger_ms),
    );
    let notifier = Arc::new(ProgressNotifier::new(Arc::clone(&store), noop_sink()));
    let personalizer = Arc::new(
        MessagePersonalizer::new()
            .with_timeout(Duration::from_millis(config.personalization.ai_timeout_ms)),
    );
    let gateways = Arc::new(ProviderFactory::new(config.gateway.timeout_ms));

    let service = Arc::new(CampaignService::new(
        Arc::clone(&store),
        Arc::clone(&scheduler),
        Arc::clone(&notifier),
    ));
    let worker = Arc::new(DispatchWorker::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&scheduler),
        Arc::clone(&notifier),
        gateways,
        personalizer,
    ));

    let tick_task = spawn_scheduled_tick(
        Arc::clone(&service),
        Duration::from_secs(config.scheduler.tick_interval_secs),
    );
    let worker_task = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.run().await })
    };

    info!("Dispatch worker online");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping");

    worker_task.abort();
    tick_task.abort();

    Ok(())
}
