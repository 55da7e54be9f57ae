//! Mark - Autonomous Market-Maker / Rebalancer
//!
//! Entry point. Wires the stores, queue, cache, adapters and the three
//! long-running tasks:
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐
//! │ Webhooks │──▶│   Queue   │──▶│ Processor  │──▶ intents
//! └──────────┘   └───────────┘   └────────────┘
//!      ▲               ▲               │
//! ┌──────────┐   ┌───────────┐   ┌────────────┐
//! │  Admin   │   │ Backfill  │   │ Rebalance  │──▶ bridges
//! │  (axum)  │   │  Poller   │   │  Engine    │
//! └──────────┘   └───────────┘   └────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{error, info, warn};

use mark::adapters::AdapterRegistry;
use mark::cache::PurchaseCache;
use mark::chain::{ChainService, SignerChainService};
use mark::config::AppConfig;
use mark::gateway::{self, state::AdminState};
use mark::hub::{EverclearApi, HubClient};
use mark::poller::BackfillPoller;
use mark::processor::{ConsumerPool, EventHandler};
use mark::queue::{DEAD_LETTER_TTL, EventQueue};
use mark::rebalance::RebalanceEngine;
use mark::store::{EarmarkStore, OperationStore, PauseStore, ensure_schema};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("MARK_CONFIG").unwrap_or_else(|_| "config/mark.yaml".to_string());
    let config = Arc::new(AppConfig::load(&config_path).context("loading configuration")?);

    let _log_guard = mark::logging::init_logging(&config.logging);
    info!(version = env!("GIT_HASH"), config = %config_path, "Mark starting");

    // === Postgres operations store ===
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .context("connecting to Postgres")?;
    ensure_schema(&pool).await.context("running schema bootstrap")?;

    let earmarks = Arc::new(EarmarkStore::new(pool.clone()));
    let operations = Arc::new(OperationStore::new(pool.clone()));
    let pause = Arc::new(PauseStore::new(pool));

    // === Redis queue + purchase cache ===
    let redis_client =
        redis::Client::open(config.redis.url()).context("opening Redis client")?;
    let redis_conn = redis_client
        .get_multiplexed_async_connection()
        .await
        .context("connecting to Redis")?;
    let queue = Arc::new(EventQueue::new(redis_conn.clone()));
    let cache = Arc::new(PurchaseCache::new(redis_conn));

    // Reclaim events a previous process left in processing:*.
    let reclaimed = queue.move_processing_to_pending().await?;
    if reclaimed > 0 {
        warn!(count = reclaimed, "Reclaimed in-flight events from previous run");
    }

    // === External collaborators ===
    let chain: Arc<dyn ChainService> = Arc::new(SignerChainService::new((*config).clone()));
    let hub: Arc<dyn HubClient> = Arc::new(EverclearApi::new(config.everclear_api_url.clone()));
    let registry = Arc::new(AdapterRegistry::with_defaults());
    info!(bridges = ?registry.registered(), "Bridge adapters registered");

    // === Core components ===
    let engine = Arc::new(RebalanceEngine::new(
        config.clone(),
        earmarks.clone(),
        operations.clone(),
        pause.clone(),
        registry,
        chain.clone(),
        hub.clone(),
    ));

    let handler = Arc::new(EventHandler::new(
        config.clone(),
        queue.clone(),
        cache.clone(),
        earmarks.clone(),
        chain.clone(),
        hub.clone(),
    ));
    let consumer_pool = ConsumerPool::new(handler, queue.clone(), config.worker_count());

    let backfill = BackfillPoller::new(
        hub,
        queue.clone(),
        cache.clone(),
        Duration::from_secs(config.poll_interval_secs),
    );

    // === Tasks ===
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = consumer_pool.spawn(shutdown_rx.clone());

    {
        let engine = engine.clone();
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            engine.run(shutdown).await;
        }));
    }

    {
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            backfill.run(shutdown).await;
        }));
    }

    // Periodic dead-letter retention sweep.
    {
        let queue = queue.clone();
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
                match queue.cleanup_expired_dead_letter(DEAD_LETTER_TTL).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Expired dead-letter events removed"),
                    Err(e) => error!(error = %e, "Dead-letter cleanup failed"),
                }
            }
        }));
    }

    {
        let admin_state = AdminState {
            config: config.clone(),
            earmarks,
            operations,
            pause,
            queue,
            cache,
            engine,
            chain,
        };
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            gateway::run_server(admin_state, shutdown).await;
        }));
    }

    // === Shutdown on SIGINT/SIGTERM ===
    wait_for_signal().await;
    info!("Shutdown signal received, draining tasks");
    let _ = shutdown_tx.send(true);

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!(error = %e, "Task join failed");
        }
    }

    info!("Mark stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
