use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use courier_common::config::AppConfig;
use courier_common::db;
use courier_common::redis_pool::create_redis_pool;
use courier_controller::build_reconciler;
use courier_controller::queue::WorkQueue;
use courier_controller::retention::RetentionSweeper;
use courier_controller::watcher::run_watcher;
use courier_controller::worker::Controller;
use courier_engine::ResourceStore;
use courier_engine::clock::{Clock, SystemClock};
use courier_engine::lease::{LocalLease, RedisLease, RequestLease};
use courier_engine::store::PgStore;
use courier_notifier::ChannelRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "courier_controller=info,courier_engine=info,courier_notifier=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Courier controller starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;

    let pg_store = Arc::new(PgStore::new(pool));
    let listener = pg_store.spawn_listener();
    let store: Arc<dyn ResourceStore> = pg_store;

    let lease: Arc<dyn RequestLease> = match &config.redis_url {
        Some(url) => Arc::new(RedisLease::new(create_redis_pool(url).await?)),
        None => {
            tracing::info!("REDIS_URL not set, using process-local leases");
            Arc::new(LocalLease::new())
        }
    };

    let registry = ChannelRegistry::from_config(&config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let reconciler = Arc::new(build_reconciler(
        &config,
        store.clone(),
        lease,
        registry,
        clock.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let queue = Arc::new(WorkQueue::new());
    let workers = Controller::new(reconciler, queue.clone(), config.controller_workers).spawn();

    let mut watcher = tokio::spawn(run_watcher(
        store.clone(),
        queue.clone(),
        Duration::from_secs(config.resync_interval_secs),
        shutdown_rx.clone(),
    ));

    let sweeper = RetentionSweeper::new(store, clock);
    let sweep_interval = Duration::from_secs(config.retention_sweep_interval_secs);
    let sweeper = tokio::spawn(async move { sweeper.run(sweep_interval, shutdown_rx).await });

    // Run until Ctrl+C or the watcher dies
    tokio::select! {
        _ = &mut watcher => {
            tracing::error!("Change watcher exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    let _ = shutdown_tx.send(true);
    queue.shutdown();
    for worker in workers {
        let _ = worker.await;
    }
    let _ = sweeper.await;
    watcher.abort();
    listener.abort();

    tracing::info!("Courier controller stopped.");
    Ok(())
}
