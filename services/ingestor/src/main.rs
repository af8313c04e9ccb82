//! clusterboard ingestor
//!
//! Polls the scheduler feed, reconciles each snapshot into the committed
//! cluster state and, when enabled, mirrors every commit into Postgres.

use std::sync::Arc;

use anyhow::{Context, Result};
use clusterboard_ingestor::{
    config,
    db::{load_committed_state, Database},
    worker::IngestWorker,
};
use clusterboard_reconcile::{ClusterStore, CommitSink, NoopSink, Reconciler, ReconcilerConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to CLUSTERBOARD_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting clusterboard ingestor");
    info!(
        source = ?config.source,
        poll_interval_secs = config.poll_interval.as_secs(),
        persist = config.persist,
        "Configuration loaded"
    );

    let store = Arc::new(ClusterStore::new());
    let reconciler_config = ReconcilerConfig {
        timeout: config.reconcile_timeout,
    };

    let reconciler = if config.persist {
        let db = Database::connect(&config.database)
            .await
            .context("failed to connect to database")?;

        if config.run_migrations {
            if let Err(e) = db.run_migrations().await {
                error!(error = %e, "Failed to run migrations");
                return Err(e.into());
            }
        }

        let sink: Arc<dyn CommitSink> = Arc::new(db.state_sink());
        let reconciler = Reconciler::new(store.clone(), sink, reconciler_config);

        // Warm start from the mirror so the version keeps counting up.
        match load_committed_state(db.pool()).await {
            Ok(Some((snapshot, stamp))) => {
                if let Err(e) = reconciler.restore(snapshot, stamp) {
                    warn!(error = %e, "Stored state rejected, starting empty");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to load stored state, starting empty"),
        }
        reconciler
    } else {
        Reconciler::new(store.clone(), Arc::new(NoopSink), reconciler_config)
    };

    let source = config.source.clone().into_source(config.source_timeout);
    let worker = IngestWorker::new(source, Arc::new(reconciler), config.poll_interval);

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);

    let shutdown_timeout = config.reconcile_timeout + config.source_timeout;
    if let Err(e) = tokio::time::timeout(shutdown_timeout, worker_handle).await {
        warn!(error = %e, "Ingest worker did not shut down in time");
    }

    info!(
        version = %store.version().version,
        "Ingestor shutdown complete"
    );
    Ok(())
}
