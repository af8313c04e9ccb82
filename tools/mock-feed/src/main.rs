//! mock-feed - synthetic scheduler snapshots
//!
//! Prints one JSON snapshot per line on stdout. With `--once` it prints a
//! single snapshot and exits, which is the shape the ingestor's command
//! source expects (`CLUSTERBOARD_SOURCE="cmd:mock-feed --once"`).

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

mod generate;

use generate::Shape;

#[derive(Parser, Debug)]
#[command(name = "mock-feed", version, about = "Emit synthetic cluster snapshots")]
struct Args {
    /// Print one snapshot and exit.
    #[arg(long)]
    once: bool,

    /// Seconds between snapshots when streaming.
    #[arg(long, default_value_t = 30)]
    interval: u64,

    /// Number of nodes; even-numbered nodes carry GPUs.
    #[arg(long, default_value_t = 10)]
    nodes: u32,

    /// Number of jobs per snapshot.
    #[arg(long, default_value_t = 5)]
    jobs: u32,

    /// Seed for reproducible output.
    #[arg(long, env = "MOCK_FEED_SEED")]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries snapshots only.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let shape = Shape {
        nodes: args.nodes,
        jobs: args.jobs,
    };

    if args.once {
        return emit(&mut rng, shape);
    }

    info!(interval_secs = args.interval, "Streaming snapshots");
    let mut interval = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => emit(&mut rng, shape)?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                return Ok(());
            }
        }
    }
}

fn emit(rng: &mut StdRng, shape: Shape) -> Result<()> {
    let snapshot = generate::snapshot(rng, shape, Utc::now())?;
    debug!(rows = snapshot.row_count(), "Generated snapshot");

    let line = serde_json::to_string(&snapshot).context("failed to encode snapshot")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}").context("failed to write snapshot")?;
    stdout.flush().context("failed to flush stdout")?;
    Ok(())
}
