//! dbpool: probe a connection pool from the command line
//!
//! Reads the same `DB_*` environment variables as the library.
//!
//! Usage:
//!   dbpool check
//!   dbpool stats --acquire 5 --json

mod output;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbpool_connection::{
    DatabaseSettings, EnvironmentAdapter, ManagedConnection, PoolKey, PoolManager, PoolStrategy,
    logging,
};

use output::Report;

#[derive(Parser)]
#[command(
    name = "dbpool",
    about = "Inspect a dbpool connection pool",
    version,
    propagate_version = true
)]
struct Cli {
    /// Pool strategy; detected from the runtime when omitted
    #[arg(long, global = true, env = "DB_POOL_STRATEGY")]
    strategy: Option<PoolStrategy>,

    /// Print machine-readable JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Acquire one connection, ping it, release it and print pool statistics
    Check,
    /// Hold several connections at once and print pool statistics
    Stats {
        /// Number of connections to hold
        #[arg(short, long, default_value_t = 1)]
        acquire: usize,
        /// Open `min_size` idle connections first
        #[arg(long)]
        warm_up: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init_from_env()?;

    let settings = DatabaseSettings::from_env().context("failed to read database settings")?;
    let adapter = match cli.strategy {
        Some(strategy) => EnvironmentAdapter::with_strategy(strategy),
        None => EnvironmentAdapter::from_settings(&settings),
    };
    let manager = adapter.build_manager(
        settings.pool.clone(),
        Arc::new(settings.connection_factory()),
    )?;
    let key = manager.register(settings.params.clone());
    let strategy = adapter.strategy();

    let report = match cli.command {
        Command::Check => check(&manager, &key, strategy, &settings).await,
        Command::Stats { acquire, warm_up } => {
            stats(&manager, &key, strategy, acquire, warm_up).await
        }
    };
    manager.shutdown().await;

    let report = report?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.to_table());
    }
    Ok(())
}

async fn check(
    manager: &PoolManager,
    key: &PoolKey,
    strategy: PoolStrategy,
    settings: &DatabaseSettings,
) -> Result<Report> {
    let started = Instant::now();
    let conn = manager
        .acquire(key)
        .await
        .with_context(|| format!("failed to acquire a connection to {}", settings.params.endpoint()))?;
    let acquired_in = started.elapsed();

    let ping = conn.ping(settings.pool.connect_timeout()).await;
    manager.release(conn).await;
    let latency = ping.map_err(|e| anyhow::anyhow!("ping failed: {}", e))?;

    tracing::info!(?acquired_in, ?latency, "pool check passed");
    let mut report = Report::collect(manager, key, strategy);
    report.ping_ms = Some(latency.as_secs_f64() * 1000.0);
    Ok(report)
}

async fn stats(
    manager: &PoolManager,
    key: &PoolKey,
    strategy: PoolStrategy,
    count: usize,
    warm_up: bool,
) -> Result<Report> {
    if warm_up {
        let opened = manager.warm_up(key).await?;
        tracing::info!(opened, "warm-up finished");
    }

    let mut held: Vec<ManagedConnection> = Vec::with_capacity(count);
    let mut failure = None;
    for _ in 0..count {
        match manager.acquire(key).await {
            Ok(conn) => held.push(conn),
            Err(e) => {
                failure = Some(e.to_string());
                break;
            }
        }
    }

    let mut report = Report::collect(manager, key, strategy);
    report.held = held.len();
    report.acquire_error = failure;

    for conn in held {
        manager.release(conn).await;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stats() {
        let cli = Cli::try_parse_from(["dbpool", "stats", "--acquire", "3", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Command::Stats {
                acquire: 3,
                warm_up: false
            }
        ));
    }

    #[test]
    fn test_parse_strategy() {
        let cli = Cli::try_parse_from(["dbpool", "--strategy", "per-request", "check"]).unwrap();
        assert_eq!(cli.strategy, Some(PoolStrategy::PerRequest));
        assert!(Cli::try_parse_from(["dbpool", "--strategy", "forking", "check"]).is_err());
    }
}
