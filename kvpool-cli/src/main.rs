//! # kvpool CLI
//!
//! Loads one named store from a TOML config, builds a single pool for it, and
//! runs one command (or a throughput benchmark) through the pooled client.
//! Results go to stdout as JSON; logs go to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kvpool_client::{Client, Pool, PoolStats};
use kvpool_common::StoreConfig;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

mod bench;

#[derive(Parser, Debug)]
#[command(name = "kvpool")]
#[command(about = "Pooled key-value client")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "kvpool.toml")]
    config: PathBuf,

    /// Store section to use ([stores.<name>])
    #[arg(short, long, default_value = "default")]
    store: String,

    /// Enable debug logging for the client
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the store answers
    Ping,
    /// Read a string value
    Get { key: String },
    /// Write a string value
    Set { key: String, value: String },
    /// Increment an integer value
    Incr { key: String },
    /// List keys matching a glob pattern
    Keys { pattern: String },
    /// Read every field of a hash
    Hgetall { key: String },
    /// Run concurrent SET/GET pairs through the pool
    Bench {
        /// Worker threads sharing the pool
        #[arg(short, long, default_value = "4")]
        threads: usize,
        /// SET/GET pairs per thread
        #[arg(short, long, default_value = "10000")]
        ops: usize,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,kvpool_client=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = StoreConfig::load(&cli.config, &cli.store)
        .with_context(|| format!("loading store `{}` from {}", cli.store, cli.config.display()))?;
    tracing::info!(address = %config.address, store = %cli.store, "configuration loaded");

    let pool = Pool::new(config).context("building connection pool")?;
    let output = run(&pool, cli.command);
    pool.close_all();

    println!("{}", serde_json::to_string_pretty(&output?)?);
    Ok(())
}

fn run(pool: &Pool, command: Command) -> Result<Value> {
    let client = Client::new(pool);
    let value = match command {
        Command::Ping => json!({ "reply": client.ping()? }),
        Command::Get { key } => json!({ "key": key, "value": client.get(&key)? }),
        Command::Set { key, value } => json!({ "key": key, "ok": client.set(&key, &value)? }),
        Command::Incr { key } => json!({ "key": key, "value": client.incr(&key)? }),
        Command::Keys { pattern } => json!({ "pattern": pattern, "keys": client.keys(&pattern)? }),
        Command::Hgetall { key } => json!({ "key": key, "fields": client.hgetall(&key)? }),
        Command::Bench { threads, ops } => {
            let report = bench::run(pool, threads, ops)?;
            json!({
                "threads": report.threads,
                "ops": report.ops,
                "errors": report.errors,
                "seconds": report.elapsed.as_secs_f64(),
                "ops_per_sec": report.ops_per_sec(),
                "pool": stats_json(&pool.stats()),
            })
        }
    };
    Ok(value)
}

fn stats_json(stats: &PoolStats) -> Value {
    json!({
        "active": stats.active,
        "idle": stats.idle,
        "max_active": stats.max_active,
        "max_idle": stats.max_idle,
    })
}
