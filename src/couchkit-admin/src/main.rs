use anyhow::Result;
use clap::Parser;
use couchkit_rs::{Cluster, ClusterConfig};

mod commands;
mod telemetry;

use commands::Command;

/// Inspect a cluster: buckets, users, roles, groups, indexes and service health
#[derive(Parser, Debug)]
#[command(name = "couchkit-admin", version)]
struct Args {
    /// Path to the JSON cluster configuration
    #[arg(long, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = telemetry::init_telemetry()?;

    let config = ClusterConfig::load(&args.config).unwrap_or_else(|err| {
        tracing::warn!("Failed to load {}: {}, using defaults", args.config, err);
        ClusterConfig::default()
    });

    tracing::info!(hosts = ?config.hosts, tls = config.use_tls, "couchkit-admin starting");

    let cluster = Cluster::connect(config)?;
    let output = commands::run(&cluster, &args.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
