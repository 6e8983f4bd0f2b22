//! Subcommands and how each one maps onto the client

use anyhow::Result;
use clap::Subcommand;
use couchkit_rs::{Cluster, PingOptions, RequestOptions, UserOptions};
use serde_json::Value;

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Ping the services behind a bucket
    Ping { bucket: String },
    /// List every bucket with its settings
    Buckets,
    /// Show one bucket's settings
    Bucket { name: String },
    /// List users in the local domain
    Users,
    /// List the roles the cluster knows about
    Roles,
    /// List user groups
    Groups,
    /// List the query indexes on a bucket
    Indexes { bucket: String },
}

pub async fn run(cluster: &Cluster, command: &Command) -> Result<Value> {
    tracing::info!(?command, "running command");
    let request = RequestOptions::new();
    let output = match command {
        Command::Ping { bucket } => {
            let report = cluster.bucket(bucket.as_str()).ping(&PingOptions::default()).await?;
            serde_json::to_value(report)?
        }
        Command::Buckets => serde_json::to_value(cluster.buckets().get_all_buckets(&request).await?)?,
        Command::Bucket { name } => {
            serde_json::to_value(cluster.buckets().get_bucket(name, &request).await?)?
        }
        Command::Users => {
            serde_json::to_value(cluster.users().get_all_users(&UserOptions::default()).await?)?
        }
        Command::Roles => serde_json::to_value(cluster.users().get_roles(&request).await?)?,
        Command::Groups => serde_json::to_value(cluster.users().get_all_groups(&request).await?)?,
        Command::Indexes { bucket } => {
            serde_json::to_value(cluster.query_indexes().get_all_indexes(bucket, &request).await?)?
        }
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Cli {
        #[arg(long, default_value = "config.json")]
        config: String,
        #[command(subcommand)]
        command: Command,
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["couchkit-admin", "ping", "travel"]).unwrap();
        assert_eq!(cli.config, "config.json");
        assert_eq!(
            cli.command,
            Command::Ping {
                bucket: "travel".to_string()
            }
        );

        let cli =
            Cli::try_parse_from(["couchkit-admin", "--config", "prod.json", "groups"]).unwrap();
        assert_eq!(cli.config, "prod.json");
        assert_eq!(cli.command, Command::Groups);

        assert!(Cli::try_parse_from(["couchkit-admin", "indexes"]).is_err());
        assert!(Cli::try_parse_from(["couchkit-admin", "compact"]).is_err());
    }
}
