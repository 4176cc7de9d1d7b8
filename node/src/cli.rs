//! # CLI Interface
//!
//! Defines the command-line argument structure for `strata-node` using
//! `clap` derive. Two subcommands: `run` and `keygen`. Every `run` flag
//! falls back to a `STRATA_*` environment variable.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use strata_protocol::config::{DEFAULT_BLOCK_TIME, DEFAULT_POOL_CAPACITY};
use strata_protocol::crypto::Keypair;
use strata_protocol::network::NodeConfig;

use crate::logging::LogFormat;

/// Strata block chain node.
///
/// Replicates the chain over TCP, produces blocks when given a producer
/// key, and optionally serves a JSON query API with Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "strata-node",
    about = "Strata block chain node",
    version,
    propagate_version = true
)]
pub struct StrataNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Generate a producer keypair and print it as hex.
    Keygen,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Address the peer-to-peer listener binds to.
    #[arg(long, env = "STRATA_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Address of the HTTP query API. Disabled when omitted.
    #[arg(long, env = "STRATA_API_ADDR")]
    pub api: Option<SocketAddr>,

    /// Node identifier reported to peers. Defaults to a random UUID.
    #[arg(long, env = "STRATA_NODE_ID")]
    pub id: Option<String>,

    /// Hex-encoded Ed25519 secret key. Makes this node a block producer.
    #[arg(long, env = "STRATA_VALIDATOR_KEY", hide_env_values = true)]
    pub validator_key: Option<String>,

    /// Interval between produced blocks, in milliseconds.
    #[arg(long, env = "STRATA_BLOCK_TIME_MS", default_value_t = DEFAULT_BLOCK_TIME.as_millis() as u64)]
    pub block_time_ms: u64,

    /// Peer to dial at startup. Repeat for several peers.
    #[arg(long = "seed", env = "STRATA_SEED_NODES", value_delimiter = ',')]
    pub seeds: Vec<SocketAddr>,

    /// Maximum number of pending transactions.
    #[arg(long, env = "STRATA_POOL_CAPACITY", default_value_t = DEFAULT_POOL_CAPACITY)]
    pub pool_capacity: usize,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "STRATA_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, env = "STRATA_LOG_LEVEL", default_value = "strata_node=info,strata_protocol=info")]
    pub log_level: String,
}

impl RunArgs {
    pub fn log_format(&self) -> LogFormat {
        LogFormat::from_str_lossy(&self.log_format)
    }

    /// Map the flags onto a [`NodeConfig`]. The result is validated by the
    /// node when it binds.
    pub fn to_node_config(&self) -> Result<NodeConfig> {
        let mut config = NodeConfig::new(self.listen);
        config.api_addr = self.api;
        if let Some(id) = &self.id {
            config.id = id.clone();
        }
        config.private_key = self
            .validator_key
            .as_deref()
            .map(Keypair::from_hex)
            .transpose()
            .context("invalid --validator-key")?;
        config.block_time = Duration::from_millis(self.block_time_ms);
        config.seed_nodes = self.seeds.clone();
        config.pool_capacity = self.pool_capacity;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> RunArgs {
        let cli = StrataNodeCli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn verify_cli_structure() {
        StrataNodeCli::command().debug_assert();
    }

    #[test]
    fn run_defaults_map_to_follower_config() {
        let args = parse(&["strata-node", "run", "--listen", "127.0.0.1:4000"]);
        let config = args.to_node_config().unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:4000".parse().unwrap());
        assert!(config.api_addr.is_none());
        assert!(!config.is_producer());
        assert_eq!(config.block_time, DEFAULT_BLOCK_TIME);
        assert_eq!(config.pool_capacity, DEFAULT_POOL_CAPACITY);
        assert!(!config.id.is_empty());
        assert_eq!(args.log_format(), LogFormat::Pretty);
    }

    #[test]
    fn run_flags_map_to_producer_config() {
        let key = Keypair::generate();
        let key_hex = key.to_hex();
        let args = parse(&[
            "strata-node",
            "run",
            "--listen",
            "127.0.0.1:4000",
            "--api",
            "127.0.0.1:8080",
            "--id",
            "alpha",
            "--validator-key",
            &key_hex,
            "--block-time-ms",
            "250",
            "--seed",
            "127.0.0.1:4001",
            "--seed",
            "127.0.0.1:4002",
            "--log-format",
            "json",
        ]);
        let config = args.to_node_config().unwrap();

        assert_eq!(config.id, "alpha");
        assert_eq!(config.api_addr, Some("127.0.0.1:8080".parse().unwrap()));
        assert_eq!(
            config.private_key.unwrap().public_key(),
            key.public_key()
        );
        assert_eq!(config.block_time, Duration::from_millis(250));
        assert_eq!(config.seed_nodes.len(), 2);
        assert_eq!(args.log_format(), LogFormat::Json);
    }

    #[test]
    fn bad_validator_key_is_rejected() {
        let args = parse(&["strata-node", "run", "--validator-key", "zz"]);
        assert!(args.to_node_config().is_err());
    }

    #[test]
    fn keygen_takes_no_arguments() {
        let cli = StrataNodeCli::try_parse_from(["strata-node", "keygen"]).unwrap();
        assert!(matches!(cli.command, Commands::Keygen));
    }
}
