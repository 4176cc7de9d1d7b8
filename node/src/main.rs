// Copyright (c) 2026 Strata Contributors. MIT License.
// See LICENSE for details.

//! # Strata Node
//!
//! Entry point for the `strata-node` binary. Parses CLI arguments,
//! initializes logging and metrics, runs the node, and serves the HTTP API
//! when an API address is configured.
//!
//! - `run`    — start the node
//! - `keygen` — print a fresh producer keypair

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use strata_protocol::crypto::Keypair;
use strata_protocol::network::Node;

use cli::{Commands, StrataNodeCli};
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = StrataNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Keygen => {
            keygen();
            Ok(())
        }
    }
}

/// Starts the node, and the API server if `--api` is set, then waits for a
/// shutdown signal.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, args.log_format());

    let config = args.to_node_config()?;
    let api_addr = config.api_addr;

    let node = Node::bind(config)
        .await
        .context("failed to start node")?;
    let handle = node.handle();
    tracing::info!(
        id = handle.id(),
        listen = %handle.local_addr(),
        api = ?api_addr,
        "starting strata-node"
    );

    let node_task = tokio::spawn(node.run());

    let api_task = match api_addr {
        Some(addr) => {
            let state = api::AppState {
                version: format!(
                    "{} (protocol {})",
                    env!("CARGO_PKG_VERSION"),
                    strata_protocol::config::PROTOCOL_VERSION,
                ),
                node: handle.clone(),
                metrics: Arc::new(NodeMetrics::new().context("failed to register metrics")?),
            };
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind API listener on {addr}"))?;
            tracing::info!(%addr, "API server listening");

            let router = api::create_router(state);
            let shutdown_handle = handle.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move { shutdown_handle.stopped().await })
                    .await
            }))
        }
        None => None,
    };

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    handle.shutdown();

    match node_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "node exited with error"),
        Err(e) => tracing::error!(error = %e, "node task panicked"),
    }
    if let Some(task) = api_task {
        if let Ok(Err(e)) = task.await {
            tracing::error!(error = %e, "API server error");
        }
    }

    tracing::info!("strata-node stopped");
    Ok(())
}

fn keygen() {
    let keypair = Keypair::generate();
    let public_key = keypair.public_key();
    println!("secret key : {}", keypair.to_hex());
    println!("public key : {}", public_key.to_hex());
    println!("address    : {}", public_key.address().to_hex());
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
