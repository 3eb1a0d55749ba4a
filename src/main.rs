//! Main entry point for a replica node.
//!
//! Starts the peer listener, dials the configured peers after a short delay
//! and then hands the terminal to the command shell. With `--http` the node
//! also serves the control API.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rga_replica::config::Cli;
use rga_replica::{ReplicationNode, server, shell};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config()?;
    let node = ReplicationNode::from_config(&config);

    node.listen(&config.listen_addr)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen_addr))?;

    if let Some(http) = &config.http_addr {
        server::serve(node.clone(), http)
            .await
            .with_context(|| format!("failed to serve HTTP API on {http}"))?;
    }

    {
        let node = node.clone();
        let peers = config.peers.clone();
        let delay = config.connect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let connected = node.connect_peers(&peers).await;
            info!(
                "[Node {}] Connected to {}/{} peers",
                node.node_id(),
                connected,
                peers.len()
            );
        });
    }

    if config.shell {
        shell::run(node.clone()).await?;
    } else {
        info!("[Node {}] Running without shell, press Ctrl-C to stop", node.node_id());
        tokio::signal::ctrl_c().await?;
    }

    node.shutdown();
    Ok(())
}
