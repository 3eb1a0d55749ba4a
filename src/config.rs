//! Node configuration: topology file plus command-line overrides.
//!
//! Without a config file the node uses the built-in three-node localhost
//! topology (`node1`..`node3` on ports 5001..5003).
//!
//! ```toml
//! connect_delay_ms = 2000
//! causal_gap = "buffer"
//!
//! [[nodes]]
//! id = "node1"
//! addr = "127.0.0.1:5001"
//! http = "127.0.0.1:8001"   # optional control API
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::crdt::{CausalGapPolicy, SiteId};
use crate::error::ConfigError;

/// Command-line interface of the node binary.
#[derive(Parser, Debug)]
#[command(name = "rga-replica")]
#[command(version)]
#[command(about = "Replicated plain-text document node", long_about = None)]
pub struct Cli {
    /// Id of this node in the topology (e.g. node1)
    pub node_id: String,

    /// Topology file; the built-in three-node topology is used when omitted
    #[arg(short, long, env = "RGA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serve the HTTP control API on this address
    #[arg(long)]
    pub http: Option<String>,

    /// Run without the interactive shell (stop with Ctrl-C)
    #[arg(long)]
    pub no_shell: bool,

    /// How to handle inserts whose origin has not arrived yet
    #[arg(long, value_enum)]
    pub causal_gap: Option<CausalGapPolicy>,

    /// Delay before dialing peers, in milliseconds
    #[arg(long)]
    pub connect_delay_ms: Option<u64>,
}

impl Cli {
    /// Loads the topology and applies command-line overrides.
    pub fn into_config(self) -> Result<NodeConfig, ConfigError> {
        let topology = match &self.config {
            Some(path) => Topology::load(path)?,
            None => Topology::default(),
        };

        let mut config = topology.resolve(&self.node_id)?;
        if let Some(http) = self.http {
            validate_addr(&http)?;
            config.http_addr = Some(http);
        }
        if let Some(policy) = self.causal_gap {
            config.causal_gap = policy;
        }
        if let Some(ms) = self.connect_delay_ms {
            config.connect_delay = Duration::from_millis(ms);
        }
        config.shell = !self.no_shell;
        Ok(config)
    }
}

/// One node of the topology file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: SiteId,
    pub addr: String,
    #[serde(default)]
    pub http: Option<String>,
}

/// The static peer topology shared by all nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
    #[serde(default)]
    pub causal_gap: CausalGapPolicy,
    pub nodes: Vec<NodeEntry>,
}

fn default_connect_delay_ms() -> u64 {
    2000
}

impl Default for Topology {
    fn default() -> Self {
        let nodes = (1..=3)
            .map(|i| NodeEntry {
                id: format!("node{i}"),
                addr: format!("localhost:{}", 5000 + i),
                http: None,
            })
            .collect();
        Topology {
            connect_delay_ms: default_connect_delay_ms(),
            causal_gap: CausalGapPolicy::default(),
            nodes,
        }
    }
}

impl Topology {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let topology: Topology = toml::from_str(s)?;
        for node in &topology.nodes {
            validate_addr(&node.addr)?;
            if let Some(http) = &node.http {
                validate_addr(http)?;
            }
        }
        Ok(topology)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Builds the configuration of `node_id`; every other node is a peer.
    pub fn resolve(&self, node_id: &str) -> Result<NodeConfig, ConfigError> {
        let me = self
            .nodes
            .iter()
            .find(|n| n.id == node_id)
            .ok_or_else(|| ConfigError::UnknownNode(node_id.to_string()))?;

        let peers = self
            .nodes
            .iter()
            .filter(|n| n.id != node_id)
            .map(|n| PeerConfig {
                id: n.id.clone(),
                addr: n.addr.clone(),
            })
            .collect();

        Ok(NodeConfig {
            node_id: me.id.clone(),
            listen_addr: me.addr.clone(),
            http_addr: me.http.clone(),
            peers,
            connect_delay: Duration::from_millis(self.connect_delay_ms),
            causal_gap: self.causal_gap,
            shell: true,
        })
    }
}

/// A peer to dial at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: SiteId,
    pub addr: String,
}

/// Fully resolved settings for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub node_id: SiteId,
    pub listen_addr: String,
    pub http_addr: Option<String>,
    pub peers: Vec<PeerConfig>,
    pub connect_delay: Duration,
    pub causal_gap: CausalGapPolicy,
    pub shell: bool,
}

/// Accepts `host:port` with a numeric port; hostnames are resolved later.
fn validate_addr(addr: &str) -> Result<(), ConfigError> {
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(ConfigError::InvalidAddress(addr.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology() {
        let config = Topology::default().resolve("node2").unwrap();
        assert_eq!(config.listen_addr, "localhost:5002");
        let peer_ids: Vec<&str> = config.peers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(peer_ids, vec!["node1", "node3"]);
        assert_eq!(config.connect_delay, Duration::from_secs(2));
        assert_eq!(config.causal_gap, CausalGapPolicy::Buffer);
    }

    #[test]
    fn test_unknown_node() {
        let err = Topology::default().resolve("node9").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownNode(id) if id == "node9"));
    }

    #[test]
    fn test_parse_toml() {
        let topology = Topology::from_toml_str(
            r#"
            causal_gap = "append-to-end"

            [[nodes]]
            id = "alpha"
            addr = "10.0.0.1:7000"
            http = "127.0.0.1:8080"

            [[nodes]]
            id = "beta"
            addr = "10.0.0.2:7000"
            "#,
        )
        .unwrap();

        assert_eq!(topology.connect_delay_ms, 2000);
        let config = topology.resolve("alpha").unwrap();
        assert_eq!(config.http_addr.as_deref(), Some("127.0.0.1:8080"));
        assert_eq!(config.causal_gap, CausalGapPolicy::AppendToEnd);
        assert_eq!(
            config.peers,
            vec![PeerConfig {
                id: "beta".into(),
                addr: "10.0.0.2:7000".into()
            }]
        );
    }

    #[test]
    fn test_rejects_bad_address() {
        let err = Topology::from_toml_str(
            r#"
            [[nodes]]
            id = "alpha"
            addr = "no-port-here"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress(_)));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "rga-replica",
            "node3",
            "--http",
            "127.0.0.1:9000",
            "--no-shell",
            "--causal-gap",
            "append-to-end",
            "--connect-delay-ms",
            "10",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.node_id, "node3");
        assert_eq!(config.http_addr.as_deref(), Some("127.0.0.1:9000"));
        assert!(!config.shell);
        assert_eq!(config.causal_gap, CausalGapPolicy::AppendToEnd);
        assert_eq!(config.connect_delay, Duration::from_millis(10));
    }
}
