//! Launch the nodes and wire the fixed connection graph.

use crate::Error;
use mncompat_node::{Launcher, Node, ProtocolVersion};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Nodes, their protocol versions, and the connections between them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of nodes.
    pub nodes: usize,

    /// Nodes overridden to speak the old protocol.
    pub legacy: Vec<usize>,

    /// Undirected connections (each opened once, from the first node to the second).
    pub edges: Vec<(usize, usize)>,

    /// Protocol version of legacy nodes (also the minimum version every node accepts).
    pub old_protocol: u32,

    /// Protocol version of every other node.
    pub new_protocol: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nodes: 5,
            legacy: vec![1],
            edges: vec![(0, 2), (1, 2), (2, 3), (2, 4), (3, 4)],
            old_protocol: ProtocolVersion::OLD,
            new_protocol: ProtocolVersion::NEW,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.nodes == 0 {
            return Err(Error::InvalidConfig("no nodes".to_string()));
        }
        for version in [self.old_protocol, self.new_protocol] {
            ProtocolVersion::try_from(version)
                .map_err(|_| Error::InvalidConfig(format!("unknown protocol {version}")))?;
        }
        if self.old_protocol >= self.new_protocol {
            return Err(Error::InvalidConfig(format!(
                "old protocol {} not below new protocol {}",
                self.old_protocol, self.new_protocol
            )));
        }
        if let Some(index) = self.legacy.iter().find(|index| **index >= self.nodes) {
            return Err(Error::InvalidConfig(format!("legacy node {index} out of range")));
        }
        for &(a, b) in &self.edges {
            if a >= self.nodes || b >= self.nodes {
                return Err(Error::InvalidConfig(format!("edge {a}-{b} out of range")));
            }
            if a == b {
                return Err(Error::InvalidConfig(format!("edge {a}-{b} is a self-loop")));
            }
        }
        Ok(())
    }

    /// Whether the node at `index` speaks the old protocol.
    pub fn is_legacy(&self, index: usize) -> bool {
        self.legacy.contains(&index)
    }

    /// Command-line arguments of the node at `index`.
    pub fn args(&self, index: usize) -> Vec<String> {
        let mut args = vec![
            "-debug".to_string(),
            "-nolistenonion".to_string(),
            format!("-activeversion={}", self.old_protocol),
        ];
        if self.is_legacy(index) {
            args.push(format!("-protocolversion={}", self.old_protocol));
        }
        args
    }

    /// Protocol version the node at `index` must report.
    pub fn expected_protocol(&self, index: usize) -> u32 {
        if self.is_legacy(index) {
            self.old_protocol
        } else {
            self.new_protocol
        }
    }
}

/// Launch every node with its arguments.
pub async fn launch<L: Launcher>(launcher: &mut L, cfg: &Config) -> Result<Vec<L::Node>, Error> {
    let mut nodes = Vec::with_capacity(cfg.nodes);
    for index in 0..cfg.nodes {
        let args = cfg.args(index);
        debug!(node = index, ?args, "launching");
        nodes.push(launcher.launch(index, &args).await?);
    }
    info!(nodes = nodes.len(), "launched nodes");
    Ok(nodes)
}

/// Open a session for every edge.
pub async fn connect<N: Node>(nodes: &[N], edges: &[(usize, usize)]) -> Result<(), Error> {
    for &(a, b) in edges {
        nodes[a].connect(b).await?;
        debug!(a, b, "connected");
    }
    Ok(())
}

/// Check that every node reports the protocol version it was launched with.
pub async fn verify_protocols<N: Node>(nodes: &[N], cfg: &Config) -> Result<(), Error> {
    for node in nodes {
        let actual = node.get_network_info().await?.protocol_version;
        let expected = cfg.expected_protocol(node.index());
        if actual != expected {
            return Err(Error::ProtocolMismatch {
                node: node.index(),
                expected: ProtocolVersion::try_from(expected)?,
                actual,
            });
        }
    }
    Ok(())
}
