//! Drive masternode-capable nodes through an RPC-style interface.
//!
//! A [Node] is a handle to one network participant. Every call is a single request/response
//! exchange with the underlying process and may fail if that process is down ([Error::NodeUnavailable])
//! or if it refuses the request ([Error::RpcRejected]). Handles are created by a [Launcher], which
//! receives the same argument list a daemon would receive on its command line.
//!
//! The [simulated] module provides an in-process [Launcher] whose nodes exchange blocks, transactions,
//! and masternode broadcasts over links with configurable latency. It runs on any `commonware-runtime`
//! context, so a deterministic runtime yields reproducible runs.
//!
//! # Status
//!
//! `mncompat-node` is **ALPHA** software. Developers should expect breaking changes.

use std::future::Future;
use thiserror::Error;

pub mod simulated;
mod types;
pub use types::{
    BlockHeader, BroadcastResult, CollateralReceipt, MasternodeListEntry, MasternodeStatus,
    NetworkInfo, ProtocolVersion, Tier,
};

/// Errors that can occur when interacting with a node.
#[derive(Error, Debug)]
pub enum Error {
    #[error("node {0} unavailable")]
    NodeUnavailable(usize),
    #[error("rpc rejected: {0}")]
    RpcRejected(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown protocol version: {0}")]
    UnknownProtocolVersion(u32),
    #[error("unknown tier: {0}")]
    UnknownTier(String),
    #[error("codec error: {0}")]
    Codec(#[from] commonware_codec::Error),
}

/// Interface exposed by a single node.
///
/// Calls against one node are expected to be serialized by the caller. Calls against
/// different nodes may be issued concurrently.
pub trait Node: Clone + Send + Sync + 'static {
    /// Position of the node in the network (stable for the node's lifetime).
    fn index(&self) -> usize;

    /// Start the node's daemon (using the arguments it was launched with).
    fn start(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Stop the node's daemon, dropping all of its sessions.
    fn stop(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Open a session with the node at the given index.
    fn connect(&self, peer: usize) -> impl Future<Output = Result<(), Error>> + Send;

    /// Override the node's clock (seconds since the epoch).
    fn set_mock_time(&self, time: u64) -> impl Future<Output = Result<(), Error>> + Send;

    /// Report the negotiated protocol version, connection count, and local time.
    fn get_network_info(&self) -> impl Future<Output = Result<NetworkInfo, Error>> + Send;

    /// Height of the best chain.
    fn get_block_count(&self) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Hash of the best chain's tip.
    fn get_best_block_hash(&self) -> impl Future<Output = Result<String, Error>> + Send;

    /// Hash of the block at the given height of the best chain.
    fn get_block_hash(&self, height: u64) -> impl Future<Output = Result<String, Error>> + Send;

    /// Header of the block with the given hash.
    fn get_block_header(
        &self,
        hash: &str,
    ) -> impl Future<Output = Result<BlockHeader, Error>> + Send;

    /// Mine `blocks` blocks at the node's current time, returning their hashes.
    fn generate(&self, blocks: u64) -> impl Future<Output = Result<Vec<String>, Error>> + Send;

    /// Spendable wallet balance.
    fn get_balance(&self) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Identifiers of all transactions waiting to be mined.
    fn get_raw_mempool(&self) -> impl Future<Output = Result<Vec<String>, Error>> + Send;

    /// Lock collateral for a masternode with the given label.
    fn setup_masternode(
        &self,
        label: &str,
        tier: Tier,
    ) -> impl Future<Output = Result<CollateralReceipt, Error>> + Send;

    /// Sign and relay the broadcast announcing the masternode with the given label.
    fn start_masternode(
        &self,
        label: &str,
    ) -> impl Future<Output = Result<BroadcastResult, Error>> + Send;

    /// Status of a masternode controlled by this node.
    fn get_masternode_status(
        &self,
        label: &str,
    ) -> impl Future<Output = Result<MasternodeStatus, Error>> + Send;

    /// All masternodes known to this node.
    fn list_masternodes(
        &self,
    ) -> impl Future<Output = Result<Vec<MasternodeListEntry>, Error>> + Send;
}

/// Interface to create (and start) nodes.
pub trait Launcher {
    /// Handle returned for each launched node.
    type Node: Node;

    /// Launch the node at the given index with the given command-line arguments.
    fn launch(
        &mut self,
        index: usize,
        args: &[String],
    ) -> impl Future<Output = Result<Self::Node, Error>> + Send;
}
