//! Run masternode-capable nodes in-process with configurable link latency.
//!
//! Each node launched on a [Network] keeps its own chain, mempool, wallet, and masternode list.
//! Nodes exchange tips, collateral transactions, and masternode broadcasts only over sessions opened
//! with [crate::Node::connect]. Messages are delivered by tasks spawned on the runtime after the
//! [Link] latency, so a caller must wait (in runtime time) for state to propagate.
//!
//! Validation depends on each node's local time (its mock time if set, otherwise an unmocked wall
//! clock): blocks and broadcasts too far in the future of the receiver are rejected, and blocks
//! stored by a daemon are re-checked when it starts.
//!
//! # Example
//!
//! ```rust
//! use commonware_runtime::{deterministic, Clock, Metrics, Runner};
//! use mncompat_node::{simulated::{Config, Network}, Launcher, Node};
//! use std::time::Duration;
//!
//! let executor = deterministic::Runner::default();
//! executor.start(|context| async move {
//!     let mut network = Network::new(context.with_label("network"), Config::default());
//!     let first = network.launch(0, &[]).await.unwrap();
//!     let second = network
//!         .launch(1, &["-protocolversion=70915".to_string()])
//!         .await
//!         .unwrap();
//!     first.connect(1).await.unwrap();
//!     first.generate(1).await.unwrap();
//!
//!     // Wait for the block to be relayed
//!     context.sleep(Duration::from_secs(1)).await;
//!     assert_eq!(second.get_block_count().await.unwrap(), 1);
//! });
//! ```

mod args;
mod chain;
mod masternode;
mod metrics;
mod network;
mod node;

pub use args::Args;
pub use masternode::collateral;
pub use network::Network;
pub use node::Node;
use std::time::Duration;

/// Performance of every link between two connected nodes.
#[derive(Clone, Debug)]
pub struct Link {
    /// Base delivery delay.
    pub latency: Duration,

    /// Maximum additional delay (sampled uniformly per message).
    pub jitter: Duration,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(10),
            jitter: Duration::from_millis(1),
        }
    }
}

/// Configuration for a simulated [Network].
#[derive(Clone, Debug)]
pub struct Config {
    /// Timestamp of the genesis block shared by all nodes.
    pub genesis_time: u64,

    /// Unmocked time of a node when the runtime starts (advances with the runtime clock).
    pub wall_clock: u64,

    /// Amount credited to the miner of each block.
    pub block_reward: u64,

    /// Confirmations before a block reward can be spent.
    pub coinbase_maturity: u64,

    /// Confirmations required before collateral can back a masternode broadcast.
    pub collateral_confirmations: u64,

    /// Maximum number of seconds a block may be ahead of the receiver's local time.
    pub max_future_block: u64,

    /// Maximum number of seconds a broadcast signature may be ahead of the receiver's local time.
    pub max_future_broadcast: u64,

    /// Seconds after signing before a masternode reports itself active.
    pub activation_delay: u64,

    /// Seconds after signing before a masternode is listed as expired.
    pub expiration: u64,

    pub link: Link,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            genesis_time: 1_500_000_000,
            wall_clock: 1_700_000_000,
            block_reward: 1_250,
            coinbase_maturity: 20,
            collateral_confirmations: 15,
            max_future_block: 7_200,
            max_future_broadcast: 3_600,
            activation_delay: 5,
            expiration: 7_200,
            link: Link::default(),
        }
    }
}
