//! Mine the blocks funding (and confirming) masternode collateral.
//!
//! Funding happens in two phases. The genesis-time phase rewinds the mock clock to the genesis
//! block and mines enough blocks there for the funding nodes' rewards to mature. The maturity
//! phase locks the collateral, mines the confirmations (still in the past), and then returns to the
//! running time so that masternodes signed "now" postdate every confirmation.

use crate::{
    clock::MockClock,
    lifecycle::{Setup, Stage, Tracker},
    poll::Policy,
    sync::{self, Tip},
    Error,
};
use commonware_runtime::Clock;
use mncompat_node::{CollateralReceipt, Node};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Which nodes mine and how much.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Nodes that each mine one block to fund a masternode (in order).
    pub funding_nodes: Vec<usize>,

    /// Node mining every other block.
    pub miner: usize,

    /// Blocks mined by the miner after the funding blocks.
    pub funding_blocks: u64,

    /// Blocks mined on top of the collateral (including the one containing it).
    pub confirmations: u64,

    /// Balance each funding node must hold after the genesis-time phase.
    pub expected_balance: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            funding_nodes: vec![0, 1],
            miner: 2,
            funding_blocks: 25,
            confirmations: 15,
            expected_balance: 1_250,
        }
    }
}

/// Outcome of the genesis-time phase.
#[derive(Clone, Debug)]
pub struct Genesis {
    /// Mock time before the clock was rewound.
    pub resume_at: u64,

    /// Timestamp of the genesis block.
    pub time: u64,

    pub tip: Tip,
}

/// Outcome of the maturity phase.
#[derive(Clone, Debug)]
pub struct Maturity {
    pub receipts: Vec<CollateralReceipt>,

    /// Tip once every confirmation was mined (still in the past).
    pub confirmed: Tip,

    /// Tip after the first block mined at the running time.
    pub tip: Tip,
}

/// Rewind to the genesis timestamp and mine the funding blocks.
pub async fn genesis_phase<E: Clock, N: Node>(
    context: &E,
    nodes: &[N],
    clock: &MockClock,
    cfg: &Config,
    policy: &Policy,
) -> Result<Genesis, Error> {
    let resume_at = clock.now();
    let hash = nodes[0].get_block_hash(0).await?;
    let genesis = nodes[0].get_block_header(&hash).await?;
    if genesis.time >= resume_at {
        return Err(Error::InvalidConfig(format!(
            "genesis time {} not before mock time {resume_at}",
            genesis.time
        )));
    }
    clock.set_time(nodes, genesis.time).await?;

    // Each funding node mines one block, then the miner buries them
    for &index in &cfg.funding_nodes {
        nodes[index].generate(1).await?;
        sync::blocks(context, nodes, policy).await?;
    }
    nodes[cfg.miner].generate(cfg.funding_blocks).await?;
    let tip = sync::blocks(context, nodes, policy).await?;

    for &index in &cfg.funding_nodes {
        let actual = nodes[index].get_balance().await?;
        if actual != cfg.expected_balance {
            return Err(Error::BalancePrecondition {
                node: index,
                expected: cfg.expected_balance,
                actual,
            });
        }
    }
    info!(height = tip.height, time = genesis.time, "funded nodes at genesis time");
    Ok(Genesis {
        resume_at,
        time: genesis.time,
        tip,
    })
}

/// Lock collateral for every setup, confirm it in the past, and return to the running time.
#[allow(clippy::too_many_arguments)]
pub async fn maturity_phase<E: Clock, N: Node>(
    context: &E,
    nodes: &[N],
    clock: &MockClock,
    cfg: &Config,
    setups: &[Setup],
    tracker: &mut Tracker,
    genesis: &Genesis,
    policy: &Policy,
) -> Result<Maturity, Error> {
    let mut receipts = Vec::with_capacity(setups.len());
    for setup in setups {
        let receipt = nodes[setup.owner]
            .setup_masternode(&setup.label, setup.tier)
            .await?;
        info!(label = %setup.label, node = setup.owner, txhash = %receipt.txhash, "locked collateral");
        receipts.push(receipt);
    }

    // The miner must know every collateral transaction before mining
    sync::mempools(context, nodes, policy).await?;
    nodes[cfg.miner].generate(cfg.confirmations).await?;
    let confirmed = sync::blocks(context, nodes, policy).await?;

    clock.set_time(nodes, genesis.resume_at).await?;
    nodes[cfg.miner].generate(1).await?;
    let tip = sync::blocks(context, nodes, policy).await?;
    info!(height = tip.height, time = genesis.resume_at, "confirmed collateral");

    tracker.advance_all(setups, Stage::CollateralConfirmed)?;
    Ok(Maturity {
        receipts,
        confirmed,
        tip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fixtures, scenario};
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};
    use test_case::test_case;

    #[test_case(0; "seed 0")]
    #[test_case(1; "seed 1")]
    #[test_case(42; "seed 42")]
    #[test_case(1337; "seed 1337")]
    fn test_genesis_phase_balances(seed: u64) {
        let executor = deterministic::Runner::seeded(seed);
        executor.start(|context| async move {
            let cfg = scenario::Config::default();
            let (nodes, clock) = fixtures::connected(&context, &cfg).await;
            let genesis = genesis_phase(&context, &nodes, &clock, &cfg.funding, &cfg.sync)
                .await
                .unwrap();
            assert_eq!(genesis.resume_at, cfg.initial_time);
            assert_eq!(clock.now(), genesis.time);
            assert_eq!(genesis.tip.height, 27);
            for index in [0, 1] {
                assert_eq!(nodes[index].get_balance().await.unwrap(), 1_250);
            }

            // Every node agrees on the tip
            for node in &nodes {
                let hash = node.get_best_block_hash().await.unwrap();
                assert_eq!(hash, genesis.tip.hash);
            }
        });
    }

    #[test_traced]
    fn test_maturity_phase() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let cfg = scenario::Config::default();
            let (nodes, clock) = fixtures::connected(&context, &cfg).await;
            let mut tracker = Tracker::new(&cfg.setups);
            let genesis = genesis_phase(&context, &nodes, &clock, &cfg.funding, &cfg.sync)
                .await
                .unwrap();
            let maturity = maturity_phase(
                &context,
                &nodes,
                &clock,
                &cfg.funding,
                &cfg.setups,
                &mut tracker,
                &genesis,
                &cfg.sync,
            )
            .await
            .unwrap();
            assert_eq!(maturity.receipts.len(), 2);
            assert_eq!(clock.now(), cfg.initial_time);
            assert_eq!(maturity.confirmed.height, 27 + 15);
            assert_eq!(maturity.tip.height, 27 + 15 + 1);

            // Every node holds the confirmations and agrees on the final tip
            for node in &nodes {
                let hash = node
                    .get_block_hash(maturity.confirmed.height)
                    .await
                    .unwrap();
                assert_eq!(hash, maturity.confirmed.hash);
                assert_eq!(node.get_best_block_hash().await.unwrap(), maturity.tip.hash);
                assert!(node.get_raw_mempool().await.unwrap().is_empty());
            }

            // Confirmations are in the past and the last block is at the running time
            let header = nodes[3]
                .get_block_header(&maturity.confirmed.hash)
                .await
                .unwrap();
            assert_eq!(header.time, genesis.time);
            let header = nodes[3].get_block_header(&maturity.tip.hash).await.unwrap();
            assert_eq!(header.time, cfg.initial_time);
            for setup in &cfg.setups {
                assert_eq!(
                    tracker.stage(&setup.label),
                    Some(Stage::CollateralConfirmed)
                );
            }
        });
    }

    #[test_traced]
    fn test_balance_precondition() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            // Too few blocks for the funding rewards to mature
            let mut cfg = scenario::Config::default();
            cfg.funding.funding_blocks = 10;
            let (nodes, clock) = fixtures::connected(&context, &cfg).await;
            let result = genesis_phase(&context, &nodes, &clock, &cfg.funding, &cfg.sync).await;
            assert!(matches!(
                result,
                Err(Error::BalancePrecondition {
                    node: 0,
                    expected: 1_250,
                    actual: 0,
                })
            ));
        });
    }
}
