//! Run the full compatibility scenario.

use crate::{
    clock::MockClock,
    funding,
    lifecycle::{self, Setup, Stage, Tracker},
    poll::Policy,
    sync::{self, Tip},
    topology,
    verify::{self, Expectation},
    Error,
};
use commonware_runtime::Clock;
use mncompat_node::{Launcher, MasternodeListEntry, MasternodeStatus, Tier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Parameters of the scenario.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mock time all nodes are pinned to (must be earlier than every node's local time).
    pub initial_time: u64,

    pub topology: topology::Config,
    pub funding: funding::Config,

    /// Masternodes to fund and start.
    pub setups: Vec<Setup>,

    /// Nodes every masternode owner connects to after restarting.
    pub relay_peers: Vec<usize>,

    /// Nodes whose masternode lists are compared.
    pub observers: Vec<usize>,

    /// Number of masternodes every observer must list.
    pub expected_masternodes: usize,

    /// Tier every listed masternode must have.
    pub expected_tier: Tier,

    /// Chain and mempool barriers.
    pub sync: Policy,

    /// Activation and masternode list waits.
    pub activation: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_time: 1_580_000_000,
            topology: topology::Config::default(),
            funding: funding::Config::default(),
            setups: vec![
                Setup::new("mn1", 0, Tier::Copper),
                Setup::new("mn2", 1, Tier::Copper),
            ],
            relay_peers: vec![2, 3, 4],
            observers: vec![0, 1],
            expected_masternodes: 2,
            expected_tier: Tier::Copper,
            sync: Policy::new(100, 60_000),
            activation: Policy::new(250, 60_000),
        }
    }
}

impl Config {
    /// Parse a configuration from JSON (missing fields take their default value).
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|err| Error::InvalidConfig(err.to_string()))
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.topology.validate()?;
        let nodes = self.topology.nodes;
        let check = |role: &str, index: usize| {
            if index >= nodes {
                return Err(Error::InvalidConfig(format!("{role} {index} out of range")));
            }
            Ok(())
        };
        check("miner", self.funding.miner)?;
        let mut funded = BTreeSet::new();
        for &index in &self.funding.funding_nodes {
            check("funding node", index)?;
            if !funded.insert(index) {
                return Err(Error::InvalidConfig(format!(
                    "funding node {index} listed twice"
                )));
            }
        }
        if funded.contains(&self.funding.miner) {
            return Err(Error::InvalidConfig(format!(
                "miner {} is also a funding node",
                self.funding.miner
            )));
        }
        for &index in &self.relay_peers {
            check("relay peer", index)?;
        }
        for &index in &self.observers {
            check("observer", index)?;
        }
        if self.observers.is_empty() {
            return Err(Error::InvalidConfig("no observers".to_string()));
        }

        if self.setups.is_empty() {
            return Err(Error::InvalidConfig("no masternodes".to_string()));
        }
        let mut labels = BTreeSet::new();
        for setup in &self.setups {
            check("masternode owner", setup.owner)?;
            if !labels.insert(setup.label.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate masternode {}",
                    setup.label
                )));
            }
            if !self.funding.funding_nodes.contains(&setup.owner) {
                return Err(Error::InvalidConfig(format!(
                    "owner {} of {} is not funded",
                    setup.owner, setup.label
                )));
            }
        }

        // Masternodes must be announced from both sides of the upgrade
        let legacy = self
            .setups
            .iter()
            .filter(|setup| self.topology.is_legacy(setup.owner))
            .count();
        if legacy == 0 || legacy == self.setups.len() {
            return Err(Error::InvalidConfig(
                "masternode owners must run both protocol versions".to_string(),
            ));
        }
        if self.expected_masternodes != self.setups.len() {
            return Err(Error::InvalidConfig(format!(
                "expecting {} masternodes but {} are set up",
                self.expected_masternodes,
                self.setups.len()
            )));
        }
        Ok(())
    }

    fn expectation(&self) -> Expectation {
        Expectation {
            count: self.expected_masternodes,
            tier: self.expected_tier,
            status: MasternodeStatus::Enabled,
        }
    }
}

/// Outcome of a passing run.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    /// Tip every node agrees on at the end of the run.
    pub tip: Tip,

    /// Mock time at the end of the run.
    pub time: u64,

    /// Masternode list reported by every observer (sorted by txhash).
    pub masternodes: Vec<MasternodeListEntry>,

    pub stages: BTreeMap<String, Stage>,
}

/// Launch the network with `launcher` and run every step of the scenario.
pub async fn run<E: Clock, L: Launcher>(
    context: &E,
    launcher: &mut L,
    cfg: &Config,
) -> Result<Report, Error> {
    cfg.validate()?;

    // Build the network
    let nodes = topology::launch(launcher, &cfg.topology).await?;
    let clock = MockClock::init(&nodes, cfg.initial_time).await?;
    topology::connect(&nodes, &cfg.topology.edges).await?;
    topology::verify_protocols(&nodes, &cfg.topology).await?;
    info!(nodes = nodes.len(), time = clock.now(), "network ready");

    // Fund and confirm collateral
    let mut tracker = Tracker::new(&cfg.setups);
    let genesis =
        funding::genesis_phase(context, &nodes, &clock, &cfg.funding, &cfg.sync).await?;
    funding::maturity_phase(
        context,
        &nodes,
        &clock,
        &cfg.funding,
        &cfg.setups,
        &mut tracker,
        &genesis,
        &cfg.sync,
    )
    .await?;

    // Start masternodes
    lifecycle::restart(&nodes, &cfg.setups, &mut tracker).await?;
    lifecycle::reconnect(&nodes, &clock, &cfg.setups, &cfg.relay_peers).await?;
    lifecycle::broadcast(&nodes, &cfg.setups, &mut tracker).await?;
    lifecycle::wait_active(
        context,
        &nodes,
        &clock,
        &cfg.setups,
        &mut tracker,
        &cfg.activation,
    )
    .await?;

    // Compare views
    let masternodes = verify::run(
        context,
        &nodes,
        &clock,
        &cfg.observers,
        &cfg.expectation(),
        &cfg.setups,
        &mut tracker,
        &cfg.activation,
    )
    .await?;
    let tip = sync::blocks(context, &nodes, &cfg.sync).await?;
    info!(height = tip.height, masternodes = masternodes.len(), "scenario passed");
    Ok(Report {
        tip,
        time: clock.now(),
        masternodes,
        stages: tracker.stages().clone(),
    })
}
