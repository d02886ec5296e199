//! Networks prepared up to a given step of the scenario.

use crate::{clock::MockClock, funding, lifecycle::Tracker, scenario::Config, topology};
use commonware_runtime::{deterministic, Metrics};
use mncompat_node::simulated::{self, Network};

pub type TestNode = simulated::Node<deterministic::Context>;

/// Launch every node without pinning or connecting them.
pub async fn launched(context: &deterministic::Context, cfg: &Config) -> Vec<TestNode> {
    let mut network = Network::new(context.with_label("network"), simulated::Config::default());
    topology::launch(&mut network, &cfg.topology).await.unwrap()
}

/// Launch every node, pin them to the initial time, and wire the topology.
pub async fn connected(
    context: &deterministic::Context,
    cfg: &Config,
) -> (Vec<TestNode>, MockClock) {
    let nodes = launched(context, cfg).await;
    let clock = MockClock::init(&nodes, cfg.initial_time).await.unwrap();
    topology::connect(&nodes, &cfg.topology.edges).await.unwrap();
    (nodes, clock)
}

/// Run both funding phases on a connected network.
pub async fn funded(
    context: &deterministic::Context,
    cfg: &Config,
) -> (Vec<TestNode>, MockClock, Tracker) {
    let (nodes, clock) = connected(context, cfg).await;
    let mut tracker = Tracker::new(&cfg.setups);
    let genesis = funding::genesis_phase(context, &nodes, &clock, &cfg.funding, &cfg.sync)
        .await
        .unwrap();
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
    .await
    .unwrap();
    (nodes, clock, tracker)
}
