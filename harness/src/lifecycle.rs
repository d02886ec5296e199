//! Restart masternode daemons, announce the masternodes, and wait for them to activate.

use crate::{
    clock::MockClock,
    poll::{self, Policy, Tick},
    Error,
};
use commonware_runtime::Clock;
use mncompat_node::{MasternodeStatus, Node, Tier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// A masternode to fund and start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setup {
    pub label: String,

    /// Node holding the collateral and running the masternode.
    pub owner: usize,

    pub tier: Tier,
}

impl Setup {
    pub fn new(label: &str, owner: usize, tier: Tier) -> Self {
        Self {
            label: label.to_string(),
            owner,
            tier,
        }
    }
}

/// Progress of a single masternode through the scenario.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Unfunded,
    CollateralConfirmed,
    DaemonRestarted,
    BroadcastSent,
    LocallyActive,
    Enabled,
}

impl Stage {
    /// The only stage reachable from this one.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Unfunded => Some(Self::CollateralConfirmed),
            Self::CollateralConfirmed => Some(Self::DaemonRestarted),
            Self::DaemonRestarted => Some(Self::BroadcastSent),
            Self::BroadcastSent => Some(Self::LocallyActive),
            Self::LocallyActive => Some(Self::Enabled),
            Self::Enabled => None,
        }
    }
}

/// Stage of every masternode, advanced one step at a time.
#[derive(Clone, Debug)]
pub struct Tracker {
    stages: BTreeMap<String, Stage>,
}

impl Tracker {
    pub fn new(setups: &[Setup]) -> Self {
        let stages = setups
            .iter()
            .map(|setup| (setup.label.clone(), Stage::Unfunded))
            .collect();
        Self { stages }
    }

    pub fn stage(&self, label: &str) -> Option<Stage> {
        self.stages.get(label).copied()
    }

    pub fn stages(&self) -> &BTreeMap<String, Stage> {
        &self.stages
    }

    /// Move `label` to `to`, which must directly follow its current stage.
    pub fn advance(&mut self, label: &str, to: Stage) -> Result<(), Error> {
        let stage = self
            .stages
            .get_mut(label)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown masternode {label}")))?;
        if stage.next() != Some(to) {
            return Err(Error::InvalidTransition {
                label: label.to_string(),
                from: *stage,
                to,
            });
        }
        debug!(label, from = ?*stage, ?to, "advanced masternode");
        *stage = to;
        Ok(())
    }

    /// Advance every masternode in `setups` to `to`.
    pub fn advance_all(&mut self, setups: &[Setup], to: Stage) -> Result<(), Error> {
        for setup in setups {
            self.advance(&setup.label, to)?;
        }
        Ok(())
    }
}

fn owners(setups: &[Setup]) -> BTreeSet<usize> {
    setups.iter().map(|setup| setup.owner).collect()
}

/// Stop and start the daemon of every masternode owner (once per owner).
pub async fn restart<N: Node>(
    nodes: &[N],
    setups: &[Setup],
    tracker: &mut Tracker,
) -> Result<(), Error> {
    for owner in owners(setups) {
        nodes[owner].stop().await?;
        nodes[owner].start().await?;
        info!(node = owner, "restarted daemon");
    }
    tracker.advance_all(setups, Stage::DaemonRestarted)
}

/// Restore the mock time lost by restarted daemons and connect every owner to the relay peers.
pub async fn reconnect<N: Node>(
    nodes: &[N],
    clock: &MockClock,
    setups: &[Setup],
    relay_peers: &[usize],
) -> Result<(), Error> {
    clock.sync(nodes).await?;
    for owner in owners(setups) {
        for &peer in relay_peers.iter().filter(|peer| **peer != owner) {
            nodes[owner].connect(peer).await?;
        }
        debug!(node = owner, peers = ?relay_peers, "reconnected");
    }
    Ok(())
}

/// Announce every masternode from its owner.
pub async fn broadcast<N: Node>(
    nodes: &[N],
    setups: &[Setup],
    tracker: &mut Tracker,
) -> Result<(), Error> {
    for setup in setups {
        let result = nodes[setup.owner].start_masternode(&setup.label).await?;
        if !result.is_success() {
            return Err(Error::BroadcastRejected {
                label: setup.label.clone(),
                status: result.status,
                message: result.message,
            });
        }
        info!(label = %setup.label, node = setup.owner, "broadcast masternode");
        tracker.advance(&setup.label, Stage::BroadcastSent)?;
    }
    Ok(())
}

async fn all_active<N: Node>(nodes: &[N], setups: &[Setup]) -> Result<Option<()>, Error> {
    for setup in setups {
        let status = nodes[setup.owner]
            .get_masternode_status(&setup.label)
            .await?;
        if status != MasternodeStatus::LocalActive {
            debug!(label = %setup.label, %status, "masternode not active");
            return Ok(None);
        }
    }
    Ok(Some(()))
}

/// Wait (advancing the mock clock by one second between attempts) until every masternode reports
/// itself active on its owner.
pub async fn wait_active<E: Clock, N: Node>(
    context: &E,
    nodes: &[N],
    clock: &MockClock,
    setups: &[Setup],
    tracker: &mut Tracker,
    policy: &Policy,
) -> Result<(), Error> {
    let tick = Tick {
        clock,
        nodes,
        step: 1,
    };
    poll::until(context, policy, Some(tick), move || all_active(nodes, setups))
        .await?
        .ok_or_else(|| Error::ActivationTimeout("local activation".to_string()))?;
    info!(masternodes = setups.len(), time = clock.now(), "masternodes active");
    tracker.advance_all(setups, Stage::LocallyActive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fixtures, scenario::Config};
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};

    fn setups() -> Vec<Setup> {
        vec![
            Setup::new("mn1", 0, Tier::Copper),
            Setup::new("mn2", 1, Tier::Copper),
        ]
    }

    #[test]
    fn test_tracker_sequential() {
        let mut tracker = Tracker::new(&setups());
        assert_eq!(tracker.stage("mn1"), Some(Stage::Unfunded));
        tracker.advance("mn1", Stage::CollateralConfirmed).unwrap();
        tracker.advance("mn1", Stage::DaemonRestarted).unwrap();
        assert_eq!(tracker.stage("mn1"), Some(Stage::DaemonRestarted));
        assert_eq!(tracker.stage("mn2"), Some(Stage::Unfunded));
        assert_eq!(tracker.stage("mn3"), None);
    }

    #[test]
    fn test_tracker_rejects_skips() {
        let mut tracker = Tracker::new(&setups());
        let result = tracker.advance("mn1", Stage::BroadcastSent);
        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                from: Stage::Unfunded,
                to: Stage::BroadcastSent,
                ..
            })
        ));

        // Repeating a stage is not a transition
        tracker.advance("mn1", Stage::CollateralConfirmed).unwrap();
        assert!(tracker.advance("mn1", Stage::CollateralConfirmed).is_err());

        // Going back is not allowed either
        assert!(tracker.advance("mn1", Stage::Unfunded).is_err());
        assert!(matches!(
            tracker.advance("mn3", Stage::CollateralConfirmed),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(Stage::Enabled.next(), None);
    }

    #[test_traced]
    fn test_activation() {
        let executor = deterministic::Runner::seeded(5);
        executor.start(|context| async move {
            let cfg = Config::default();
            let (nodes, clock, mut tracker) = fixtures::funded(&context, &cfg).await;
            restart(&nodes, &cfg.setups, &mut tracker).await.unwrap();

            // Restarted daemons run on the unmocked clock until the time is pushed again
            let info = nodes[0].get_network_info().await.unwrap();
            assert_eq!(info.connections, 0);
            assert!(info.time > clock.now());

            reconnect(&nodes, &clock, &cfg.setups, &cfg.relay_peers)
                .await
                .unwrap();
            for index in [0, 1] {
                let info = nodes[index].get_network_info().await.unwrap();
                assert_eq!(info.connections, 3);
                assert_eq!(info.time, clock.now());
            }

            broadcast(&nodes, &cfg.setups, &mut tracker).await.unwrap();
            let start = clock.now();
            wait_active(
                &context,
                &nodes,
                &clock,
                &cfg.setups,
                &mut tracker,
                &cfg.activation,
            )
            .await
            .unwrap();
            assert!(clock.now() >= start + 5);
            for setup in &cfg.setups {
                assert_eq!(tracker.stage(&setup.label), Some(Stage::LocallyActive));
            }
        });
    }

    #[test_traced]
    fn test_withheld_broadcast_times_out() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let cfg = Config::default();
            let (nodes, clock, mut tracker) = fixtures::funded(&context, &cfg).await;
            restart(&nodes, &cfg.setups, &mut tracker).await.unwrap();
            reconnect(&nodes, &clock, &cfg.setups, &cfg.relay_peers)
                .await
                .unwrap();

            // Only announce the first masternode
            broadcast(&nodes, &cfg.setups[..1], &mut tracker)
                .await
                .unwrap();
            let result = wait_active(
                &context,
                &nodes,
                &clock,
                &cfg.setups,
                &mut tracker,
                &cfg.activation,
            )
            .await;
            assert!(matches!(result, Err(Error::ActivationTimeout(_))));
            assert_eq!(tracker.stage("mn1"), Some(Stage::BroadcastSent));
            assert_eq!(tracker.stage("mn2"), Some(Stage::DaemonRestarted));
        });
    }

    #[test_traced]
    fn test_broadcast_before_maturity_rejected() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let cfg = Config::default();
            let (nodes, _) = fixtures::connected(&context, &cfg).await;
            let mut tracker = Tracker::new(&cfg.setups);

            // Fund node 0 and lock collateral without confirming it
            nodes[0].generate(1).await.unwrap();
            crate::sync::blocks(&context, &nodes, &cfg.sync).await.unwrap();
            nodes[2].generate(20).await.unwrap();
            crate::sync::blocks(&context, &nodes, &cfg.sync).await.unwrap();
            nodes[0].setup_masternode("mn1", Tier::Copper).await.unwrap();

            let result = broadcast(&nodes, &cfg.setups[..1], &mut tracker).await;
            let Err(Error::BroadcastRejected { label, status, .. }) = result else {
                panic!("expected rejection");
            };
            assert_eq!(label, "mn1");
            assert_eq!(status, "failed");
        });
    }
}
