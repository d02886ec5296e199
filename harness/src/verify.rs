//! Require every observer to report the same masternode list.

use crate::{
    clock::MockClock,
    lifecycle::{Setup, Stage, Tracker},
    poll::{self, Policy, Tick},
    Error,
};
use commonware_runtime::Clock;
use mncompat_node::{MasternodeListEntry, MasternodeStatus, Node, Tier};
use tracing::{debug, info};

/// What every observer must report.
#[derive(Clone, Debug)]
pub struct Expectation {
    pub count: usize,
    pub tier: Tier,
    pub status: MasternodeStatus,
}

async fn listed<N: Node>(
    node: &N,
    count: usize,
) -> Result<Option<Vec<MasternodeListEntry>>, Error> {
    let list = node.list_masternodes().await?;
    debug!(node = node.index(), entries = list.len(), count, "polled masternode list");
    Ok((list.len() >= count).then_some(list))
}

/// Wait (advancing the mock clock by one second between attempts) until each observer lists at
/// least `count` masternodes, returning the list of each observer.
pub async fn wait_lists<E: Clock, N: Node>(
    context: &E,
    nodes: &[N],
    clock: &MockClock,
    observers: &[usize],
    count: usize,
    policy: &Policy,
) -> Result<Vec<(usize, Vec<MasternodeListEntry>)>, Error> {
    let mut views = Vec::with_capacity(observers.len());
    for &observer in observers {
        let node = &nodes[observer];
        let tick = Tick {
            clock,
            nodes,
            step: 1,
        };
        let list = poll::until(context, policy, Some(tick), move || listed(node, count))
            .await?
            .ok_or_else(|| {
                Error::ActivationTimeout(format!("masternode list of node {observer}"))
            })?;
        views.push((observer, list));
    }
    Ok(views)
}

/// Sort each view by txhash and check that all views are identical and match `expected`,
/// returning the common view.
pub fn compare(
    views: &[(usize, Vec<MasternodeListEntry>)],
    expected: &Expectation,
) -> Result<Vec<MasternodeListEntry>, Error> {
    let mut normalized = Vec::with_capacity(views.len());
    for (observer, view) in views {
        let mut view = view.clone();
        view.sort_by(|a, b| a.txhash.cmp(&b.txhash));
        if view.len() != expected.count {
            return Err(Error::ConsistencyViolation(format!(
                "node {observer} lists {} masternodes (expected {})",
                view.len(),
                expected.count
            )));
        }
        for entry in &view {
            if entry.tier != expected.tier {
                return Err(Error::ConsistencyViolation(format!(
                    "node {observer} lists {} with tier {} (expected {})",
                    entry.txhash, entry.tier, expected.tier
                )));
            }
            if entry.status != expected.status {
                return Err(Error::ConsistencyViolation(format!(
                    "node {observer} lists {} as {} (expected {})",
                    entry.txhash, entry.status, expected.status
                )));
            }
        }
        normalized.push((*observer, view));
    }

    let Some(((first, reference), rest)) = normalized.split_first() else {
        return Err(Error::ConsistencyViolation("no observers".to_string()));
    };
    for (observer, view) in rest {
        if view != reference {
            return Err(Error::ConsistencyViolation(format!(
                "node {observer} list differs from node {first}"
            )));
        }
    }
    Ok(reference.clone())
}

/// Wait for every observer's list, compare them, and mark every masternode enabled.
#[allow(clippy::too_many_arguments)]
pub async fn run<E: Clock, N: Node>(
    context: &E,
    nodes: &[N],
    clock: &MockClock,
    observers: &[usize],
    expected: &Expectation,
    setups: &[Setup],
    tracker: &mut Tracker,
    policy: &Policy,
) -> Result<Vec<MasternodeListEntry>, Error> {
    let views = wait_lists(context, nodes, clock, observers, expected.count, policy).await?;
    let list = compare(&views, expected)?;
    info!(observers = ?observers, masternodes = list.len(), "masternode lists consistent");
    tracker.advance_all(setups, Stage::Enabled)?;
    Ok(list)
}
