//! Virtual time shared by every node.

use crate::Error;
use futures::future::join_all;
use mncompat_node::Node;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Owner of the mock time observed by all nodes.
///
/// Every change is pushed to all nodes before the call returns, so outside of a push every node
/// reports the same local time.
#[derive(Debug)]
pub struct MockClock {
    now: AtomicU64,
}

impl MockClock {
    /// Pin all nodes to `time`, which must be earlier than the local time of every node.
    pub async fn init<N: Node>(nodes: &[N], time: u64) -> Result<Self, Error> {
        for node in nodes {
            let local = node.get_network_info().await?.time;
            if time >= local {
                return Err(Error::MockTimeNotInPast {
                    node: node.index(),
                    time,
                    local,
                });
            }
        }
        let clock = Self {
            now: AtomicU64::new(time),
        };
        clock.set_time(nodes, time).await?;
        Ok(clock)
    }

    /// Current mock time.
    pub fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    /// Push `time` to every node (concurrently), returning once all nodes have accepted it.
    ///
    /// If any node refuses the new time, nodes that accepted it are moved back to the current time
    /// and the first error is returned.
    pub async fn set_time<N: Node>(&self, nodes: &[N], time: u64) -> Result<(), Error> {
        let results = join_all(nodes.iter().map(|node| node.set_mock_time(time))).await;
        let mut accepted = Vec::new();
        let mut failure = None;
        for (node, result) in nodes.iter().zip(results) {
            match result {
                Ok(()) => accepted.push(node),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        let Some(err) = failure else {
            self.now.store(time, Ordering::SeqCst);
            debug!(time, nodes = nodes.len(), "pushed mock time");
            return Ok(());
        };

        // Restore the previous time on nodes that accepted the new one
        let previous = self.now();
        if previous != time {
            let restored = join_all(accepted.iter().map(|node| node.set_mock_time(previous))).await;
            for (node, result) in accepted.iter().zip(restored) {
                if let Err(err) = result {
                    warn!(node = node.index(), previous, ?err, "failed to restore mock time");
                }
            }
        }
        warn!(time, previous, ?err, "mock time not pushed");
        Err(err.into())
    }

    /// Re-push the current time (to nodes that lost it when restarting).
    pub async fn sync<N: Node>(&self, nodes: &[N]) -> Result<(), Error> {
        self.set_time(nodes, self.now()).await
    }

    /// Move time forward by `delta` seconds, returning the new time.
    pub async fn advance<N: Node>(&self, nodes: &[N], delta: u64) -> Result<u64, Error> {
        let now = self.now();
        let next = now
            .checked_add(delta)
            .ok_or(Error::ClockOverflow { now, delta })?;
        self.set_time(nodes, next).await?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fixtures, scenario::Config};
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};

    #[test_traced]
    fn test_init_pins_all_nodes() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let cfg = Config::default();
            let (nodes, clock) = fixtures::connected(&context, &cfg).await;
            assert_eq!(clock.now(), cfg.initial_time);
            for node in &nodes {
                assert_eq!(
                    node.get_network_info().await.unwrap().time,
                    cfg.initial_time
                );
            }
        });
    }

    #[test_traced]
    fn test_init_rejects_time_not_in_past() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let cfg = Config::default();
            let nodes = fixtures::launched(&context, &cfg).await;
            let local = nodes[0].get_network_info().await.unwrap().time;
            let result = MockClock::init(&nodes, local).await;
            assert!(matches!(
                result,
                Err(Error::MockTimeNotInPast { node: 0, .. })
            ));
        });
    }

    #[test_traced]
    fn test_set_time_idempotent() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let cfg = Config::default();
            let (nodes, clock) = fixtures::connected(&context, &cfg).await;
            let time = cfg.initial_time + 60;
            clock.set_time(&nodes, time).await.unwrap();
            clock.set_time(&nodes, time).await.unwrap();
            assert_eq!(clock.now(), time);
            for node in &nodes {
                assert_eq!(node.get_network_info().await.unwrap().time, time);
            }
        });
    }

    #[test_traced]
    fn test_advance() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let cfg = Config::default();
            let (nodes, clock) = fixtures::connected(&context, &cfg).await;
            assert_eq!(
                clock.advance(&nodes, 5).await.unwrap(),
                cfg.initial_time + 5
            );
            assert_eq!(clock.advance(&nodes, 0).await.unwrap(), cfg.initial_time + 5);

            clock.set_time(&nodes, u64::MAX - 1).await.unwrap();
            assert!(matches!(
                clock.advance(&nodes, 2).await,
                Err(Error::ClockOverflow { delta: 2, .. })
            ));
            assert_eq!(clock.now(), u64::MAX - 1);
        });
    }

    #[test_traced]
    fn test_set_time_fails_on_stopped_node() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let cfg = Config::default();
            let (nodes, clock) = fixtures::connected(&context, &cfg).await;
            nodes[3].stop().await.unwrap();
            let result = clock.set_time(&nodes, cfg.initial_time + 1).await;
            assert!(matches!(
                result,
                Err(Error::Node(mncompat_node::Error::NodeUnavailable(3)))
            ));

            // Nodes that accepted the new time are moved back
            assert_eq!(clock.now(), cfg.initial_time);
            for (index, node) in nodes.iter().enumerate() {
                if index == 3 {
                    continue;
                }
                assert_eq!(
                    node.get_network_info().await.unwrap().time,
                    cfg.initial_time
                );
            }

            // Once the node is back, the push succeeds everywhere
            nodes[3].start().await.unwrap();
            clock.set_time(&nodes, cfg.initial_time + 1).await.unwrap();
            for node in &nodes {
                assert_eq!(
                    node.get_network_info().await.unwrap().time,
                    cfg.initial_time + 1
                );
            }
        });
    }
}
