//! Retry a check until it succeeds or a deadline passes.

use crate::{clock::MockClock, Error};
use commonware_runtime::Clock;
use mncompat_node::Node;
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tracing::debug;

/// How often to retry a check and for how long (both measured on the runtime clock).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Policy {
    pub const fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            timeout_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(100, 60_000)
    }
}

/// Advance of the mock clock applied between two attempts.
pub struct Tick<'a, N: Node> {
    pub clock: &'a MockClock,
    pub nodes: &'a [N],

    /// Seconds added to the mock clock.
    pub step: u64,
}

/// Call `check` until it returns a value or `policy` times out.
///
/// Between attempts, the mock clock is advanced by `tick` (if provided) and then the task sleeps
/// for the policy interval. The clock is never advanced while `check` is running. Returns `Ok(None)`
/// if the deadline passes without a value; errors returned by `check` are propagated immediately.
pub async fn until<E, N, T, F, Fut>(
    context: &E,
    policy: &Policy,
    tick: Option<Tick<'_, N>>,
    mut check: F,
) -> Result<Option<T>, Error>
where
    E: Clock,
    N: Node,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Error>>,
{
    let deadline = context.current() + policy.timeout();
    let mut attempts = 0u64;
    loop {
        attempts += 1;
        if let Some(value) = check().await? {
            return Ok(Some(value));
        }
        if context.current() >= deadline {
            debug!(attempts, "poll deadline reached");
            return Ok(None);
        }
        if let Some(tick) = &tick {
            tick.clock.advance(tick.nodes, tick.step).await?;
        }
        context.sleep(policy.interval()).await;
    }
}
