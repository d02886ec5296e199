//! Check that masternodes announced by nodes running different protocol versions converge.
//!
//! The harness drives a small network of nodes (any [mncompat_node::Launcher]) through a fixed
//! scenario: pin every node to a shared mock clock, wire a fixed topology, fund two masternodes
//! from blocks mined in the past, restart the masternode daemons, announce both masternodes, and
//! finally require every observer node to report the same masternode list (regardless of the
//! protocol version it speaks).
//!
//! Every wait is a bounded poll ([poll::until]) measured on the runtime clock, so a scenario run
//! on the `deterministic` runtime either passes or fails with a single [Error] (it never hangs).
//!
//! # Status
//!
//! `mncompat-harness` is **ALPHA** software. Developers should expect breaking changes.

use mncompat_node::ProtocolVersion;
use thiserror::Error;

pub mod clock;
pub mod funding;
pub mod lifecycle;
pub mod poll;
pub mod scenario;
pub mod sync;
pub mod topology;
pub mod verify;

#[cfg(test)]
mod fixtures;

pub use clock::MockClock;
pub use scenario::{run, Config, Report};

/// Errors that can occur when running the scenario.
#[derive(Error, Debug)]
pub enum Error {
    #[error("chain divergence: {0:?}")]
    ChainDivergence(Vec<sync::Tip>),
    #[error("mempool divergence: {0:?}")]
    MempoolDivergence(Vec<Vec<String>>),
    #[error("broadcast of {label} rejected: {status} ({message:?})")]
    BroadcastRejected {
        label: String,
        status: String,
        message: Option<String>,
    },
    #[error("timed out waiting for {0}")]
    ActivationTimeout(String),
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),
    #[error("node {node} has balance {actual} (expected {expected})")]
    BalancePrecondition {
        node: usize,
        expected: u64,
        actual: u64,
    },
    #[error("node {node} reports protocol {actual} (expected {expected})")]
    ProtocolMismatch {
        node: usize,
        expected: ProtocolVersion,
        actual: u32,
    },
    #[error("mock time {time} not before local time {local} of node {node}")]
    MockTimeNotInPast { node: usize, time: u64, local: u64 },
    #[error("clock overflow: {now} + {delta}")]
    ClockOverflow { now: u64, delta: u64 },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid transition of {label}: {from:?} -> {to:?}")]
    InvalidTransition {
        label: String,
        from: lifecycle::Stage,
        to: lifecycle::Stage,
    },
    #[error("node error: {0}")]
    Node(#[from] mncompat_node::Error),
}
