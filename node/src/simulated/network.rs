//! Implementation of a `simulated` network.

use super::{
    args::Args,
    chain::{hash, Block, Chain, Digest, Transaction},
    masternode::{self, Broadcast, List},
    metrics, Config, Node,
};
use crate::{
    BlockHeader, BroadcastResult, CollateralReceipt, Error, Launcher, MasternodeListEntry,
    MasternodeStatus, NetworkInfo, ProtocolVersion, Tier,
};
use bytes::Bytes;
use commonware_codec::Decode;
use commonware_runtime::{Clock, Metrics, Spawner};
use commonware_utils::{from_hex, hex, SystemTimeExt};
use prometheus_client::metrics::{counter::Counter, family::Family};
use rand::{Rng, RngCore};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{debug, info, warn};

/// Payload exchanged over a session.
enum Message {
    /// Announcement of the sender's tip.
    Block(Block),
    Transaction(Transaction),
    /// Broadcast encoded at the session's negotiated version.
    Broadcast(Bytes),
}

impl Message {
    fn kind(&self) -> &'static str {
        match self {
            Self::Block(_) => "block",
            Self::Transaction(_) => "transaction",
            Self::Broadcast(_) => "broadcast",
        }
    }
}

/// A message waiting to be sent: (origin, recipient, payload).
type Outgoing = (usize, usize, Message);

/// Everything a daemon keeps, whether on disk or in memory.
struct Peer {
    index: usize,
    args: Args,
    address: String,
    running: bool,
    mock_time: Option<u64>,

    // Persisted across restarts
    chain: Chain,
    collaterals: BTreeMap<String, Transaction>,

    // Lost on stop
    mempool: BTreeMap<Digest, Transaction>,
    started: BTreeMap<String, u64>,
    masternodes: List,
}

impl Peer {
    fn new(index: usize, args: Args, cfg: &Config) -> Self {
        let address = hash(&[b"address", &(index as u64).to_be_bytes()]);
        Self {
            index,
            args,
            address: hex(&address[..20]),
            running: true,
            mock_time: None,
            chain: Chain::new(Block::genesis(cfg.genesis_time)),
            collaterals: BTreeMap::new(),
            mempool: BTreeMap::new(),
            started: BTreeMap::new(),
            masternodes: List::default(),
        }
    }

    fn local_time(&self, wall: u64) -> u64 {
        self.mock_time.unwrap_or(wall)
    }

    /// Mature rewards not locked as masternode collateral.
    fn balance(&self, cfg: &Config) -> u64 {
        let rewards = self
            .chain
            .mature_blocks(self.index, cfg.coinbase_maturity)
            .saturating_mul(cfg.block_reward);
        let locked: u64 = self
            .collaterals
            .values()
            .map(|tx| masternode::collateral(tx.tier))
            .sum();
        rewards.saturating_sub(locked)
    }

    fn prune_mempool(&mut self) {
        self.mempool
            .retain(|id, _| self.chain.find_transaction(id).is_none());
    }
}

fn key(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Default)]
struct State {
    peers: BTreeMap<usize, Peer>,
    /// Open sessions and their negotiated version.
    sessions: BTreeMap<(usize, usize), ProtocolVersion>,
}

impl State {
    fn running(&self, index: usize) -> Result<&Peer, Error> {
        match self.peers.get(&index) {
            Some(peer) if peer.running => Ok(peer),
            _ => Err(Error::NodeUnavailable(index)),
        }
    }

    fn running_mut(&mut self, index: usize) -> Result<&mut Peer, Error> {
        match self.peers.get_mut(&index) {
            Some(peer) if peer.running => Ok(peer),
            _ => Err(Error::NodeUnavailable(index)),
        }
    }

    fn session(&self, a: usize, b: usize) -> Option<ProtocolVersion> {
        self.sessions.get(&key(a, b)).copied()
    }

    fn sessions_of(&self, index: usize) -> impl Iterator<Item = (usize, ProtocolVersion)> + '_ {
        self.sessions.iter().filter_map(move |(&(a, b), &version)| {
            if a == index {
                Some((b, version))
            } else if b == index {
                Some((a, version))
            } else {
                None
            }
        })
    }

    /// Build a message for every session of `origin` (except the one with `except`).
    fn relay(
        &self,
        origin: usize,
        except: Option<usize>,
        make: impl Fn(ProtocolVersion) -> Message,
    ) -> Vec<Outgoing> {
        self.sessions_of(origin)
            .filter(|(peer, _)| Some(*peer) != except)
            .map(|(peer, version)| (origin, peer, make(version)))
            .collect()
    }

    fn receive_block(
        &mut self,
        cfg: &Config,
        wall: u64,
        from: usize,
        to: usize,
        block: Block,
        rejected: &Counter,
    ) -> Vec<Outgoing> {
        let (Some(receiver), Some(sender)) = (self.peers.get(&to), self.peers.get(&from)) else {
            return Vec::new();
        };
        let height = receiver.chain.height();
        if block.height <= height || receiver.chain.contains(&block.hash) {
            return Vec::new();
        }

        // Fetch the blocks between our tip and the announced one from the announcing peer
        let tip = receiver.chain.tip().hash;
        let connects = sender.chain.get(height).is_some_and(|b| b.hash == tip)
            && sender
                .chain
                .get(block.height)
                .is_some_and(|b| b.hash == block.hash);
        if !connects {
            debug!(node = to, from, height = block.height, "ignored block not extending chain");
            return Vec::new();
        }
        let missing: Vec<Block> = (height + 1..=block.height)
            .filter_map(|height| sender.chain.get(height).cloned())
            .collect();

        let Some(receiver) = self.peers.get_mut(&to) else {
            return Vec::new();
        };
        let now = receiver.local_time(wall);
        let mut appended = 0;
        for block in missing {
            let height = block.height;
            if let Err(err) = receiver.chain.append(block, now, cfg.max_future_block) {
                rejected.inc();
                warn!(node = to, from, height, %err, "rejected block");
                break;
            }
            appended += 1;
        }
        if appended == 0 {
            return Vec::new();
        }
        receiver.prune_mempool();
        let tip = receiver.chain.tip().clone();
        debug!(node = to, from, appended, height = tip.height, "extended chain");
        self.relay(to, Some(from), |_| Message::Block(tip.clone()))
    }

    fn receive_transaction(&mut self, from: usize, to: usize, tx: Transaction) -> Vec<Outgoing> {
        let Some(receiver) = self.peers.get_mut(&to) else {
            return Vec::new();
        };
        if receiver.mempool.contains_key(&tx.id) || receiver.chain.find_transaction(&tx.id).is_some()
        {
            return Vec::new();
        }
        receiver.mempool.insert(tx.id, tx.clone());
        self.relay(to, Some(from), |_| Message::Transaction(tx.clone()))
    }

    #[allow(clippy::too_many_arguments)]
    fn receive_broadcast(
        &mut self,
        cfg: &Config,
        wall: u64,
        version: ProtocolVersion,
        from: usize,
        to: usize,
        bytes: Bytes,
        rejected: &Counter,
    ) -> Vec<Outgoing> {
        let broadcast = match Broadcast::decode_cfg(bytes, &version.number()) {
            Ok(broadcast) => broadcast,
            Err(err) => {
                rejected.inc();
                warn!(node = to, from, %version, %err, "malformed broadcast");
                return Vec::new();
            }
        };
        let Some(receiver) = self.peers.get_mut(&to) else {
            return Vec::new();
        };
        if receiver.masternodes.is_stale(&broadcast) {
            return Vec::new();
        }
        let now = receiver.local_time(wall);
        if let Err(err) = broadcast.verify(&receiver.chain, now, cfg) {
            rejected.inc();
            warn!(node = to, from, txhash = %hex(&broadcast.collateral), %err, "rejected broadcast");
            return Vec::new();
        }
        debug!(node = to, from, txhash = %hex(&broadcast.collateral), "accepted broadcast");
        receiver.masternodes.insert(broadcast.clone());
        self.relay(to, Some(from), |version| {
            Message::Broadcast(broadcast.encode_for(version.number()))
        })
    }
}

/// Implementation of a `simulated` network.
///
/// Each launched node is a [Node] handle backed by state shared with every other node. Messages
/// between nodes are delivered by tasks spawned on the runtime after the configured link latency
/// (and only if the session between the two nodes is still open at that point).
#[derive(Clone)]
pub struct Network<E: Spawner + Clock + Metrics + RngCore> {
    context: E,
    cfg: Arc<Config>,
    state: Arc<Mutex<State>>,

    sent: Family<metrics::Message, Counter>,
    dropped: Family<metrics::Message, Counter>,
    blocks_rejected: Counter,
    broadcasts_rejected: Counter,
}

impl<E: Spawner + Clock + Metrics + RngCore> Network<E> {
    /// Create a new simulated network with a given runtime and configuration.
    pub fn new(context: E, cfg: Config) -> Self {
        let sent = Family::<metrics::Message, Counter>::default();
        let dropped = Family::<metrics::Message, Counter>::default();
        let blocks_rejected = Counter::default();
        let broadcasts_rejected = Counter::default();
        context.register("messages_sent", "messages sent between nodes", sent.clone());
        context.register(
            "messages_dropped",
            "messages dropped because the session closed",
            dropped.clone(),
        );
        context.register(
            "blocks_rejected",
            "blocks refused by a receiving node",
            blocks_rejected.clone(),
        );
        context.register(
            "broadcasts_rejected",
            "masternode broadcasts refused by a receiving node",
            broadcasts_rejected.clone(),
        );
        Self {
            context,
            cfg: Arc::new(cfg),
            state: Arc::new(Mutex::new(State::default())),
            sent,
            dropped,
            blocks_rejected,
            broadcasts_rejected,
        }
    }

    /// Unmocked time of every node.
    fn wall_clock(&self) -> u64 {
        self.cfg
            .wall_clock
            .saturating_add(self.context.current().epoch().as_secs())
    }

    fn latency(&self) -> Duration {
        let jitter = u64::try_from(self.cfg.link.jitter.as_micros()).unwrap_or(u64::MAX);
        if jitter == 0 {
            return self.cfg.link.latency;
        }
        let mut context = self.context.clone();
        self.cfg.link.latency + Duration::from_micros(context.gen_range(0..=jitter))
    }

    fn send(&self, from: usize, to: usize, message: Message) {
        self.sent
            .get_or_create(&metrics::Message::new(from, to, message.kind()))
            .inc();
        let latency = self.latency();
        let network = self.clone();
        self.context
            .with_label("delivery")
            .spawn(move |context| async move {
                context.sleep(latency).await;
                network.deliver(from, to, message);
            });
    }

    fn dispatch(&self, outgoing: Vec<Outgoing>) {
        for (from, to, message) in outgoing {
            self.send(from, to, message);
        }
    }

    fn deliver(&self, from: usize, to: usize, message: Message) {
        let wall = self.wall_clock();
        let outgoing = {
            let mut state = self.state.lock().unwrap();
            let Some(version) = state.session(from, to) else {
                let kind = message.kind();
                self.dropped
                    .get_or_create(&metrics::Message::new(from, to, kind))
                    .inc();
                debug!(from, to, kind, "dropped message without session");
                return;
            };
            match message {
                Message::Block(block) => {
                    state.receive_block(&self.cfg, wall, from, to, block, &self.blocks_rejected)
                }
                Message::Transaction(tx) => state.receive_transaction(from, to, tx),
                Message::Broadcast(bytes) => state.receive_broadcast(
                    &self.cfg,
                    wall,
                    version,
                    from,
                    to,
                    bytes,
                    &self.broadcasts_rejected,
                ),
            }
        };
        self.dispatch(outgoing);
    }

    /// Run a read-only request against a running node at its local time.
    fn query<T>(&self, index: usize, f: impl FnOnce(&Peer, u64) -> Result<T, Error>) -> Result<T, Error> {
        let wall = self.wall_clock();
        let state = self.state.lock().unwrap();
        let peer = state.running(index)?;
        f(peer, peer.local_time(wall))
    }

    pub(super) fn start(&self, index: usize) -> Result<(), Error> {
        let wall = self.wall_clock();
        let mut state = self.state.lock().unwrap();
        let peer = state
            .peers
            .get_mut(&index)
            .ok_or(Error::NodeUnavailable(index))?;
        if peer.running {
            return Err(Error::RpcRejected(format!("node {index} already running")));
        }
        peer.running = true;

        // Blocks loaded from disk are checked against the (unmocked) clock
        let now = peer.local_time(wall);
        let dropped = peer.chain.revalidate(now, self.cfg.max_future_block);
        if dropped > 0 {
            warn!(node = index, dropped, now, "dropped stored blocks from the future");
        }
        info!(node = index, height = peer.chain.height(), "started");
        Ok(())
    }

    pub(super) fn stop(&self, index: usize) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let peer = state.running_mut(index)?;
        peer.running = false;
        peer.mock_time = None;
        peer.mempool.clear();
        peer.started.clear();
        peer.masternodes.clear();
        state.sessions.retain(|&(a, b), _| a != index && b != index);
        info!(node = index, "stopped");
        Ok(())
    }

    pub(super) fn connect(&self, index: usize, peer: usize) -> Result<(), Error> {
        let outgoing = {
            let mut state = self.state.lock().unwrap();
            let local = state.running(index)?;
            if peer == index {
                return Err(Error::RpcRejected("cannot connect to self".to_string()));
            }
            let remote = match state.peers.get(&peer) {
                Some(remote) if remote.running => remote,
                _ => return Err(Error::RpcRejected(format!("peer {peer} unreachable"))),
            };

            // Each side refuses peers below its active version
            for (node, version, other, minimum) in [
                (index, local.args.protocol, peer, remote.args.active),
                (peer, remote.args.protocol, index, local.args.active),
            ] {
                if version < minimum {
                    return Err(Error::RpcRejected(format!(
                        "node {node} protocol {version} below minimum {minimum} of node {other}"
                    )));
                }
            }
            let version = local.args.protocol.min(remote.args.protocol);
            if state.session(index, peer).is_some() {
                return Ok(());
            }

            // Exchange tips, pending transactions, and known masternodes
            let mut outgoing = Vec::new();
            for (from, to) in [(index, peer), (peer, index)] {
                let source = &state.peers[&from];
                outgoing.push((from, to, Message::Block(source.chain.tip().clone())));
                for tx in source.mempool.values() {
                    outgoing.push((from, to, Message::Transaction(tx.clone())));
                }
                for broadcast in source.masternodes.iter() {
                    let encoded = broadcast.encode_for(version.number());
                    outgoing.push((from, to, Message::Broadcast(encoded)));
                }
            }
            state.sessions.insert(key(index, peer), version);
            debug!(node = index, peer, %version, "connected");
            outgoing
        };
        self.dispatch(outgoing);
        Ok(())
    }

    pub(super) fn set_mock_time(&self, index: usize, time: u64) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.running_mut(index)?.mock_time = Some(time);
        Ok(())
    }

    pub(super) fn network_info(&self, index: usize) -> Result<NetworkInfo, Error> {
        let wall = self.wall_clock();
        let state = self.state.lock().unwrap();
        let peer = state.running(index)?;
        Ok(NetworkInfo {
            protocol_version: peer.args.protocol.number(),
            connections: state.sessions_of(index).count(),
            time: peer.local_time(wall),
        })
    }

    pub(super) fn block_count(&self, index: usize) -> Result<u64, Error> {
        self.query(index, |peer, _| Ok(peer.chain.height()))
    }

    pub(super) fn best_block_hash(&self, index: usize) -> Result<String, Error> {
        self.query(index, |peer, _| Ok(hex(&peer.chain.tip().hash)))
    }

    pub(super) fn block_hash(&self, index: usize, height: u64) -> Result<String, Error> {
        self.query(index, |peer, _| {
            peer.chain
                .get(height)
                .map(|block| hex(&block.hash))
                .ok_or_else(|| Error::RpcRejected(format!("block height {height} out of range")))
        })
    }

    pub(super) fn block_header(&self, index: usize, hash: &str) -> Result<BlockHeader, Error> {
        let digest: Digest = from_hex(hash)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| Error::RpcRejected(format!("invalid block hash: {hash}")))?;
        self.query(index, |peer, _| {
            peer.chain
                .find(&digest)
                .map(|block| BlockHeader {
                    hash: hex(&block.hash),
                    height: block.height,
                    time: block.time,
                })
                .ok_or_else(|| Error::RpcRejected(format!("block not found: {hash}")))
        })
    }

    pub(super) fn generate(&self, index: usize, blocks: u64) -> Result<Vec<String>, Error> {
        let wall = self.wall_clock();
        let (hashes, outgoing) = {
            let mut state = self.state.lock().unwrap();
            let peer = state.running_mut(index)?;
            let now = peer.local_time(wall);
            let mut hashes = Vec::new();
            for _ in 0..blocks {
                let transactions = std::mem::take(&mut peer.mempool).into_values().collect();
                let block = Block::new(peer.chain.tip(), now, index, transactions);
                hashes.push(hex(&block.hash));
                peer.chain
                    .append(block, now, self.cfg.max_future_block)
                    .map_err(|err| Error::RpcRejected(err.to_string()))?;
            }
            let tip = peer.chain.tip().clone();
            info!(node = index, blocks, height = tip.height, time = now, "generated blocks");
            let outgoing = state.relay(index, None, |_| Message::Block(tip.clone()));
            (hashes, outgoing)
        };
        self.dispatch(outgoing);
        Ok(hashes)
    }

    pub(super) fn balance(&self, index: usize) -> Result<u64, Error> {
        self.query(index, |peer, _| Ok(peer.balance(&self.cfg)))
    }

    pub(super) fn raw_mempool(&self, index: usize) -> Result<Vec<String>, Error> {
        self.query(index, |peer, _| Ok(peer.mempool.keys().map(|id| hex(id)).collect()))
    }

    pub(super) fn setup_masternode(
        &self,
        index: usize,
        label: &str,
        tier: Tier,
    ) -> Result<CollateralReceipt, Error> {
        let (receipt, outgoing) = {
            let mut state = self.state.lock().unwrap();
            let peer = state.running_mut(index)?;
            if peer.collaterals.contains_key(label) {
                return Err(Error::RpcRejected(format!(
                    "masternode {label} already configured"
                )));
            }
            let balance = peer.balance(&self.cfg);
            let amount = masternode::collateral(tier);
            if balance < amount {
                return Err(Error::RpcRejected(format!(
                    "insufficient funds: balance {balance}, collateral {amount}"
                )));
            }
            let tx = Transaction::collateral(index, label, tier, peer.chain.height());
            peer.collaterals.insert(label.to_string(), tx.clone());
            peer.mempool.insert(tx.id, tx.clone());
            let receipt = CollateralReceipt {
                label: label.to_string(),
                txhash: hex(&tx.id),
                tier,
            };
            info!(node = index, label, %tier, txhash = %receipt.txhash, "locked collateral");
            let outgoing = state.relay(index, None, |_| Message::Transaction(tx.clone()));
            (receipt, outgoing)
        };
        self.dispatch(outgoing);
        Ok(receipt)
    }

    pub(super) fn start_masternode(&self, index: usize, label: &str) -> Result<BroadcastResult, Error> {
        let wall = self.wall_clock();
        let outgoing = {
            let mut state = self.state.lock().unwrap();
            let peer = state.running_mut(index)?;
            let (collateral, tier) = peer
                .collaterals
                .get(label)
                .map(|tx| (tx.id, tx.tier))
                .ok_or_else(|| Error::RpcRejected(format!("unknown masternode {label}")))?;
            let now = peer.local_time(wall);
            let broadcast = Broadcast {
                collateral,
                tier,
                sig_time: now,
                protocol: peer.args.protocol.number(),
                reward_address: (peer.args.protocol >= ProtocolVersion::New)
                    .then(|| peer.address.clone()),
            };
            if let Err(err) = broadcast.verify(&peer.chain, now, &self.cfg) {
                warn!(node = index, label, %err, "refused to start masternode");
                return Ok(BroadcastResult::failed(err.to_string()));
            }
            peer.masternodes.insert(broadcast.clone());
            peer.started.insert(label.to_string(), now);
            info!(node = index, label, sig_time = now, "started masternode");
            state.relay(index, None, |version| {
                Message::Broadcast(broadcast.encode_for(version.number()))
            })
        };
        self.dispatch(outgoing);
        Ok(BroadcastResult::success())
    }

    pub(super) fn masternode_status(
        &self,
        index: usize,
        label: &str,
    ) -> Result<MasternodeStatus, Error> {
        let wall = self.wall_clock();
        let state = self.state.lock().unwrap();
        let peer = state.running(index)?;
        let collateral = peer
            .collaterals
            .get(label)
            .map(|tx| tx.id)
            .ok_or_else(|| Error::RpcRejected(format!("unknown masternode {label}")))?;
        let Some(sig_time) = peer.started.get(label) else {
            return Ok(MasternodeStatus::Unknown);
        };
        let connected = state.sessions_of(index).next().is_some();
        let elapsed = peer.local_time(wall) >= sig_time.saturating_add(self.cfg.activation_delay);
        if connected && elapsed && peer.masternodes.contains(&collateral) {
            Ok(MasternodeStatus::LocalActive)
        } else {
            Ok(MasternodeStatus::Unknown)
        }
    }

    pub(super) fn list_masternodes(&self, index: usize) -> Result<Vec<MasternodeListEntry>, Error> {
        self.query(index, |peer, now| {
            Ok(peer.masternodes.entries(now, self.cfg.expiration))
        })
    }
}

impl<E: Spawner + Clock + Metrics + RngCore> Launcher for Network<E> {
    type Node = Node<E>;

    async fn launch(&mut self, index: usize, args: &[String]) -> Result<Self::Node, Error> {
        let args = Args::parse(args)?;
        {
            let mut state = self.state.lock().unwrap();
            if state.peers.contains_key(&index) {
                return Err(Error::RpcRejected(format!("node {index} already launched")));
            }
            info!(node = index, protocol = %args.protocol, active = %args.active, "launched");
            state.peers.insert(index, Peer::new(index, args, &self.cfg));
        }
        Ok(Node::new(index, self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::Link;
    use commonware_runtime::{deterministic, Runner};

    #[test]
    fn test_latency_bounds() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let link = Link {
                latency: Duration::from_millis(10),
                jitter: Duration::from_millis(5),
            };
            let cfg = Config {
                link,
                ..Config::default()
            };
            let network = Network::new(context.with_label("network"), cfg);
            for _ in 0..100 {
                let latency = network.latency();
                assert!(latency >= Duration::from_millis(10));
                assert!(latency <= Duration::from_millis(15));
            }

            // Without jitter every message takes the base latency
            let cfg = Config {
                link: Link {
                    latency: Duration::from_millis(10),
                    jitter: Duration::ZERO,
                },
                ..Config::default()
            };
            let network = Network::new(context.with_label("still"), cfg);
            assert_eq!(network.latency(), Duration::from_millis(10));
        });
    }
}
