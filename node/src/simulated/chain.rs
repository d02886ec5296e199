//! Blocks, collateral transactions, and the best chain of a single node.

use crate::Tier;
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use thiserror::Error;

/// Identifier of a block or transaction.
pub type Digest = [u8; 32];

/// Hash the concatenation of `parts`.
pub(crate) fn hash(parts: &[&[u8]]) -> Digest {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Reasons a block is not appended to a chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Invalid {
    #[error("block {height} does not extend tip {tip}")]
    Orphan { height: u64, tip: u64 },
    #[error("block time {time} too far in the future (limit {limit})")]
    FromFuture { time: u64, limit: u64 },
}

/// A transaction locking masternode collateral.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub id: Digest,
    pub owner: usize,
    pub label: String,
    pub tier: Tier,
}

impl Transaction {
    /// Create a collateral transaction for `label`, unique per owner and creation height.
    pub fn collateral(owner: usize, label: &str, tier: Tier, height: u64) -> Self {
        let id = hash(&[
            b"collateral",
            &(owner as u64).to_be_bytes(),
            label.as_bytes(),
            tier.to_string().as_bytes(),
            &height.to_be_bytes(),
        ]);
        Self {
            id,
            owner,
            label: label.to_string(),
            tier,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub hash: Digest,
    pub parent: Digest,
    pub height: u64,
    pub time: u64,
    /// Node credited with the block reward (none for genesis).
    pub miner: Option<usize>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn genesis(time: u64) -> Self {
        let parent = [0u8; 32];
        Self {
            hash: hash(&[b"genesis", &time.to_be_bytes()]),
            parent,
            height: 0,
            time,
            miner: None,
            transactions: Vec::new(),
        }
    }

    pub fn new(parent: &Block, time: u64, miner: usize, transactions: Vec<Transaction>) -> Self {
        let height = parent.height + 1;
        let mut parts: Vec<&[u8]> = Vec::with_capacity(transactions.len() + 4);
        let height_bytes = height.to_be_bytes();
        let time_bytes = time.to_be_bytes();
        let miner_bytes = (miner as u64).to_be_bytes();
        parts.push(&parent.hash);
        parts.push(&height_bytes);
        parts.push(&time_bytes);
        parts.push(&miner_bytes);
        for tx in &transactions {
            parts.push(&tx.id);
        }
        Self {
            hash: hash(&parts),
            parent: parent.hash,
            height,
            time,
            miner: Some(miner),
            transactions,
        }
    }
}

/// The best chain known to a node.
///
/// Only extensions of the tip are accepted (competing branches are never adopted).
#[derive(Clone, Debug)]
pub struct Chain {
    genesis: Block,
    /// Blocks above genesis, in height order.
    blocks: Vec<Block>,
    heights: HashMap<Digest, u64>,
}

impl Chain {
    pub fn new(genesis: Block) -> Self {
        let mut heights = HashMap::new();
        heights.insert(genesis.hash, 0);
        Self {
            genesis,
            blocks: Vec::new(),
            heights,
        }
    }

    pub fn tip(&self) -> &Block {
        self.blocks.last().unwrap_or(&self.genesis)
    }

    fn iter(&self) -> impl Iterator<Item = &Block> {
        std::iter::once(&self.genesis).chain(self.blocks.iter())
    }

    pub fn height(&self) -> u64 {
        self.tip().height
    }

    pub fn get(&self, height: u64) -> Option<&Block> {
        match height.checked_sub(1) {
            None => Some(&self.genesis),
            Some(index) => self.blocks.get(usize::try_from(index).ok()?),
        }
    }

    pub fn find(&self, hash: &Digest) -> Option<&Block> {
        self.heights.get(hash).and_then(|height| self.get(*height))
    }

    pub fn contains(&self, hash: &Digest) -> bool {
        self.heights.contains_key(hash)
    }

    /// Append `block` if it extends the tip and is not more than `max_drift` seconds ahead of `now`.
    pub fn append(&mut self, block: Block, now: u64, max_drift: u64) -> Result<(), Invalid> {
        let tip = self.tip();
        if block.parent != tip.hash || block.height != tip.height + 1 {
            return Err(Invalid::Orphan {
                height: block.height,
                tip: tip.height,
            });
        }
        let limit = now.saturating_add(max_drift);
        if block.time > limit {
            return Err(Invalid::FromFuture {
                time: block.time,
                limit,
            });
        }
        self.heights.insert(block.hash, block.height);
        self.blocks.push(block);
        Ok(())
    }

    /// Drop every block (and its descendants) that is more than `max_drift` seconds ahead of `now`,
    /// returning the number of blocks removed. Genesis is never removed.
    pub fn revalidate(&mut self, now: u64, max_drift: u64) -> usize {
        let limit = now.saturating_add(max_drift);
        let Some(first) = self.blocks.iter().position(|block| block.time > limit) else {
            return 0;
        };
        let removed = self.blocks.split_off(first);
        for block in &removed {
            self.heights.remove(&block.hash);
        }
        removed.len()
    }

    /// Number of confirmations of the block at `height` (the tip has one).
    pub fn confirmations(&self, height: u64) -> u64 {
        (self.height() + 1).saturating_sub(height)
    }

    /// Height and contents of the transaction with the given identifier.
    pub fn find_transaction(&self, id: &Digest) -> Option<(u64, &Transaction)> {
        self.iter().find_map(|block| {
            block
                .transactions
                .iter()
                .find(|tx| &tx.id == id)
                .map(|tx| (block.height, tx))
        })
    }

    /// Number of blocks mined by `miner` with at least `maturity` confirmations.
    pub fn mature_blocks(&self, miner: usize, maturity: u64) -> u64 {
        self.iter()
            .filter(|block| block.miner == Some(miner))
            .filter(|block| self.confirmations(block.height) >= maturity)
            .count() as u64
    }
}
