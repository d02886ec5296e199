//! Wait for all nodes to agree on their chain tip or mempool.

use crate::{
    poll::{self, Policy, Tick},
    Error,
};
use commonware_runtime::Clock;
use mncompat_node::Node;
use serde::Serialize;
use tracing::debug;

/// Best block reported by a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Tip {
    pub height: u64,
    pub hash: String,
}

async fn tips<N: Node>(nodes: &[N]) -> Result<Vec<Tip>, Error> {
    let mut tips = Vec::with_capacity(nodes.len());
    for node in nodes {
        tips.push(Tip {
            height: node.get_block_count().await?,
            hash: node.get_best_block_hash().await?,
        });
    }
    Ok(tips)
}

async fn mempool_sets<N: Node>(nodes: &[N]) -> Result<Vec<Vec<String>>, Error> {
    let mut mempools = Vec::with_capacity(nodes.len());
    for node in nodes {
        let mut mempool = node.get_raw_mempool().await?;
        mempool.sort();
        mempool.dedup();
        mempools.push(mempool);
    }
    Ok(mempools)
}

fn common<T: PartialEq + Clone>(values: &[T]) -> Option<T> {
    let first = values.first()?;
    values
        .iter()
        .all(|value| value == first)
        .then(|| first.clone())
}

/// Wait until every node reports the same tip, returning it.
pub async fn blocks<E: Clock, N: Node>(
    context: &E,
    nodes: &[N],
    policy: &Policy,
) -> Result<Tip, Error> {
    let check = move || async move { Ok::<_, Error>(common(&tips(nodes).await?)) };
    match poll::until(context, policy, None::<Tick<'_, N>>, check).await? {
        Some(tip) => {
            debug!(height = tip.height, hash = %tip.hash, "chains synced");
            Ok(tip)
        }
        None => Err(Error::ChainDivergence(tips(nodes).await?)),
    }
}

/// Wait until every node reports the same set of pending transactions.
pub async fn mempools<E: Clock, N: Node>(
    context: &E,
    nodes: &[N],
    policy: &Policy,
) -> Result<Vec<String>, Error> {
    let check = move || async move { Ok::<_, Error>(common(&mempool_sets(nodes).await?)) };
    match poll::until(context, policy, None::<Tick<'_, N>>, check).await? {
        Some(mempool) => {
            debug!(transactions = mempool.len(), "mempools synced");
            Ok(mempool)
        }
        None => Err(Error::MempoolDivergence(mempool_sets(nodes).await?)),
    }
}
