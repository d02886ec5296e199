use super::network::Network;
use crate::{
    BlockHeader, BroadcastResult, CollateralReceipt, Error, MasternodeListEntry,
    MasternodeStatus, NetworkInfo, Tier,
};
use commonware_runtime::{Clock, Metrics, Spawner};
use rand::RngCore;

/// Handle to a node of a simulated [Network].
#[derive(Clone)]
pub struct Node<E: Spawner + Clock + Metrics + RngCore> {
    index: usize,
    network: Network<E>,
}

impl<E: Spawner + Clock + Metrics + RngCore> Node<E> {
    pub(super) fn new(index: usize, network: Network<E>) -> Self {
        Self { index, network }
    }
}

impl<E: Spawner + Clock + Metrics + RngCore> crate::Node for Node<E> {
    fn index(&self) -> usize {
        self.index
    }

    async fn start(&self) -> Result<(), Error> {
        self.network.start(self.index)
    }

    async fn stop(&self) -> Result<(), Error> {
        self.network.stop(self.index)
    }

    async fn connect(&self, peer: usize) -> Result<(), Error> {
        self.network.connect(self.index, peer)
    }

    async fn set_mock_time(&self, time: u64) -> Result<(), Error> {
        self.network.set_mock_time(self.index, time)
    }

    async fn get_network_info(&self) -> Result<NetworkInfo, Error> {
        self.network.network_info(self.index)
    }

    async fn get_block_count(&self) -> Result<u64, Error> {
        self.network.block_count(self.index)
    }

    async fn get_best_block_hash(&self) -> Result<String, Error> {
        self.network.best_block_hash(self.index)
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, Error> {
        self.network.block_hash(self.index, height)
    }

    async fn get_block_header(&self, hash: &str) -> Result<BlockHeader, Error> {
        self.network.block_header(self.index, hash)
    }

    async fn generate(&self, blocks: u64) -> Result<Vec<String>, Error> {
        self.network.generate(self.index, blocks)
    }

    async fn get_balance(&self) -> Result<u64, Error> {
        self.network.balance(self.index)
    }

    async fn get_raw_mempool(&self) -> Result<Vec<String>, Error> {
        self.network.raw_mempool(self.index)
    }

    async fn setup_masternode(&self, label: &str, tier: Tier) -> Result<CollateralReceipt, Error> {
        self.network.setup_masternode(self.index, label, tier)
    }

    async fn start_masternode(&self, label: &str) -> Result<BroadcastResult, Error> {
        self.network.start_masternode(self.index, label)
    }

    async fn get_masternode_status(&self, label: &str) -> Result<MasternodeStatus, Error> {
        self.network.masternode_status(self.index, label)
    }

    async fn list_masternodes(&self) -> Result<Vec<MasternodeListEntry>, Error> {
        self.network.list_masternodes(self.index)
    }
}
