use crate::error::Error;
use bitcoin::BlockHash;
use jsonrpsee::proc_macros::rpc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use subcoin_deltablocks::{DeltaBlock, DeltaBlocks};

/// Summary of a delta block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaInfo {
    pub blockhash: BlockHash,
    /// Whether the transaction state has been verified.
    pub all_txn_known: bool,
    /// Known weak ancestors, strong blocks excluded.
    pub ancestors: Vec<BlockHash>,
    /// Number of transactions added on top of the ancestors.
    pub delta_size: usize,
    /// Total number of transactions, coinbase included.
    pub full_size: usize,
    /// Weak proof-of-work, `-1` while incomplete and `-2` if invalid.
    pub wpow: i64,
}

#[rpc(client, server)]
pub trait DeltaBlocksApi {
    /// Returns the summary of a known delta block.
    #[method(name = "deltablocks_info")]
    fn info(&self, hash: BlockHash) -> Result<Option<DeltaInfo>, Error>;

    /// Returns all known delta blocks by strong parent, in receive order.
    #[method(name = "deltablocks_list")]
    fn list(&self) -> Result<BTreeMap<String, Vec<DeltaInfo>>, Error>;

    /// Returns the tips of the delta block DAG on top of the given strong block.
    #[method(name = "deltablocks_tips")]
    fn tips(&self, strong_hash: BlockHash) -> Result<Vec<DeltaInfo>, Error>;
}

/// This struct provides the delta blocks API.
pub struct DeltaBlocksQuery {
    deltablocks: Arc<DeltaBlocks>,
}

impl DeltaBlocksQuery {
    /// Constructs a new instance of [`DeltaBlocksQuery`].
    pub fn new(deltablocks: Arc<DeltaBlocks>) -> Self {
        Self { deltablocks }
    }

    fn ensure_enabled(&self) -> Result<(), Error> {
        if self.deltablocks.is_enabled() {
            Ok(())
        } else {
            Err(Error::Disabled)
        }
    }

    fn delta_info(&self, block: &DeltaBlock) -> DeltaInfo {
        DeltaInfo {
            blockhash: block.hash(),
            all_txn_known: block.all_transactions_known(),
            ancestors: self
                .deltablocks
                .ancestors(block)
                .iter()
                .map(|ancestor| ancestor.hash())
                .collect(),
            delta_size: block.delta_set().len(),
            full_size: block.num_transactions(),
            wpow: self.deltablocks.weak_pow(block).as_i64(),
        }
    }
}

impl DeltaBlocksApiServer for DeltaBlocksQuery {
    fn info(&self, hash: BlockHash) -> Result<Option<DeltaInfo>, Error> {
        self.ensure_enabled()?;
        Ok(self
            .deltablocks
            .by_hash(&hash)
            .map(|block| self.delta_info(&block)))
    }

    fn list(&self) -> Result<BTreeMap<String, Vec<DeltaInfo>>, Error> {
        self.ensure_enabled()?;
        Ok(self
            .deltablocks
            .known_in_receive_order()
            .into_iter()
            .map(|(strong_hash, blocks)| {
                let infos = blocks.iter().map(|block| self.delta_info(block)).collect();
                (strong_hash.to_string(), infos)
            })
            .collect())
    }

    fn tips(&self, strong_hash: BlockHash) -> Result<Vec<DeltaInfo>, Error> {
        self.ensure_enabled()?;
        Ok(self
            .deltablocks
            .tips(&strong_hash)
            .iter()
            .map(|block| self.delta_info(block))
            .collect())
    }
}
