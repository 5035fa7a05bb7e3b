//! # Delta Blocks
//!
//! Delta blocks (merged weak blocks) propagate transactions between two strong blocks.
//!
//! 1. Weak blocks.
//!     - A delta block is a block header plus coinbase whose hash meets a target a thousand
//!       times easier than the strong one.
//!     - Its coinbase points at earlier delta blocks (weak ancestors) on top of the same strong
//!       block, forming a DAG.
//! 2. Transaction state.
//!     - Each delta block carries the full set of transactions visible through its ancestors,
//!       kept in persistent maps so that merging branches only costs their difference.
//!     - A block becomes complete once its delta set is known and matches the header's merkle
//!       root.
//! 3. Mining.
//!     - Miners merge the compatible tips with the most weak proof-of-work into a template,
//!       so that most of the next strong block is already known to peers.
//! 4. Housekeeping.
//!     - Only the delta blocks of the last few strong blocks are kept.

mod dag;
mod delta_block;
mod inner;
mod options;
mod pow;
mod template;
mod types;

pub use self::delta_block::{
    DeltaBlock, add_ancestor_outputs, ancestor_output, parse_ancestor_hashes,
};
pub use self::inner::Registry;
pub use self::options::{DeltaBlocksOptions, DeltaBlocksOptionsBuilder};
pub use self::pow::{ConsensusPowChecker, PowChecker, check_weak_pow, merkle_root, weak_target};
pub use self::template::DeltaBlockTemplate;
pub use self::types::{Error, SpendMap, TransactionMap, TxSlot, WeakPow};

use bitcoin::block::Header;
use bitcoin::{BlockHash, Network, Transaction};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

const LOG_TARGET: &str = "deltablocks";

/// Thread-safe delta block engine.
///
/// All state lives in a [`Registry`] behind a single lock. Every public method takes the lock
/// once, the DAG algorithms run on the locked registry.
pub struct DeltaBlocks {
    /// Configuration (immutable after creation).
    options: DeltaBlocksOptions,

    /// Decides whether a delta block is also a strong block.
    pow_checker: Arc<dyn PowChecker>,

    registry: Mutex<Registry>,
}

impl DeltaBlocks {
    /// Create a new engine with a custom proof-of-work checker.
    pub fn new(options: DeltaBlocksOptions, pow_checker: Arc<dyn PowChecker>) -> Self {
        let registry = Registry::new(options.tracked_strong_blocks);
        Self {
            options,
            pow_checker,
            registry: Mutex::new(registry),
        }
    }

    /// Create a new engine checking proof-of-work with the consensus rules of `network`.
    pub fn with_network(network: Network, options: DeltaBlocksOptions) -> Self {
        Self::new(options, Arc::new(ConsensusPowChecker::new(network)))
    }

    pub fn options(&self) -> &DeltaBlocksOptions {
        &self.options
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    /// Wraps a header and its coinbase into a (not yet registered) delta block.
    pub fn create(&self, header: Header, coinbase: Transaction) -> Arc<DeltaBlock> {
        Arc::new(DeltaBlock::new(header, coinbase, self.pow_checker.as_ref()))
    }

    /// Registers `block`, returns `false` if it was already known.
    pub fn try_register(&self, block: &Arc<DeltaBlock>) -> bool {
        self.registry.lock().try_register(block)
    }

    /// Fills in the transactions of `block`, see [`Registry::try_make_complete`].
    pub fn try_make_complete(&self, block: &DeltaBlock, transactions: Vec<Transaction>) -> bool {
        self.registry.lock().try_make_complete(block, transactions)
    }

    /// Notifies the engine about a new strong block.
    pub fn new_strong(&self, hash: BlockHash) {
        self.registry.lock().new_strong(hash)
    }

    /// Whether `hash` is a recent strong block delta blocks may build on.
    pub fn known_strong(&self, hash: &BlockHash) -> bool {
        self.registry.lock().known_strong(hash)
    }

    pub fn by_hash(&self, hash: &BlockHash) -> Option<Arc<DeltaBlock>> {
        self.registry.lock().by_hash(hash)
    }

    /// The delta block received last on top of `strong`.
    pub fn latest_for_strong(&self, strong: &BlockHash) -> Option<Arc<DeltaBlock>> {
        self.registry.lock().latest_for_strong(strong)
    }

    /// All known delta blocks by strong parent, in receive order.
    pub fn known_in_receive_order(&self) -> BTreeMap<BlockHash, Vec<Arc<DeltaBlock>>> {
        self.registry.lock().known_in_receive_order()
    }

    pub fn ancestors(&self, block: &DeltaBlock) -> Vec<Arc<DeltaBlock>> {
        self.registry.lock().ancestors(block)
    }

    pub fn all_ancestors(&self, block: &DeltaBlock) -> Vec<Arc<DeltaBlock>> {
        self.registry.lock().all_ancestors(block)
    }

    pub fn missing_ancestors(&self, block: &DeltaBlock) -> Vec<BlockHash> {
        self.registry.lock().missing_ancestors(block)
    }

    pub fn merge_delta_blocks(&self, ancestors: &[Arc<DeltaBlock>]) -> (TransactionMap, SpendMap) {
        self.registry.lock().merge_delta_blocks(ancestors)
    }

    pub fn weak_pow(&self, block: &DeltaBlock) -> WeakPow {
        self.registry.lock().weak_pow(block)
    }

    pub fn weak_pow_of_set(
        &self,
        merge_set: &[Arc<DeltaBlock>],
        prev_strong_hash: BlockHash,
    ) -> WeakPow {
        self.registry
            .lock()
            .weak_pow_of_set(merge_set, prev_strong_hash)
    }

    pub fn compatible(&self, a: &DeltaBlock, b: &DeltaBlock) -> bool {
        a.compatible(b)
    }

    pub fn tips(&self, strong: &BlockHash) -> Vec<Arc<DeltaBlock>> {
        self.registry.lock().tips(strong)
    }

    /// Template merging the best compatible set of tips on top of `strong`.
    ///
    /// Without known tips the template is empty and has no weak ancestors.
    pub fn best_template(&self, strong: &BlockHash) -> DeltaBlockTemplate {
        self.registry.lock().best_template(strong, None)
    }

    /// Same as [`Self::best_template`], choosing among `tips` only.
    pub fn best_template_from(
        &self,
        strong: &BlockHash,
        tips: &[Arc<DeltaBlock>],
    ) -> DeltaBlockTemplate {
        self.registry.lock().best_template(strong, Some(tips))
    }

    /// Forgets all delta blocks and strong blocks.
    pub fn reset(&self) {
        self.registry.lock().reset()
    }

    /// Number of known delta blocks.
    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    /// Processes a delta block received from the network.
    ///
    /// `transactions` must start with the coinbase. On success the block is complete and
    /// registered. [`Error::MissingAncestors`] lists the ancestors to request from the peer.
    pub fn accept_delta_block(
        &self,
        header: Header,
        transactions: Vec<Transaction>,
    ) -> Result<Arc<DeltaBlock>, Error> {
        if !self.options.enabled {
            return Err(Error::Disabled);
        }

        let hash = header.block_hash();

        if !pow::check_weak_pow(hash, header.bits, self.options.weak_pow_ratio) {
            return Err(Error::InsufficientWeakPow(hash));
        }

        let mut registry = self.registry.lock();

        if registry.contains(&hash) {
            return Err(Error::AlreadyKnown(hash));
        }

        if !registry.known_strong(&header.prev_blockhash) {
            return Err(Error::UnknownStrongParent(header.prev_blockhash));
        }

        let mut transactions = transactions.into_iter();
        let coinbase = transactions.next().ok_or(Error::MissingCoinbase)?;
        if !coinbase.is_coinbase() {
            return Err(Error::FirstTransactionIsNotCoinbase);
        }

        let block = Arc::new(DeltaBlock::new(
            header,
            coinbase,
            self.pow_checker.as_ref(),
        ));

        let missing = registry.missing_ancestors(&block);
        if !missing.is_empty() {
            tracing::debug!(
                target: LOG_TARGET,
                "Delta block {hash} misses {} ancestors",
                missing.len(),
            );
            return Err(Error::MissingAncestors {
                block: hash,
                missing,
            });
        }

        if !registry.try_make_complete(&block, transactions.collect()) {
            return Err(Error::BadMerkleRoot(hash));
        }

        registry.try_register(&block);

        tracing::debug!(
            target: LOG_TARGET,
            "Accepted delta block {hash} on top of {}",
            block.prev_strong_hash(),
        );

        Ok(block)
    }
}
