use crate::delta_block::DeltaBlock;
use bitcoin::BlockHash;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

const LOG_TARGET: &str = "deltablocks";

/// Registry of every known delta block.
///
/// Not thread-safe on its own, [`crate::DeltaBlocks`] guards it with a single lock and all
/// algorithms operating on the DAG are implemented on this type so that they never have to
/// take that lock again.
#[derive(Debug)]
pub struct Registry {
    /// Delta blocks by hash.
    known: HashMap<BlockHash, Arc<DeltaBlock>>,
    /// Delta blocks per strong parent, in the order they were registered.
    by_strong_parent: BTreeMap<BlockHash, Vec<Arc<DeltaBlock>>>,
    /// Most recent strong blocks, oldest first.
    tracked_strong_blocks: VecDeque<BlockHash>,
    max_tracked: usize,
}

impl Registry {
    pub fn new(max_tracked: usize) -> Self {
        Self {
            known: HashMap::new(),
            by_strong_parent: BTreeMap::new(),
            tracked_strong_blocks: VecDeque::new(),
            max_tracked: max_tracked.max(1),
        }
    }

    /// Registers `block`. Does nothing if a block with the same hash is already known.
    ///
    /// Returns `true` if the block was added.
    pub fn try_register(&mut self, block: &Arc<DeltaBlock>) -> bool {
        let hash = block.hash();
        if self.known.contains_key(&hash) {
            return false;
        }

        tracing::debug!(
            target: LOG_TARGET,
            strong_parent = %block.prev_strong_hash(),
            "Registering delta block {hash} with {} transactions, complete: {}",
            block.num_transactions(),
            block.all_transactions_known(),
        );

        for slot in block.delta_set().keys() {
            tracing::trace!(target: LOG_TARGET, "Delta set of {hash} contains {}", slot.txid());
        }
        for ancestor in block.weak_ancestor_hashes() {
            tracing::trace!(target: LOG_TARGET, "{hash} builds on weak ancestor {ancestor}");
        }

        self.known.insert(hash, Arc::clone(block));
        self.by_strong_parent
            .entry(block.prev_strong_hash())
            .or_default()
            .push(Arc::clone(block));

        tracing::trace!(
            target: LOG_TARGET,
            "Delta block {hash} has weak POW {}",
            self.weak_pow(block),
        );

        true
    }

    /// Records a new strong block and evicts the delta blocks of the oldest tracked one once
    /// the window is full.
    pub fn new_strong(&mut self, hash: BlockHash) {
        if self.tracked_strong_blocks.contains(&hash) {
            return;
        }

        tracing::debug!(target: LOG_TARGET, "New strong block {hash}");

        self.tracked_strong_blocks.push_back(hash);

        while self.tracked_strong_blocks.len() > self.max_tracked {
            let Some(evicted) = self.tracked_strong_blocks.pop_front() else {
                break;
            };

            let removed = self.by_strong_parent.remove(&evicted).unwrap_or_default();
            for block in &removed {
                self.known.remove(&block.hash());
            }

            tracing::debug!(
                target: LOG_TARGET,
                "Evicted strong block {evicted} and {} delta blocks on top of it",
                removed.len(),
            );
        }
    }

    /// Whether `hash` is one of the tracked strong blocks.
    pub fn known_strong(&self, hash: &BlockHash) -> bool {
        self.tracked_strong_blocks.contains(hash)
    }

    pub fn tracked_strong_blocks(&self) -> impl Iterator<Item = &BlockHash> {
        self.tracked_strong_blocks.iter()
    }

    pub fn by_hash(&self, hash: &BlockHash) -> Option<Arc<DeltaBlock>> {
        self.known.get(hash).cloned()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.known.contains_key(hash)
    }

    /// Delta blocks built on `strong`, in receive order.
    pub fn received_for_strong(&self, strong: &BlockHash) -> &[Arc<DeltaBlock>] {
        self.by_strong_parent
            .get(strong)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The most recently received delta block built on `strong`.
    pub fn latest_for_strong(&self, strong: &BlockHash) -> Option<Arc<DeltaBlock>> {
        self.received_for_strong(strong).last().cloned()
    }

    /// All delta blocks grouped by strong parent, each group in receive order.
    pub fn known_in_receive_order(&self) -> BTreeMap<BlockHash, Vec<Arc<DeltaBlock>>> {
        self.by_strong_parent.clone()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Forgets every delta block and tracked strong block.
    pub fn reset(&mut self) {
        tracing::debug!(target: LOG_TARGET, "Resetting {} delta blocks", self.known.len());
        self.known.clear();
        self.by_strong_parent.clear();
        self.tracked_strong_blocks.clear();
    }
}
