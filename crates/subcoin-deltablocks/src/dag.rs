//! Algorithms on the weak block DAG.
//!
//! All of them run on an already locked [`Registry`], public operations calling each other
//! therefore never take the engine lock twice.

use crate::delta_block::DeltaBlock;
use crate::inner::Registry;
use crate::pow;
use crate::template::DeltaBlockTemplate;
use crate::types::{SpendMap, TransactionMap, TxSlot, WeakPow};
use bitcoin::{BlockHash, Transaction};
use std::collections::HashSet;
use std::sync::Arc;

const LOG_TARGET: &str = "deltablocks";

impl Registry {
    /// Resolves the weak ancestor pointers of `block`, skipping strong blocks.
    ///
    /// Returns `None` if any pointer is unknown.
    pub fn resolve_ancestors(&self, block: &DeltaBlock) -> Option<Vec<Arc<DeltaBlock>>> {
        let mut ancestors = Vec::with_capacity(block.weak_ancestor_hashes().len());
        for hash in block.weak_ancestor_hashes() {
            let Some(ancestor) = self.by_hash(hash) else {
                tracing::trace!(
                    target: LOG_TARGET,
                    "Delta block {} misses ancestor {hash}",
                    block.hash(),
                );
                return None;
            };
            if !ancestor.is_strong() {
                ancestors.push(ancestor);
            }
        }
        Some(ancestors)
    }

    /// Direct weak ancestors of `block`.
    ///
    /// Empty if any ancestor is unknown, which is not the same as having no ancestors.
    pub fn ancestors(&self, block: &DeltaBlock) -> Vec<Arc<DeltaBlock>> {
        self.resolve_ancestors(block).unwrap_or_default()
    }

    /// Ancestor pointers of `block` that do not resolve to a known delta block.
    pub fn missing_ancestors(&self, block: &DeltaBlock) -> Vec<BlockHash> {
        block
            .weak_ancestor_hashes()
            .iter()
            .filter(|hash| !self.contains(hash))
            .copied()
            .collect()
    }

    /// Transitive weak ancestors of `block`, each listed once.
    pub fn all_ancestors(&self, block: &DeltaBlock) -> Vec<Arc<DeltaBlock>> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        let mut todo = self.ancestors(block);

        while let Some(ancestor) = todo.pop() {
            if !seen.insert(ancestor.hash()) {
                continue;
            }
            todo.extend(self.ancestors(&ancestor));
            result.push(ancestor);
        }

        result
    }

    /// Merges the transaction state of `ancestors`.
    ///
    /// The ancestor with the most transactions is taken as is (minus its coinbase), only the
    /// delta sets of blocks it does not already cover are added on top.
    pub fn merge_delta_blocks(&self, ancestors: &[Arc<DeltaBlock>]) -> (TransactionMap, SpendMap) {
        let mut base: Option<&Arc<DeltaBlock>> = None;
        for ancestor in ancestors {
            if base.is_none_or(|b| ancestor.num_transactions() > b.num_transactions()) {
                base = Some(ancestor);
            }
        }

        let Some(base) = base else {
            return (TransactionMap::new(), SpendMap::new());
        };

        let base_state = base.tx_state();
        let mut tx_state = match base_state.first().map(|(slot, _)| *slot) {
            Some(slot) if slot.is_coinbase() => base_state.remove(&slot),
            _ => base_state,
        };
        let mut spend_index = base.spend_index();

        let mut covered: HashSet<BlockHash> = self
            .all_ancestors(base)
            .iter()
            .map(|ancestor| ancestor.hash())
            .collect();
        covered.insert(base.hash());

        let mut todo: Vec<Arc<DeltaBlock>> = ancestors
            .iter()
            .rev()
            .filter(|ancestor| ancestor.hash() != base.hash())
            .cloned()
            .collect();

        while let Some(block) = todo.pop() {
            if !covered.insert(block.hash()) {
                continue;
            }

            let delta_set = block.delta_set();
            // Outputs respent within a block stay attributed to the spender that block kept.
            let block_spends = block.spend_index();
            tracing::trace!(
                target: LOG_TARGET,
                "Merging {} transactions of delta block {}",
                delta_set.len(),
                block.hash(),
            );

            for (slot, tx) in delta_set.iter() {
                tx_state = tx_state.insert(*slot, Arc::clone(tx));
                for input in &tx.input {
                    if block_spends.get(&input.previous_output) == Some(&slot.txid()) {
                        spend_index = spend_index.insert(input.previous_output, slot.txid());
                    }
                }
            }

            todo.extend(self.ancestors(&block));
        }

        (tx_state, spend_index)
    }

    /// Counts the distinct weak blocks reachable from `merge_set`, the set itself included.
    ///
    /// Every block visited must be complete and build on `prev_strong_hash`.
    pub fn weak_pow_of_set(
        &self,
        merge_set: &[Arc<DeltaBlock>],
        prev_strong_hash: BlockHash,
    ) -> WeakPow {
        let mut visited = HashSet::new();
        let mut todo = merge_set.to_vec();

        while let Some(block) = todo.pop() {
            if !visited.insert(block.hash()) {
                continue;
            }
            if !block.all_transactions_known() {
                return WeakPow::Incomplete;
            }
            if block.prev_strong_hash() != prev_strong_hash {
                return WeakPow::Invalid;
            }
            match self.resolve_ancestors(&block) {
                Some(ancestors) => todo.extend(ancestors),
                None => return WeakPow::Incomplete,
            }
        }

        WeakPow::Valid(visited.len() as u32)
    }

    /// Weak proof-of-work of `block`: its consistent weak ancestors plus one for itself.
    pub fn weak_pow(&self, block: &DeltaBlock) -> WeakPow {
        if let Some(cached) = block.cached_weak_pow() {
            return cached;
        }

        if !block.all_transactions_known() {
            return WeakPow::Incomplete;
        }

        let Some(ancestors) = self.resolve_ancestors(block) else {
            return WeakPow::Incomplete;
        };

        let weak_pow = match self.weak_pow_of_set(&ancestors, block.prev_strong_hash()) {
            WeakPow::Valid(n) => WeakPow::Valid(n + 1),
            other => other,
        };

        tracing::trace!(target: LOG_TARGET, "Weak POW of {}: {weak_pow}", block.hash());

        block.cache_weak_pow(weak_pow);
        weak_pow
    }

    /// Delta blocks on top of `strong` that no other delta block on top of `strong` builds on,
    /// in receive order.
    pub fn tips(&self, strong: &BlockHash) -> Vec<Arc<DeltaBlock>> {
        let received = self.received_for_strong(strong);

        let not_a_tip: HashSet<BlockHash> = received
            .iter()
            .flat_map(|block| self.ancestors(block))
            .map(|ancestor| ancestor.hash())
            .collect();

        received
            .iter()
            .filter(|block| !not_a_tip.contains(&block.hash()))
            .cloned()
            .collect()
    }

    /// Builds a template merging the compatible set of tips with the most weak proof-of-work.
    ///
    /// `tips_override` replaces the registry's tips as merge candidates.
    pub fn best_template(
        &self,
        strong: &BlockHash,
        tips_override: Option<&[Arc<DeltaBlock>]>,
    ) -> DeltaBlockTemplate {
        let tips = match tips_override {
            Some(tips) => tips.to_vec(),
            None => self.tips(strong),
        };

        let mut candidates: Vec<Vec<Arc<DeltaBlock>>> = Vec::new();
        // Strong blocks end a branch, they are never merged as weak ancestors. Tips still
        // waiting for their transactions can't be merged either.
        for tip in tips
            .into_iter()
            .filter(|tip| !tip.is_strong() && tip.all_transactions_known())
        {
            let mut joined = false;
            for candidate in candidates.iter_mut() {
                if tip.compatible_with_all(candidate) {
                    candidate.push(Arc::clone(&tip));
                    joined = true;
                }
            }
            if !joined {
                candidates.push(vec![tip]);
            }
        }

        let mut best: Option<(u32, Vec<Arc<DeltaBlock>>)> = None;
        for candidate in candidates {
            match self.weak_pow_of_set(&candidate, *strong) {
                WeakPow::Valid(score) => {
                    if best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
                        best = Some((score, candidate));
                    }
                }
                weak_pow => {
                    tracing::trace!(
                        target: LOG_TARGET,
                        "Skipping {} merge candidates with weak POW {weak_pow}",
                        candidate.len(),
                    );
                }
            }
        }

        let (score, selected) = best.unwrap_or_default();
        let (tx_state, spend_index) = self.merge_delta_blocks(&selected);
        let ancestor_hashes: Vec<BlockHash> = selected.iter().map(|tip| tip.hash()).collect();

        tracing::debug!(
            target: LOG_TARGET,
            "Template on {strong} merges {} tips with weak POW {score}, {} transactions",
            ancestor_hashes.len(),
            tx_state.len(),
        );

        DeltaBlockTemplate::new(*strong, ancestor_hashes, tx_state, spend_index)
    }

    /// Merges the ancestors of `block`, adds `transactions` on top and marks the block complete
    /// if the result matches the header's merkle root.
    ///
    /// Coinbase transactions in `transactions` are ignored. Returns whether the block is
    /// complete.
    pub fn try_make_complete(&self, block: &DeltaBlock, transactions: Vec<Transaction>) -> bool {
        if block.all_transactions_known() {
            return true;
        }

        let hash = block.hash();
        let Some(ancestors) = self.resolve_ancestors(block) else {
            tracing::debug!(target: LOG_TARGET, "Can't complete {hash}, ancestors missing");
            return false;
        };

        let (mut tx_state, mut spend_index) = self.merge_delta_blocks(&ancestors);
        tx_state = tx_state.insert(
            TxSlot::for_transaction(block.coinbase()),
            Arc::clone(block.coinbase()),
        );

        let mut delta_set = TransactionMap::new();
        for tx in transactions.into_iter().filter(|tx| !tx.is_coinbase()) {
            let slot = TxSlot::Ordered(tx.compute_txid());

            for input in &tx.input {
                match spend_index.get(&input.previous_output) {
                    Some(spender) if *spender != slot.txid() => {
                        tracing::debug!(
                            target: LOG_TARGET,
                            "{} in {hash} respends {:?} already spent by {spender}",
                            slot.txid(),
                            input.previous_output,
                        );
                    }
                    Some(_) => {}
                    None => {
                        spend_index = spend_index.insert(input.previous_output, slot.txid());
                    }
                }
            }

            let tx = Arc::new(tx);
            tx_state = tx_state.insert(slot, Arc::clone(&tx));
            delta_set = delta_set.insert(slot, tx);
        }

        if pow::merkle_root(&tx_state) != Some(block.header().merkle_root) {
            tracing::debug!(
                target: LOG_TARGET,
                "Merkle root mismatch, delta block {hash} stays incomplete",
            );
            return false;
        }

        tracing::debug!(
            target: LOG_TARGET,
            "Completed delta block {hash} with {} new transactions, {} in total",
            delta_set.len(),
            tx_state.len(),
        );

        block.set_complete(tx_state, spend_index, delta_set);
        true
    }
}
