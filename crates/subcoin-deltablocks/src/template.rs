use crate::delta_block::add_ancestor_outputs;
use crate::pow;
use crate::types::{SpendMap, TransactionMap, TxSlot};
use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxMerkleNode,
    Witness,
};
use std::sync::Arc;

/// Mining template on top of a merged set of delta block tips.
///
/// Produced by [`crate::DeltaBlocks::best_template`]. The block assembler may add further
/// transactions and coinbase outputs, then mine a header built with [`Self::header`].
#[derive(Debug, Clone)]
pub struct DeltaBlockTemplate {
    /// Strong block the template builds on.
    pub strong_parent: BlockHash,
    /// Coinbase carrying one pointer output per selected tip.
    pub coinbase: Transaction,
    /// The selected tips.
    pub weak_ancestor_hashes: Vec<BlockHash>,
    /// Merged transaction state, without any coinbase.
    pub tx_state: TransactionMap,
    pub spend_index: SpendMap,
    /// Transactions added on top of the merged tips.
    pub delta_set: TransactionMap,
}

impl DeltaBlockTemplate {
    pub(crate) fn new(
        strong_parent: BlockHash,
        weak_ancestor_hashes: Vec<BlockHash>,
        tx_state: TransactionMap,
        spend_index: SpendMap,
    ) -> Self {
        let mut coinbase = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: Vec::new(),
        };
        add_ancestor_outputs(&mut coinbase, &weak_ancestor_hashes);

        Self {
            strong_parent,
            coinbase,
            weak_ancestor_hashes,
            tx_state,
            spend_index,
            delta_set: TransactionMap::new(),
        }
    }

    /// Adds `tx` on top of the template.
    ///
    /// Returns `false` and leaves the template untouched if `tx` is a coinbase, is already
    /// included or spends an output that is already spent.
    pub fn add_transaction(&mut self, tx: Transaction) -> bool {
        if tx.is_coinbase() {
            return false;
        }

        let txid = tx.compute_txid();
        let slot = TxSlot::Ordered(txid);
        if self.tx_state.contains_key(&slot) {
            return false;
        }

        let mut spend_index = self.spend_index.clone();
        for input in &tx.input {
            if spend_index.contains_key(&input.previous_output) {
                return false;
            }
            spend_index = spend_index.insert(input.previous_output, txid);
        }

        let tx = Arc::new(tx);
        self.tx_state = self.tx_state.insert(slot, Arc::clone(&tx));
        self.delta_set = self.delta_set.insert(slot, tx);
        self.spend_index = spend_index;

        true
    }

    /// Number of transactions, coinbase included.
    pub fn num_transactions(&self) -> usize {
        self.tx_state.len() + 1
    }

    /// All transactions in canonical order, coinbase first.
    pub fn transactions(&self) -> Vec<Transaction> {
        std::iter::once(self.coinbase.clone())
            .chain(self.tx_state.values().map(|tx| Transaction::clone(tx)))
            .collect()
    }

    /// Transactions to hand to [`crate::DeltaBlocks::try_make_complete`] once the template
    /// has been mined.
    pub fn delta_transactions(&self) -> Vec<Transaction> {
        self.delta_set
            .values()
            .map(|tx| Transaction::clone(tx))
            .collect()
    }

    pub fn merkle_root(&self) -> TxMerkleNode {
        let full = self.tx_state.insert(
            TxSlot::for_transaction(&self.coinbase),
            Arc::new(self.coinbase.clone()),
        );
        pow::merkle_root(&full).unwrap_or_else(TxMerkleNode::all_zeros)
    }

    /// Builds a header committing to the current template content.
    pub fn header(
        &self,
        version: BlockVersion,
        time: u32,
        bits: CompactTarget,
        nonce: u32,
    ) -> Header {
        Header {
            version,
            prev_blockhash: self.strong_parent,
            merkle_root: self.merkle_root(),
            time,
            bits,
            nonce,
        }
    }
}
