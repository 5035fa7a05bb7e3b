//! Delta block entity and the coinbase encoding of weak ancestor pointers.

use crate::pow::PowChecker;
use crate::types::{SpendMap, TransactionMap, TxSlot, WeakPow};
use bitcoin::block::Header;
use bitcoin::hashes::Hash;
use bitcoin::{Amount, BlockHash, OutPoint, ScriptBuf, Transaction, TxOut, Txid};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

const LOG_TARGET: &str = "deltablocks";

/// `OP_RETURN`.
const OP_RETURN: u8 = 0x6a;

/// Push of 34 bytes: the two byte tag plus the hash.
const PUSH_LEN: u8 = 0x22;

/// Tag identifying an ancestor pointer output.
const ANCESTOR_TAG: [u8; 2] = *b"DB";

/// Full length of an ancestor pointer script.
const ANCESTOR_SCRIPT_LEN: usize = 2 + ANCESTOR_TAG.len() + 32;

/// Returns the zero-value output pointing at the weak ancestor `hash`.
pub fn ancestor_output(hash: BlockHash) -> TxOut {
    let mut script = Vec::with_capacity(ANCESTOR_SCRIPT_LEN);
    script.push(OP_RETURN);
    script.push(PUSH_LEN);
    script.extend_from_slice(&ANCESTOR_TAG);
    script.extend_from_slice(hash.as_byte_array());

    TxOut {
        value: Amount::ZERO,
        script_pubkey: ScriptBuf::from_bytes(script),
    }
}

/// Appends one ancestor pointer output per hash to `coinbase`.
pub fn add_ancestor_outputs(coinbase: &mut Transaction, ancestors: &[BlockHash]) {
    coinbase
        .output
        .extend(ancestors.iter().copied().map(ancestor_output));
}

fn parse_ancestor_output(output: &TxOut) -> Option<BlockHash> {
    if output.value != Amount::ZERO {
        return None;
    }

    let bytes = output.script_pubkey.as_bytes();
    if bytes.len() != ANCESTOR_SCRIPT_LEN
        || bytes[0] != OP_RETURN
        || bytes[1] != PUSH_LEN
        || bytes[2..4] != ANCESTOR_TAG
    {
        return None;
    }

    let hash: [u8; 32] = bytes[4..].try_into().ok()?;
    Some(BlockHash::from_byte_array(hash))
}

/// Extracts the weak ancestor pointers from `coinbase`.
///
/// The result preserves output order. Repeated pointers are dropped, the first one wins.
pub fn parse_ancestor_hashes(coinbase: &Transaction) -> Vec<BlockHash> {
    let mut hashes: Vec<BlockHash> = Vec::new();

    for hash in coinbase.output.iter().filter_map(parse_ancestor_output) {
        if hashes.contains(&hash) {
            tracing::warn!(
                target: LOG_TARGET,
                txid = %coinbase.compute_txid(),
                "Skipping duplicate weak ancestor pointer {hash}",
            );
            continue;
        }
        hashes.push(hash);
    }

    hashes
}

/// Mutable part of a delta block.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeltaState {
    pub(crate) tx_state: TransactionMap,
    pub(crate) spend_index: SpendMap,
    pub(crate) delta_set: TransactionMap,
    pub(crate) all_transactions_known: bool,
}

/// A node of the weak block DAG.
///
/// The header, the coinbase and the ancestor pointers are fixed at construction. The
/// transaction state is filled in once the whole delta set is known and verified against
/// the header's merkle root.
#[derive(Debug)]
pub struct DeltaBlock {
    header: Header,
    hash: BlockHash,
    coinbase: Arc<Transaction>,
    is_strong: bool,
    weak_ancestor_hashes: Vec<BlockHash>,
    state: RwLock<DeltaState>,
    /// Only terminal values are stored here.
    cached_weak_pow: OnceLock<WeakPow>,
}

impl DeltaBlock {
    /// Wraps `header` and `coinbase` into a delta block.
    pub fn new(header: Header, coinbase: Transaction, pow_checker: &dyn PowChecker) -> Self {
        let hash = header.block_hash();
        let is_strong = pow_checker.check_pow(hash, header.bits);
        let weak_ancestor_hashes = parse_ancestor_hashes(&coinbase);
        let coinbase = Arc::new(coinbase);

        let tx_state = TransactionMap::new().insert(
            TxSlot::for_transaction(&coinbase),
            Arc::clone(&coinbase),
        );

        Self {
            header,
            hash,
            coinbase,
            is_strong,
            weak_ancestor_hashes,
            state: RwLock::new(DeltaState {
                tx_state,
                ..Default::default()
            }),
            cached_weak_pow: OnceLock::new(),
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    /// Hash of the strong block this delta block builds on.
    pub fn prev_strong_hash(&self) -> BlockHash {
        self.header.prev_blockhash
    }

    pub fn coinbase(&self) -> &Arc<Transaction> {
        &self.coinbase
    }

    /// Whether the header satisfies the full proof-of-work target.
    pub fn is_strong(&self) -> bool {
        self.is_strong
    }

    /// Weak ancestor pointers, as found in the coinbase.
    pub fn weak_ancestor_hashes(&self) -> &[BlockHash] {
        &self.weak_ancestor_hashes
    }

    /// Whether the transaction state has been merged and verified.
    pub fn all_transactions_known(&self) -> bool {
        self.state.read().all_transactions_known
    }

    /// Snapshot of the full transaction state, coinbase included.
    pub fn tx_state(&self) -> TransactionMap {
        self.state.read().tx_state.clone()
    }

    /// Snapshot of the spend index.
    pub fn spend_index(&self) -> SpendMap {
        self.state.read().spend_index.clone()
    }

    /// Snapshot of the transactions this block adds on top of its ancestors.
    pub fn delta_set(&self) -> TransactionMap {
        self.state.read().delta_set.clone()
    }

    /// Transactions in canonical order, coinbase first.
    pub fn transactions(&self) -> Vec<Arc<Transaction>> {
        self.state.read().tx_state.values().cloned().collect()
    }

    pub fn num_transactions(&self) -> usize {
        self.state.read().tx_state.len()
    }

    /// Returns the txid spending `outpoint` in this block's state, if any.
    pub fn spends_output(&self, outpoint: &OutPoint) -> Option<Txid> {
        self.state.read().spend_index.get(outpoint).copied()
    }

    /// Two delta blocks are compatible if no output is spent by different transactions.
    pub fn compatible(&self, other: &DeltaBlock) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }

        let (ours, theirs) = (self.spend_index(), other.spend_index());
        let (small, large) = if ours.len() <= theirs.len() {
            (ours, theirs)
        } else {
            (theirs, ours)
        };

        small
            .iter()
            .all(|(outpoint, txid)| large.get(outpoint).is_none_or(|other| other == txid))
    }

    /// Whether this block is compatible with every block in `others`.
    pub fn compatible_with_all(&self, others: &[Arc<DeltaBlock>]) -> bool {
        others.iter().all(|other| self.compatible(other))
    }

    pub(crate) fn cached_weak_pow(&self) -> Option<WeakPow> {
        self.cached_weak_pow.get().copied()
    }

    pub(crate) fn cache_weak_pow(&self, weak_pow: WeakPow) {
        if weak_pow.is_terminal() {
            let _ = self.cached_weak_pow.set(weak_pow);
        }
    }

    /// Installs a verified state and flags the block as complete.
    pub(crate) fn set_complete(
        &self,
        tx_state: TransactionMap,
        spend_index: SpendMap,
        delta_set: TransactionMap,
    ) {
        let mut state = self.state.write();
        state.tx_state = tx_state;
        state.spend_index = spend_index;
        state.delta_set = delta_set;
        state.all_transactions_known = true;
    }

    #[cfg(test)]
    pub(crate) fn overwrite_state(&self, state: DeltaState) {
        *self.state.write() = state;
    }
}
