//! Core type definitions for the delta block engine.

use bitcoin::{BlockHash, OutPoint, Transaction, Txid};
use std::fmt;
use std::sync::Arc;
use subcoin_persistent_map::PersistentMap;

/// Canonical (LTOR) sort key of a transaction inside a delta block state.
///
/// The coinbase sorts before every other transaction, the rest sort by txid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TxSlot {
    Coinbase(Txid),
    Ordered(Txid),
}

impl TxSlot {
    /// Returns the slot for `tx`.
    pub fn for_transaction(tx: &Transaction) -> Self {
        let txid = tx.compute_txid();
        if tx.is_coinbase() {
            Self::Coinbase(txid)
        } else {
            Self::Ordered(txid)
        }
    }

    pub fn txid(&self) -> Txid {
        match self {
            Self::Coinbase(txid) | Self::Ordered(txid) => *txid,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self, Self::Coinbase(_))
    }
}

/// Persistent transaction map, keyed in canonical order.
pub type TransactionMap = PersistentMap<TxSlot, Arc<Transaction>>;

/// Persistent spend index: consumed output => txid of the spending transaction.
pub type SpendMap = PersistentMap<OutPoint, Txid>;

/// Result of the weak proof-of-work accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakPow {
    /// Number of consistent weak blocks represented, including the block itself.
    Valid(u32),
    /// Some ancestor is unknown or not complete yet, retry later.
    Incomplete,
    /// Some ancestor builds on a different strong block. Terminal.
    Invalid,
}

impl WeakPow {
    /// Integer encoding used on the wire and over RPC: `n`, `-1` or `-2`.
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Valid(n) => i64::from(*n),
            Self::Incomplete => -1,
            Self::Invalid => -2,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Whether the value may be cached forever.
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self, Self::Incomplete)
    }
}

impl fmt::Display for WeakPow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

/// Delta block errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Delta blocks are disabled")]
    Disabled,

    #[error("Delta block {0} already known")]
    AlreadyKnown(BlockHash),

    #[error("Delta block {0} does not satisfy the weak proof-of-work target")]
    InsufficientWeakPow(BlockHash),

    #[error("Strong parent {0} is not a recent strong block")]
    UnknownStrongParent(BlockHash),

    #[error("Delta block carries no transactions")]
    MissingCoinbase,

    #[error("First transaction is not a coinbase")]
    FirstTransactionIsNotCoinbase,

    #[error("Delta block {block} is missing weak ancestors: {missing:?}")]
    MissingAncestors {
        block: BlockHash,
        missing: Vec<BlockHash>,
    },

    #[error("Merkle root of delta block {0} does not match its transactions")]
    BadMerkleRoot(BlockHash),
}
