//! Proof-of-work and merkle helpers for delta blocks.

use crate::types::TransactionMap;
use bitcoin::consensus::Params;
use bitcoin::{BlockHash, CompactTarget, Network, Target, TxMerkleNode};
use num_bigint::BigUint;
use num_traits::One;

/// Checks whether a block hash satisfies the full (strong) target encoded in `bits`.
pub trait PowChecker: Send + Sync {
    fn check_pow(&self, hash: BlockHash, bits: CompactTarget) -> bool;
}

impl<F> PowChecker for F
where
    F: Fn(BlockHash, CompactTarget) -> bool + Send + Sync,
{
    fn check_pow(&self, hash: BlockHash, bits: CompactTarget) -> bool {
        self(hash, bits)
    }
}

/// [`PowChecker`] following the consensus rules of a network.
#[derive(Debug, Clone)]
pub struct ConsensusPowChecker {
    pow_limit: Target,
}

impl ConsensusPowChecker {
    pub fn new(network: Network) -> Self {
        Self {
            pow_limit: Params::new(network).max_attainable_target,
        }
    }
}

impl PowChecker for ConsensusPowChecker {
    fn check_pow(&self, hash: BlockHash, bits: CompactTarget) -> bool {
        let target = Target::from_compact(bits);
        if target > self.pow_limit {
            return false;
        }
        target.is_met_by(hash)
    }
}

/// Returns the weak target derived from the strong target `bits`.
///
/// The weak target is `ratio` times the strong one, capped at `2^256 - 1`.
pub fn weak_target(bits: CompactTarget, ratio: u32) -> Target {
    let strong = BigUint::from_bytes_le(&Target::from_compact(bits).to_le_bytes());
    let max = (BigUint::one() << 256u32) - BigUint::one();
    let weak = (strong * ratio).min(max);

    let mut buf = [0u8; 32];
    let bytes = weak.to_bytes_le();
    buf[..bytes.len()].copy_from_slice(&bytes);
    Target::from_le_bytes(buf)
}

/// Returns `true` if `hash` meets the weak target derived from `bits`.
pub fn check_weak_pow(hash: BlockHash, bits: CompactTarget, ratio: u32) -> bool {
    weak_target(bits, ratio).is_met_by(hash)
}

/// Computes the merkle root over `txs` in canonical order.
///
/// Returns `None` for an empty map.
pub fn merkle_root(txs: &TransactionMap) -> Option<TxMerkleNode> {
    let hashes = txs.keys().map(|slot| slot.txid().to_raw_hash());
    bitcoin::merkle_tree::calculate_root(hashes).map(|h| h.into())
}
