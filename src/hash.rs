//! Module implement the content hash backing the merkle tree.

use blake2::{Blake2s256, Digest};
use lazy_static::lazy_static;

use crate::{
    node::{NODE_INNER, NODE_LEAF},
    HASHSIZE,
};

lazy_static! {
    /// Canonical hash contributed by an absent child. Computed once as
    /// `H(leaf-tag ‖ zeros)`, so that tree hashes compose the same way
    /// no matter the order in which keys were inserted.
    pub(crate) static ref ZEROS_HASH: [u8; HASHSIZE] = {
        let mut hasher = Blake2s256::new();
        hasher.update([NODE_LEAF]);
        hasher.update([0_u8; HASHSIZE]);
        hasher.finalize().into()
    };
}

/// Return the 32-byte BLAKE2s-256 digest of `bytes`. User keys map to
/// tree positions through this function.
pub fn keyhash(bytes: &[u8]) -> [u8; HASHSIZE] {
    sum(bytes)
}

pub(crate) fn sum(bytes: &[u8]) -> [u8; HASHSIZE] {
    let mut hasher = Blake2s256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Leaf hash is `H(leaf-tag ‖ keyhash ‖ H(value))`.
pub(crate) fn leaf_hash(keyhash: &[u8; HASHSIZE], value_hash: &[u8; HASHSIZE]) -> [u8; HASHSIZE] {
    let mut hasher = Blake2s256::new();
    hasher.update([NODE_LEAF]);
    hasher.update(keyhash);
    hasher.update(value_hash);
    hasher.finalize().into()
}

/// Inner hash is `H(inner-tag ‖ left-hash ‖ right-hash)`.
pub(crate) fn inner_hash(lhash: &[u8; HASHSIZE], rhash: &[u8; HASHSIZE]) -> [u8; HASHSIZE] {
    let mut hasher = Blake2s256::new();
    hasher.update([NODE_INNER]);
    hasher.update(lhash);
    hasher.update(rhash);
    hasher.finalize().into()
}

#[cfg(test)]
#[path = "hash_test.rs"]
mod hash_test;
