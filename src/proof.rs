//! Module implement merkle proofs for existence and non-existence of
//! keys.

use crate::{
    check_remaining, err_at,
    hash::{inner_hash, leaf_hash, sum, ZEROS_HASH},
    node::{is_bit_set, set_bit},
    util, Result, HASHSIZE, MAX_VALUE_SIZE,
};

// proof terminals.
const MEMBER: u8 = 1;
const COLLISION: u8 = 2;
const DEADEND: u8 = 3;

const PROOF_VERSION: u8 = 1;

/// Proof of existence or non-existence of a key against a tree's root
/// hash.
///
/// A proof carries one sibling hash per descent step and one of three
/// terminals: the value itself for a member, the colliding leaf's
/// keyhash and value hash when the descent met a leaf with another
/// keyhash, or nothing when the descent met a dead end. The root hash
/// is not part of the proof; the verifier must hold it already.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Proof {
    version: u8,
    ptype: u8,
    trace: Vec<[u8; HASHSIZE]>,
    value: Vec<u8>,

    // collision keyhash and value-hash.
    ckey: [u8; HASHSIZE],
    cval: [u8; HASHSIZE],
}

impl Proof {
    pub fn new() -> Proof {
        Proof::default()
    }

    /// Prepare this value for reuse.
    pub fn reset(&mut self) {
        self.version = 0;
        self.ptype = 0;
        self.trace.truncate(0);
        self.value = Vec::new();
        self.ckey = [0; HASHSIZE];
        self.cval = [0; HASHSIZE];
    }

    pub(crate) fn set_version(&mut self, version: u8) {
        self.version = version;
    }

    pub(crate) fn add_trace(&mut self, hash: [u8; HASHSIZE]) {
        self.trace.push(hash);
    }

    pub(crate) fn add_deadend(&mut self) {
        self.ptype = DEADEND;
    }

    pub(crate) fn add_value(&mut self, value: &[u8]) {
        self.ptype = MEMBER;
        self.value = value.to_vec();
    }

    pub(crate) fn add_collision(&mut self, ckey: &[u8; HASHSIZE], cval: &[u8; HASHSIZE]) {
        self.ptype = COLLISION;
        self.ckey = *ckey;
        self.cval = *cval;
    }

    /// If this proof shows existence of a key, its associated value
    /// can be read here.
    pub fn value(&self) -> Vec<u8> {
        self.value.clone()
    }

    /// Verify that `key` exists, with this proof's value, in the tree
    /// whose root hash is `root`.
    pub fn verify_membership(&self, root: &[u8; HASHSIZE], key: &[u8]) -> bool {
        self.verify_membership_raw(root, &sum(key))
    }

    pub(crate) fn verify_membership_raw(
        &self,
        root: &[u8; HASHSIZE],
        keyhash: &[u8; HASHSIZE],
    ) -> bool {
        let leaf = leaf_hash(keyhash, &sum(&self.value));
        root == &self.root_for_leaf(keyhash, leaf)
    }

    /// Verify that `key` does not exist in the tree whose root hash is
    /// `root`.
    pub fn verify_non_membership(&self, root: &[u8; HASHSIZE], key: &[u8]) -> bool {
        self.verify_non_membership_raw(root, &sum(key))
    }

    pub(crate) fn verify_non_membership_raw(
        &self,
        root: &[u8; HASHSIZE],
        keyhash: &[u8; HASHSIZE],
    ) -> bool {
        match self.ptype {
            COLLISION => {
                let leaf = leaf_hash(&self.ckey, &self.cval);
                root == &self.root_for_leaf(keyhash, leaf)
            }
            DEADEND => root == &self.root_for_leaf(keyhash, *ZEROS_HASH),
            _ => false,
        }
    }

    // fold the trace back up, bit i of the keyhash picking the side
    // the sibling hash goes on.
    fn root_for_leaf(&self, keyhash: &[u8; HASHSIZE], leaf: [u8; HASHSIZE]) -> [u8; HASHSIZE] {
        let mut cur = leaf;
        for (i, sibling) in self.trace.iter().enumerate().rev() {
            cur = if is_bit_set(keyhash, i) {
                inner_hash(sibling, &cur)
            } else {
                inner_hash(&cur, sibling)
            };
        }
        cur
    }

    /// Serialize this proof.
    ///
    /// The wire layout is 1 byte version, 1 byte type, varint trace
    /// length, a 32-byte bitmap with bit `i` set iff `sibling[i]` is
    /// not the zero-hash, the non-zero siblings back to back, then the
    /// terminal: 32-byte collision keyhash and value-hash for a
    /// collision, varint-length-prefixed value for a member, nothing
    /// for a dead end.
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity((2 + self.trace.len()) * HASHSIZE);
        self.marshal_to(&mut buf);
        buf
    }

    /// Serialize this proof, appending to `buf`.
    pub fn marshal_to(&self, buf: &mut Vec<u8>) {
        buf.push(PROOF_VERSION);
        buf.push(self.ptype);
        util::encode_uvarint(self.trace.len() as u64, buf);

        let bitmap_pos = buf.len();
        let mut bitmap = [0_u8; HASHSIZE];
        buf.extend_from_slice(&bitmap);
        for (i, sibling) in self.trace.iter().enumerate() {
            if sibling != &*ZEROS_HASH {
                set_bit(&mut bitmap, i);
                buf.extend_from_slice(sibling);
            }
        }
        buf[bitmap_pos..bitmap_pos + HASHSIZE].copy_from_slice(&bitmap);

        match self.ptype {
            COLLISION => {
                buf.extend_from_slice(&self.ckey);
                buf.extend_from_slice(&self.cval);
            }
            MEMBER => {
                util::encode_uvarint(self.value.len() as u64, buf);
                buf.extend_from_slice(&self.value);
            }
            _ => (),
        }
    }

    /// Reverse of [Proof::marshal], deserialize `buf` into this proof
    /// for verification.
    pub fn unmarshal(&mut self, buf: &[u8]) -> Result<()> {
        self.reset();

        check_remaining!(buf, 3, "proof header")?;
        self.version = buf[0]; // the version is not checked, yet
        self.ptype = buf[1];

        let (trace_len, n) = util::decode_uvarint(&buf[2..])?;
        if trace_len < 1 || (trace_len as usize) > HASHSIZE * 8 {
            return err_at!(Corruption, msg: "invalid proof trace length {}", trace_len);
        }
        let mut done = 2 + n;

        check_remaining!(buf, done + HASHSIZE, "proof bitmap")?;
        let bitmap_pos = done;
        done += HASHSIZE;

        for i in 0..(trace_len as usize) {
            if is_bit_set(&buf[bitmap_pos..bitmap_pos + HASHSIZE], i) {
                check_remaining!(buf, done + HASHSIZE, "proof sibling")?;
                let mut hash = [0_u8; HASHSIZE];
                hash.copy_from_slice(&buf[done..done + HASHSIZE]);
                self.trace.push(hash);
                done += HASHSIZE;
            } else {
                self.trace.push(*ZEROS_HASH);
            }
        }

        match self.ptype {
            COLLISION => {
                check_remaining!(buf, done + (2 * HASHSIZE), "proof collision")?;
                self.ckey.copy_from_slice(&buf[done..done + HASHSIZE]);
                done += HASHSIZE;
                self.cval.copy_from_slice(&buf[done..done + HASHSIZE]);
            }
            MEMBER => {
                let (value_len, n) = util::decode_uvarint(&buf[done..])?;
                if (value_len as usize) > MAX_VALUE_SIZE {
                    return err_at!(Corruption, msg: "proof value size {}", value_len);
                }
                done += n;
                check_remaining!(buf, done + (value_len as usize), "proof value")?;
                self.value = buf[done..done + (value_len as usize)].to_vec();
            }
            _ => (),
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "proof_test.rs"]
mod proof_test;
