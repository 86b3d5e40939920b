//! Inner nodes, the branching points of the authenticated tree.

use crate::{
    check_remaining, err_at,
    hash::{inner_hash, ZEROS_HASH},
    node::{child_type, is_bit_set, Leaf, Node, NODE_INNER, NODE_LEAF, NODE_NULL},
    proof::Proof,
    store::Store,
    util, Result, HASHSIZE, LAST_BIT, MINBLOCK, TREE_NAME_LIMIT,
};

/// Branching node at a fixed bit-depth of the keyhash, in `[0,255]`.
/// Bit-depth strictly increases along any root-to-leaf path. The node
/// at bit 0 is a tree root and additionally carries the tree name and
/// the current/previous version pair.
pub(crate) struct Inner {
    pub(crate) bit: u8,

    pub(crate) hash: Option<[u8; HASHSIZE]>,

    pub(crate) findex: u32,
    pub(crate) fpos: u32,
    pub(crate) left_findex: u32,
    pub(crate) left_fpos: u32,
    pub(crate) right_findex: u32,
    pub(crate) right_fpos: u32,

    pub(crate) left: Option<Node>,
    pub(crate) right: Option<Node>,

    // only valid on the node at bit 0.
    pub(crate) name: String,
    pub(crate) version_current: u64,
    pub(crate) version_previous: u64,

    pub(crate) dirty: bool,
    pub(crate) partial: bool,
}

impl Inner {
    pub(crate) fn new(bit: u8) -> Inner {
        Inner {
            bit,
            hash: None,
            findex: 0,
            fpos: 0,
            left_findex: 0,
            left_fpos: 0,
            right_findex: 0,
            right_fpos: 0,
            left: None,
            right: None,
            name: String::new(),
            version_current: 0,
            version_previous: 0,
            dirty: true, // new nodes are dirty by default
            partial: false,
        }
    }

    // stub from a parent record, only the address and hash are known.
    pub(crate) fn new_partial(bit: u8, findex: u32, fpos: u32, hash: [u8; HASHSIZE]) -> Inner {
        let mut inner = Inner::new(bit);
        inner.findex = findex;
        inner.fpos = fpos;
        inner.hash = Some(hash);
        inner.dirty = false;
        inner.partial = true;
        inner
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    pub(crate) fn position(&self) -> (u32, u32) {
        (self.findex, self.fpos)
    }

    pub(crate) fn lhash(&mut self, store: &Store) -> Result<[u8; HASHSIZE]> {
        match &mut self.left {
            Some(node) => node.hash(store),
            None => Ok(*ZEROS_HASH),
        }
    }

    pub(crate) fn rhash(&mut self, store: &Store) -> Result<[u8; HASHSIZE]> {
        match &mut self.right {
            Some(node) => node.hash(store),
            None => Ok(*ZEROS_HASH),
        }
    }

    pub(crate) fn load_partial(&mut self, store: &Store) -> Result<()> {
        if self.partial {
            self.load_full(store)?;
        }
        Ok(())
    }

    pub(crate) fn load_full(&mut self, store: &Store) -> Result<()> {
        if self.findex == 0 && self.fpos == 0 {
            return err_at!(OutOfRange, msg: "invalid inner position (0,0)");
        }

        // at least the children addresses and hashes land in this read.
        let mut buf = vec![0; MINBLOCK];
        let count = store.read(self.findex, self.fpos, &mut buf)?;
        self.unmarshal(&buf[..count])?;
        self.partial = false;
        Ok(())
    }

    pub(crate) fn hash(&mut self, store: &Store) -> Result<[u8; HASHSIZE]> {
        if self.partial {
            self.load_full(store)?;
        }
        if let Some(hash) = self.hash {
            return Ok(hash);
        }

        let lhash = self.lhash(store)?;
        let rhash = self.rhash(store)?;
        let hash = inner_hash(&lhash, &rhash);
        self.hash = Some(hash);
        Ok(hash)
    }

    /// Insert leaves under this node, descending by keyhash bits. All
    /// visited nodes turn dirty and drop their cached hash.
    pub(crate) fn insert(&mut self, store: &Store, leaves: Vec<Box<Leaf>>) -> Result<()> {
        self.load_partial(store)?;
        self.dirty = true;
        self.hash = None;
        for leaf in leaves {
            self.insert_leaf(store, leaf)?;
        }
        Ok(())
    }

    // insert a leaf recursively till it settles at the correct position.
    fn insert_leaf(&mut self, store: &Store, leaf: Box<Leaf>) -> Result<()> {
        let bit = self.bit;
        let slot = if is_bit_set(&leaf.keyhash, bit as usize) {
            &mut self.right
        } else {
            &mut self.left
        };

        match slot.take() {
            // the slot is a dead end, we are done.
            None => {
                *slot = Some(Node::Leaf(leaf));
                Ok(())
            }
            Some(Node::Inner(mut inner)) => {
                let res = inner.insert(store, vec![leaf]);
                *slot = Some(Node::Inner(inner));
                res
            }
            Some(Node::Leaf(mut old)) => {
                if old.partial {
                    old.load_full(store)?;
                }
                if old.keyhash == leaf.keyhash || (bit as usize) == LAST_BIT {
                    // overwrite the value; earlier versions stay
                    // reachable through earlier roots.
                    let res = old.put(store, &leaf.value);
                    *slot = Some(Node::Leaf(old));
                    res
                } else {
                    // enough slack, push both leaves one bit deeper.
                    let mut inner = Box::new(Inner::new(bit + 1));
                    let res = inner.insert(store, vec![old, leaf]);
                    *slot = Some(Node::Inner(inner));
                    res
                }
            }
        }
    }

    pub(crate) fn get(&mut self, store: &Store, keyhash: &[u8; HASHSIZE]) -> Result<Vec<u8>> {
        self.load_partial(store)?;

        if is_bit_set(keyhash, self.bit as usize) {
            match &mut self.right {
                Some(node) => node.get(store, keyhash),
                None => err_at!(
                    KeyNotFound,
                    msg: "right dead end at {}, keyhash {:02x?}", self.bit, keyhash
                ),
            }
        } else {
            match &mut self.left {
                Some(node) => node.get(store, keyhash),
                None => err_at!(
                    KeyNotFound,
                    msg: "left dead end at {}, keyhash {:02x?}", self.bit, keyhash
                ),
            }
        }
    }

    /// Delete by keyhash. On the way back up, empty children are
    /// dropped and an inner child left with a single leaf collapses
    /// into this node's slot. Deleting an absent key is a no-op.
    /// The returns are in this order (empty, changed).
    pub(crate) fn delete(&mut self, store: &Store, keyhash: &[u8; HASHSIZE]) -> Result<(bool, bool)> {
        self.load_partial(store)?;

        let slot = if is_bit_set(keyhash, self.bit as usize) {
            &mut self.right
        } else {
            &mut self.left
        };
        let child = match slot.as_mut() {
            None => return Ok((false, false)),
            Some(child) => child,
        };

        let (empty, changed) = child.delete(store, keyhash)?;
        if changed {
            self.dirty = true;
            self.hash = None;
        }
        if empty {
            *slot = None;
            return Ok((self.is_empty(), changed));
        }
        if let Some(leaf) = only_child_leaf(slot) {
            *slot = Some(Node::Leaf(leaf));
        }
        Ok((false, changed))
    }

    pub(crate) fn prove(
        &mut self,
        store: &Store,
        keyhash: &[u8; HASHSIZE],
        proof: &mut Proof,
    ) -> Result<()> {
        self.load_partial(store)?;
        proof.set_version(1);

        if is_bit_set(keyhash, self.bit as usize) {
            let sibling = self.lhash(store)?;
            proof.add_trace(sibling);
            match &mut self.right {
                Some(node) => node.prove(store, keyhash, proof),
                None => {
                    proof.add_deadend();
                    Ok(())
                }
            }
        } else {
            let sibling = self.rhash(store)?;
            proof.add_trace(sibling);
            match &mut self.left {
                Some(node) => node.prove(store, keyhash, proof),
                None => {
                    proof.add_deadend();
                    Ok(())
                }
            }
        }
    }

    pub(crate) fn get_key_value(
        &mut self,
        store: &Store,
        keyhash: &[u8; HASHSIZE],
        valid_bits: usize,
        used_bits: usize,
    ) -> Result<(usize, Vec<u8>, Vec<u8>)> {
        self.load_partial(store)?;

        if used_bits > valid_bits || valid_bits == 0 {
            return err_at!(
                KeyNotFound,
                msg: "dead end at {}, keyhash {:02x?}", self.bit, keyhash
            );
        }

        let slot = if is_bit_set(keyhash, self.bit as usize) {
            &mut self.right
        } else {
            &mut self.left
        };
        match slot {
            Some(node) => node.get_key_value(store, keyhash, valid_bits, used_bits + 1),
            None => err_at!(
                KeyNotFound,
                msg: "dead end at {}, keyhash {:02x?}", self.bit, keyhash
            ),
        }
    }

    /// Serialize this node. Layout: 1 byte total length, 1 byte
    /// left-child type, 1 byte right-child type, then, only at bit 0,
    /// varint current-version, varint previous-version, varint name
    /// length and the name, then per present child varint findex,
    /// varint fpos and the 32-byte child hash. The length byte caps a
    /// node at 255 bytes, which is why tree names stop at 127.
    pub(crate) fn marshal_to(
        &mut self,
        store: &Store,
        buf: &mut Vec<u8>,
        name: &str,
    ) -> Result<usize> {
        buf.clear();
        buf.push(0); // total length, patched below
        buf.push(child_type(&self.left));
        buf.push(child_type(&self.right));

        if self.bit == 0 {
            util::encode_uvarint(self.version_current, buf);
            util::encode_uvarint(self.version_previous, buf);
            util::encode_uvarint(name.len() as u64, buf);
            buf.extend_from_slice(name.as_bytes());
        }

        if self.left.is_some() {
            util::encode_uvarint(u64::from(self.left_findex), buf);
            util::encode_uvarint(u64::from(self.left_fpos), buf);
            let lhash = self.lhash(store)?;
            buf.extend_from_slice(&lhash);
        }
        if self.right.is_some() {
            util::encode_uvarint(u64::from(self.right_findex), buf);
            util::encode_uvarint(u64::from(self.right_fpos), buf);
            let rhash = self.rhash(store)?;
            buf.extend_from_slice(&rhash);
        }

        buf[0] = buf.len() as u8;
        Ok(buf.len())
    }

    /// Decode a serialized inner node. Children come back as partial
    /// stubs carrying only their address and hash; traversing into one
    /// triggers a read for that specific blob.
    pub(crate) fn unmarshal(&mut self, buf: &[u8]) -> Result<()> {
        check_remaining!(buf, 3, "inner node header")?;

        let buf = &buf[1..]; // total length, processed by the caller
        let (ltype, rtype) = (buf[0], buf[1]);
        let mut done = 2;

        if self.bit == 0 {
            let (version, n) = util::decode_uvarint(&buf[done..])?;
            self.version_current = version;
            done += n;
            let (version, n) = util::decode_uvarint(&buf[done..])?;
            self.version_previous = version;
            done += n;

            let (nlen, n) = util::decode_uvarint(&buf[done..])?;
            done += n;
            if (nlen as usize) > TREE_NAME_LIMIT {
                return err_at!(Corruption, msg: "tree name size {}", nlen);
            }
            let nlen = nlen as usize;
            check_remaining!(&buf[done..], nlen, "tree name")?;
            self.name = match std::str::from_utf8(&buf[done..done + nlen]) {
                Ok(name) => name.to_string(),
                Err(err) => return err_at!(Corruption, msg: "tree name not utf8, {}", err),
            };
            done += nlen;
        }

        let (left, n) = parse_child(self.bit, ltype, &buf[done..])?;
        self.left = left;
        done += n;
        let (right, _) = parse_child(self.bit, rtype, &buf[done..])?;
        self.right = right;

        Ok(())
    }
}

// leaves report (None, false); an inner reports its only child when
// that child is a leaf. Chains hanging lower are kept hanging.
fn only_child_leaf(slot: &mut Option<Node>) -> Option<Box<Leaf>> {
    let inner = match slot {
        Some(Node::Inner(inner)) => inner,
        _ => return None,
    };
    match (&inner.left, &inner.right) {
        (Some(Node::Leaf(_)), None) => match inner.left.take() {
            Some(Node::Leaf(leaf)) => Some(leaf),
            _ => None,
        },
        (None, Some(Node::Leaf(_))) => match inner.right.take() {
            Some(Node::Leaf(leaf)) => Some(leaf),
            _ => None,
        },
        _ => None,
    }
}

// parse one child record of a serialized inner node, returning the
// partial stub and the count of bytes consumed.
fn parse_child(bit: u8, node_type: u8, buf: &[u8]) -> Result<(Option<Node>, usize)> {
    match node_type {
        NODE_NULL => Ok((None, 0)),
        NODE_INNER | NODE_LEAF => {
            let (findex, fpos, hash, done) = parse_child_record(buf)?;
            let node = match node_type {
                NODE_INNER => {
                    let bit = match bit.checked_add(1) {
                        Some(bit) => bit,
                        None => return err_at!(Corruption, msg: "inner child below last bit"),
                    };
                    Node::Inner(Box::new(Inner::new_partial(bit, findex, fpos, hash)))
                }
                _ => Node::Leaf(Box::new(Leaf::new_partial(findex, fpos, hash))),
            };
            Ok((Some(node), done))
        }
        node_type => err_at!(Corruption, msg: "unknown node type {}", node_type),
    }
}

fn parse_child_record(buf: &[u8]) -> Result<(u32, u32, [u8; HASHSIZE], usize)> {
    let mut done = 0;

    let (findex, n) = util::decode_uvarint(&buf[done..])?;
    if findex > u64::from(u32::MAX) {
        return err_at!(Corruption, msg: "file index {} exceeds 4 billion files", findex);
    }
    done += n;

    let (fpos, n) = util::decode_uvarint(&buf[done..])?;
    if fpos > u64::from(u32::MAX) {
        return err_at!(Corruption, msg: "file position {} exceeds segment limit", fpos);
    }
    done += n;

    check_remaining!(&buf[done..], HASHSIZE, "child hash")?;
    let mut hash = [0_u8; HASHSIZE];
    hash.copy_from_slice(&buf[done..done + HASHSIZE]);
    done += HASHSIZE;

    Ok((findex as u32, fpos as u32, hash, done))
}

#[cfg(test)]
#[path = "inner_test.rs"]
mod inner_test;
