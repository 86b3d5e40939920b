//! Module implement the authenticated tree and its commit protocol.

use log::debug;
use rand::{rngs::OsRng, RngCore};

use crate::{
    err_at,
    hash::sum,
    node::{Inner, Leaf, Node},
    proof::Proof,
    snapshot::Snapshot,
    store::Store,
    util, Result, HASHSIZE, HASHSIZE_BITS, INNER_CACHE_DEPTH, MAX_KEYSIZE, MAX_VALUE_SIZE,
    MINBLOCK,
};

/// Tree is a named, versioned binary tree keyed by keyhash bits.
///
/// A tree value is single threaded; share a [Store] across threads,
/// not a tree. Mutations stay in memory, marked dirty, until the tree
/// is committed; uncommitted changes can be dropped with
/// [Tree::discard].
pub struct Tree {
    pub(crate) store: Store,
    pub(crate) root: Inner,
    pub(crate) name: String,
    pub(crate) tags: Vec<String>,
}

impl Tree {
    /// Return the name of this tree.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the current version number of this tree.
    pub fn version(&self) -> u64 {
        self.root.version_current
    }

    /// Return the version this tree was derived from. Parent versions
    /// are not necessarily sequential, but they are monotonically
    /// increasing; together they span a version DAG.
    pub fn parent_version(&self) -> u64 {
        self.root.version_previous
    }

    /// Put a key, value in the tree. If the key exists, its value is
    /// overwritten; earlier values stay reachable from earlier
    /// versions.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if value.len() > MAX_VALUE_SIZE {
            return err_at!(
                InvalidInput, msg: "value size {} > {}", value.len(), MAX_VALUE_SIZE
            );
        }
        if key.len() > MAX_KEYSIZE {
            return err_at!(InvalidInput, msg: "key size {} > {}", key.len(), MAX_KEYSIZE);
        }
        self.put_raw(sum(key), key, value)
    }

    pub(crate) fn put_raw(
        &mut self,
        keyhash: [u8; HASHSIZE],
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let leaf = Box::new(Leaf::new(keyhash, key, value));
        self.root.insert(&self.store, vec![leaf])
    }

    /// Get the value associated with `key`.
    pub fn get(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        self.get_raw(&sum(key))
    }

    pub(crate) fn get_raw(&mut self, keyhash: &[u8; HASHSIZE]) -> Result<Vec<u8>> {
        self.root.get(&self.store, keyhash)
    }

    /// Delete `key` from the tree. Deleting an absent key is a no-op.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.root.delete(&self.store, &sum(key))?;
        Ok(())
    }

    /// Return the merkle hash of the entire tree.
    pub fn hash(&mut self) -> Result<[u8; HASHSIZE]> {
        self.root.hash(&self.store)
    }

    /// Return whether this tree holds uncommitted changes.
    pub fn is_dirty(&self) -> bool {
        self.root.is_dirty()
    }

    /// Generate a proof for `key`, usable to prove existence or
    /// non-existence of the key against this tree's root hash. The
    /// root hash is not part of the proof and must reach the verifier
    /// through a trusted channel.
    pub fn generate_proof(&mut self, key: &[u8]) -> Result<Proof> {
        let mut proof = Proof::new();
        self.generate_proof_raw(&sum(key), &mut proof)?;
        Ok(proof)
    }

    pub(crate) fn generate_proof_raw(
        &mut self,
        keyhash: &[u8; HASHSIZE],
        proof: &mut Proof,
    ) -> Result<()> {
        self.root.prove(&self.store, keyhash, proof)
    }

    /// Commit this tree, publishing a new version. `tags` resolve to
    /// this tree's root in the committed snapshot, via
    /// [crate::Snapshot::get_tree_with_tag].
    pub fn commit(&mut self, tags: &[&str]) -> Result<u64> {
        self.tags = tags.iter().map(|tag| tag.to_string()).collect();
        let mut trees = [self];
        commit(&mut trees)
    }

    /// Reload this tree from the store, discarding all uncommitted
    /// changes.
    pub fn discard(&mut self) -> Result<()> {
        let mut snapshot = self.store.load_snapshot(0)?;
        let name = self.name.clone();
        *self = snapshot.get_tree_with_version(&name, self.root.version_current)?;
        Ok(())
    }

    /// Recover the full `(key, value)` binding for `key`, along with
    /// the count of descent steps taken.
    pub fn get_key_value_from_key(&mut self, key: &[u8]) -> Result<(usize, Vec<u8>, Vec<u8>)> {
        self.root.get_key_value(&self.store, &sum(key), HASHSIZE_BITS, 0)
    }

    /// Recover the full `(key, value)` binding from a keyhash prefix
    /// of 1 to 32 bytes. The prefix must single out one leaf.
    pub fn get_key_value_from_hash(&mut self, keyhash: &[u8]) -> Result<(usize, Vec<u8>, Vec<u8>)> {
        if keyhash.is_empty() || keyhash.len() > HASHSIZE {
            return err_at!(
                InvalidInput, msg: "keyhash must be 1 to {} bytes, got {}", HASHSIZE, keyhash.len()
            );
        }
        let mut kh = [0_u8; HASHSIZE];
        kh[..keyhash.len()].copy_from_slice(keyhash);
        self.root.get_key_value(&self.store, &kh, keyhash.len() * 8, 0)
    }

    /// Return one random key, value from the tree, provided the tree
    /// has keys. This is a crude sample, one random bit per level,
    /// biased toward shallow subtrees.
    pub fn random(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let store = self.store.clone();
        random_inner(&store, &mut self.root)
    }

    /// Estimate the count of keys in the tree from a handful of leaf
    /// depths. Very crude, useful only for display.
    pub fn key_count_estimate(&mut self) -> u64 {
        let mut samples = 0_usize;
        let mut floatsum = 0_f64;

        let mut cursor = self.cursor();
        let mut item = cursor.first();
        while item.is_ok() {
            floatsum += cursor.depth() as f64;
            samples += 1;
            if samples >= 20 {
                break;
            }
            item = cursor.next();
        }

        if samples <= 4 {
            return 0;
        }
        (floatsum / ((samples + 1) as f64)).exp2() as u64
    }
}

fn random_inner(store: &Store, inner: &mut Inner) -> Result<(Vec<u8>, Vec<u8>)> {
    inner.load_partial(store)?;
    match (&mut inner.left, &mut inner.right) {
        (Some(left), Some(right)) => {
            let mut byte = [0_u8; 1];
            err_at!(IOError, OsRng.try_fill_bytes(&mut byte))?;
            if byte[0] & 1 == 1 {
                random_node(store, right)
            } else {
                random_node(store, left)
            }
        }
        (None, Some(right)) => random_node(store, right),
        (Some(left), None) => random_node(store, left),
        (None, None) => err_at!(NoMoreKeys, msg: "no keys in tree"),
    }
}

fn random_node(store: &Store, node: &mut Node) -> Result<(Vec<u8>, Vec<u8>)> {
    match node {
        Node::Inner(inner) => random_inner(store, inner),
        Node::Leaf(leaf) => {
            if leaf.partial {
                leaf.load_full(store)?;
            }
            Ok((leaf.key.clone(), leaf.value.clone()))
        }
    }
}

/// Commit one or more trees, from the same store, to persistence as a
/// single new version. Committing changes as a batch is much more
/// efficient than committing each tree independently, and the batch
/// becomes visible atomically.
pub fn commit(trees: &mut [&mut Tree]) -> Result<u64> {
    if trees.is_empty() {
        return Ok(0);
    }

    let store = trees[0].store.clone();
    for tree in trees.iter().skip(1) {
        if !Store::same_store(&store, &tree.store) {
            return err_at!(InvalidInput, msg: "trees committed together must share a store");
        }
    }

    let _commit_guard = store.lock_commit();

    let mut snapshot = store.load_snapshot(0)?;
    for tree in trees.iter_mut() {
        commit_tree(&mut snapshot, tree)?;
    }

    // link the outgoing head into the version chain, so history stays
    // walkable backward from the new head.
    let (highest, findex, fpos) = store.highest_version_record()?;
    let mut key = vec![b':', b':'];
    util::encode_uvarint(highest, &mut key);
    let mut value = Vec::with_capacity(10);
    util::encode_position(findex, fpos, &mut value);
    let leaf = Box::new(Leaf::new(sum(&key), &key, &value));
    snapshot.vroot.insert(&store, vec![leaf])?;

    let old_current = snapshot.vroot.version_current;
    let old_previous = snapshot.vroot.version_previous;
    snapshot.vroot.version_previous = old_current;
    snapshot.vroot.version_current = highest + 1;

    match commit_inner(&store, &mut snapshot.vroot, "") {
        Ok((findex, fpos)) => {
            store.write_version_data(snapshot.vroot.version_current, findex, fpos)?;
            debug!(
                target: "commit",
                "committed version {} at ({},{})", snapshot.vroot.version_current, findex, fpos
            );
            Ok(snapshot.vroot.version_current)
        }
        Err(err) => {
            // this commit skipped a version number, not a version.
            snapshot.vroot.version_current = old_current;
            snapshot.vroot.version_previous = old_previous;
            Err(err)
        }
    }
}

// commit a single tree into the snapshot's version root.
fn commit_tree(snapshot: &mut Snapshot, tree: &mut Tree) -> Result<()> {
    let store = tree.store.clone();

    let (findex, fpos) = if tree.is_dirty() {
        let old_current = tree.root.version_current;
        let old_previous = tree.root.version_previous;

        let version = snapshot.get_tree_highest_version(&tree.name)? + 1;
        snapshot.put_tree_highest_version(&tree.name, version)?;
        tree.root.version_previous = old_current;
        tree.root.version_current = version;

        match commit_inner(&store, &mut tree.root, &tree.name) {
            Ok(position) => position,
            Err(err) => {
                tree.root.version_current = old_current;
                tree.root.version_previous = old_previous;
                return Err(err);
            }
        }
    } else {
        tree.root.position()
    };

    let roothash = tree.hash()?;
    let mut value = Vec::with_capacity(10);
    util::encode_position(findex, fpos, &mut value);

    // the committed root is reachable by name and tree version ...
    let mut key = vec![b':'];
    key.extend_from_slice(tree.name.as_bytes());
    util::encode_uvarint(tree.root.version_current, &mut key);
    let leaf = Box::new(Leaf::new(sum(&key), &key, &value));
    snapshot.vroot.insert(&store, vec![leaf])?;

    // ... by name and root hash ...
    let mut key = vec![b':'];
    key.extend_from_slice(tree.name.as_bytes());
    key.extend_from_slice(&roothash);
    let leaf = Box::new(Leaf::new(sum(&key), &key, &value));
    snapshot.vroot.insert(&store, vec![leaf])?;

    // ... by root hash alone ...
    let leaf = Box::new(Leaf::new(sum(&roothash), &roothash, &value));
    snapshot.vroot.insert(&store, vec![leaf])?;

    // ... and by any tag the caller supplied.
    for tag in &tree.tags {
        let leaf = Box::new(Leaf::new(sum(tag.as_bytes()), tag.as_bytes(), &value));
        snapshot.vroot.insert(&store, vec![leaf])?;
    }
    tree.tags.clear();

    debug!(
        target: "commit",
        "tree {:?} committed at version {}", tree.name, tree.root.version_current
    );

    Ok(())
}

// post-order DFS: children are durably appended before their parents,
// so a parent always references valid addresses. clean subtrees are
// skipped, reusing their committed position.
fn commit_inner(store: &Store, node: &mut Inner, name: &str) -> Result<(u32, u32)> {
    let (findex, fpos) = match &mut node.left {
        None => (0, 0),
        Some(child) if !child.is_dirty() => child.position(),
        Some(Node::Inner(inner)) => commit_inner(store, inner, name)?,
        Some(Node::Leaf(leaf)) => commit_leaf(store, leaf)?,
    };
    node.left_findex = findex;
    node.left_fpos = fpos;

    let (findex, fpos) = match &mut node.right {
        None => (0, 0),
        Some(child) if !child.is_dirty() => child.position(),
        Some(Node::Inner(inner)) => commit_inner(store, inner, name)?,
        Some(Node::Leaf(leaf)) => commit_leaf(store, leaf)?,
    };
    node.right_findex = findex;
    node.right_fpos = fpos;

    let mut buf = Vec::with_capacity(256);
    let n = node.marshal_to(store, &mut buf, name)?;
    let (findex, fpos) = store.write(&buf[..n])?;
    node.findex = findex;
    node.fpos = fpos;
    node.dirty = false;

    if usize::from(node.bit) >= INNER_CACHE_DEPTH {
        node.left = None;
        node.right = None;
        node.partial = true;
    }

    Ok((findex, fpos))
}

// leaf serialization happens at only one place, while committing.
fn commit_leaf(store: &Store, leaf: &mut Leaf) -> Result<(u32, u32)> {
    let mut buf = Vec::with_capacity(MINBLOCK + leaf.value.len());
    leaf.encode(&mut buf);

    let (findex, fpos) = store.write(&buf)?;
    leaf.findex = findex;
    leaf.fpos = fpos;
    leaf.dirty = false;

    // drop the payload from ram, the leaf reloads on demand.
    leaf.partial = true;
    leaf.key = Vec::new();
    leaf.value = Vec::new();

    Ok((findex, fpos))
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;
