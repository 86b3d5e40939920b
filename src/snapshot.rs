//! Module implement snapshots, read access to any version of the
//! store.
//!
//! A snapshot is the collective state of all trees at one committed
//! version. Every commit creates a new snapshot under an incrementing
//! version number; version 0 stands for "most recent" as a special
//! case. Behind a snapshot sits the version root, a meta tree whose
//! leaves map lookup keys to tree-root addresses:
//!
//! | meta-key layout            | value                              |
//! |----------------------------|------------------------------------|
//! | `':' name varint(version)` | address of that data-tree root     |
//! | `':' name roothash`        | address of that data-tree root     |
//! | `roothash`                 | address of that data-tree root     |
//! | `tag`                      | address of a data-tree root        |
//! | `"::" varint(version)`     | address of an earlier version root |
//!
//! The `':'` prefix is reserved, tree names cannot start with it, and
//! user tags live in the same namespace as root hashes.

use crate::{
    err_at,
    hash::sum,
    node::{Inner, Leaf},
    store::Store,
    tree::Tree,
    util, Result, MINBLOCK, TREE_NAME_LIMIT,
};

/// Snapshot of the entire store at a specific version.
///
/// Snapshots of committed versions are immutable; loading the same
/// version twice observes the same state, regardless of commits that
/// happened in between.
pub struct Snapshot {
    pub(crate) store: Store,
    pub(crate) version: u64,
    pub(crate) findex: u32,
    pub(crate) fpos: u32,
    pub(crate) vroot: Inner,
}

impl Store {
    /// Load a specific snapshot from the store. Version 0 loads the
    /// most recent snapshot as a special case. Note that the 0th
    /// version itself is never stored to disk.
    pub fn load_snapshot(&self, version: u64) -> Result<Snapshot> {
        self.load_registry()?;

        // only the most recent versions are reachable from the registry.
        let (highest, findex, fpos) = self.highest_version_record()?;
        if version > highest {
            return err_at!(
                NoSuchVersion, msg: "store highest version {}, requested {}", highest, version
            );
        }

        if version == 0 || version == highest {
            if findex == 0 && fpos == 0 {
                // storage is brand new, build up a fresh version root.
                let vroot = Inner::new(0);
                let snapshot =
                    Snapshot { store: self.clone(), version: highest, findex, fpos, vroot };
                return Ok(snapshot);
            }
            let (_, vroot) = self.load_root_at(findex, fpos)?;
            let snapshot = Snapshot { store: self.clone(), version: highest, findex, fpos, vroot };
            return Ok(snapshot);
        }

        // an arbitrary version between 1 and highest, walk the version
        // chain recorded in the head's version root.
        let (_, mut head) = self.load_root_at(findex, fpos)?;
        let mut key = vec![b':', b':'];
        util::encode_uvarint(version, &mut key);
        let position = head.get(self, &sum(&key))?;
        let (findex, fpos) = util::decode_position(&position)?;

        let (_, vroot) = self.load_root_at(findex, fpos)?;
        Ok(Snapshot { store: self.clone(), version, findex, fpos, vroot })
    }

    // read a serialized root node back. children stay partial stubs.
    pub(crate) fn load_root_at(&self, findex: u32, fpos: u32) -> Result<(String, Inner)> {
        let mut buf = vec![0; MINBLOCK];
        let count = self.read(findex, fpos, &mut buf)?;
        if count < 3 {
            return err_at!(
                Corruption, msg: "short read {} for root at ({},{})", count, findex, fpos
            );
        }

        let mut root = Inner::new(0);
        root.dirty = false;
        root.unmarshal(&buf[..count])?;
        root.findex = findex;
        root.fpos = fpos;
        Ok((root.name.clone(), root))
    }
}

impl Snapshot {
    /// Return this snapshot's version number.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Get the most recent tree committed under `name`, or an empty
    /// tree if the name was never committed.
    pub fn get_tree(&mut self, name: &str) -> Result<Tree> {
        let version = self.get_tree_highest_version(name)?;
        self.get_tree_with_version(name, version)
    }

    /// Get the tree `name` at a specific tree version. Every tree has
    /// its own version sequence, independent of the store version.
    pub fn get_tree_with_version(&mut self, name: &str, version: u64) -> Result<Tree> {
        check_tree_name(name)?;

        if version == 0 {
            let tree = Tree {
                store: self.store.clone(),
                root: Inner::new(0),
                name: name.to_string(),
                tags: Vec::new(),
            };
            return Ok(tree);
        }

        let mut key = vec![b':'];
        key.extend_from_slice(name.as_bytes());
        util::encode_uvarint(version, &mut key);
        self.load_tree(&key)
    }

    /// Get the tree whose committed root hash is `roothash`.
    pub fn get_tree_with_roothash(&mut self, roothash: &[u8]) -> Result<Tree> {
        self.load_tree(roothash)
    }

    /// Get the tree that was committed under `tag`. The same tag can
    /// point to different trees in different snapshots.
    pub fn get_tree_with_tag(&mut self, tag: &str) -> Result<Tree> {
        self.load_tree(tag.as_bytes())
    }

    /// Get the highest committed version of tree `name`, 0 if the
    /// name was never committed.
    pub fn get_tree_highest_version(&mut self, name: &str) -> Result<u64> {
        check_tree_name(name)?;

        let mut key = vec![b':'];
        key.extend_from_slice(name.as_bytes());
        match self.vroot.get(&self.store, &sum(&key)) {
            Ok(value) => {
                let (version, _) = util::decode_uvarint(&value)?;
                Ok(version)
            }
            Err(_) => Ok(0),
        }
    }

    pub(crate) fn put_tree_highest_version(&mut self, name: &str, version: u64) -> Result<()> {
        check_tree_name(name)?;

        let mut key = vec![b':'];
        key.extend_from_slice(name.as_bytes());
        let mut value = Vec::with_capacity(10);
        util::encode_uvarint(version, &mut value);

        let leaf = Box::new(Leaf::new(sum(&key), &key, &value));
        self.vroot.insert(&self.store, vec![leaf])
    }

    fn load_tree(&mut self, key: &[u8]) -> Result<Tree> {
        let position = self.vroot.get(&self.store, &sum(key))?;
        let (findex, fpos) = util::decode_position(&position)?;
        let (name, root) = self.store.load_root_at(findex, fpos)?;

        let mut tree = Tree { store: self.store.clone(), root, name, tags: Vec::new() };
        tree.hash().ok(); // warm the root hash
        Ok(tree)
    }
}

pub(crate) fn check_tree_name(name: &str) -> Result<()> {
    if name.len() > TREE_NAME_LIMIT {
        return err_at!(InvalidInput, msg: "tree name bigger than {} bytes", TREE_NAME_LIMIT);
    }
    if name.starts_with(':') {
        return err_at!(InvalidInput, msg: "tree name cannot start with ':'");
    }
    Ok(())
}

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod snapshot_test;
