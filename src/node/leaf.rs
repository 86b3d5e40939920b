//! Leaf nodes, one `{key,value}` binding each.

use crate::{
    check_remaining, err_at,
    hash::{leaf_hash, sum},
    proof::Proof,
    store::Store,
    util, Result, HASHSIZE, MAX_KEYSIZE, MAX_VALUE_SIZE, MINBLOCK,
};

/// One `{key,value}` binding, hanging at the first bit where its
/// keyhash diverges from every other keyhash in the tree.
///
/// A leaf carries two hashes: `stored_hash` is what the parent node
/// recorded for it on disk, `hash` is recomputed from key and value on
/// a full load. The two disagreeing means the stored bytes rotted.
pub(crate) struct Leaf {
    pub(crate) findex: u32,
    pub(crate) fpos: u32,

    pub(crate) key: Vec<u8>,
    pub(crate) value: Vec<u8>,
    pub(crate) keyhash: [u8; HASHSIZE],

    pub(crate) stored_hash: [u8; HASHSIZE],
    pub(crate) hash: [u8; HASHSIZE],

    pub(crate) dirty: bool,
    pub(crate) partial: bool,
}

impl Leaf {
    pub(crate) fn new(keyhash: [u8; HASHSIZE], key: &[u8], value: &[u8]) -> Leaf {
        let hash = leaf_hash(&keyhash, &sum(value));
        Leaf {
            findex: 0,
            fpos: 0,
            key: key.to_vec(),
            value: value.to_vec(),
            keyhash,
            stored_hash: hash,
            hash,
            dirty: true, // new leaf is by default dirty
            partial: false,
        }
    }

    // stub from a parent record, only the address and hash are known.
    pub(crate) fn new_partial(findex: u32, fpos: u32, hash: [u8; HASHSIZE]) -> Leaf {
        Leaf {
            findex,
            fpos,
            key: Vec::new(),
            value: Vec::new(),
            keyhash: [0; HASHSIZE],
            stored_hash: hash,
            hash,
            dirty: false,
            partial: true,
        }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn position(&self) -> (u32, u32) {
        (self.findex, self.fpos)
    }

    pub(crate) fn hash(&mut self, store: &Store) -> Result<[u8; HASHSIZE]> {
        if self.partial {
            self.load_full(store)?;
        }
        Ok(self.hash)
    }

    /// Overwrite this leaf's value. The caller has established that
    /// the keyhash matches; the overwritten value stays reachable from
    /// roots committed earlier.
    pub(crate) fn put(&mut self, store: &Store, value: &[u8]) -> Result<()> {
        if self.partial {
            self.load_full(store)?;
        }
        self.value = value.to_vec();
        self.hash = leaf_hash(&self.keyhash, &sum(&self.value));
        self.stored_hash = self.hash;
        self.dirty = true;
        self.findex = 0;
        self.fpos = 0;
        Ok(())
    }

    pub(crate) fn get(&mut self, store: &Store, keyhash: &[u8; HASHSIZE]) -> Result<Vec<u8>> {
        if self.partial {
            self.load_full(store)?;
        }
        if &self.keyhash == keyhash {
            Ok(self.value.clone())
        } else {
            err_at!(KeyNotFound, msg: "collision, keyhash {:02x?} not found", keyhash)
        }
    }

    pub(crate) fn delete(&mut self, store: &Store, keyhash: &[u8; HASHSIZE]) -> Result<(bool, bool)> {
        if self.partial {
            self.load_full(store)?;
        }
        let matched = &self.keyhash == keyhash;
        Ok((matched, matched))
    }

    pub(crate) fn prove(
        &mut self,
        store: &Store,
        keyhash: &[u8; HASHSIZE],
        proof: &mut Proof,
    ) -> Result<()> {
        if self.partial {
            self.load_full(store)?;
        }
        if &self.keyhash == keyhash {
            proof.add_value(&self.value);
        } else {
            proof.add_collision(&self.keyhash, &sum(&self.value));
        }
        Ok(())
    }

    pub(crate) fn load_partial(&mut self, store: &Store) -> Result<()> {
        if self.partial {
            self.load_full(store)?;
        }
        Ok(())
    }

    pub(crate) fn load_full(&mut self, store: &Store) -> Result<()> {
        if self.findex == 0 && self.fpos == 0 {
            return err_at!(OutOfRange, msg: "invalid leaf position (0,0)");
        }

        let mut buf = vec![0; 4 * MINBLOCK];
        loop {
            // at least keylen, key and valuelen land in this read; if
            // the value is small it is also available.
            let count = store.read(self.findex, self.fpos, &mut buf)?;
            let data = &buf[..count];

            let (klen, m) = util::decode_uvarint(data)?;
            if (klen as usize) > MAX_KEYSIZE {
                return err_at!(Corruption, msg: "leaf key size {}", klen);
            }
            let key_end = m + (klen as usize);
            check_remaining!(data, key_end, "leaf key")?;

            let (vlen, m) = util::decode_uvarint(&data[key_end..])?;
            if (vlen as usize) > MAX_VALUE_SIZE {
                return err_at!(Corruption, msg: "leaf value size {}", vlen);
            }
            let total = key_end + m + (vlen as usize);
            if total > buf.len() {
                buf.resize(total, 0);
                continue;
            }
            check_remaining!(data, total, "leaf value")?;

            self.key = data[m..key_end].to_vec();
            self.value = data[key_end + m..total].to_vec();
            break;
        }

        // time for data integrity.
        self.keyhash = sum(&self.key);
        self.hash = leaf_hash(&self.keyhash, &sum(&self.value));
        if store.is_check_enabled() && self.hash != self.stored_hash {
            return err_at!(
                Corruption, msg: "key/value data corruption, key {:02x?}", self.key
            );
        }

        self.partial = false;
        Ok(())
    }

    // leaf records go out as varint(len(key)) ‖ key ‖ varint(len(value)) ‖ value.
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        util::encode_uvarint(self.key.len() as u64, buf);
        buf.extend_from_slice(&self.key);
        util::encode_uvarint(self.value.len() as u64, buf);
        buf.extend_from_slice(&self.value);
    }

    pub(crate) fn get_key_value(
        &mut self,
        store: &Store,
        keyhash: &[u8; HASHSIZE],
        valid_bits: usize,
        used_bits: usize,
    ) -> Result<(usize, Vec<u8>, Vec<u8>)> {
        if self.partial {
            self.load_full(store)?;
        }
        if self.keyhash[..valid_bits / 8] == keyhash[..valid_bits / 8] {
            Ok((used_bits, self.key.clone(), self.value.clone()))
        } else {
            err_at!(
                KeyNotFound,
                msg: "collision, keyhash {:02x?} not found, in-ram {:02x?}",
                keyhash, self.keyhash
            )
        }
    }
}

#[cfg(test)]
#[path = "leaf_test.rs"]
mod leaf_test;
