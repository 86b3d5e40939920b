//! Merkdb is an authenticated, versioned, append-only store for
//! `{key,value}` data. A single 32-byte root hash authenticates the
//! entire data store, every commit creates an immutable snapshot that
//! can be re-opened, modified and committed again, and any two tree
//! roots can be diffed in time linear to the number of changes.
//!
//! **Inventory of features**
//!
//! * Authenticated data store, keys and values are backed by a
//!   BLAKE2s 256-bit merkle hash.
//! * Append only storage layer, nothing is overwritten in place.
//! * Versioning support, all committed changes are versioned and any
//!   version can be visited at any point in time.
//! * Snapshots, multi-tree commits under a single version; every
//!   snapshot can be re-opened, modified and committed further.
//! * Named trees, usable as buckets, within a single data store.
//! * Iteration over all `{key,value}` pairs of a tree in keyhash order.
//! * Linear-time diff between two trees reporting insertions,
//!   deletions and modifications.
//! * Compact cryptographic proofs for existence and non-existence of
//!   any key, verifiable against a trusted root hash.
//! * Detection of on-disk corruption of any stored key or value.
//! * Disk based persistent stores and memory based scratch stores.
//!
//! **Storage model**
//!
//! User keys are hashed to a 32-byte keyhash and indexed by keyhash
//! bits, MSB first, in a binary tree of [Tree] values. Trees are
//! resolved through a [Snapshot], which maps tree-name, root-hash and
//! user tags to tree roots. Snapshots are resolved through [Store],
//! which keeps a fixed ring of the most recent version records;
//! older versions remain reachable by walking the version chain
//! backward. Committing a tree appends the dirty nodes to the store
//! and atomically publishes a new version.
//!
//! A minimal round trip:
//!
//! ```ignore
//! let store = Store::open(dir)?;            // or Store::in_memory()
//! let mut ss = store.load_snapshot(0)?;     // most recent snapshot
//! let mut tree = ss.get_tree("root")?;      // use or create tree "root"
//! tree.put(b"key", b"value")?;
//! tree.commit(&[])?;                        // publish a new version
//! assert_eq!(tree.get(b"key")?, b"value".to_vec());
//! ```

use std::{error, fmt, result};

/// Size of content hash, in bytes. The hash function is BLAKE2s-256.
pub const HASHSIZE: usize = 32;

/// Size of content hash, in bits.
pub const HASHSIZE_BITS: usize = HASHSIZE * 8;

/// Deepest bit-depth at which a node can hang.
pub(crate) const LAST_BIT: usize = HASHSIZE_BITS - 1;

/// Max block size for a serialized node, excluding the value.
pub const MINBLOCK: usize = 512;

/// Keys are limited to this size in bytes, 64 bytes are reserved.
pub const MAX_KEYSIZE: usize = MINBLOCK - 64;

/// Values are limited to this size in bytes.
pub const MAX_VALUE_SIZE: usize = 100 * 1024 * 1024;

/// Data is stored in split segment files, each limited to this size so
/// that restricted file systems, like FAT32, can host a store.
pub const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Tree names cannot be larger than this, in bytes, not in utf8 chars.
pub const TREE_NAME_LIMIT: usize = 127;

/// This many recent versions are directly reachable from the version
/// registry. Older versions are reachable via the version chain.
pub const MAX_VERSIONS_IN_REGISTRY: usize = 20;

/// Size of one version-registry record, three little-endian u64.
pub const VERSION_RECORD_SIZE: usize = 24;

/// Size of the on-disk version-registry image.
pub(crate) const REGISTRY_SIZE: usize = 512;

/// After a commit, interior nodes hanging below this bit-depth are
/// dropped from memory and left as partially loaded stubs.
pub const INNER_CACHE_DEPTH: usize = 17;

/// Error variants that can be returned by this package's API.
///
/// Each variant carries a prefix, typically identifying the failing
/// location in the package, and a message.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Key is not found in the tree.
    KeyNotFound(String, String),
    /// Requested version is not stored in registry or history.
    NoSuchVersion(String, String),
    /// Hash mismatch, malformed record or structurally impossible
    /// decode while loading data from the storage layer.
    Corruption(String, String),
    /// Cursor exhausted, or tree is empty.
    NoMoreKeys(String, String),
    /// Read past the end of a segment, or invalid blob address.
    OutOfRange(String, String),
    /// Error from the file-system or I/O layer.
    IOError(String, String),
    /// Unexpected file or directory in the store's base directory.
    InvalidFile(String, String),
    /// Invalid argument, like an oversize value or a bad tree name.
    InvalidInput(String, String),
    /// Failure in converting between types or formats.
    FailConvert(String, String),
    /// Invariant breakage, typically a bug in this package.
    Fatal(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            KeyNotFound(p, m) => write!(f, "KeyNotFound:{} {}", p, m),
            NoSuchVersion(p, m) => write!(f, "NoSuchVersion:{} {}", p, m),
            Corruption(p, m) => write!(f, "Corruption:{} {}", p, m),
            NoMoreKeys(p, m) => write!(f, "NoMoreKeys:{} {}", p, m),
            OutOfRange(p, m) => write!(f, "OutOfRange:{} {}", p, m),
            IOError(p, m) => write!(f, "IOError:{} {}", p, m),
            InvalidFile(p, m) => write!(f, "InvalidFile:{} {}", p, m),
            InvalidInput(p, m) => write!(f, "InvalidInput:{} {}", p, m),
            FailConvert(p, m) => write!(f, "FailConvert:{} {}", p, m),
            Fatal(p, m) => write!(f, "Fatal:{} {}", p, m),
        }
    }
}

impl error::Error for Error {}

impl Error {
    /// Return whether this error means the key is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound(_, _))
    }

    /// Return whether this error means an iterator is exhausted.
    pub fn is_no_more_keys(&self) -> bool {
        matches!(self, Error::NoMoreKeys(_, _))
    }

    /// Return whether this error means stored data failed its
    /// integrity check.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_, _))
    }

    /// Return whether this error means the requested version does not
    /// exist.
    pub fn is_no_such_version(&self) -> bool {
        matches!(self, Error::NoSuchVersion(_, _))
    }
}

/// Short form to compose Error values.
///
/// Macro variants:
///
/// ```ignore
/// err_at!(Corruption, msg: "bad record {}", id)  // create error
/// err_at!(IOError, fd.sync_all())                // from another error
/// err_at!(IOError, fd.sync_all(), "flush {}", n) // with context
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err($crate::Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err($crate::Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

/// Check whether a decode buffer holds `$want` more bytes.
#[macro_export]
macro_rules! check_remaining {
    ($buf:expr, $want:expr, $msg:expr) => {
        if $buf.len() < $want {
            err_at!(
                Corruption, msg: "insufficient input {}/{} ({})", $buf.len(), $want, $msg
            )
        } else {
            Ok(())
        }
    };
}

/// Type alias for Result return type, used by this package.
pub type Result<T> = result::Result<T, Error>;

mod cursor;
mod diff;
mod hash;
mod node;
mod proof;
mod snapshot;
mod store;
mod tree;
mod util;

pub use crate::cursor::Cursor;
pub use crate::diff::diff;
pub use crate::hash::keyhash;
pub use crate::proof::Proof;
pub use crate::snapshot::Snapshot;
pub use crate::store::Store;
pub use crate::tree::{commit, Tree};
