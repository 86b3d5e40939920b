//! Module implement the append-only storage layer.
//!
//! A store is a set of append-only segments, each capped at
//! [MAX_FILE_SIZE], addressed by a `(findex, fpos)` pair. Offset 0 of
//! segment 0 holds a reserved sentinel byte, so the address `(0,0)`
//! never points at a payload and doubles as "absent". A separate
//! fixed-size blob, the version registry, holds the most recent
//! [MAX_VERSIONS_IN_REGISTRY] version records and is rewritten in a
//! single 512-byte operation, which is the atomic commit point.
//!
//! Two storage layers are available behind the same [Store] handle, a
//! disk layer persisting segments under a 4-level directory fan-out,
//! and a memory layer for testing and scratch use.

use fs2::FileExt;
use log::{debug, info};

use std::{
    cmp,
    collections::HashMap,
    convert::{TryFrom, TryInto},
    fs, io,
    io::{Read, Seek, Write},
    path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use crate::{
    err_at, Result, MAX_FILE_SIZE, MAX_VERSIONS_IN_REGISTRY, REGISTRY_SIZE, VERSION_RECORD_SIZE,
};

mod files;

/// Store is the backend holding the data in serialized form.
///
/// Stores come in two layers, created via [Store::open] for a disk
/// backed store and [Store::in_memory] for a memory backed store.
/// Cloning a store is cheap and shares the underlying segments; the
/// recommended way to hand a store to another thread.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    layer: Layer,
    // single-writer: appends serialize behind the write half, readers
    // of already-written blobs share the read half.
    segments: RwLock<Segments>,
    registry: Mutex<Registry>,
    commitsync: Mutex<()>,
    check_integrity: AtomicBool,
}

enum Layer {
    Memory,
    Disk { dir: path::PathBuf },
}

struct Segments {
    files: HashMap<u32, Segment>,
    findex: u32,
}

enum Segment {
    Disk { fd: fs::File, size: u32 },
    Memory { buf: Vec<u8> },
}

impl Segment {
    fn size(&self) -> u64 {
        match self {
            Segment::Disk { size, .. } => u64::from(*size),
            Segment::Memory { buf } => buf.len() as u64,
        }
    }
}

impl Store {
    /// Start a new memory backed store, useful for testing and other
    /// temporary use cases. Nothing survives the last handle.
    pub fn in_memory() -> Result<Store> {
        let mut files = HashMap::new();
        // sentinel byte, so that address (0,0) is never a payload.
        files.insert(0, Segment::Memory { buf: vec![0] });

        debug!(target: "store", "opened in-memory store");

        let inner = Inner {
            layer: Layer::Memory,
            segments: RwLock::new(Segments { files, findex: 0 }),
            registry: Mutex::new(Registry::new(RegistryFile::Memory(Vec::new()))),
            commitsync: Mutex::new(()),
            check_integrity: AtomicBool::new(true),
        };
        Ok(Store { inner: Arc::new(inner) })
    }

    /// Open, creating if missing, a disk backed store under `dir`.
    /// Since the store is append-only, pre-existing data is used as is.
    /// The store holds an exclusive advisory lock on its registry file
    /// for the lifetime of the handle, one writing process at a time.
    pub fn open<P>(dir: P) -> Result<Store>
    where
        P: AsRef<path::Path>,
    {
        let dir = dir.as_ref().to_path_buf();
        err_at!(IOError, fs::create_dir_all(&dir), "creating {:?}", dir)?;

        let registry_fd = files::open_registry_file(&dir)?;
        err_at!(
            IOError,
            registry_fd.try_lock_exclusive(),
            "store {:?} is locked by another process",
            dir
        )?;

        let mut segments = HashMap::new();
        let mut findex = 0_u32;
        for i in 0..u32::MAX {
            let loc = files::to_segment_location(&dir, i);
            let meta = match fs::metadata(&loc) {
                Ok(meta) => meta,
                Err(_) => break,
            };
            if meta.is_dir() {
                return err_at!(InvalidFile, msg: "expected file, found directory {:?}", loc);
            }
            let fd = files::open_segment_file(&loc)?;
            let size = err_at!(FailConvert, u32::try_from(meta.len()))?;
            segments.insert(i, Segment::Disk { fd, size });
            findex = i;
        }

        if segments.is_empty() {
            let loc = files::to_segment_location(&dir, 0);
            let mut fd = files::create_segment_file(&loc)?;
            err_at!(IOError, fd.write_all(&[0]), "writing sentinel {:?}", loc)?;
            segments.insert(0, Segment::Disk { fd, size: 1 });
        }

        info!(
            target: "store",
            "opened disk store {:?} with {} segment(s)", dir, segments.len()
        );

        let inner = Inner {
            layer: Layer::Disk { dir },
            segments: RwLock::new(Segments { files: segments, findex }),
            registry: Mutex::new(Registry::new(RegistryFile::Disk(registry_fd))),
            commitsync: Mutex::new(()),
            check_integrity: AtomicBool::new(true),
        };
        Ok(Store { inner: Arc::new(inner) })
    }

    /// Release this handle. Underlying files are closed, and the
    /// registry lock released, once the last clone is gone.
    pub fn close(self) {}

    /// Append `data` to the current segment, rolling over to the next
    /// segment on overflow. Return the address where the payload
    /// begins. Single writer, serialized behind the blob write lock.
    pub(crate) fn write(&self, data: &[u8]) -> Result<(u32, u32)> {
        let mut segments = self.wlock();

        let mut findex = segments.findex;
        let size = match segments.files.get(&findex) {
            Some(segment) => segment.size(),
            None => return err_at!(Fatal, msg: "invalid file structures at {}", findex),
        };

        if size + (data.len() as u64) > MAX_FILE_SIZE {
            findex += 1;
            let segment = match &self.inner.layer {
                Layer::Disk { dir } => {
                    let loc = files::to_segment_location(dir, findex);
                    let fd = files::create_segment_file(&loc)?;
                    Segment::Disk { fd, size: 0 }
                }
                Layer::Memory => Segment::Memory { buf: Vec::new() },
            };
            segments.files.insert(findex, segment);
            segments.findex = findex;
            debug!(target: "store", "rolled over to segment {}", findex);
        }

        let segment = match segments.files.get_mut(&findex) {
            Some(segment) => segment,
            None => return err_at!(Fatal, msg: "invalid file structures at {}", findex),
        };
        let fpos = match segment {
            Segment::Disk { fd, size } => {
                let fpos = *size;
                err_at!(IOError, fd.seek(io::SeekFrom::Start(u64::from(fpos))))?;
                err_at!(IOError, fd.write_all(data), "appending segment {}", findex)?;
                *size += data.len() as u32;
                fpos
            }
            Segment::Memory { buf } => {
                let fpos = buf.len() as u32;
                buf.extend_from_slice(data);
                fpos
            }
        };

        Ok((findex, fpos))
    }

    /// Best-effort read of `buf.len()` bytes at `(findex, fpos)`.
    /// Return the count of bytes read, which can be short at the end
    /// of a segment; callers with enough bytes treat that as success.
    pub(crate) fn read(&self, findex: u32, fpos: u32, buf: &mut [u8]) -> Result<usize> {
        let segments = self.rlock();
        let segment = match segments.files.get(&findex) {
            Some(segment) => segment,
            None => return err_at!(OutOfRange, msg: "segment {} not available", findex),
        };
        match segment {
            Segment::Disk { fd, .. } => read_at(fd, u64::from(fpos), buf),
            Segment::Memory { buf: data } => {
                let fpos = fpos as usize;
                match fpos.cmp(&data.len()) {
                    cmp::Ordering::Less => {
                        let n = cmp::min(buf.len(), data.len() - fpos);
                        buf[..n].copy_from_slice(&data[fpos..fpos + n]);
                        Ok(n)
                    }
                    cmp::Ordering::Equal => Ok(0),
                    cmp::Ordering::Greater => {
                        err_at!(OutOfRange, msg: "read at {} beyond segment {}", fpos, findex)
                    }
                }
            }
        }
    }

    /// Overwrite the version registry with a new record for `version`,
    /// rotating into the next slot. The whole 512-byte image goes out
    /// in one write, the atomic commit point of the store.
    pub(crate) fn write_version_data(&self, version: u64, findex: u32, fpos: u32) -> Result<()> {
        // hold the blob write lock, appends and registry rewrites
        // must not interleave.
        let _w = self.wlock();
        let mut registry = self.lock_registry();
        registry.load()?;
        registry.write_version(version, findex, fpos)
    }

    /// Load the version registry into memory, once per store.
    pub(crate) fn load_registry(&self) -> Result<()> {
        self.lock_registry().load()
    }

    /// Return `(version, findex, fpos)` of the most recent version
    /// record. All zeros for a brand new store.
    pub(crate) fn highest_version_record(&self) -> Result<(u64, u32, u32)> {
        let mut registry = self.lock_registry();
        registry.load()?;
        let (_, version, findex, fpos) = registry.highest();
        Ok((version, findex, fpos))
    }

    /// Hold this guard for the duration of a commit, one commit at a
    /// time per store.
    pub(crate) fn lock_commit(&self) -> MutexGuard<'_, ()> {
        match self.inner.commitsync.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn same_store(a: &Store, b: &Store) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// All loads go through value checks by default. Disabled only by
    /// tests that fabricate keyhashes.
    pub(crate) fn is_check_enabled(&self) -> bool {
        self.inner.check_integrity.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn set_integrity_check(&self, enable: bool) {
        self.inner.check_integrity.store(enable, Ordering::Relaxed)
    }

    fn rlock(&self) -> RwLockReadGuard<Segments> {
        match self.inner.segments.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn wlock(&self) -> RwLockWriteGuard<Segments> {
        match self.inner.segments.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        match self.inner.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// Read into `buf` at `fpos` without touching the fd's seek offset,
// concurrent readers share the same fd.
#[cfg(unix)]
fn read_at(fd: &fs::File, fpos: u64, buf: &mut [u8]) -> Result<usize> {
    use std::os::unix::fs::FileExt;

    let mut n = 0;
    while n < buf.len() {
        match err_at!(IOError, fd.read_at(&mut buf[n..], fpos + (n as u64)))? {
            0 => break,
            m => n += m,
        }
    }
    Ok(n)
}

#[cfg(windows)]
fn read_at(fd: &fs::File, fpos: u64, buf: &mut [u8]) -> Result<usize> {
    use std::os::windows::fs::FileExt;

    let mut n = 0;
    while n < buf.len() {
        match err_at!(IOError, fd.seek_read(&mut buf[n..], fpos + (n as u64)))? {
            0 => break,
            m => n += m,
        }
    }
    Ok(n)
}

// The version registry, a rotating ring of MAX_VERSIONS_IN_REGISTRY
// records of three little-endian u64: (version, findex, fpos). The
// slot holding the highest version is the current head.
struct Registry {
    file: RegistryFile,
    data: [u8; REGISTRY_SIZE],
    index: usize,
    loaded: bool,
}

enum RegistryFile {
    Disk(fs::File),
    Memory(Vec<u8>),
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let RegistryFile::Disk(fd) = &self.file {
            fd.unlock().ok();
        }
    }
}

impl Registry {
    fn new(file: RegistryFile) -> Registry {
        Registry { file, data: [0; REGISTRY_SIZE], index: 0, loaded: false }
    }

    fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }

        match &mut self.file {
            RegistryFile::Disk(fd) => {
                let n = err_at!(IOError, fd.metadata())?.len();
                if n == 0 {
                    self.data = [0; REGISTRY_SIZE];
                } else if n < (REGISTRY_SIZE as u64) {
                    return err_at!(Corruption, msg: "version registry truncated to {}", n);
                } else {
                    let mut buf = [0_u8; REGISTRY_SIZE];
                    err_at!(IOError, fd.seek(io::SeekFrom::Start(0)))?;
                    err_at!(IOError, fd.read_exact(&mut buf), "reading version registry")?;
                    self.data = buf;
                }
            }
            RegistryFile::Memory(image) => {
                if image.is_empty() {
                    self.data = [0; REGISTRY_SIZE];
                } else {
                    self.data.copy_from_slice(&image[..REGISTRY_SIZE]);
                }
            }
        }

        self.index = self.highest().0;
        self.loaded = true;
        Ok(())
    }

    fn highest(&self) -> (usize, u64, u32, u32) {
        let mut res = (0, 0_u64, 0_u32, 0_u32);
        for i in 0..MAX_VERSIONS_IN_REGISTRY {
            let off = i * VERSION_RECORD_SIZE;
            let version = u64::from_le_bytes(self.data[off..off + 8].try_into().unwrap());
            if version > res.1 {
                let findex = u64::from_le_bytes(self.data[off + 8..off + 16].try_into().unwrap());
                let fpos = u64::from_le_bytes(self.data[off + 16..off + 24].try_into().unwrap());
                res = (i, version, findex as u32, fpos as u32);
            }
        }
        res
    }

    fn write_version(&mut self, version: u64, findex: u32, fpos: u32) -> Result<()> {
        let mut buf = self.data;
        let index = (self.index + 1) % MAX_VERSIONS_IN_REGISTRY;
        let off = index * VERSION_RECORD_SIZE;
        buf[off..off + 8].copy_from_slice(&version.to_le_bytes());
        buf[off + 8..off + 16].copy_from_slice(&u64::from(findex).to_le_bytes());
        buf[off + 16..off + 24].copy_from_slice(&u64::from(fpos).to_le_bytes());

        match &mut self.file {
            RegistryFile::Disk(fd) => {
                err_at!(IOError, fd.seek(io::SeekFrom::Start(0)))?;
                err_at!(IOError, fd.write_all(&buf), "rewriting version registry")?;
            }
            RegistryFile::Memory(image) => {
                image.clear();
                image.extend_from_slice(&buf);
            }
        }

        self.data = buf;
        self.index = index;
        Ok(())
    }
}
