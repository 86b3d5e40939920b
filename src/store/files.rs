//! Module implement file layout and file handling for disk stores.

use std::{fs, path};

use crate::{err_at, Result};

pub(crate) const REGISTRY_FILE: &str = "version_root.bin";

/// A segment file is locatable from the store's base directory and the
/// 32-bit segment index. The index splits into four directory levels,
/// one byte per level, `<base>/<d>/<c>/<b>/<a>.dfs`, keeping directory
/// fan-out small for 4 billion possible segments.
pub(crate) fn to_segment_location(dir: &path::Path, findex: u32) -> path::PathBuf {
    let (d, c, b, a) = (
        (findex >> 24) & 0xff,
        (findex >> 16) & 0xff,
        (findex >> 8) & 0xff,
        findex & 0xff,
    );
    [
        dir.to_path_buf(),
        d.to_string().into(),
        c.to_string().into(),
        b.to_string().into(),
        format!("{}.dfs", a).into(),
    ]
    .iter()
    .collect()
}

/// Compose the location of the version-registry file under `dir`.
pub(crate) fn to_registry_location(dir: &path::Path) -> path::PathBuf {
    [dir.to_path_buf(), REGISTRY_FILE.into()].iter().collect()
}

/// Create a new segment file for read and write, creating the
/// directory fan-out as needed.
pub(crate) fn create_segment_file(loc: &path::Path) -> Result<fs::File> {
    let parent = match loc.parent() {
        Some(parent) => Ok(parent),
        None => err_at!(InvalidFile, msg: "{:?}", loc),
    }?;
    err_at!(IOError, fs::create_dir_all(parent), "creating {:?}", parent)?;

    let mut opts = fs::OpenOptions::new();
    err_at!(
        IOError,
        opts.read(true).write(true).create(true).open(loc),
        "creating segment {:?}",
        loc
    )
}

/// Open an existing segment file for read and write.
pub(crate) fn open_segment_file(loc: &path::Path) -> Result<fs::File> {
    let mut opts = fs::OpenOptions::new();
    err_at!(
        IOError,
        opts.read(true).write(true).open(loc),
        "opening segment {:?}",
        loc
    )
}

/// Open, creating if missing, the version-registry file under `dir`.
pub(crate) fn open_registry_file(dir: &path::Path) -> Result<fs::File> {
    let loc = to_registry_location(dir);
    let mut opts = fs::OpenOptions::new();
    err_at!(
        IOError,
        opts.read(true).write(true).create(true).open(&loc),
        "opening registry {:?}",
        loc
    )
}

#[cfg(test)]
#[path = "files_test.rs"]
mod files_test;
