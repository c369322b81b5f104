//! Per-run cache of directory listings.
//!
//! The same directories (/boot, the hostfiles directories) are listed
//! repeatedly during one build, so listings are read once and memoized for
//! the life of the cache. The filesystem is assumed static while the
//! builder runs; there is no invalidation.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Default)]
pub struct DirCache {
    entries: HashMap<PathBuf, Vec<String>>,
}

impl DirCache {
    pub fn new() -> Self {
        DirCache::default()
    }

    /// List the entry names of `path`, reading the directory on the first
    /// call and returning the cached listing afterwards.
    ///
    /// A directory that cannot be opened yields an empty listing (and the
    /// emptiness is cached too). An error while scanning a directory that
    /// did open is fatal: it means the listing would be silently
    /// incomplete.
    pub fn list(&mut self, path: &Path) -> Result<&[String]> {
        let listing = match self.entries.entry(path.to_path_buf()) {
            Entry::Occupied(cached) => cached.into_mut(),
            Entry::Vacant(slot) => slot.insert(read_listing(path)?),
        };
        Ok(listing)
    }
}

fn read_listing(path: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();

    // Open failure is expected for hostfiles entries naming directories
    // that no longer exist; the caller just sees nothing to match.
    let iter = match fs::read_dir(path) {
        Ok(iter) => iter,
        Err(_) => return Ok(names),
    };

    for entry in iter {
        let entry =
            entry.with_context(|| format!("error reading directory '{}'", path.display()))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }

    Ok(names)
}
