//! Import & search indexes (component G): content-addressed recovery from
//! an external directory, and rename/move detection via a `(size, mtime)`
//! stamp. Both feed the check/fix engine's `state_import_fetch` call.

use std::collections::HashMap;
use std::fs::File as FsFile;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::ContentError;
use crate::hash::{Digest, HashSeed};

#[derive(Debug, Clone)]
struct ImportEntry {
    path: PathBuf,
    offset: u64,
    size: u32,
    hash: Digest,
}

/// Hash-indexed multimap over an external directory tree, keyed by the
/// first 32 bits of each block's hash (matching the original's reduced
/// key, which keeps the map small while still making false positives
/// cheap to reject by full-hash recompare).
pub struct ImportIndex {
    by_key: HashMap<u32, Vec<ImportEntry>>,
    block_size: u32,
}

fn key_of(hash: &Digest) -> u32 {
    u32::from_le_bytes(hash[0..4].try_into().unwrap())
}

impl ImportIndex {
    pub fn new(block_size: u32) -> ImportIndex {
        ImportIndex {
            by_key: HashMap::new(),
            block_size,
        }
    }

    /// Ingests one external file: every full `block_size`-aligned chunk is
    /// hashed with `current` (and, if `previous` is given, also with the
    /// previous hash function) and inserted into the map. A reduced hash
    /// build has no full-width digest to index by and must reject import
    /// entirely -- enforced by the caller, not here.
    pub fn ingest_file(
        &mut self,
        path: &Path,
        current: &HashSeed,
        previous: Option<&HashSeed>,
    ) -> Result<(), ContentError> {
        let mut f = FsFile::open(path).map_err(ContentError::Io)?;
        let len = f.metadata().map_err(ContentError::Io)?.len();
        let mut buf = vec![0u8; self.block_size as usize];

        let mut offset = 0u64;
        while offset + self.block_size as u64 <= len {
            f.read_exact(&mut buf).map_err(ContentError::Io)?;
            let h = current.digest(&buf);
            self.by_key.entry(key_of(&h)).or_default().push(ImportEntry {
                path: path.to_path_buf(),
                offset,
                size: self.block_size,
                hash: h,
            });
            if let Some(prev) = previous {
                let ph = prev.digest(&buf);
                self.by_key.entry(key_of(&ph)).or_default().push(ImportEntry {
                    path: path.to_path_buf(),
                    offset,
                    size: self.block_size,
                    hash: ph,
                });
            }
            offset += self.block_size as u64;
        }
        Ok(())
    }

    /// Probes the map for `hash`. On a candidate hit, re-reads the source
    /// file at the stored `(offset, size)`, recomputes the hash, and
    /// fails loud if the source changed under it -- a silent wrong answer
    /// here would corrupt the array being repaired.
    pub fn fetch(&self, hash: &Digest, hash_fn: &HashSeed, out: &mut [u8]) -> Result<bool, ContentError> {
        let Some(candidates) = self.by_key.get(&key_of(hash)) else {
            return Ok(false);
        };

        for c in candidates {
            if c.hash != *hash {
                continue;
            }
            let mut f = match FsFile::open(&c.path) {
                Ok(f) => f,
                Err(_) => continue,
            };
            if f.seek(SeekFrom::Start(c.offset)).is_err() {
                continue;
            }
            let mut buf = vec![0u8; c.size as usize];
            if f.read_exact(&mut buf).is_err() {
                continue;
            }
            let recomputed = hash_fn.digest(&buf);
            if recomputed != *hash {
                // The source file changed under us since it was indexed.
                return Err(ContentError::RamCorruption);
            }
            out[..buf.len()].copy_from_slice(&buf);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn len(&self) -> usize {
        self.by_key.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds an [`ImportIndex`] from every regular file under `dir`, walked
/// recursively -- the `--import` donor-directory scan (§4.G, §6). Mirrors
/// `scan::walk`'s directory-walking shape, narrowed to files only (an
/// import tree's own symlinks/empty dirs carry no recoverable content).
pub fn build_from_dir(
    dir: &Path,
    block_size: u32,
    current: &HashSeed,
    previous: Option<&HashSeed>,
) -> Result<ImportIndex, ContentError> {
    let mut index = ImportIndex::new(block_size);
    walk_dir(dir, &mut index, current, previous)?;
    Ok(index)
}

fn walk_dir(
    dir: &Path,
    index: &mut ImportIndex,
    current: &HashSeed,
    previous: Option<&HashSeed>,
) -> Result<(), ContentError> {
    for entry in std::fs::read_dir(dir).map_err(ContentError::Io)? {
        let entry = entry.map_err(ContentError::Io)?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(ContentError::Io)?;
        if file_type.is_dir() {
            walk_dir(&path, index, current, previous)?;
        } else if file_type.is_file() {
            index.ingest_file(&path, current, previous)?;
        }
    }
    Ok(())
}
