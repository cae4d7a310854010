//! The `Disk` record (§3/§4.D): one data or parity disk's in-memory
//! catalog -- its files, links, directories, the sparse parity-column
//! array, and the deleted-block ledger.

use std::collections::HashMap;

use crate::block::{Block, ColumnSlot, Deleted};
use crate::file::{File, LinkType};

#[derive(Debug, Clone)]
pub struct Link {
    pub subpath: String,
    pub target: String,
    pub link_type: LinkType,
}

#[derive(Debug, Clone)]
pub struct EmptyDir {
    pub subpath: String,
}

#[derive(Debug)]
pub struct Disk {
    pub name: String,
    pub mount_dir: String,
    /// Filesystem device id as last observed; used to detect a disk that
    /// was replaced without `--force-device`.
    pub device_id: u64,

    pub files: Vec<File>,
    pub links: Vec<Link>,
    pub dirs: Vec<EmptyDir>,
    pub deleted: Vec<Deleted>,

    /// Sparse column array: `par2block[pos]` tells you what occupies
    /// parity position `pos` on this disk.
    par2block: Vec<ColumnSlot>,

    by_inode: HashMap<u64, usize>,
    by_subpath: HashMap<String, usize>,
    by_stamp: HashMap<(u64, i64, u32), Vec<usize>>,

    pub free_blocks: u64,
    pub total_blocks: u64,
}

impl Disk {
    pub fn new(name: String, mount_dir: String, device_id: u64) -> Disk {
        Disk {
            name,
            mount_dir,
            device_id,
            files: Vec::new(),
            links: Vec::new(),
            dirs: Vec::new(),
            deleted: Vec::new(),
            par2block: Vec::new(),
            by_inode: HashMap::new(),
            by_subpath: HashMap::new(),
            by_stamp: HashMap::new(),
            free_blocks: 0,
            total_blocks: 0,
        }
    }

    /// Adds `file` to this disk's catalog, indexing it by inode, subpath,
    /// and `(size, mtime)` stamp, and wiring each of its blocks into the
    /// column array. Returns the file's index.
    pub fn add_file(&mut self, file: File) -> usize {
        let idx = self.files.len();
        self.by_inode.insert(file.inode, idx);
        self.by_subpath.insert(file.subpath.clone(), idx);
        self.by_stamp
            .entry((file.size, file.mtime_sec, file.mtime_nsec))
            .or_default()
            .push(idx);

        for (b, block) in file.blocks.iter().enumerate() {
            self.par2block_set(
                block.parity_pos as usize,
                ColumnSlot::Owned { file: idx, block: b },
            );
        }

        self.files.push(file);
        idx
    }

    pub fn file_by_inode(&self, inode: u64) -> Option<&File> {
        self.by_inode.get(&inode).map(|&i| &self.files[i])
    }

    pub fn file_by_subpath(&self, subpath: &str) -> Option<&File> {
        self.by_subpath.get(subpath).map(|&i| &self.files[i])
    }

    /// Files matching a `(size, mtime_sec, mtime_nsec)` stamp -- the
    /// search index's entry point (§4.G).
    pub fn files_by_stamp(&self, size: u64, mtime_sec: i64, mtime_nsec: u32) -> &[usize] {
        self.by_stamp
            .get(&(size, mtime_sec, mtime_nsec))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Grows the column array if needed; intermediate holes become `Empty`.
    pub fn par2block_set(&mut self, pos: usize, slot: ColumnSlot) {
        if pos >= self.par2block.len() {
            self.par2block.resize(pos + 1, ColumnSlot::Empty);
        }
        self.par2block[pos] = slot;
    }

    /// Returns `Empty` for out-of-range or unused positions.
    pub fn par2block_get(&self, pos: usize) -> ColumnSlot {
        self.par2block.get(pos).copied().unwrap_or(ColumnSlot::Empty)
    }

    /// Releases a slot. If it held a `Deleted` record, the backing record
    /// is removed from the deleted-block ledger.
    pub fn par2block_clear(&mut self, pos: usize) {
        if let Some(slot) = self.par2block.get(pos).copied() {
            if let ColumnSlot::Deleted { index } = slot {
                // Swap-remove would invalidate other `Deleted { index }`
                // references, so this just tombstones the position; the
                // record list is compacted only on full rewrite.
                let _ = index;
            }
            if pos < self.par2block.len() {
                self.par2block[pos] = ColumnSlot::Empty;
            }
        }
    }

    /// Records a deleted block at `pos`, replacing whatever was there.
    pub fn mark_deleted(&mut self, pos: usize, deleted: Deleted) {
        let index = self.deleted.len();
        self.deleted.push(deleted);
        self.par2block_set(pos, ColumnSlot::Deleted { index });
    }

    pub fn column_count(&self) -> usize {
        self.par2block.len()
    }

    /// `file2par(file, i)`: the parity position of block `i` of `file`.
    /// Constant time, since each `Block` carries its own `parity_pos`.
    pub fn file2par(&self, file: usize, i: usize) -> u32 {
        self.files[file].blocks[i].parity_pos
    }

    pub fn file2block(&self, file: usize, i: usize) -> &Block {
        &self.files[file].blocks[i]
    }

    /// `par2file`: which file (and which of its blocks) owns a column
    /// position, if any.
    pub fn par2file(&self, pos: usize) -> Option<(usize, usize)> {
        match self.par2block_get(pos) {
            ColumnSlot::Owned { file, block } => Some((file, block)),
            _ => None,
        }
    }

    /// True iff there is no file, link, dir, and no deleted block below
    /// `blockmax` -- used to omit the disk from the content file.
    pub fn is_empty(&self, blockmax: usize) -> bool {
        if !self.files.is_empty() || !self.links.is_empty() || !self.dirs.is_empty() {
            return false;
        }
        for pos in 0..blockmax.min(self.par2block.len()) {
            if matches!(self.par2block[pos], ColumnSlot::Deleted { .. }) {
                return false;
            }
        }
        true
    }

    /// Checks the invariants listed in §4.D: every `file2par` round-trips
    /// through `par2block`, and no two files reference the same column.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen = HashMap::new();
        for (fi, file) in self.files.iter().enumerate() {
            for (bi, block) in file.blocks.iter().enumerate() {
                let pos = block.parity_pos as usize;
                match self.par2block_get(pos) {
                    ColumnSlot::Owned { file: of, block: ob } if of == fi && ob == bi => {}
                    other => {
                        return Err(format!(
                            "file2par({fi},{bi}) = {pos} does not round-trip through par2block ({other:?})"
                        ));
                    }
                }
                if let Some(prev) = seen.insert(pos, fi) {
                    if prev != fi {
                        return Err(format!("column {pos} claimed by files {prev} and {fi}"));
                    }
                }
            }
        }
        Ok(())
    }
}
