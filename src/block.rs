//! Block & disk model (component D). The original encodes block state in
//! the low 3 bits of the owning-file pointer (`BLOCK_EMPTY == NULL`); this
//! port replaces that with the tagged variants recommended in the design
//! notes, stored inline rather than pointer-packed.

use crate::hash::{self, Digest};

/// The five block states (§3). `Blk`/`Chg`/`Rep` live inside a `File`'s
/// block vector; `Deleted` lives in a `Disk`'s deleted-block ledger;
/// `Empty` is the absence of any block at a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Hash is valid; parity at this column reflects this block's content.
    Blk,
    /// Content was overwritten since last sync. The stored hash, if real,
    /// names the *old* content still present in parity -- per the design
    /// note on `block_has_updated_hash`, a CHG hash is never usable to
    /// verify a reconstruction in strategy 1.
    Chg,
    /// Content replaced since last sync; hash is of the *new* content,
    /// parity still encodes the old one.
    Rep,
}

/// One logical parity-stripe unit, owned by the `File` whose content it
/// covers. `parity_pos` is this block's column index in the owning disk's
/// stripe; the invariant `file2par(f, i).parity_pos == f.blocks[i].parity_pos`
/// is checked by [`crate::disk::Disk::check_invariants`].
#[derive(Debug, Clone)]
pub struct Block {
    pub state: BlockState,
    pub hash: Digest,
    pub parity_pos: u32,
}

impl Block {
    pub fn is_invalid_hash(&self) -> bool {
        hash::is_invalid(&self.hash)
    }

    pub fn is_zero_hash(&self) -> bool {
        hash::is_zero(&self.hash)
    }

    pub fn is_real_hash(&self) -> bool {
        hash::is_real(&self.hash)
    }

    /// Whether this block's stored hash can be trusted to verify a
    /// reconstruction. `Chg` never qualifies, even with a real hash --
    /// see the open question on `block_has_updated_hash` in the design
    /// notes: the hash names stale content, not what parity currently
    /// encodes.
    pub fn has_usable_hash(&self) -> bool {
        matches!(self.state, BlockState::Blk | BlockState::Rep) && self.is_real_hash()
    }
}

/// A deleted block's remembered hash, kept alive in a disk's deleted-block
/// ledger so parity can still be solved for its stripe until the next sync.
#[derive(Debug, Clone)]
pub struct Deleted {
    pub hash: Digest,
    pub parity_pos: u32,
}

/// What a disk's parity column points to at a given position: a block
/// owned by some file, a standalone deleted-block record, or nothing.
/// Indices are into the owning `Disk`'s `files`/`deleted` vectors, avoiding
/// the original's raw owning pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSlot {
    Owned { file: usize, block: usize },
    Deleted { index: usize },
    Empty,
}

impl Default for ColumnSlot {
    fn default() -> Self {
        ColumnSlot::Empty
    }
}
