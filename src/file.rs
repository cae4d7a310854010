//! The `File` record (§3): size, timestamp, inode, subpath, its owned block
//! vector, and the per-file flag bitset.

use crate::block::Block;

/// Sentinel for `mtime_nsec` meaning "nanoseconds unknown" -- filesystems
/// that only report second-resolution mtimes report this instead of 0, so a
/// real 0-nanosecond timestamp is still distinguishable.
pub const INVALID_NSEC: u32 = u32::MAX;

bitflags_like::bitflags! {
    /// Per-file flags. A plain bitset rather than bitflags! macro usage
    /// purely because the teacher's codebase doesn't pull in the
    /// `bitflags` crate; this mirrors its hand-rolled `const` + `u32`
    /// pattern instead (see `usage_map.rs`'s `AllocStatus`).
    pub struct FileFlags: u32 {
        const PRESENT = 1 << 0;
        const EXCLUDED = 1 << 1;
        const DAMAGED = 1 << 2;
        const FIXED = 1 << 3;
        const CREATED = 1 << 4;
        const FINISHED = 1 << 5;
        const COPY = 1 << 6;
        const OPENED = 1 << 7;
        const UNSYNCED = 1 << 8;
        const WITHOUT_INODE = 1 << 9;
    }
}

/// The 4-bit link-type field carried alongside the flag bitset; `None`
/// means this is a regular file, not a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Hardlink,
    Symlink,
    Symdir,
    Junction,
}

#[derive(Debug, Clone)]
pub struct File {
    pub size: u64,
    pub mtime_sec: i64,
    pub mtime_nsec: u32,
    pub inode: u64,
    /// Hint for where on the underlying device this file's first block
    /// lives, used by the scanner to order reads; opaque to this crate.
    pub physical_offset: u64,
    pub subpath: String,
    pub blocks: Vec<Block>,
    pub flags: FileFlags,
    pub link_type: Option<LinkType>,
}

impl File {
    pub fn new(subpath: String, size: u64, mtime_sec: i64, mtime_nsec: u32, inode: u64) -> File {
        File {
            size,
            mtime_sec,
            mtime_nsec,
            inode,
            physical_offset: 0,
            subpath,
            blocks: Vec::new(),
            flags: FileFlags::empty(),
            link_type: None,
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The `(subpath, size, mtime_sec, mtime_nsec)` tuple used by the
    /// inode-collision heuristic in the check/fix engine (§4.F step 6).
    /// Changing which fields participate here silently changes future
    /// rename detection, per the open question in the design notes.
    pub fn rename_stamp(&self) -> (&str, u64, i64, u32) {
        (&self.subpath, self.size, self.mtime_sec, self.mtime_nsec)
    }

    /// The `(size, mtime_sec, mtime_nsec)` stamp used by the search index
    /// (§4.G) to find a file that may have been renamed or moved.
    pub fn search_stamp(&self) -> (u64, i64, u32) {
        (self.size, self.mtime_sec, self.mtime_nsec)
    }
}

/// A tiny hand-rolled bitflags macro, in the spirit of the flag constants
/// the teacher wrote by hand rather than pulling in the `bitflags` crate
/// for a handful of bits.
mod bitflags_like {
    macro_rules! bitflags {
        (
            $(#[$meta:meta])*
            pub struct $name:ident: $ty:ty {
                $(const $flag:ident = $value:expr;)*
            }
        ) => {
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
            pub struct $name(pub $ty);

            #[allow(dead_code)]
            impl $name {
                $(pub const $flag: $name = $name($value);)*

                pub const fn empty() -> Self {
                    $name(0)
                }

                pub fn contains(self, other: $name) -> bool {
                    self.0 & other.0 == other.0
                }

                pub fn set(&mut self, other: $name) {
                    self.0 |= other.0;
                }

                pub fn clear(&mut self, other: $name) {
                    self.0 &= !other.0;
                }
            }

            impl std::ops::BitOr for $name {
                type Output = $name;
                fn bitor(self, rhs: $name) -> $name {
                    $name(self.0 | rhs.0)
                }
            }
        };
    }
    pub(crate) use bitflags;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine_and_query() {
        let mut f = File::new("a/b.mkv".into(), 100, 0, 0, 1);
        assert!(!f.flags.contains(FileFlags::DAMAGED));
        f.flags.set(FileFlags::DAMAGED | FileFlags::FIXED);
        assert!(f.flags.contains(FileFlags::DAMAGED));
        assert!(f.flags.contains(FileFlags::FIXED));
        f.flags.clear(FileFlags::DAMAGED);
        assert!(!f.flags.contains(FileFlags::DAMAGED));
        assert!(f.flags.contains(FileFlags::FIXED));
    }

    #[test]
    fn rename_stamp_uses_four_fields() {
        let f = File::new("x".into(), 10, 5, 7, 9);
        assert_eq!(f.rename_stamp(), ("x", 10, 5, 7));
    }
}
