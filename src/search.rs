//! Search index (component G, continued): finds a file that may have been
//! renamed or moved by its `(size, mtime_sec, mtime_nsec)` stamp, re-reading
//! and re-verifying before trusting the match.

use std::fs::File as FsFile;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::disk::Disk;
use crate::hash::HashSeed;

/// Looks up candidates in `disk` by stamp, then re-reads the block at the
/// expected offset in `path` and verifies it against the stored block
/// hash before returning a match -- this is what lets `sync` detect
/// renamed/moved files instead of treating them as delete+create.
pub fn find_renamed(
    disk: &Disk,
    size: u64,
    mtime_sec: i64,
    mtime_nsec: u32,
    path: &Path,
    block_size: u32,
    hash_fn: &HashSeed,
) -> std::io::Result<Option<usize>> {
    for &file_idx in disk.files_by_stamp(size, mtime_sec, mtime_nsec) {
        let file = &disk.files[file_idx];
        if file.blocks.is_empty() {
            continue;
        }
        let mut f = FsFile::open(path)?;
        let mut buf = vec![0u8; block_size as usize];
        let mut all_match = true;
        for (i, block) in file.blocks.iter().enumerate() {
            let offset = i as u64 * block_size as u64;
            if f.seek(SeekFrom::Start(offset)).is_err() {
                all_match = false;
                break;
            }
            let n = f.read(&mut buf)?;
            if n == 0 {
                all_match = false;
                break;
            }
            let digest = hash_fn.digest(&buf[..n]);
            if !block.has_usable_hash() || digest != block.hash {
                all_match = false;
                break;
            }
        }
        if all_match {
            return Ok(Some(file_idx));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockState};
    use crate::file::File;
    use crate::hash::HashKind;
    use tempfile::tempdir;

    #[test]
    fn finds_a_match_that_hashes_correctly() {
        let dir = tempdir().unwrap();
        let block_size = 16u32;
        let data = vec![0x7au8; block_size as usize];
        let path = dir.path().join("renamed.bin");
        std::fs::write(&path, &data).unwrap();

        let seed = HashSeed {
            kind: HashKind::Murmur3,
            seed: [0u8; 16],
        };
        let mut d = Disk::new("d1".into(), "/".into(), 0);
        let mut f = File::new("old/name.bin".into(), block_size as u64, 123, 0, 5);
        f.blocks.push(Block {
            state: BlockState::Blk,
            hash: seed.digest(&data),
            parity_pos: 0,
        });
        d.add_file(f);

        let hit = find_renamed(&d, block_size as u64, 123, 0, &path, block_size, &seed).unwrap();
        assert_eq!(hit, Some(0));
    }

    #[test]
    fn rejects_a_stamp_match_with_wrong_content() {
        let dir = tempdir().unwrap();
        let block_size = 16u32;
        let path = dir.path().join("renamed.bin");
        std::fs::write(&path, vec![0x00u8; block_size as usize]).unwrap();

        let seed = HashSeed {
            kind: HashKind::Murmur3,
            seed: [0u8; 16],
        };
        let mut d = Disk::new("d1".into(), "/".into(), 0);
        let mut f = File::new("old/name.bin".into(), block_size as u64, 123, 0, 5);
        f.blocks.push(Block {
            state: BlockState::Blk,
            hash: seed.digest(&vec![0xFFu8; block_size as usize]),
            parity_pos: 0,
        });
        d.add_file(f);

        let hit = find_renamed(&d, block_size as u64, 123, 0, &path, block_size, &seed).unwrap();
        assert_eq!(hit, None);
    }
}
