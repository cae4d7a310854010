//! Filesystem scanning: the external boundary the core explicitly
//! excludes (§1 lists it among the collaborators that "supply inputs...
//! and consume outputs"). This module walks a disk's directory tree and
//! turns it into the [`crate::disk::Disk`] catalog the rest of the crate
//! operates on -- the one piece of real I/O the algorithmic core never
//! performs itself.

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::block::{Block, BlockState};
use crate::disk::{Disk, EmptyDir};
use crate::file::{File, INVALID_NSEC};
use crate::hash::HashSeed;

/// Very small shell-style glob: only `*` is special, matching any run of
/// characters. Sufficient for `exclude *.tmp` style config entries without
/// pulling in a dedicated glob crate for one directive.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn rec(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => rec(&p[1..], t) || (!t.is_empty() && rec(p, &t[1..])),
            Some(&c) => !t.is_empty() && t[0] == c && rec(&p[1..], &t[1..]),
        }
    }
    rec(pattern.as_bytes(), text.as_bytes())
}

fn is_excluded(subpath: &str, excludes: &[String]) -> bool {
    let name = subpath.rsplit('/').next().unwrap_or(subpath);
    excludes.iter().any(|pat| glob_match(pat, name) || glob_match(pat, subpath))
}

/// Walks `root` and builds a fresh [`Disk`] for it: every regular file is
/// read in `block_size`-aligned chunks, hashed with `hash_fn`, and
/// appended as a `Blk` block at the next free column; every empty
/// directory and symlink is recorded too. Column assignment here is a
/// simple monotonic counter -- the original reuses freed columns from the
/// previous sync's `par2block`, which requires carrying that state into
/// the scan; tracked as a known simplification rather than silently
/// diverging on it (see `DESIGN.md`).
pub fn scan_disk(name: &str, root: &Path, block_size: u32, hash_fn: &HashSeed, excludes: &[String]) -> io::Result<Disk> {
    let mut disk = Disk::new(name.to_string(), root.display().to_string(), device_id(root)?);
    let mut next_column = 0usize;
    walk(root, root, block_size, hash_fn, excludes, &mut disk, &mut next_column)?;
    Ok(disk)
}

#[cfg(unix)]
fn device_id(root: &Path) -> io::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::metadata(root)?.dev())
}

#[cfg(not(unix))]
fn device_id(_root: &Path) -> io::Result<u64> {
    Ok(0)
}

fn walk(
    root: &Path,
    dir: &Path,
    block_size: u32,
    hash_fn: &HashSeed,
    excludes: &[String],
    disk: &mut Disk,
    next_column: &mut usize,
) -> io::Result<()> {
    let mut saw_entry = false;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let subpath = relative_subpath(root, &path);
        if is_excluded(&subpath, excludes) {
            continue;
        }
        saw_entry = true;

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, block_size, hash_fn, excludes, disk, next_column)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&path)?;
            disk.links.push(crate::disk::Link {
                subpath,
                target: target.display().to_string(),
                link_type: crate::file::LinkType::Symlink,
            });
        } else if file_type.is_file() {
            let file = read_file(&path, &subpath, block_size, hash_fn, next_column)?;
            disk.add_file(file);
        }
    }
    if !saw_entry && dir != root {
        disk.dirs.push(EmptyDir {
            subpath: relative_subpath(root, dir),
        });
    }
    Ok(())
}

fn relative_subpath(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/")
}

fn read_file(path: &Path, subpath: &str, block_size: u32, hash_fn: &HashSeed, next_column: &mut usize) -> io::Result<File> {
    use std::io::Read;

    let meta = fs::metadata(path)?;
    let mtime = meta.modified()?;
    let (mtime_sec, mtime_nsec) = match mtime.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
        Err(e) => (-(e.duration().as_secs() as i64), INVALID_NSEC),
    };

    #[cfg(unix)]
    let inode = {
        use std::os::unix::fs::MetadataExt;
        meta.ino()
    };
    #[cfg(not(unix))]
    let inode = 0u64;

    let mut file = File::new(subpath.to_string(), meta.len(), mtime_sec, mtime_nsec, inode);
    file.flags.set(crate::file::FileFlags::PRESENT);

    let mut f = fs::File::open(path)?;
    let mut buf = vec![0u8; block_size as usize];
    loop {
        let n = read_block(&mut f, &mut buf)?;
        if n == 0 {
            break;
        }
        let hash = hash_fn.digest(&buf[..n]);
        file.blocks.push(Block {
            state: BlockState::Blk,
            hash,
            parity_pos: *next_column as u32,
        });
        *next_column += 1;
        if n < buf.len() {
            break;
        }
    }
    Ok(file)
}

fn read_block(f: &mut fs::File, buf: &mut [u8]) -> io::Result<usize> {
    use std::io::Read;
    let mut total = 0;
    while total < buf.len() {
        let n = f.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}
