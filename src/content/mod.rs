//! Content-file codec (component E): the binary on-disk catalog format.
//! Ported field-for-field from `cmdline/state.c`'s `state_write_binary`
//! and `state_read_binary` -- magic bytes, tag grammar, varint encoding,
//! and the CRC32C trailer are all transcribed exactly since the format
//! must interoperate bit-for-bit across versions of the tool.

mod varint;

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::block::{Block, BlockState, ColumnSlot};
use crate::disk::{Deleted as DeletedRecord, Disk, EmptyDir, Link};
use crate::error::ContentError;
use crate::file::{File, FileFlags, LinkType};
use crate::hash::{self, Crc32c, Digest, HashKind, HashSeed};
use crate::info::Info;
use crate::map::{MapEntry, ParityDescriptor};

pub const MAGIC_CURRENT: &[u8; 12] = b"SNAPCNT2\n\x03\x00\x00";
pub const MAGIC_LEGACY: &[u8; 12] = b"SNAPCNT1\n\x03\x00\x00";

const TAG_BLOCK_SIZE: u8 = b'z';
const TAG_BLOCKMAX: u8 = b'x';
const TAG_HASH: u8 = b'c';
const TAG_PREV_HASH: u8 = b'C';
const TAG_MAP: u8 = b'M';
const TAG_PARITY: u8 = b'P';
const TAG_FILE: u8 = b'f';
const TAG_RUN_BLK: u8 = b'b';
const TAG_RUN_CHG: u8 = b'g';
const TAG_RUN_REP: u8 = b'p';
const TAG_RUN_NEW: u8 = b'n';
const TAG_SYMLINK: u8 = b's';
const TAG_HARDLINK: u8 = b'a';
const TAG_DIR: u8 = b'r';
const TAG_DELETED: u8 = b'h';
const TAG_INFO: u8 = b'i';
const TAG_TRAILER: u8 = b'N';

const RUN_DELETED: u8 = b'o';
const RUN_FREE: u8 = b'O';

/// Everything the content file needs to persist, gathered from a `State`
/// at save time. Disks are paired with their map-entry index so the file
/// record ties back to `MapEntry::slot`.
pub struct ContentState {
    pub block_size: u32,
    pub blockmax: u32,
    pub hash: HashSeed,
    pub prev_hash: Option<HashSeed>,
    pub maps: Vec<MapEntry>,
    pub parities: Vec<ParityDescriptor>,
    /// Disks in the same order as `maps` -- `disks[i]` belongs to
    /// `maps[i]`.
    pub disks: Vec<Disk>,
    /// One entry per parity position, `0..blockmax`.
    pub info: Vec<Info>,
}

struct CrcWriter<W> {
    inner: W,
    crc: Crc32c,
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.crc.update(&buf[..n]);
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct CrcReader<R> {
    inner: R,
    crc: Crc32c,
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.crc.update(&buf[..n]);
        Ok(n)
    }
}

fn write_hash<W: Write>(w: &mut W, h: &Digest) -> io::Result<()> {
    w.write_all(h)
}

fn read_hash<R: Read>(r: &mut R) -> io::Result<Digest> {
    let mut h = [0u8; 16];
    r.read_exact(&mut h)?;
    Ok(h)
}

fn write_hash_seed<W: Write>(w: &mut W, hs: &HashSeed) -> io::Result<()> {
    w.write_all(&[hs.kind.tag()])?;
    w.write_all(&hs.seed)
}

fn read_hash_seed<R: Read>(r: &mut R) -> io::Result<HashSeed> {
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;
    let kind = HashKind::from_tag(tag[0])
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown hash tag"))?;
    let mut seed = [0u8; 16];
    r.read_exact(&mut seed)?;
    Ok(HashSeed { kind, seed })
}

/// A maximal run of consecutive blocks sharing the same state, as written
/// under tags `b`/`g`/`p`.
struct BlockRun {
    state: BlockState,
    start_pos: u32,
    hashes: Vec<Digest>,
}

fn block_runs(blocks: &[Block]) -> Vec<BlockRun> {
    let mut runs: Vec<BlockRun> = Vec::new();
    for b in blocks {
        if let Some(last) = runs.last_mut() {
            if last.state == b.state
                && last.start_pos as usize + last.hashes.len() == b.parity_pos as usize
            {
                last.hashes.push(b.hash);
                continue;
            }
        }
        runs.push(BlockRun {
            state: b.state,
            start_pos: b.parity_pos,
            hashes: vec![b.hash],
        });
    }
    runs
}

fn state_tag(state: BlockState) -> u8 {
    match state {
        BlockState::Blk => TAG_RUN_BLK,
        BlockState::Chg => TAG_RUN_CHG,
        BlockState::Rep => TAG_RUN_REP,
    }
}

fn write_file<W: Write>(w: &mut W, mapping_idx: u32, f: &File) -> io::Result<()> {
    varint::write_u32(w, mapping_idx)?;
    varint::write_u64(w, f.size)?;
    varint::write_u64(w, f.mtime_sec as u64)?;
    varint::write_u32(w, f.mtime_nsec.wrapping_add(1))?; // 0 means INVALID_NSEC
    varint::write_u64(w, f.inode)?;
    varint::write_string(w, &f.subpath)?;

    let runs = block_runs(&f.blocks);
    varint::write_u64(w, runs.len() as u64)?;
    for run in runs {
        w.write_all(&[state_tag(run.state)])?;
        varint::write_u32(w, run.start_pos)?;
        varint::write_u64(w, run.hashes.len() as u64)?;
        for h in &run.hashes {
            write_hash(w, h)?;
        }
    }
    Ok(())
}

fn read_file<R: Read>(r: &mut R) -> io::Result<(u32, File)> {
    let mapping_idx = varint::read_u32(r)?;
    let size = varint::read_u64(r)?;
    let mtime_sec = varint::read_u64(r)? as i64;
    let nsec_plus1 = varint::read_u32(r)?;
    let mtime_nsec = nsec_plus1.wrapping_sub(1);
    let inode = varint::read_u64(r)?;
    let subpath = varint::read_string(r)?;

    let mut file = File::new(subpath, size, mtime_sec, mtime_nsec, inode);
    file.flags.set(FileFlags::PRESENT);

    let num_runs = varint::read_u64(r)?;
    for _ in 0..num_runs {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        let start_pos = varint::read_u32(r)?;
        let count = varint::read_u64(r)?;

        match tag[0] {
            TAG_RUN_NEW => {
                // Legacy NEW: upgraded to CHG with ZERO hash, no stored
                // hashes follow. Writing this tag is refused elsewhere; it
                // is only ever produced here, on read.
                for i in 0..count {
                    file.blocks.push(Block {
                        state: BlockState::Chg,
                        hash: hash::ZERO,
                        parity_pos: start_pos + i as u32,
                    });
                }
            }
            t @ (TAG_RUN_BLK | TAG_RUN_CHG | TAG_RUN_REP) => {
                let state = match t {
                    TAG_RUN_BLK => BlockState::Blk,
                    TAG_RUN_CHG => BlockState::Chg,
                    TAG_RUN_REP => BlockState::Rep,
                    _ => unreachable!(),
                };
                for i in 0..count {
                    let h = read_hash(r)?;
                    file.blocks.push(Block {
                        state,
                        hash: h,
                        parity_pos: start_pos + i as u32,
                    });
                }
            }
            _ => {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "unknown block run tag"));
            }
        }
    }

    Ok((mapping_idx, file))
}

/// Runs of the deleted-block ledger for one disk, covering the full
/// `0..blockmax` range: `o` (deleted, hash follows per position) or `O`
/// (free -- not a deleted block here).
fn write_deleted_ledger<W: Write>(w: &mut W, mapping_idx: u32, disk: &Disk, blockmax: u32) -> io::Result<()> {
    w.write_all(&[TAG_DELETED])?;
    varint::write_u32(w, mapping_idx)?;

    let mut runs: Vec<(u8, u32, u32)> = Vec::new(); // (kind, start, count)
    for pos in 0..blockmax {
        let deleted = matches!(disk.par2block_get(pos as usize), ColumnSlot::Deleted { .. });
        let kind = if deleted { RUN_DELETED } else { RUN_FREE };
        if let Some(last) = runs.last_mut() {
            if last.0 == kind && last.1 + last.2 == pos {
                last.2 += 1;
                continue;
            }
        }
        runs.push((kind, pos, 1));
    }

    varint::write_u64(w, runs.len() as u64)?;
    for (kind, start, count) in runs {
        w.write_all(&[kind])?;
        varint::write_u32(w, start)?;
        varint::write_u32(w, count)?;
        if kind == RUN_DELETED {
            for pos in start..start + count {
                if let ColumnSlot::Deleted { index } = disk.par2block_get(pos as usize) {
                    write_hash(w, &disk.deleted[index].hash)?;
                }
            }
        }
    }
    Ok(())
}

struct DeletedRun {
    start: u32,
    hashes: Vec<Digest>,
}

fn read_deleted_ledger<R: Read>(r: &mut R) -> io::Result<(u32, Vec<DeletedRun>)> {
    let mapping_idx = varint::read_u32(r)?;
    let run_count = varint::read_u64(r)?;
    let mut out = Vec::new();
    for _ in 0..run_count {
        let mut kind = [0u8; 1];
        r.read_exact(&mut kind)?;
        let start = varint::read_u32(r)?;
        let count = varint::read_u32(r)?;
        if kind[0] == RUN_DELETED {
            let mut hashes = Vec::with_capacity(count as usize);
            for _ in 0..count {
                hashes.push(read_hash(r)?);
            }
            out.push(DeletedRun { start, hashes });
        } else if kind[0] != RUN_FREE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "unknown deleted-ledger run tag"));
        }
    }
    Ok((mapping_idx, out))
}

/// Wire-level info flags: bit 0 = present, bit 1 = bad, bit 2 = rehash,
/// bit 3 = justsynced. Distinct from [`Info`]'s in-memory 3-bit layout,
/// which has no "present" concept (absence is simply `Info::NONE`).
fn wire_flags(info: Info) -> u8 {
    if info.is_none() {
        return 0;
    }
    let mut f = 1u8;
    if info.is_bad() {
        f |= 1 << 1;
    }
    if info.is_rehash() {
        f |= 1 << 2;
    }
    if info.is_justsynced() {
        f |= 1 << 3;
    }
    f
}

fn info_from_wire(flags: u8, time: u32) -> Info {
    if flags & 1 == 0 {
        return Info::NONE;
    }
    Info::new(time, flags & (1 << 1) != 0, flags & (1 << 2) != 0, flags & (1 << 3) != 0)
}

fn write_info_array<W: Write>(w: &mut W, info: &[Info]) -> io::Result<()> {
    w.write_all(&[TAG_INFO])?;
    let oldest = info.iter().filter(|i| !i.is_none()).map(|i| i.time()).min().unwrap_or(0);
    varint::write_u32(w, oldest)?;

    let mut runs: Vec<(u8, u32, u32, u32)> = Vec::new(); // (flags, time, start, count)
    for (pos, &i) in info.iter().enumerate() {
        let flags = wire_flags(i);
        let time = if i.is_none() { 0 } else { i.time() };
        if let Some(last) = runs.last_mut() {
            if last.0 == flags && last.1 == time && last.2 + last.3 == pos as u32 {
                last.3 += 1;
                continue;
            }
        }
        runs.push((flags, time, pos as u32, 1));
    }

    varint::write_u64(w, runs.len() as u64)?;
    for (flags, time, _start, count) in runs {
        varint::write_u32(w, count)?;
        w.write_all(&[flags])?;
        if flags & 1 != 0 {
            varint::write_u32(w, time - oldest)?;
        }
    }
    Ok(())
}

fn read_info_array<R: Read>(r: &mut R) -> io::Result<Vec<Info>> {
    let oldest = varint::read_u32(r)?;
    let run_count = varint::read_u64(r)?;
    let mut out = Vec::new();
    for _ in 0..run_count {
        let count = varint::read_u32(r)?;
        let mut flags = [0u8; 1];
        r.read_exact(&mut flags)?;
        let info = if flags[0] & 1 != 0 {
            let delta = varint::read_u32(r)?;
            info_from_wire(flags[0], oldest + delta)
        } else {
            Info::NONE
        };
        for _ in 0..count {
            out.push(info);
        }
    }
    Ok(out)
}

/// Serializes `state`, writing the body then the running CRC32C trailer
/// (little-endian `finish()`).
pub fn write<W: Write>(w: W, state: &ContentState) -> Result<(), ContentError> {
    let mut cw = CrcWriter {
        inner: w,
        crc: Crc32c::new(),
    };
    write_body(&mut cw, state).map_err(ContentError::Io)?;
    let crc = cw.crc.finish();
    cw.inner.write_all(&crc.to_le_bytes()).map_err(ContentError::Io)?;
    Ok(())
}

fn write_body<W: Write>(w: &mut W, state: &ContentState) -> io::Result<()> {
    w.write_all(MAGIC_CURRENT)?;

    w.write_all(&[TAG_BLOCK_SIZE])?;
    varint::write_u32(w, state.block_size)?;

    w.write_all(&[TAG_BLOCKMAX])?;
    varint::write_u32(w, state.blockmax)?;

    w.write_all(&[TAG_HASH])?;
    write_hash_seed(w, &state.hash)?;

    if let Some(prev) = &state.prev_hash {
        w.write_all(&[TAG_PREV_HASH])?;
        write_hash_seed(w, prev)?;
    }

    for m in &state.maps {
        w.write_all(&[TAG_MAP])?;
        varint::write_string(w, &m.disk_name)?;
        varint::write_u32(w, m.slot)?;
        varint::write_u32(w, m.total_blocks)?;
        varint::write_u32(w, m.free_blocks)?;
        varint::write_string(w, &m.uuid)?;
    }

    for p in &state.parities {
        w.write_all(&[TAG_PARITY])?;
        varint::write_u32(w, p.level)?;
        varint::write_u32(w, p.total_blocks)?;
        varint::write_u32(w, p.free_blocks)?;
        varint::write_string(w, &p.uuid)?;
    }

    for (mapping_idx, disk) in state.disks.iter().enumerate() {
        let mapping_idx = mapping_idx as u32;
        if disk.is_empty(state.blockmax as usize) {
            continue;
        }

        for file in &disk.files {
            if file.link_type.is_some() {
                continue;
            }
            w.write_all(&[TAG_FILE])?;
            write_file(w, mapping_idx, file)?;
        }

        for link in &disk.links {
            let tag = match link.link_type {
                LinkType::Hardlink => TAG_HARDLINK,
                _ => TAG_SYMLINK,
            };
            w.write_all(&[tag])?;
            varint::write_u32(w, mapping_idx)?;
            varint::write_string(w, &link.subpath)?;
            varint::write_string(w, &link.target)?;
        }

        for dir in &disk.dirs {
            w.write_all(&[TAG_DIR])?;
            varint::write_u32(w, mapping_idx)?;
            varint::write_string(w, &dir.subpath)?;
        }

        write_deleted_ledger(w, mapping_idx, disk, state.blockmax)?;
    }

    write_info_array(w, &state.info)?;

    w.write_all(&[TAG_TRAILER])?;
    Ok(())
}

/// Parses a content file body (everything up to and including the `N`
/// trailer marker plus the 4-byte CRC that follows it) out of `r`.
pub fn read<R: Read>(r: R) -> Result<ContentState, ContentError> {
    let mut cr = CrcReader {
        inner: r,
        crc: Crc32c::new(),
    };

    let mut magic = [0u8; 12];
    cr.read_exact(&mut magic).map_err(ContentError::Io)?;
    if &magic != MAGIC_CURRENT && &magic != MAGIC_LEGACY {
        return Err(ContentError::BadMagic { path: PathBuf::new() });
    }

    let mut block_size = 0u32;
    let mut blockmax = 0u32;
    let mut hash = None;
    let mut prev_hash = None;
    let mut maps: Vec<MapEntry> = Vec::new();
    let mut parities: Vec<ParityDescriptor> = Vec::new();
    let mut disks_by_idx: std::collections::BTreeMap<u32, Disk> = std::collections::BTreeMap::new();
    let mut info = Vec::new();
    let mut saw_trailer = false;

    loop {
        let mut tag = [0u8; 1];
        let n = cr.read(&mut tag).map_err(ContentError::Io)?;
        if n == 0 {
            return Err(ContentError::MissingTrailer { path: PathBuf::new() });
        }

        match tag[0] {
            TAG_BLOCK_SIZE => block_size = varint::read_u32(&mut cr).map_err(ContentError::Io)?,
            TAG_BLOCKMAX => blockmax = varint::read_u32(&mut cr).map_err(ContentError::Io)?,
            TAG_HASH => hash = Some(read_hash_seed(&mut cr).map_err(ContentError::Io)?),
            TAG_PREV_HASH => prev_hash = Some(read_hash_seed(&mut cr).map_err(ContentError::Io)?),
            TAG_MAP => {
                let disk_name = varint::read_string(&mut cr).map_err(ContentError::Io)?;
                let slot = varint::read_u32(&mut cr).map_err(ContentError::Io)?;
                let total_blocks = varint::read_u32(&mut cr).map_err(ContentError::Io)?;
                let free_blocks = varint::read_u32(&mut cr).map_err(ContentError::Io)?;
                let uuid = varint::read_string(&mut cr).map_err(ContentError::Io)?;
                maps.push(MapEntry {
                    disk_name,
                    uuid,
                    slot,
                    total_blocks,
                    free_blocks,
                });
            }
            TAG_PARITY => {
                let level = varint::read_u32(&mut cr).map_err(ContentError::Io)?;
                let total_blocks = varint::read_u32(&mut cr).map_err(ContentError::Io)?;
                let free_blocks = varint::read_u32(&mut cr).map_err(ContentError::Io)?;
                let uuid = varint::read_string(&mut cr).map_err(ContentError::Io)?;
                parities.push(ParityDescriptor {
                    level,
                    path: String::new(),
                    uuid,
                    device_id: 0,
                    total_blocks,
                    free_blocks,
                    io_time_ms: 0,
                });
            }
            TAG_FILE => {
                let (mapping_idx, file) = read_file(&mut cr).map_err(ContentError::Io)?;
                disks_by_idx
                    .entry(mapping_idx)
                    .or_insert_with(|| Disk::new(String::new(), String::new(), 0))
                    .add_file(file);
            }
            TAG_SYMLINK | TAG_HARDLINK => {
                let mapping_idx = varint::read_u32(&mut cr).map_err(ContentError::Io)?;
                let subpath = varint::read_string(&mut cr).map_err(ContentError::Io)?;
                let target = varint::read_string(&mut cr).map_err(ContentError::Io)?;
                let link_type = if tag[0] == TAG_HARDLINK {
                    LinkType::Hardlink
                } else {
                    LinkType::Symlink
                };
                disks_by_idx
                    .entry(mapping_idx)
                    .or_insert_with(|| Disk::new(String::new(), String::new(), 0))
                    .links
                    .push(Link {
                        subpath,
                        target,
                        link_type,
                    });
            }
            TAG_DIR => {
                let mapping_idx = varint::read_u32(&mut cr).map_err(ContentError::Io)?;
                let subpath = varint::read_string(&mut cr).map_err(ContentError::Io)?;
                disks_by_idx
                    .entry(mapping_idx)
                    .or_insert_with(|| Disk::new(String::new(), String::new(), 0))
                    .dirs
                    .push(EmptyDir { subpath });
            }
            TAG_DELETED => {
                let (mapping_idx, runs) = read_deleted_ledger(&mut cr).map_err(ContentError::Io)?;
                let disk = disks_by_idx
                    .entry(mapping_idx)
                    .or_insert_with(|| Disk::new(String::new(), String::new(), 0));
                for run in runs {
                    for (i, h) in run.hashes.into_iter().enumerate() {
                        let pos = run.start + i as u32;
                        disk.mark_deleted(
                            pos as usize,
                            DeletedRecord {
                                hash: h,
                                parity_pos: pos,
                            },
                        );
                    }
                }
            }
            TAG_INFO => info = read_info_array(&mut cr).map_err(ContentError::Io)?,
            TAG_TRAILER => {
                saw_trailer = true;
                break;
            }
            _ => {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "unknown record tag").into());
            }
        }
    }

    if !saw_trailer {
        return Err(ContentError::MissingTrailer { path: PathBuf::new() });
    }

    let running = cr.crc.finish();
    let mut stored = [0u8; 4];
    cr.inner.read_exact(&mut stored).map_err(ContentError::Io)?;
    let stored = u32::from_le_bytes(stored);
    if stored != running {
        return Err(ContentError::CrcMismatch {
            path: PathBuf::new(),
            offset: 0,
            expected: stored,
            found: running,
        });
    }

    let disks = maps
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let mut disk = disks_by_idx
                .remove(&(i as u32))
                .unwrap_or_else(|| Disk::new(String::new(), String::new(), 0));
            // Entries are built up tag-by-tag with a placeholder name
            // (`TAG_FILE`/`TAG_SYMLINK`/... don't know the disk's name,
            // only its mapping index); the map record is authoritative.
            disk.name = m.disk_name.clone();
            disk
        })
        .collect();

    Ok(ContentState {
        block_size,
        blockmax,
        hash: hash.ok_or_else(|| ContentError::MissingTrailer { path: PathBuf::new() })?,
        prev_hash,
        maps,
        parities,
        disks,
        info,
    })
}

/// Writes every listed content-file path from a single in-memory producer:
/// `<path>.tmp`, flush, fsync, close, then rename over the real path. After
/// all copies are written, the first one is read back and its CRC compared
/// against the buffer's own CRC -- a mismatch is diagnosed as RAM
/// corruption, per §4.E.
pub fn write_to_paths(paths: &[PathBuf], state: &ContentState) -> Result<(), ContentError> {
    let mut buf = Vec::new();
    write(&mut buf, state)?;

    for path in paths {
        let tmp = tmp_path(path);
        {
            let mut f = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)
                .map_err(ContentError::Io)?;
            f.write_all(&buf).map_err(ContentError::Io)?;
            f.flush().map_err(ContentError::Io)?;
            f.sync_all().map_err(ContentError::Io)?;
        }
        fs::rename(&tmp, path).map_err(ContentError::Io)?;
    }

    if let Some(first) = paths.first() {
        let mut readback = Vec::new();
        let mut f = std::fs::File::open(first).map_err(ContentError::Io)?;
        f.read_to_end(&mut readback).map_err(ContentError::Io)?;
        if readback != buf {
            return Err(ContentError::RamCorruption);
        }
    }

    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Iterates `paths` in order; the first that opens is fully loaded. The
/// rest are `stat`'d only, to detect a size mismatch against the loaded
/// copy -- any mismatch forces `need_write`, so the next save
/// resynchronizes every copy.
pub fn read_from_paths(paths: &[PathBuf]) -> Result<(ContentState, bool), ContentError> {
    let mut loaded = None;
    let mut loaded_len = 0u64;
    let mut need_write = false;

    for path in paths {
        if loaded.is_none() {
            match std::fs::File::open(path) {
                Ok(mut f) => {
                    let mut bytes = Vec::new();
                    f.read_to_end(&mut bytes).map_err(ContentError::Io)?;
                    loaded_len = bytes.len() as u64;
                    loaded = Some(read(&bytes[..])?);
                }
                Err(_) => continue,
            }
        } else if let Ok(meta) = fs::metadata(path) {
            if meta.len() != loaded_len {
                need_write = true;
            }
        } else {
            need_write = true;
        }
    }

    match loaded {
        Some(state) => Ok((state, need_write)),
        None => Err(ContentError::BadMagic { path: PathBuf::new() }),
    }
}

/// Clears past hashes (CHG old-hash, DELETED hashes) across every disk --
/// `sync` calls this so an interrupted previous sync's hashes are treated
/// as untrusted, while other commands preserve them.
pub fn clear_past_hash(state: &mut ContentState) {
    for disk in &mut state.disks {
        for file in &mut disk.files {
            for block in &mut file.blocks {
                if block.state == BlockState::Chg {
                    block.hash = hash::INVALID;
                }
            }
        }
        for d in &mut disk.deleted {
            d.hash = hash::INVALID;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashKind;

    fn sample_state() -> ContentState {
        let mut disk = Disk::new("d1".into(), "/mnt/d1".into(), 0);
        let mut f = File::new("movie.mkv".into(), 128, 1_700_000_000, 0, 7);
        f.blocks.push(Block {
            state: BlockState::Blk,
            hash: [1u8; 16],
            parity_pos: 0,
        });
        f.blocks.push(Block {
            state: BlockState::Blk,
            hash: [2u8; 16],
            parity_pos: 1,
        });
        disk.add_file(f);
        disk.mark_deleted(
            2,
            DeletedRecord {
                hash: [9u8; 16],
                parity_pos: 2,
            },
        );

        ContentState {
            block_size: 262144,
            blockmax: 4,
            hash: HashSeed {
                kind: HashKind::Murmur3,
                seed: [0u8; 16],
            },
            prev_hash: None,
            maps: vec![MapEntry {
                disk_name: "d1".into(),
                uuid: "uuid-1".into(),
                slot: 0,
                total_blocks: 4,
                free_blocks: 1,
            }],
            parities: vec![ParityDescriptor {
                level: 0,
                path: String::new(),
                uuid: "puuid".into(),
                device_id: 0,
                total_blocks: 4,
                free_blocks: 1,
                io_time_ms: 0,
            }],
            disks: vec![disk],
            info: vec![Info::NONE; 4],
        }
    }

    #[test]
    fn round_trip_preserves_blocks_and_deleted_ledger() {
        let state = sample_state();
        let mut buf = Vec::new();
        write(&mut buf, &state).unwrap();

        let read_back = read(&buf[..]).unwrap();
        assert_eq!(read_back.block_size, 262144);
        assert_eq!(read_back.blockmax, 4);
        assert_eq!(read_back.disks.len(), 1);
        assert_eq!(read_back.disks[0].files.len(), 1);
        assert_eq!(read_back.disks[0].files[0].blocks.len(), 2);
        assert!(matches!(
            read_back.disks[0].par2block_get(2),
            ColumnSlot::Deleted { .. }
        ));
    }

    #[test]
    fn double_round_trip_is_byte_identical() {
        let state = sample_state();
        let mut buf1 = Vec::new();
        write(&mut buf1, &state).unwrap();

        let reloaded = read(&buf1[..]).unwrap();
        let state2 = ContentState {
            block_size: reloaded.block_size,
            blockmax: reloaded.blockmax,
            hash: reloaded.hash,
            prev_hash: reloaded.prev_hash,
            maps: reloaded.maps,
            parities: reloaded.parities,
            disks: reloaded.disks,
            info: reloaded.info,
        };
        let mut buf2 = Vec::new();
        write(&mut buf2, &state2).unwrap();

        assert_eq!(buf1, buf2);
    }

    #[test]
    fn tampered_byte_is_detected_as_crc_mismatch() {
        let state = sample_state();
        let mut buf = Vec::new();
        write(&mut buf, &state).unwrap();

        let mid = buf.len() / 2;
        buf[mid] ^= 0xFF;
        let err = read(&buf[..]).unwrap_err();
        assert!(matches!(err, ContentError::CrcMismatch { .. }));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = vec![0u8; 20];
        buf[0] = b'X';
        let err = read(&buf[..]).unwrap_err();
        assert!(matches!(err, ContentError::BadMagic { .. }));
    }
}
