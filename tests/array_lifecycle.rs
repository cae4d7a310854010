//! End-to-end exercise of the array lifecycle: configure a two-disk,
//! one-parity array, scan it, hand-compute parity, save, reload from the
//! content file, corrupt a block, and confirm `run_stripe` repairs it.

use std::fs;
use std::path::Path;

use coldraid::config::Config;
use coldraid::engine::Counters;
use coldraid::gf;
use coldraid::logging::EventLog;
use coldraid::raid::{self, Backend};
use coldraid::state::State;

const BLOCK_SIZE: usize = 1024;

fn write_config(dir: &Path) -> Config {
    let text = format!(
        "blocksize 1\ncontent {}\nparity {}\ndisk d1 {}\ndisk d2 {}\n",
        dir.join("array.content").display(),
        dir.join("parity/array.parity").display(),
        dir.join("d1").display(),
        dir.join("d2").display(),
    );
    Config::parse(&dir.join("coldraid.conf"), &text).expect("config parses")
}

fn write_parity(dir: &Path, data0: &[u8], data1: &[u8]) {
    let t = gf::tables();
    let mut row = vec![0u8; BLOCK_SIZE];
    let refs: Vec<&[u8]> = vec![data0, data1];
    raid::gen(Backend::Scalar, t, 0, &refs, &mut row);
    fs::write(dir.join("parity/array.parity"), &row).unwrap();
}

#[test]
fn scan_save_reload_and_repair_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("d1")).unwrap();
    fs::create_dir_all(dir.join("d2")).unwrap();
    fs::create_dir_all(dir.join("parity")).unwrap();

    let original0 = vec![0xABu8; BLOCK_SIZE];
    let original1 = vec![0xCDu8; BLOCK_SIZE];
    fs::write(dir.join("d1/file1.bin"), &original0).unwrap();
    fs::write(dir.join("d2/file2.bin"), &original1).unwrap();

    let config = write_config(dir);
    let mut state = State::open(config).expect("fresh array opens");
    state.rescan().expect("rescan succeeds");
    assert_eq!(state.blockmax, 1);
    assert_eq!(state.disks[0].files.len(), 1);
    assert_eq!(state.disks[1].files.len(), 1);

    write_parity(dir, &original0, &original1);
    state.save().expect("save succeeds");
    drop(state);

    let config = write_config(dir);
    let mut state = State::open(config).expect("reload succeeds");
    assert_eq!(state.blockmax, 1);
    assert_eq!(state.disks[0].files[0].subpath, "file1.bin");
    assert_eq!(state.disks[1].files[0].subpath, "file2.bin");

    // Corrupt disk 1's block; parity and disk 2 remain intact.
    let mut corrupted = original0.clone();
    corrupted[0] ^= 0xFF;
    corrupted[500] ^= 0x01;
    fs::write(dir.join("d1/file1.bin"), &corrupted).unwrap();

    let mut events = EventLog::stdout();
    let mut counters = Counters::default();
    state
        .run_stripe(0, true, None, &mut events, &mut counters)
        .expect("run_stripe succeeds");

    assert_eq!(counters.recovered_error, 1);
    assert_eq!(counters.unrecoverable_error, 0);
    assert!(events.records().iter().any(|r| r.kind == "fixed"));

    let repaired = fs::read(dir.join("d1/file1.bin")).unwrap();
    assert_eq!(repaired, original0);
}

#[test]
fn unreadable_block_without_parity_is_reported_unrecoverable() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("d1")).unwrap();
    fs::create_dir_all(dir.join("d2")).unwrap();
    fs::create_dir_all(dir.join("parity")).unwrap();

    let original0 = vec![0x11u8; BLOCK_SIZE];
    let original1 = vec![0x22u8; BLOCK_SIZE];
    fs::write(dir.join("d1/file1.bin"), &original0).unwrap();
    fs::write(dir.join("d2/file2.bin"), &original1).unwrap();

    let config = write_config(dir);
    let mut state = State::open(config).expect("fresh array opens");
    state.rescan().expect("rescan succeeds");
    write_parity(dir, &original0, &original1);
    state.save().expect("save succeeds");

    // Both the only disk holding the failure and its only parity disagree:
    // delete file1 entirely and flip a byte of the lone parity row so no
    // single-parity combination can reconstruct it.
    fs::remove_file(dir.join("d1/file1.bin")).unwrap();
    let mut row = fs::read(dir.join("parity/array.parity")).unwrap();
    row[0] ^= 0xFF;
    fs::write(dir.join("parity/array.parity"), &row).unwrap();

    let mut events = EventLog::stdout();
    let mut counters = Counters::default();
    state
        .run_stripe(0, true, None, &mut events, &mut counters)
        .expect("run_stripe succeeds");

    assert_eq!(counters.recovered_error, 0);
    assert!(counters.unrecoverable_error >= 1);
    assert!(events.records().iter().any(|r| r.kind == "unrecoverable"));
}

#[test]
fn sync_parity_matches_hand_computed_row() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("d1")).unwrap();
    fs::create_dir_all(dir.join("d2")).unwrap();

    let data0 = vec![0x3Cu8; BLOCK_SIZE];
    let data1 = vec![0x5Au8; BLOCK_SIZE];
    fs::write(dir.join("d1/file1.bin"), &data0).unwrap();
    fs::write(dir.join("d2/file2.bin"), &data1).unwrap();

    let config = write_config(dir);
    let mut state = State::open(config).expect("fresh array opens");
    state.rescan().expect("rescan succeeds");
    state.sync_parity().expect("sync_parity succeeds");

    let t = gf::tables();
    let refs: Vec<&[u8]> = vec![&data0, &data1];
    let mut expected = vec![0u8; BLOCK_SIZE];
    raid::gen(Backend::Scalar, t, 0, &refs, &mut expected);

    let written = fs::read(dir.join("parity/array.parity")).unwrap();
    assert_eq!(written, expected);
}

#[test]
fn write_back_lands_at_the_failed_block_offset_not_file_start() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("d1")).unwrap();
    fs::create_dir_all(dir.join("d2")).unwrap();

    // file1 spans two blocks; file2 is a single block sharing only the
    // first stripe. Corrupting file1's *second* block exercises write_back
    // at a nonzero in-file offset.
    let block0 = vec![0xAAu8; BLOCK_SIZE];
    let block1 = vec![0xBBu8; BLOCK_SIZE];
    let mut file1 = block0.clone();
    file1.extend_from_slice(&block1);
    let file2 = vec![0x22u8; BLOCK_SIZE];
    fs::write(dir.join("d1/file1.bin"), &file1).unwrap();
    fs::write(dir.join("d2/file2.bin"), &file2).unwrap();

    let config = write_config(dir);
    let mut state = State::open(config).expect("fresh array opens");
    state.rescan().expect("rescan succeeds");
    assert_eq!(state.blockmax, 2);
    state.sync_parity().expect("sync_parity succeeds");
    state.save().expect("save succeeds");
    drop(state);

    let config = write_config(dir);
    let mut state = State::open(config).expect("reload succeeds");

    let mut corrupted = file1.clone();
    corrupted[BLOCK_SIZE] ^= 0xFF;
    fs::write(dir.join("d1/file1.bin"), &corrupted).unwrap();

    let mut events = EventLog::stdout();
    let mut counters = Counters::default();
    state
        .run_stripe(1, true, None, &mut events, &mut counters)
        .expect("run_stripe succeeds");

    assert_eq!(counters.recovered_error, 1);
    let repaired = fs::read(dir.join("d1/file1.bin")).unwrap();
    assert_eq!(&repaired[..BLOCK_SIZE], block0.as_slice(), "first block must be untouched");
    assert_eq!(&repaired[BLOCK_SIZE..], block1.as_slice(), "second block must be repaired in place");
}

#[test]
fn unreadable_block_is_recovered_from_content_addressed_import() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("d1")).unwrap();
    fs::create_dir_all(dir.join("d2")).unwrap();
    fs::create_dir_all(dir.join("donor")).unwrap();

    let original0 = vec![0x77u8; BLOCK_SIZE];
    let original1 = vec![0x88u8; BLOCK_SIZE];
    fs::write(dir.join("d1/file1.bin"), &original0).unwrap();
    fs::write(dir.join("d2/file2.bin"), &original1).unwrap();

    let config = write_config(dir);
    let mut state = State::open(config).expect("fresh array opens");
    state.rescan().expect("rescan succeeds");
    state.sync_parity().expect("sync_parity succeeds");
    state.save().expect("save succeeds");
    drop(state);

    // A donor tree holding an exact copy of the original block under an
    // unrelated name -- this is what `--import` points at.
    fs::write(dir.join("donor/backup_copy.bin"), &original0).unwrap();

    let config = write_config(dir);
    let mut state = State::open(config).expect("reload succeeds");

    let mut corrupted = original0.clone();
    corrupted[0] ^= 0xFF;
    fs::write(dir.join("d1/file1.bin"), &corrupted).unwrap();

    let import = coldraid::import::build_from_dir(
        &dir.join("donor"),
        state.block_size,
        &state.hash,
        state.prev_hash.as_ref(),
    )
    .expect("donor directory indexes cleanly");

    let mut events = EventLog::stdout();
    let mut counters = Counters::default();
    state
        .run_stripe(0, true, Some(&import), &mut events, &mut counters)
        .expect("run_stripe succeeds");

    assert!(events.records().iter().any(|r| r.kind == "hash_import"));
    assert_eq!(counters.recovered_error, 1);

    let repaired = fs::read(dir.join("d1/file1.bin")).unwrap();
    assert_eq!(repaired, original0);
}
