//! Rehash controller (component H, §4.H): schedules an online transition
//! between hash functions without a full re-hash stop-the-world.

use crate::disk::Disk;
use crate::hash::{HashKind, HashSeed};
use crate::info::Info;

#[derive(Debug)]
pub enum RehashError {
    /// A rehash is already active (`prevhash` is set).
    AlreadyInProgress,
    /// The requested hash already matches the current one.
    NoChange,
}

/// `state_rehash()`: moves `hash -> prevhash`, installs `new_hash` as the
/// current hash with a fresh seed, and marks every live info entry
/// `rehash = 1` so the next `sync`/`scrub` pass knows to re-verify with
/// the old function before trusting the new one.
pub fn start(
    current_hash: &HashSeed,
    prev_hash: &mut Option<HashSeed>,
    new_kind: HashKind,
    new_seed: [u8; 16],
    info: &mut [Info],
) -> Result<HashSeed, RehashError> {
    if prev_hash.is_some() {
        return Err(RehashError::AlreadyInProgress);
    }
    if current_hash.kind == new_kind {
        return Err(RehashError::NoChange);
    }

    *prev_hash = Some(*current_hash);
    let next = HashSeed {
        kind: new_kind,
        seed: new_seed,
    };

    for i in info.iter_mut() {
        if !i.is_none() {
            *i = i.with_rehash(true);
        }
    }

    Ok(next)
}

/// Called when a block with its `rehash` flag set is read during `sync`/
/// `scrub`: verify with `prevhash`, then re-hash with the current
/// function to store, clearing the flag either way (a failed old-hash
/// verification is reported by the caller as a normal hash mismatch, not
/// specially handled here).
pub fn rehash_block(
    data: &[u8],
    stored_old_hash: &[u8; 16],
    prev_hash: &HashSeed,
    current_hash: &HashSeed,
) -> ([u8; 16], bool) {
    let verified = prev_hash.digest(data) == *stored_old_hash;
    let new_hash = current_hash.digest(data);
    (new_hash, verified)
}

/// True once no info entry still has `rehash` set -- the point at which
/// `prevhash` can be dropped from the content file on the next save.
pub fn is_complete(info: &[Info]) -> bool {
    info.iter().all(|i| i.is_none() || !i.is_rehash())
}

/// Clears `prevhash` once [`is_complete`] holds for every disk's info.
pub fn maybe_finish(prev_hash: &mut Option<HashSeed>, info: &[Info]) {
    if is_complete(info) {
        *prev_hash = None;
    }
}

#[allow(dead_code)]
fn touch_disk_type(_d: &Disk) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(kind: HashKind) -> HashSeed {
        HashSeed { kind, seed: [0u8; 16] }
    }

    #[test]
    fn start_refuses_when_already_active() {
        let mut prev = Some(seed(HashKind::Murmur3));
        let mut info = vec![Info::NONE];
        let err = start(&seed(HashKind::Spooky2), &mut prev, HashKind::Murmur3, [1u8; 16], &mut info)
            .unwrap_err();
        assert!(matches!(err, RehashError::AlreadyInProgress));
    }

    #[test]
    fn start_refuses_no_change() {
        let mut prev = None;
        let mut info = vec![Info::NONE];
        let err = start(&seed(HashKind::Murmur3), &mut prev, HashKind::Murmur3, [1u8; 16], &mut info)
            .unwrap_err();
        assert!(matches!(err, RehashError::NoChange));
    }

    #[test]
    fn start_marks_live_info_entries_rehash() {
        let mut prev = None;
        let mut info = vec![Info::new(10, false, false, false), Info::NONE];
        let next = start(&seed(HashKind::Murmur3), &mut prev, HashKind::Spooky2, [2u8; 16], &mut info).unwrap();
        assert_eq!(next.kind, HashKind::Spooky2);
        assert!(prev.is_some());
        assert!(info[0].is_rehash());
        assert!(info[1].is_none()); // untouched, nothing to mark
    }

    #[test]
    fn completion_drops_prevhash() {
        let mut prev = Some(seed(HashKind::Murmur3));
        let info = vec![Info::new(10, false, false, false)];
        assert!(is_complete(&info));
        maybe_finish(&mut prev, &info);
        assert!(prev.is_none());
    }

    #[test]
    fn incomplete_rehash_keeps_prevhash() {
        let mut prev = Some(seed(HashKind::Murmur3));
        let info = vec![Info::new(10, false, true, false)];
        assert!(!is_complete(&info));
        maybe_finish(&mut prev, &info);
        assert!(prev.is_some());
    }
}
