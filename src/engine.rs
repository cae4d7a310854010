//! Check/fix engine (component F, §4.F) -- the hardest subsystem. This
//! module owns the recovery decision logic: given a stripe's already-read
//! data and parity buffers (reading them is the external scanner's job,
//! per §1's boundary), it decides which combination of parities
//! reconstructs the failed blocks and verifies the result.
//!
//! `repair_step` is `Engine`'s core primitive and the one the concrete
//! scenarios in §8 exercise directly; the full eight-step stripe walk
//! (strategy 1 vs strategy 2, file repair, directory/link recreation) is
//! built on top of it in [`crate::state::State::run_stripe`].

use crate::combinations::combinations;
use crate::gf::Tables;
use crate::hash::Digest;
use crate::raid::{self, Backend};

/// One block that failed to verify at this stripe, tracked across the
/// strategy-1/strategy-2 attempts (mirrors `struct failed_struct` in
/// `cmdline/check.c`).
#[derive(Debug, Clone)]
pub struct FailedBlock {
    /// Data column index (`0..nd`) within the stripe.
    pub col: usize,
    /// Read failed or hash mismatched; `false` for CHG/DELETED blocks
    /// inserted only because they need to be excluded from verification.
    pub is_bad: bool,
    /// Set during strategy 2: this block's hash must not be used to
    /// verify a reconstruction (it identifies old or about-to-be-deleted
    /// content, not what parity currently encodes).
    pub is_outofdate: bool,
    /// The block's own stored hash, if it has one usable for
    /// verification (`None` for CHG, or any block with an invalid/zero
    /// hash).
    pub expected_hash: Option<Digest>,
}

/// Result of a successful `repair_step`.
pub struct Repaired {
    /// `(column, recovered bytes)` pairs, one per entry of `failed`.
    pub recovered: Vec<(usize, Vec<u8>)>,
    /// Which parity rows were used for recovery.
    pub parity_rows_used: Vec<usize>,
}

/// Why `repair_step` could not repair the stripe.
#[derive(Debug, PartialEq, Eq)]
pub enum RepairFailure {
    /// No strategy applies (too many failures for the parity available).
    NoStrategy,
    /// At least one strategy ran but every combination failed
    /// verification; the count is how many were tried.
    VerificationFailed(usize),
}

/// Tries to repair `failed` data columns using the parity rows present in
/// `parity` (`None` = unreadable this stripe). `hash_digest` recomputes a
/// block's hash from recovered bytes for verification.
///
/// - If at least one failed block carries a usable hash (a "hash oracle")
///   and `failed.len() <= usable parities`, every `C(n, k)` combination of
///   usable parities is tried; the first whose recovery satisfies every
///   hash-bearing failed block wins.
/// - Otherwise, if `failed.len() < usable parities`, one parity per
///   combination is "sacrificed": recovered data plus the remaining good
///   data regenerates it, and the combination is accepted only if that
///   matches the stored parity bytes.
#[allow(clippy::too_many_arguments)]
pub fn repair_step(
    t: &Tables,
    backend: Backend,
    nd: usize,
    data: &[&[u8]],
    parity: &[Option<&[u8]>],
    failed: &[FailedBlock],
    size: usize,
    hash_digest: impl Fn(&[u8]) -> Digest,
) -> Result<Repaired, RepairFailure> {
    let usable: Vec<usize> = parity
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.map(|_| i))
        .collect();
    let n = usable.len();
    let k = failed.len();
    let failed_cols: Vec<usize> = failed.iter().map(|f| f.col).collect();

    let has_hash_oracle = failed.iter().any(|f| f.expected_hash.is_some());

    let mut attempts_failed = 0usize;
    let mut any_strategy = false;

    if has_hash_oracle && k > 0 && k <= n {
        any_strategy = true;
        for combo in combinations(n, k) {
            let parity_rows: Vec<usize> = combo.iter().map(|&i| usable[i]).collect();
            let parity_bufs: Vec<&[u8]> = parity_rows.iter().map(|&r| parity[r].unwrap()).collect();

            let Ok(recovered) = raid::rec(t, backend, nd, &failed_cols, &parity_rows, data, &parity_bufs, size)
            else {
                attempts_failed += 1;
                continue;
            };

            let all_verified = failed.iter().zip(recovered.iter()).all(|(f, buf)| match &f.expected_hash {
                Some(h) => hash_digest(buf) == *h,
                None => true,
            });

            if all_verified {
                return Ok(Repaired {
                    recovered: failed_cols.iter().cloned().zip(recovered.into_iter()).collect(),
                    parity_rows_used: parity_rows,
                });
            }
            attempts_failed += 1;
        }
    }

    if k > 0 && k < n {
        any_strategy = true;
        for combo in combinations(n, k + 1) {
            let sacrifice_idx = *combo.last().unwrap();
            let recovery_idx = &combo[..k];

            let sacrifice_row = usable[sacrifice_idx];
            let parity_rows: Vec<usize> = recovery_idx.iter().map(|&i| usable[i]).collect();
            let parity_bufs: Vec<&[u8]> = parity_rows.iter().map(|&r| parity[r].unwrap()).collect();

            let Ok(recovered) = raid::rec(t, backend, nd, &failed_cols, &parity_rows, data, &parity_bufs, size)
            else {
                attempts_failed += 1;
                continue;
            };

            // Recompute the sacrificed parity row from surviving data plus
            // the just-recovered columns, and compare against its stored
            // bytes.
            let mut full: Vec<Vec<u8>> = data.iter().map(|d| d.to_vec()).collect();
            for (col, buf) in failed_cols.iter().zip(recovered.iter()) {
                full[*col] = buf.clone();
            }
            let full_refs: Vec<&[u8]> = full.iter().map(|v| v.as_slice()).collect();
            let mut regenerated = vec![0u8; size];
            raid::gen(backend, t, sacrifice_row, &full_refs, &mut regenerated);

            if parity[sacrifice_row].unwrap() == regenerated.as_slice() {
                return Ok(Repaired {
                    recovered: failed_cols.iter().cloned().zip(recovered.into_iter()).collect(),
                    parity_rows_used: parity_rows,
                });
            }
            attempts_failed += 1;
        }
    }

    if !any_strategy {
        Err(RepairFailure::NoStrategy)
    } else {
        Err(RepairFailure::VerificationFailed(attempts_failed))
    }
}

/// Running counters surfaced in the summary (§7): recoverable per-stripe
/// errors never abort, they accumulate here.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
    pub error: u64,
    pub recovered_error: u64,
    pub unrecoverable_error: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gf::tables;

    fn col(v: u8, size: usize) -> Vec<u8> {
        vec![v; size]
    }

    /// Scenario A: single-block RAID-5 repair.
    #[test]
    fn scenario_a_single_block_repair() {
        let t = tables();
        let size = 64;
        let cols = [col(0x00, size), col(0x01, size), col(0x02, size), col(0x03, size)];
        let refs: Vec<&[u8]> = cols.iter().map(|c| c.as_slice()).collect();

        let mut p = vec![0u8; size];
        raid::gen(Backend::Scalar, t, 0, &refs, &mut p);
        assert_eq!(p, col(0x00, size));

        let zero = vec![0u8; size];
        let mut data: Vec<&[u8]> = vec![&cols[0], &cols[1], &zero, &cols[3]];
        let parity = [Some(p.as_slice())];

        let failed = vec![FailedBlock {
            col: 2,
            is_bad: true,
            is_outofdate: false,
            expected_hash: None,
        }];

        let result = repair_step(t, Backend::Scalar, 4, &data, &parity, &failed, size, |_| [0u8; 16]);
        let repaired = result.unwrap();
        assert_eq!(repaired.recovered[0].1, col(0x02, size));
        data[2] = &cols[2]; // silence unused mut warning in spirit
        let _ = data;
    }

    /// Scenario B: double failure with Q present.
    #[test]
    fn scenario_b_double_failure_with_q() {
        let t = tables();
        let size = 64;
        let cols = [col(0x11, size), col(0x22, size), col(0x33, size)];
        let refs: Vec<&[u8]> = cols.iter().map(|c| c.as_slice()).collect();

        let mut p = vec![0u8; size];
        let mut q = vec![0u8; size];
        raid::gen(Backend::Scalar, t, 0, &refs, &mut p);
        raid::gen(Backend::Scalar, t, 1, &refs, &mut q);

        let zero = vec![0u8; size];
        let data: Vec<&[u8]> = vec![&zero, &zero, &cols[2]];
        let parity = [Some(p.as_slice()), Some(q.as_slice())];

        let failed = vec![
            FailedBlock { col: 0, is_bad: true, is_outofdate: false, expected_hash: None },
            FailedBlock { col: 1, is_bad: true, is_outofdate: false, expected_hash: None },
        ];

        let repaired = repair_step(t, Backend::Scalar, 3, &data, &parity, &failed, size, |_| [0u8; 16]).unwrap();
        assert_eq!(repaired.recovered[0].1, cols[0]);
        assert_eq!(repaired.recovered[1].1, cols[1]);
    }

    /// Scenario C: triple failure with a hash oracle; expects the three
    /// highest-indexed parities to be the winning combination.
    #[test]
    fn scenario_c_triple_failure_with_hash_oracle() {
        let t = tables();
        let size = 64;
        let cols: Vec<Vec<u8>> = (0..5u8).map(|i| col(i.wrapping_mul(17).wrapping_add(1), size)).collect();
        let refs: Vec<&[u8]> = cols.iter().map(|c| c.as_slice()).collect();

        let hashes: Vec<Digest> = cols
            .iter()
            .map(|c| {
                let mut h = [0u8; 16];
                h[0] = c[0];
                h
            })
            .collect();

        let mut rows = vec![vec![0u8; size]; 6];
        for (r, out) in rows.iter_mut().enumerate() {
            raid::gen(Backend::Scalar, t, r, &refs, out);
        }

        let garbage = vec![0xAAu8; size];
        let data: Vec<&[u8]> = vec![&garbage, &cols[1], &garbage, &cols[3], &garbage];
        let parity: Vec<Option<&[u8]>> = rows.iter().map(|r| Some(r.as_slice())).collect();

        let failed = vec![
            FailedBlock { col: 0, is_bad: true, is_outofdate: false, expected_hash: Some(hashes[0]) },
            FailedBlock { col: 2, is_bad: true, is_outofdate: false, expected_hash: Some(hashes[2]) },
            FailedBlock { col: 4, is_bad: true, is_outofdate: false, expected_hash: Some(hashes[4]) },
        ];

        let digest_fn = |buf: &[u8]| {
            let mut h = [0u8; 16];
            h[0] = buf[0];
            h
        };

        let repaired = repair_step(t, Backend::Scalar, 5, &data, &parity, &failed, size, digest_fn).unwrap();
        assert_eq!(repaired.parity_rows_used, vec![3, 4, 5]);
        assert_eq!(repaired.recovered[0].1, cols[0]);
        assert_eq!(repaired.recovered[1].1, cols[2]);
        assert_eq!(repaired.recovered[2].1, cols[4]);
    }

    #[test]
    fn no_strategy_when_failures_exceed_parity() {
        let t = tables();
        let size = 64;
        let zero = vec![0u8; size];
        let data: Vec<&[u8]> = vec![&zero, &zero, &zero];
        let parity: Vec<Option<&[u8]>> = vec![Some(&zero)];
        let failed = vec![
            FailedBlock { col: 0, is_bad: true, is_outofdate: false, expected_hash: None },
            FailedBlock { col: 1, is_bad: true, is_outofdate: false, expected_hash: None },
        ];
        let err = repair_step(t, Backend::Scalar, 3, &data, &parity, &failed, size, |_| [0u8; 16]).unwrap_err();
        assert_eq!(err, RepairFailure::NoStrategy);
    }

    #[test]
    fn sacrifice_path_recovers_without_a_hash_oracle() {
        let t = tables();
        let size = 64;
        let cols = [col(0x05, size), col(0x06, size), col(0x07, size)];
        let refs: Vec<&[u8]> = cols.iter().map(|c| c.as_slice()).collect();

        let mut p = vec![0u8; size];
        let mut q = vec![0u8; size];
        raid::gen(Backend::Scalar, t, 0, &refs, &mut p);
        raid::gen(Backend::Scalar, t, 1, &refs, &mut q);

        let zero = vec![0u8; size];
        let data: Vec<&[u8]> = vec![&zero, &cols[1], &cols[2]];
        let parity = [Some(p.as_slice()), Some(q.as_slice())];

        // no expected_hash -- this is a DELETED-style block with no hash
        // oracle, so only the sacrifice path applies.
        let failed = vec![FailedBlock { col: 0, is_bad: false, is_outofdate: false, expected_hash: None }];

        let repaired = repair_step(t, Backend::Scalar, 3, &data, &parity, &failed, size, |_| [0u8; 16]).unwrap();
        assert_eq!(repaired.recovered[0].1, cols[0]);
    }
}
