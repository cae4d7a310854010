//! SSSE3/AVX2 backends. Each must be bit-identical to `scalar::gen_row` for
//! every input (see `raid::tests::backends_agree`) -- they are a speed
//! optimization, never an alternate semantics.
//!
//! The original C implementation (`raid/x86.c`) hand-writes these as
//! `asm volatile` blocks addressing fixed xmm registers. That doesn't carry
//! over to safe-ish Rust; this port uses `core::arch::x86_64` intrinsics
//! behind `target_feature`, gated at call time by `is_x86_feature_detected!`
//! in `raid::backend::detect()`.

use crate::gf::Tables;

/// P is still a plain XOR fold regardless of backend -- no GF multiply
/// involved, so there's nothing SIMD widens except the loop stride, and the
/// scalar loop already autovectorizes that. Callers route row 0 to
/// `scalar::gen_p` even on SIMD backends.

/// SSSE3 PSHUFB half-byte multiply for the generic rows (parity index
/// 2..PARITY_MAX). One `pshufb` per nibble per 16-byte lane instead of a
/// byte-at-a-time 256-entry table lookup.
///
/// # Safety
/// Caller must have confirmed `is_x86_feature_detected!("ssse3")`.
#[target_feature(enable = "ssse3")]
pub unsafe fn gen_generic_ssse3(t: &Tables, row: usize, data: &[&[u8]], out: &mut [u8]) {
    use std::arch::x86_64::*;

    out.fill(0);
    let low_mask = _mm_set1_epi8(0x0f);

    for (d, col) in data.iter().enumerate() {
        let lo = t.pshufb_lo(row, d);
        let hi = t.pshufb_hi(row, d);
        let lo_tbl = _mm_loadu_si128(lo.as_ptr() as *const __m128i);
        let hi_tbl = _mm_loadu_si128(hi.as_ptr() as *const __m128i);

        let mut i = 0;
        while i + 16 <= col.len() {
            let v = _mm_loadu_si128(col.as_ptr().add(i) as *const __m128i);
            let lo_nib = _mm_and_si128(v, low_mask);
            let hi_nib = _mm_and_si128(_mm_srli_epi16(v, 4), low_mask);
            let lo_r = _mm_shuffle_epi8(lo_tbl, lo_nib);
            let hi_r = _mm_shuffle_epi8(hi_tbl, hi_nib);
            let prod = _mm_xor_si128(lo_r, hi_r);

            let acc = _mm_loadu_si128(out.as_ptr().add(i) as *const __m128i);
            let acc = _mm_xor_si128(acc, prod);
            _mm_storeu_si128(out.as_mut_ptr().add(i) as *mut __m128i, acc);

            i += 16;
        }
        // Tail bytes that don't fill a full lane fall back to the table.
        let table = t.mul_table(t.coeff(row, d));
        for j in i..col.len() {
            out[j] ^= table[col[j] as usize];
        }
    }
}

/// SSE2 doubling-based Q. Same Horner's-rule recurrence as
/// `scalar::gen_q`, vectorized across 16-byte lanes: the carry mask and
/// polynomial-reduction constant are broadcast and applied with
/// shift/and/xor instead of a scalar branch per byte.
///
/// # Safety
/// Caller must have confirmed `is_x86_feature_detected!("sse2")`.
#[target_feature(enable = "sse2")]
pub unsafe fn gen_q_sse2(data: &[&[u8]], out: &mut [u8]) {
    use std::arch::x86_64::*;

    out.fill(0);
    let hibit = _mm_set1_epi8(!0x7fu8 as i8);
    let poly = _mm_set1_epi8(0x1du8 as i8);

    for col in data.iter().rev() {
        let mut i = 0;
        while i + 16 <= col.len() {
            let acc = _mm_loadu_si128(out.as_ptr().add(i) as *const __m128i);
            let carry = _mm_and_si128(acc, hibit);
            let carry_mask = _mm_cmpeq_epi8(carry, hibit);
            let shifted = _mm_add_epi8(acc, acc); // left shift by 1 (mod 256 per lane)
            let reduced = _mm_xor_si128(shifted, _mm_and_si128(carry_mask, poly));
            let b = _mm_loadu_si128(col.as_ptr().add(i) as *const __m128i);
            let next = _mm_xor_si128(reduced, b);
            _mm_storeu_si128(out.as_mut_ptr().add(i) as *mut __m128i, next);
            i += 16;
        }
        for j in i..col.len() {
            let carry = out[j] & 0x80 != 0;
            out[j] <<= 1;
            if carry {
                out[j] ^= 0x1D;
            }
            out[j] ^= col[j];
        }
    }
}

/// AVX2 variant of the generic-row multiply: identical construction to the
/// SSSE3 path but operating on 32-byte lanes via `vpshufb`, which shuffles
/// within each 128-bit half independently -- the low/high PSHUFB tables are
/// broadcast into both halves with `_mm256_broadcastsi128_si256`.
///
/// # Safety
/// Caller must have confirmed `is_x86_feature_detected!("avx2")`.
#[target_feature(enable = "avx2")]
pub unsafe fn gen_generic_avx2(t: &Tables, row: usize, data: &[&[u8]], out: &mut [u8]) {
    use std::arch::x86_64::*;

    out.fill(0);
    let low_mask = _mm256_set1_epi8(0x0f);

    for (d, col) in data.iter().enumerate() {
        let lo = t.pshufb_lo(row, d);
        let hi = t.pshufb_hi(row, d);
        let lo_half = _mm_loadu_si128(lo.as_ptr() as *const __m128i);
        let hi_half = _mm_loadu_si128(hi.as_ptr() as *const __m128i);
        let lo_tbl = _mm256_broadcastsi128_si256(lo_half);
        let hi_tbl = _mm256_broadcastsi128_si256(hi_half);

        let mut i = 0;
        while i + 32 <= col.len() {
            let v = _mm256_loadu_si256(col.as_ptr().add(i) as *const __m256i);
            let lo_nib = _mm256_and_si256(v, low_mask);
            let hi_nib = _mm256_and_si256(_mm256_srli_epi16(v, 4), low_mask);
            let lo_r = _mm256_shuffle_epi8(lo_tbl, lo_nib);
            let hi_r = _mm256_shuffle_epi8(hi_tbl, hi_nib);
            let prod = _mm256_xor_si256(lo_r, hi_r);

            let acc = _mm256_loadu_si256(out.as_ptr().add(i) as *const __m256i);
            let acc = _mm256_xor_si256(acc, prod);
            _mm256_storeu_si256(out.as_mut_ptr().add(i) as *mut __m256i, acc);

            i += 32;
        }
        let table = t.mul_table(t.coeff(row, d));
        for j in i..col.len() {
            out[j] ^= table[col[j] as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gf::tables;
    use crate::raid::scalar;

    fn random_col(seed: u8, len: usize) -> Vec<u8> {
        let mut v = vec![0u8; len];
        let mut x = seed.wrapping_add(1);
        for b in v.iter_mut() {
            // xorshift-ish scrambler, deterministic, no external rng needed.
            x ^= x << 3;
            x ^= x >> 5;
            x ^= x << 1;
            *b = x;
        }
        v
    }

    #[test]
    fn ssse3_generic_matches_scalar() {
        if !is_x86_feature_detected!("ssse3") {
            return;
        }
        let t = tables();
        let cols: Vec<Vec<u8>> = (0..4).map(|i| random_col(i, 37)).collect();
        let refs: Vec<&[u8]> = cols.iter().map(|c| c.as_slice()).collect();

        for row in 2..crate::gf::PARITY_MAX {
            let mut expect = vec![0u8; 37];
            scalar::gen_row(t, row, &refs, &mut expect);

            let mut got = vec![0u8; 37];
            unsafe { gen_generic_ssse3(t, row, &refs, &mut got) };
            assert_eq!(got, expect, "row {row}");
        }
    }

    #[test]
    fn sse2_q_matches_scalar() {
        if !is_x86_feature_detected!("sse2") {
            return;
        }
        let t = tables();
        let cols: Vec<Vec<u8>> = (0..4).map(|i| random_col(i, 33)).collect();
        let refs: Vec<&[u8]> = cols.iter().map(|c| c.as_slice()).collect();

        let mut expect = vec![0u8; 33];
        scalar::gen_row(t, 1, &refs, &mut expect);

        let mut got = vec![0u8; 33];
        unsafe { gen_q_sse2(&refs, &mut got) };
        assert_eq!(got, expect);
    }

    #[test]
    fn avx2_generic_matches_scalar() {
        if !is_x86_feature_detected!("avx2") {
            return;
        }
        let t = tables();
        let cols: Vec<Vec<u8>> = (0..4).map(|i| random_col(i, 69)).collect();
        let refs: Vec<&[u8]> = cols.iter().map(|c| c.as_slice()).collect();

        for row in 2..crate::gf::PARITY_MAX {
            let mut expect = vec![0u8; 69];
            scalar::gen_row(t, row, &refs, &mut expect);

            let mut got = vec![0u8; 69];
            unsafe { gen_generic_avx2(t, row, &refs, &mut got) };
            assert_eq!(got, expect, "row {row}");
        }
    }
}
