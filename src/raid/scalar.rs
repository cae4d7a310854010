//! Portable scalar backend. Correct and auditable by construction: every
//! other backend must produce bit-identical output to this one (see
//! `raid::tests::backends_agree`).

use crate::gf::Tables;

/// Computes parity row `row` (0-indexed: 0 = P, 1 = Q, 2..6 = generic Cauchy
/// rows) over `data`, writing `size` bytes into `out`.
pub fn gen_row(t: &Tables, row: usize, data: &[&[u8]], out: &mut [u8]) {
    match row {
        0 => gen_p(data, out),
        1 => gen_q(data, out),
        r => gen_generic(t, r, data, out),
    }
}

fn gen_p(data: &[&[u8]], out: &mut [u8]) {
    out.fill(0);
    for col in data {
        for (o, &b) in out.iter_mut().zip(col.iter()) {
            *o ^= b;
        }
    }
}

/// Q = sum(2^i * D_i), computed with Horner's rule (the "doubling
/// identity"): starting from the last column, each step doubles the
/// accumulator in GF(2^8) and XORs in the next column. `2*x` is
/// `(x<<1) XOR (0x1D if x had its high bit set else 0)`.
fn gen_q(data: &[&[u8]], out: &mut [u8]) {
    out.fill(0);
    for col in data.iter().rev() {
        for (o, &b) in out.iter_mut().zip(col.iter()) {
            let carry = *o & 0x80 != 0;
            *o <<= 1;
            if carry {
                *o ^= 0x1D;
            }
            *o ^= b;
        }
    }
}

fn gen_generic(t: &Tables, row: usize, data: &[&[u8]], out: &mut [u8]) {
    out.fill(0);
    for (d, col) in data.iter().enumerate() {
        let table = t.mul_table(t.coeff(row, d));
        for (o, &b) in out.iter_mut().zip(col.iter()) {
            *o ^= table[b as usize];
        }
    }
}
