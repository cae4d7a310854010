//! CRC32C (Castagnoli), streaming, with a software table path (borrowed
//! from the `crc` crate's precomputed Castagnoli table) and a runtime SSE4.2
//! hardware fast path. Both must agree bit-for-bit (testable property 5).

use crc::crc32::CASTAGNOLI_TABLE;

/// A running CRC32C accumulator, initialized to `0xFFFFFFFF` per the
/// content-file framing in the codec, finalized by XOR with `0xFFFFFFFF`
/// (`finish`). Mirrors the incremental style the content-file writer needs:
/// checksum the whole file without buffering it twice.
pub struct Crc32c {
    state: u32,
    hw: bool,
}

impl Default for Crc32c {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32c {
    pub fn new() -> Self {
        Crc32c {
            state: 0xFFFF_FFFF,
            hw: hw_available(),
        }
    }

    /// Forces the software table path regardless of what the CPU supports;
    /// used by tests that check the two paths agree.
    pub fn new_software() -> Self {
        Crc32c {
            state: 0xFFFF_FFFF,
            hw: false,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        if self.hw {
            #[cfg(target_arch = "x86_64")]
            unsafe {
                self.state = update_hw(self.state, bytes);
                return;
            }
        }
        self.state = update_table(self.state, bytes);
    }

    pub fn finish(&self) -> u32 {
        self.state ^ 0xFFFF_FFFF
    }
}

fn update_table(mut crc: u32, bytes: &[u8]) -> u32 {
    for &b in bytes {
        let idx = ((crc ^ b as u32) & 0xFF) as usize;
        crc = CASTAGNOLI_TABLE[idx] ^ (crc >> 8);
    }
    crc
}

fn hw_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        is_x86_feature_detected!("sse4.2")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse4.2")]
unsafe fn update_hw(mut crc: u32, bytes: &[u8]) -> u32 {
    use std::arch::x86_64::{_mm_crc32_u64, _mm_crc32_u8};

    let mut i = 0;
    while i + 8 <= bytes.len() {
        let chunk = u64::from_le_bytes(bytes[i..i + 8].try_into().unwrap());
        crc = _mm_crc32_u64(crc as u64, chunk) as u32;
        i += 8;
    }
    while i < bytes.len() {
        crc = _mm_crc32_u8(crc, bytes[i]);
        i += 1;
    }
    crc
}

/// One-shot convenience wrapper: computes CRC32C over `bytes` starting from
/// the standard `0xFFFFFFFF` seed and the standard final XOR.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut c = Crc32c::new();
    c.update(bytes);
    c.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector_matches() {
        // "123456789" is the standard CRC32C check string; the expected
        // value is the widely published Castagnoli check value.
        assert_eq!(checksum(b"123456789"), 0xE306_9283);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(checksum(b""), 0);
    }

    #[test]
    fn software_and_hardware_agree() {
        let mut sw = Crc32c::new_software();
        sw.update(b"the quick brown fox jumps over the lazy dog, a few times over");
        let expect = sw.finish();

        if hw_available() {
            let mut hw = Crc32c::new();
            hw.update(b"the quick brown fox jumps over the lazy dog, a few times over");
            assert_eq!(hw.finish(), expect);
        }
    }

    #[test]
    fn incremental_matches_one_shot() {
        let data = b"some content file bytes spanning more than one update() call";
        let mut inc = Crc32c::new_software();
        inc.update(&data[..10]);
        inc.update(&data[10..]);

        let mut one = Crc32c::new_software();
        one.update(data);

        assert_eq!(inc.finish(), one.finish());
    }
}
