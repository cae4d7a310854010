//! Runtime CPU feature detection and backend selection. Mirrors the role of
//! `raid/cpu.h` and `raid/module.c` in the original (probe `cpuid` once,
//! pick the fastest usable implementation) but threads the choice through as
//! an explicit value instead of installing a global function pointer.

/// Which vectorized implementation to use for parity generation. `Scalar` is
/// always correct and always available; the others require the matching CPU
/// feature and must produce bit-identical output (enforced by
/// `raid::tests::backends_agree`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Scalar,
    Sse2Ssse3,
    Avx2,
}

/// Probes the running CPU and returns the fastest backend it supports.
pub fn detect() -> Backend {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return Backend::Avx2;
        }
        if is_x86_feature_detected!("sse2") && is_x86_feature_detected!("ssse3") {
            return Backend::Sse2Ssse3;
        }
    }
    Backend::Scalar
}

/// Every backend this CPU actually supports, for tests that want to check
/// cross-backend agreement on whatever hardware they happen to run on.
pub fn available() -> Vec<Backend> {
    let mut v = vec![Backend::Scalar];
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("sse2") && is_x86_feature_detected!("ssse3") {
            v.push(Backend::Sse2Ssse3);
        }
        if is_x86_feature_detected!("avx2") {
            v.push(Backend::Avx2);
        }
    }
    v
}
