use std::path::PathBuf;

use thiserror::Error;

/// Configuration load/parse failures. Always fatal, always before any I/O
/// against the array itself.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("no disks configured")]
    NoDisks,

    #[error("no parity files configured")]
    NoParity,

    #[error("at most 6 parity levels are supported, got {0}")]
    TooManyParityLevels(usize),
}

/// Content-file corruption, detected on load or on the write-side
/// self-check. Carries the byte offset where the inconsistency was found
/// so the operator can be told to retry with an alternate copy.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("{path}: bad magic at offset 0")]
    BadMagic { path: PathBuf },

    #[error("{path}: unexpected end of file at offset {offset}")]
    Truncated { path: PathBuf, offset: u64 },

    #[error("{path}: CRC mismatch at offset {offset}, expected {expected:08x}, got {found:08x}")]
    CrcMismatch {
        path: PathBuf,
        offset: u64,
        expected: u32,
        found: u32,
    },

    #[error("{path}: missing trailer marker")]
    MissingTrailer { path: PathBuf },

    #[error(
        "{path}: block size {found} does not match configured block size {expected}"
    )]
    BlockSizeMismatch { path: PathBuf, expected: u32, found: u32 },

    #[error(
        "write-side self-check failed: the buffer written does not match what was \
         read back; this usually means RAM corruption, not a disk problem"
    )]
    RamCorruption,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Raised only when an internal precondition of the RAID math is violated.
/// Property-tested to be unreachable on correct callers (see the `gf`
/// module's exhaustive nonsingularity test) but kept as a `Result` rather
/// than a `panic!` so a corrupted in-memory state fails soft.
#[derive(Debug, Error)]
pub enum RaidError {
    #[error("generator submatrix for parities {parities:?} / data {data:?} is singular")]
    SingularMatrix { parities: Vec<u8>, data: Vec<u8> },

    #[error("block size {0} is not a multiple of 64")]
    BadBlockSize(usize),

    #[error("parity count {0} is out of range 1..=6")]
    BadParityCount(usize),

    #[error("requested {requested} failures but only {available} parity levels configured")]
    TooManyFailures { requested: usize, available: usize },
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("{path}: another process already has the array open")]
    InUse { path: PathBuf },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Unifying error type returned by every public `State` method.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Raid(#[from] RaidError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// A fatal I/O error during `fix`/`sync` that aborted the current pass.
    /// Distinct from `Io` so the dispatcher can tell "operation refused to
    /// start" from "operation was cut short".
    #[error("fatal error during {operation}: {source}")]
    Aborted {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    /// Maps an error to the process exit code described in the CLI surface
    /// section: 0 only on full success, never reachable from here since
    /// this type only exists on the error path.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Lock(_) => 2,
            CoreError::Config(_) => 3,
            CoreError::Content(_) => 4,
            CoreError::Raid(_) => 5,
            CoreError::Aborted { .. } => 6,
            CoreError::Io(_) => 1,
        }
    }
}
