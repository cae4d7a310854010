//! Command-line surface (§10.1): `clap`-derived, one subcommand per array
//! operation. Parsing and dispatch are kept out of `lib.rs` on purpose --
//! CLI parsing is one of the boundary concerns §1 excludes from the core.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(name = "coldraid", version, about = "Snapshot-based parity protection for arrays of heterogeneous disks")]
pub struct Cli {
    /// Path to the array configuration file.
    #[clap(short, long, default_value = "/etc/coldraid.conf")]
    pub conf: PathBuf,

    /// Increase verbosity (repeatable).
    #[clap(short, long, parse(from_occurrences))]
    pub verbose: u32,

    /// Mirror the structured event log to this file in addition to stdout.
    #[clap(long, parse(from_os_str))]
    pub log: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Report what `sync` would change without touching the array.
    Diff,

    /// Rescan every disk and update parity to match.
    Sync {
        #[clap(long)]
        force_empty: bool,
    },

    /// Verify every block against parity without repairing anything.
    Check(ScanRange),

    /// Verify every block against parity and repair what it can.
    Fix(ScanRange),

    /// Like `fix`, but also reads parity itself to catch silent corruption.
    Scrub(ScanRange),

    /// Print a one-line summary of the array's current health.
    Status,

    /// List blocks shared by more than one file (content-addressed dedup).
    Dup,

    /// List every file known to the array.
    List,

    /// (Re)create the pool directory's tree of symlinks into the array.
    Pool,

    /// Start an online transition to a different block-hash function.
    Rehash {
        #[clap(long, arg_enum)]
        kind: HashKindArg,
    },
}

#[derive(Debug, clap::Args)]
pub struct ScanRange {
    /// Only process stripes at or after this column.
    #[clap(long, default_value_t = 0)]
    pub start: u32,

    /// Process at most this many stripes (0 = unlimited).
    #[clap(long, default_value_t = 0)]
    pub count: u32,

    /// Report findings without writing anything back, even for `fix`.
    #[clap(long)]
    pub audit_only: bool,

    /// Recover corrupted blocks from a donor directory tree by content
    /// hash before falling back to parity (§4.G).
    #[clap(long, parse(from_os_str))]
    pub import: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, clap::ArgEnum)]
pub enum HashKindArg {
    Murmur3,
    Spooky2,
}

impl From<HashKindArg> for coldraid::hash::HashKind {
    fn from(k: HashKindArg) -> Self {
        match k {
            HashKindArg::Murmur3 => coldraid::hash::HashKind::Murmur3,
            HashKindArg::Spooky2 => coldraid::hash::HashKind::Spooky2,
        }
    }
}
