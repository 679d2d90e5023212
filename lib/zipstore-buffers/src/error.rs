use std::io;

use snafu::Snafu;

/// Every failure kind a sequence-set or B+ tree operation can surface.
///
/// One variant per failure kind named in the storage engine's error
/// handling design: I/O, short reads, header corruption, block/page
/// corruption, record validation, and the tree's own structural
/// invariants.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("io error during {operation}: {source}"))]
    Io {
        operation: &'static str,
        source: io::Error,
    },

    #[snafu(display(
        "short read at rbn {rbn}: expected {expected} bytes, got {actual}"
    ))]
    ShortRead {
        rbn: u32,
        expected: usize,
        actual: usize,
    },

    #[snafu(display("short header: expected at least {expected} bytes, got {actual}"))]
    ShortHeader { expected: usize, actual: usize },

    #[snafu(display("bad magic: expected {expected:?}, got {actual:?}"))]
    BadMagic { expected: [u8; 4], actual: [u8; 4] },

    #[snafu(display("unsupported header version {version}"))]
    BadVersion { version: u16 },

    #[snafu(display("corrupt block at rbn {rbn}: {reason}"))]
    CorruptBlock { rbn: u32, reason: String },

    #[snafu(display("invalid record: {reason}"))]
    InvalidRecord { reason: String },

    #[snafu(display(
        "packing record would overflow block: {occupied} + {record_len} > {block_size}"
    ))]
    BlockOverflow {
        occupied: usize,
        record_len: usize,
        block_size: usize,
    },

    #[snafu(display("key {key} not found"))]
    NotFound { key: u32 },

    #[snafu(display("key {key} already present"))]
    DuplicateKey { key: u32 },

    #[snafu(display(
        "tree traversal exceeded height bound ({bound}) at rbn {rbn}: on-disk cycle or damage"
    ))]
    TreeInvariant { bound: u32, rbn: u32 },

    #[snafu(display("short page: expected {expected} bytes, got {actual}"))]
    ShortPage { expected: usize, actual: usize },

    #[snafu(display("bad node kind byte {byte}"))]
    BadNodeKind { byte: u8 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
