//! Read-only, disk resident sorted map. A map file is built once with [`Builder`]
//! and then served by [`Reader`] through memory mapped blocks and a bounded block cache.

pub mod builder;
mod cache;
pub mod compression;
pub mod format;
pub mod key;
pub mod reader;
mod storage;
pub mod varint;

pub use builder::{Builder, WriteOptions};
pub use key::ByteKey;
pub use reader::{Reader, ReadOptions};

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported map file version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("key {0:?} occurs more than once in the spill file")]
    DuplicateKey(ByteKey),

    #[error("entry for key {key:?} takes {size} bytes which exceeds the block size of {block_size} bytes")]
    BlockCapacity {
        key: ByteKey,
        size: usize,
        block_size: u32,
    },

    #[error("malformed map file: {0}")]
    Format(String),

    #[error("compression: {0}")]
    Compression(#[from] snap::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }
}
