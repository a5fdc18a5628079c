use std::fmt;

use thiserror::Error;

use crate::disk_format::inode::{BlockNumber, InodeNumber};

/// The kind of resource a bitmap allocator hands out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    Inode,
    Block,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Inode => write!(f, "inodes"),
            Resource::Block => write!(f, "blocks"),
        }
    }
}

/// Errors reported by a block device adapter.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("block {block_number} is out of range (device has {num_blocks} blocks)")]
    OutOfRange {
        block_number: BlockNumber,
        num_blocks: usize,
    },
    #[error("buffer holds {actual} bytes but the block size is {expected}")]
    BadBuffer { expected: usize, actual: usize },
    #[error("i/o error on block {block_number}")]
    Io {
        block_number: BlockNumber,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    Exists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("no free {0} left")]
    Exhausted(Resource),
    #[error("logical block {0} is beyond the addressable range")]
    OutOfRange(usize),
    #[error("inode {0} is already open")]
    AlreadyOpen(InodeNumber),
    #[error("resource busy: {0}")]
    Busy(String),
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
    #[error("invalid file name: {0:?}")]
    InvalidName(String),
    #[error("too many levels of symbolic links: {0}")]
    SymlinkLoop(String),
    #[error("inode {0} still has links")]
    StillLinked(InodeNumber),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("corrupt filesystem: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("encoding on-disk record")]
    Encoding(#[from] bincode::Error),
}

pub type Result<T, E = FsError> = std::result::Result<T, E>;
