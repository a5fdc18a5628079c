use std::time::{Duration, SystemTime};

use crate::disk_format::inode::{Inode, InodeKind, InodeNumber};

pub struct TimeMetadata {
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Creation time.
    pub crtime: SystemTime,
}

impl Default for TimeMetadata {
    fn default() -> Self {
        Self {
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            crtime: SystemTime::UNIX_EPOCH,
        }
    }
}

impl TimeMetadata {
    fn from_inode(inode: &Inode) -> Self {
        Self {
            atime: to_system_time(inode.atime),
            mtime: to_system_time(inode.mtime),
            crtime: to_system_time(inode.crtime),
        }
    }
}

/// What `stat` reports about a file, directory or link.
pub struct Metadata {
    pub inum: InodeNumber,
    pub kind: InodeKind,
    /// Permission bits.
    pub mode: u16,
    pub size: u64,
    pub nlink: u16,
    /// Blocks owned, indirection blocks included.
    pub blocks: usize,
    pub times: TimeMetadata,
}

impl Metadata {
    pub fn new(inode: &Inode, blocks: usize) -> Self {
        Self {
            inum: inode.inum,
            kind: inode.kind,
            mode: inode.mode,
            size: inode.size,
            nlink: inode.nlink,
            blocks,
            times: TimeMetadata::from_inode(inode),
        }
    }
}

/// Inode and data block usage. Block counts cover the data region only, reserved null block
/// included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: usize,
    pub total_inodes: usize,
    pub used_inodes: usize,
    pub total_blocks: usize,
    pub used_blocks: usize,
}

impl FsStats {
    pub fn free_inodes(&self) -> usize {
        self.total_inodes - self.used_inodes
    }

    pub fn free_blocks(&self) -> usize {
        self.total_blocks - self.used_blocks
    }
}

/// One row of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub inum: InodeNumber,
    pub kind: InodeKind,
}

fn to_system_time(seconds: i64) -> SystemTime {
    let offset = Duration::from_secs(seconds.unsigned_abs());

    if seconds >= 0 {
        SystemTime::UNIX_EPOCH + offset
    } else {
        SystemTime::UNIX_EPOCH - offset
    }
}
