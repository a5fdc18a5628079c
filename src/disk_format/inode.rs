use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::superblock::MIN_BLOCK_SIZE;

// inode numbers are 16 bits wide on disk
pub type InodeNumber = u16;

// block numbers are stored as `u16`s relative to the start of the data region, but we use
// `usize`s to avoid littering the code with casts.
pub type BlockNumber = usize;

/// The number of bytes an encoded [`Inode`] occupies.
pub const INODE_RECORD_SIZE: usize = 64;
const_assert!(INODE_RECORD_SIZE <= MIN_BLOCK_SIZE);

pub const NUM_DIRECT: usize = 10;

/// The root directory always lives in inode zero.
pub const ROOT_INODE: InodeNumber = 0;

/// Block slot value meaning "no block". Data block zero is reserved so it never names real data.
pub const NULL_BLOCK: u16 = 0;

pub const DEFAULT_DIRECTORY_MODE: u16 = 0o755;
pub const DEFAULT_FILE_MODE: u16 = 0o644;
pub const DEFAULT_SYMLINK_MODE: u16 = 0o777;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    /// the inode's own number
    pub inum: InodeNumber,
    /// file size in bytes
    pub size: u64,
    /// block #s for the first NUM_DIRECT blocks
    pub direct: [u16; NUM_DIRECT],
    /// block number of the single-indirect block
    pub indirect: u16,
    /// block number of the double-indirect block
    pub double_indirect: u16,
    /// file type
    pub kind: InodeKind,
    /// permission bits (rwxrwxrwx), stored but not enforced
    pub mode: u16,
    /// number of directory entries naming this inode
    pub nlink: u16,
    /// creation time, seconds since the epoch
    pub crtime: i64,
    /// last modification time
    pub mtime: i64,
    /// last access time
    pub atime: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u16)]
pub enum InodeKind {
    /// This inode is not in use for any file.
    Free = 0,
    /// This inode describes a directory.
    Directory = 1,
    /// This inode describes a regular data file.
    Regular = 2,
    /// This inode describes a symbolic link; its content is the target path.
    Symlink = 3,
}

impl InodeKind {
    pub fn default_mode(self) -> u16 {
        match self {
            InodeKind::Directory => DEFAULT_DIRECTORY_MODE,
            InodeKind::Symlink => DEFAULT_SYMLINK_MODE,
            InodeKind::Regular | InodeKind::Free => DEFAULT_FILE_MODE,
        }
    }
}

impl Inode {
    /// An unallocated inode record.
    pub const fn free(inum: InodeNumber) -> Self {
        Self {
            inum,
            size: 0,
            direct: [NULL_BLOCK; NUM_DIRECT],
            indirect: NULL_BLOCK,
            double_indirect: NULL_BLOCK,
            kind: InodeKind::Free,
            mode: 0,
            nlink: 0,
            crtime: 0,
            mtime: 0,
            atime: 0,
        }
    }

    /// A freshly allocated, empty inode with a single link.
    pub fn new(inum: InodeNumber, kind: InodeKind) -> Self {
        let now = now();

        Self {
            kind,
            mode: kind.default_mode(),
            nlink: 1,
            crtime: now,
            mtime: now,
            atime: now,
            ..Self::free(inum)
        }
    }

    pub fn is_free(&self) -> bool {
        self.kind == InodeKind::Free
    }

    pub fn is_directory(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    pub fn touch_modified(&mut self) {
        self.mtime = now();
    }

    pub fn touch_accessed(&mut self) {
        self.atime = now();
    }
}

/// Current time as whole seconds since the UNIX epoch.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_size() {
        let inode = Inode::new(7, InodeKind::Regular);
        let encoded = bincode::serialize(&inode).unwrap();

        assert_eq!(encoded.len(), INODE_RECORD_SIZE);
    }

    #[test]
    fn test_free_inode_round_trip() {
        let encoded = bincode::serialize(&Inode::free(3)).unwrap();
        let decoded: Inode = bincode::deserialize(&encoded).unwrap();

        assert!(decoded.is_free());
        assert_eq!(decoded.inum, 3);
        assert_eq!(decoded.direct, [NULL_BLOCK; NUM_DIRECT]);
    }

    #[test]
    fn test_new_inode() {
        let inode = Inode::new(2, InodeKind::Directory);

        assert_eq!(inode.nlink, 1);
        assert_eq!(inode.size, 0);
        assert_eq!(inode.mode, DEFAULT_DIRECTORY_MODE);
        assert!(inode.crtime > 0);
    }
}
