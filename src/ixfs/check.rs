use std::collections::{HashMap, HashSet};

use crate::disk_format::inode::{InodeKind, InodeNumber, ROOT_INODE};
use crate::error::{FsError, Result};
use crate::storage::IxfsStorage;

use super::Ixfs;

impl<S: IxfsStorage> Ixfs<S> {
    /// Checks the filesystem for consistency:
    ///
    /// - the directory tree has no loops and every directory records its parent and name,
    /// - every entry names an allocated inode, and only directories have tree records,
    /// - every allocated inode is named by some entry, unless it is an open orphan,
    /// - link counts equal the number of entries naming each inode,
    /// - no block is owned twice, and the owned blocks are exactly the used ones in the bitmap,
    /// - no size exceeds the largest addressable file.
    ///
    /// Open sessions are checked through their own copy of the inode.
    pub fn check_filesystem(&self) -> Result<()> {
        self.namespace.check_tree()?;

        let root = self.volume.inode(ROOT_INODE)?;
        if root.kind != InodeKind::Directory {
            return corrupt("root inode does not represent a directory".to_string());
        }

        for dentry in self.namespace.dentries() {
            let inode = self.volume.inode(dentry.inum)?;
            if !inode.is_directory() {
                return corrupt(format!("inode {} is in the tree but not a directory", inode.inum));
            }

            for entry in &dentry.entries {
                let Ok(target) = self.volume.inode(entry.inum) else {
                    return corrupt(format!(
                        "entry {:?} in directory {} names free inode {}",
                        entry.name, dentry.inum, entry.inum
                    ));
                };

                if target.is_directory() != self.namespace.is_directory(entry.inum) {
                    return corrupt(format!(
                        "entry {:?} in directory {} disagrees with the tree about inode {}",
                        entry.name, dentry.inum, entry.inum
                    ));
                }
            }
        }

        let link_counts = self.namespace.link_counts();
        let max_file_size = self.volume.superblock().max_file_size();
        let mut owners: HashMap<usize, InodeNumber> = HashMap::new();

        for stored in self.volume.allocated_inodes() {
            let inum = stored.inum;
            let inode = self.current_inode(inum)?;
            let links = link_counts.get(&inum).copied().unwrap_or(0);

            if inum == ROOT_INODE {
                if links != 0 {
                    return corrupt("the root directory is named by an entry".to_string());
                }
            } else if self.orphans.contains(&inum) {
                if links != 0 || inode.nlink != 0 {
                    return corrupt(format!("orphaned inode {inum} still has links"));
                }

                if !self.sessions.is_open(inum) {
                    return corrupt(format!("orphaned inode {inum} is not open"));
                }
            } else if links == 0 {
                return corrupt(format!("inode {inum} is not reachable from the root"));
            } else if links != inode.nlink as usize {
                return corrupt(format!(
                    "inode {inum} has link count {} but {links} entries",
                    inode.nlink
                ));
            }

            if inode.size > max_file_size {
                return corrupt(format!(
                    "inode {inum} is {} bytes, beyond the maximum file size",
                    inode.size
                ));
            }

            for block in self.volume.owned_blocks(&inode)? {
                if block == 0 {
                    return corrupt(format!("inode {inum} owns the null block"));
                }

                if let Some(owner) = owners.insert(block, inum) {
                    return corrupt(format!(
                        "block {block} is owned by both inode {owner} and inode {inum}"
                    ));
                }

                if !self.volume.block_bitmap().is_set(block) {
                    return corrupt(format!("block {block} of inode {inum} is marked free"));
                }
            }
        }

        let leaked: Vec<_> = self
            .volume
            .block_bitmap()
            .iter_used()
            .filter(|block| *block != 0 && !owners.contains_key(block))
            .collect();
        if !leaked.is_empty() {
            return corrupt(format!("blocks {leaked:?} are used but owned by no inode"));
        }

        Ok(())
    }

    /// The root and every inode named by some entry.
    pub(super) fn reachable_inodes(&self) -> HashSet<InodeNumber> {
        let mut reachable = HashSet::from([ROOT_INODE]);

        for dentry in self.namespace.dentries() {
            reachable.extend(dentry.entries.iter().map(|entry| entry.inum));
        }

        reachable
    }
}

fn corrupt(message: String) -> Result<()> {
    Err(FsError::Corrupt(message))
}
