use std::collections::HashSet;

use log::{debug, warn};

use crate::disk_format::inode::{Inode, InodeKind, InodeNumber, ROOT_INODE};
use crate::error::{FsError, Resource, Result};
use crate::storage::IxfsStorage;

use super::Volume;

impl<S: IxfsStorage> Volume<S> {
    /// Writes the root directory's inode into the reserved slot and gives it its first block.
    pub fn init_root(&mut self) -> Result<()> {
        let mut root = Inode::new(ROOT_INODE, InodeKind::Directory);
        self.resolve(&mut root, 0, true)?;
        self.inodes[ROOT_INODE as usize] = root;

        Ok(())
    }

    /// Allocates the lowest free inode and initialises it as an empty `kind` with one link.
    pub fn create_inode(&mut self, kind: InodeKind) -> Result<InodeNumber> {
        let inum = self
            .inode_bitmap
            .allocate()
            .ok_or(FsError::Exhausted(Resource::Inode))? as InodeNumber;

        self.inodes[inum as usize] = Inode::new(inum, kind);

        debug!("created {kind:?} inode {inum}");
        Ok(inum)
    }

    /// Returns a copy of an allocated inode.
    pub fn inode(&self, inum: InodeNumber) -> Result<Inode> {
        match self.inodes.get(inum as usize) {
            Some(inode) if !inode.is_free() => Ok(*inode),
            _ => Err(FsError::NotFound(format!("inode {inum}"))),
        }
    }

    /// Replaces the stored record of an allocated inode.
    pub fn update_inode(&mut self, inode: Inode) -> Result<()> {
        self.inode(inode.inum)?;

        if inode.is_free() {
            return Err(FsError::Corrupt(format!(
                "refusing to store inode {} as free; release it instead",
                inode.inum
            )));
        }

        self.inodes[inode.inum as usize] = inode;
        Ok(())
    }

    /// Applies `update` to a stored inode.
    pub fn modify_inode<F>(&mut self, inum: InodeNumber, update: F) -> Result<Inode>
    where
        F: FnOnce(&mut Inode),
    {
        let mut inode = self.inode(inum)?;
        update(&mut inode);
        self.update_inode(inode)?;

        Ok(inode)
    }

    /// Frees every block the inode owns, indirection blocks included, then the inode itself.
    /// The inode must have no links left.
    pub fn release_inode(&mut self, inum: InodeNumber) -> Result<()> {
        let inode = self.inode(inum)?;

        if inode.nlink != 0 {
            return Err(FsError::StillLinked(inum));
        }

        if inum == ROOT_INODE {
            return Err(FsError::Busy("the root directory cannot be released".to_string()));
        }

        let blocks = self.owned_blocks(&inode)?;
        let mut freed = HashSet::with_capacity(blocks.len());
        for block in blocks {
            if !freed.insert(block) {
                warn!("inode {inum} references block {block} more than once");
                continue;
            }

            self.free_block(block);
        }

        self.inodes[inum as usize] = Inode::free(inum);
        if !self.inode_bitmap.free(inum as usize) {
            warn!("inode {inum} was already free in the bitmap");
        }

        debug!("released inode {inum} and {} blocks", freed.len());
        Ok(())
    }

    /// Every allocated inode, in inode number order.
    pub fn allocated_inodes(&self) -> impl Iterator<Item = &Inode> + '_ {
        self.inodes.iter().filter(|inode| !inode.is_free())
    }
}

#[cfg(test)]
mod tests {
    use crate::volume::tests::{small_config, test_volume};

    use super::*;

    #[test]
    fn test_create_inode_lowest_first() {
        let mut volume = test_volume(&small_config());

        assert_eq!(volume.create_inode(InodeKind::Regular).unwrap(), 1);
        assert_eq!(volume.create_inode(InodeKind::Directory).unwrap(), 2);

        let inode = volume.inode(2).unwrap();
        assert_eq!(inode.inum, 2);
        assert_eq!(inode.kind, InodeKind::Directory);
        assert_eq!(inode.nlink, 1);
        assert_eq!(inode.size, 0);
    }

    #[test]
    fn test_no_more_inodes() {
        let mut volume = test_volume(&small_config());

        for _ in 1..8 {
            volume.create_inode(InodeKind::Regular).unwrap();
        }

        assert!(matches!(
            volume.create_inode(InodeKind::Regular),
            Err(FsError::Exhausted(Resource::Inode))
        ));
    }

    #[test]
    fn test_free_inode_is_not_found() {
        let volume = test_volume(&small_config());

        assert!(matches!(volume.inode(3), Err(FsError::NotFound(_))));
        assert!(matches!(volume.inode(200), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_release_requires_zero_links() {
        let mut volume = test_volume(&small_config());
        let inum = volume.create_inode(InodeKind::Regular).unwrap();

        assert!(matches!(
            volume.release_inode(inum),
            Err(FsError::StillLinked(_))
        ));
    }

    #[test]
    fn test_release_frees_every_block() {
        let mut volume = test_volume(&small_config());
        let inum = volume.create_inode(InodeKind::Regular).unwrap();
        let mut inode = volume.inode(inum).unwrap();

        // direct, single-indirect and double-indirect data
        for index in [0, 4, 9, 10, 20, 42, 43, 80] {
            volume.resolve(&mut inode, index, true).unwrap();
        }
        inode.nlink = 0;
        volume.update_inode(inode).unwrap();
        assert!(volume.block_bitmap().count_used() > 1);

        volume.release_inode(inum).unwrap();

        assert_eq!(volume.block_bitmap().count_used(), 1);
        assert!(!volume.inode_bitmap().is_set(inum as usize));
        assert!(volume.inode(inum).is_err());
        assert_eq!(volume.create_inode(InodeKind::Regular).unwrap(), inum);
    }

    #[test]
    fn test_modify_inode() {
        let mut volume = test_volume(&small_config());
        let inum = volume.create_inode(InodeKind::Regular).unwrap();

        volume.modify_inode(inum, |inode| inode.nlink += 1).unwrap();
        assert_eq!(volume.inode(inum).unwrap().nlink, 2);
    }
}
