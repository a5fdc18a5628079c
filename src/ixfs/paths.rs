use log::{info, warn};

use crate::disk_format::directory_entry::{encode_entries, validate_name, DirectoryEntry};
use crate::disk_format::inode::{InodeKind, InodeNumber};
use crate::error::{FsError, Result};
use crate::metadata::{FsStats, ListEntry, Metadata};
use crate::storage::IxfsStorage;

use super::Ixfs;

impl<S: IxfsStorage> Ixfs<S> {
    /// Resolves `path` against the current directory without following symbolic links.
    pub fn resolve(&self, path: &str) -> Result<InodeNumber> {
        self.namespace.resolve(self.cwd, path)
    }

    /// Creates an empty directory. It gets its first data block right away.
    pub fn create_directory(&mut self, path: &str) -> Result<InodeNumber> {
        let inum = self.create_node(path, InodeKind::Directory)?;
        info!("created directory {path} (inode {inum})");

        Ok(inum)
    }

    /// Creates an empty regular file.
    pub fn create_file(&mut self, path: &str) -> Result<InodeNumber> {
        let inum = self.create_node(path, InodeKind::Regular)?;
        info!("created file {path} (inode {inum})");

        Ok(inum)
    }

    /// Removes the entry at `path`. A directory must be empty unless `recursive` is set, in
    /// which case everything below it goes first, deepest entries first.
    ///
    /// An inode whose last link is removed is released, unless it is open: then it is released
    /// when its session closes.
    pub fn remove(&mut self, path: &str, recursive: bool) -> Result<()> {
        let (parent, name) = self.namespace.resolve_parent(self.cwd, path)?;
        let inum = self
            .namespace
            .lookup(parent, name)?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;

        if self.namespace.is_directory(inum) {
            if self.namespace.is_ancestor(inum, self.cwd) {
                return Err(FsError::Busy(format!("{path} contains the current directory")));
            }

            if !recursive && !self.namespace.entries(inum)?.is_empty() {
                return Err(FsError::NotEmpty(path.to_string()));
            }
        }

        self.remove_node(parent, name, inum)?;

        info!("removed {path}");
        Ok(())
    }

    /// The entries of the directory at `path`, in insertion order.
    pub fn list(&self, path: &str) -> Result<Vec<ListEntry>> {
        let dir = self.resolve(path)?;
        if !self.namespace.is_directory(dir) {
            return Err(FsError::NotADirectory(path.to_string()));
        }

        self.namespace
            .entries(dir)?
            .iter()
            .map(|entry| {
                Ok(ListEntry {
                    name: entry.name.clone(),
                    inum: entry.inum,
                    kind: self.volume.inode(entry.inum)?.kind,
                })
            })
            .collect()
    }

    pub fn change_directory(&mut self, path: &str) -> Result<()> {
        let dir = self.resolve(path)?;
        if !self.namespace.is_directory(dir) {
            return Err(FsError::NotADirectory(path.to_string()));
        }

        self.cwd = dir;
        Ok(())
    }

    /// The absolute path of the current directory.
    pub fn pwd(&self) -> Result<String> {
        self.namespace.path_of(self.cwd)
    }

    /// Binds `link_name` to the inode at `path` (a hard link), or to a new symbolic link
    /// holding `path` as its target. A symbolic link's target need not exist.
    pub fn link(&mut self, path: &str, link_name: &str, soft: bool) -> Result<InodeNumber> {
        let inum = if soft {
            self.symlink(path, link_name)?
        } else {
            self.hard_link(path, link_name)?
        };

        info!(
            "linked {link_name} to {path} ({})",
            if soft { "symbolic" } else { "hard" }
        );
        Ok(inum)
    }

    /// The target stored in the symbolic link at `path`.
    pub fn read_link(&self, path: &str) -> Result<String> {
        let inum = self.resolve(path)?;
        let inode = self.volume.inode(inum)?;

        if inode.kind != InodeKind::Symlink {
            return Err(FsError::InvalidPath(format!("{path} is not a symbolic link")));
        }

        self.link_target(inum)
    }

    pub fn stat(&self, path: &str) -> Result<Metadata> {
        let inode = self.current_inode(self.resolve(path)?)?;
        let blocks = self.volume.owned_blocks(&inode)?.len();

        Ok(Metadata::new(&inode, blocks))
    }

    pub fn statfs(&self) -> FsStats {
        let superblock = self.volume.superblock();

        FsStats {
            block_size: superblock.block_size(),
            total_inodes: superblock.num_inodes(),
            used_inodes: self.volume.inode_bitmap().count_used(),
            total_blocks: superblock.num_data_blocks(),
            used_blocks: self.volume.block_bitmap().count_used(),
        }
    }

    pub(super) fn link_target(&self, inum: InodeNumber) -> Result<String> {
        let inode = self.volume.inode(inum)?;
        let content = self.volume.read_all(&inode)?;

        String::from_utf8(content)
            .map_err(|_| FsError::Corrupt(format!("symbolic link {inum} is not valid UTF-8")))
    }

    fn hard_link(&mut self, path: &str, link_name: &str) -> Result<InodeNumber> {
        let target = self.resolve(path)?;
        if self.namespace.is_directory(target) {
            return Err(FsError::IsADirectory(path.to_string()));
        }

        let (parent, name) = self.vacant_entry(link_name)?;
        let entry = DirectoryEntry::new(target, name)?;

        let inode = self.volume.inode(target)?;
        if inode.nlink == u16::MAX {
            return Err(FsError::Busy(format!("{path} has too many links")));
        }

        self.volume.modify_inode(target, |inode| inode.nlink += 1)?;
        if let Err(err) = self.add_entry(parent, entry) {
            self.volume.modify_inode(target, |inode| inode.nlink -= 1)?;
            return Err(err);
        }

        Ok(target)
    }

    fn symlink(&mut self, target: &str, link_name: &str) -> Result<InodeNumber> {
        if target.is_empty() {
            return Err(FsError::InvalidPath(target.to_string()));
        }

        let (parent, name) = self.vacant_entry(link_name)?;
        let inum = self.volume.create_inode(InodeKind::Symlink)?;

        let linked = self
            .write_link_target(inum, target)
            .and_then(|()| self.add_entry(parent, DirectoryEntry::new(inum, name)?));
        if let Err(err) = linked {
            self.discard_inode(inum);
            return Err(err);
        }

        Ok(inum)
    }

    fn write_link_target(&mut self, inum: InodeNumber, target: &str) -> Result<()> {
        let handle = self.open(inum)?;
        let written = self.write(handle, target.as_bytes());
        self.close(handle)?;

        written.map(|_| ())
    }

    fn create_node(&mut self, path: &str, kind: InodeKind) -> Result<InodeNumber> {
        let (parent, name) = self.vacant_entry(path)?;
        let inum = self.volume.create_inode(kind)?;

        let created = self
            .init_node(inum, kind)
            .and_then(|()| self.add_entry(parent, DirectoryEntry::new(inum, name)?));
        if let Err(err) = created {
            self.discard_inode(inum);
            return Err(err);
        }

        if kind == InodeKind::Directory {
            self.namespace.add_directory(inum, parent, name);
        }

        Ok(inum)
    }

    /// Gives a new directory its first block, holding an empty entry list.
    fn init_node(&mut self, inum: InodeNumber, kind: InodeKind) -> Result<()> {
        if kind != InodeKind::Directory {
            return Ok(());
        }

        let mut inode = self.volume.inode(inum)?;
        self.volume.replace_content(&mut inode, &encode_entries(&[])?)?;
        self.volume.update_inode(inode)
    }

    /// Splits `path` into an existing parent directory and a valid name not yet used in it.
    fn vacant_entry<'p>(&self, path: &'p str) -> Result<(InodeNumber, &'p str)> {
        let (parent, name) = self.namespace.resolve_parent(self.cwd, path)?;
        validate_name(name)?;

        if self.namespace.lookup(parent, name)?.is_some() {
            return Err(FsError::Exists(path.to_string()));
        }

        Ok((parent, name))
    }

    /// Inserts an entry and stores the directory. The entry is taken out again if the directory
    /// cannot be stored.
    fn add_entry(&mut self, parent: InodeNumber, entry: DirectoryEntry) -> Result<()> {
        let name = entry.name.clone();
        self.namespace.insert_entry(parent, entry)?;

        if let Err(err) = self.store_directory(parent) {
            self.namespace.remove_entry(parent, &name)?;
            return Err(err);
        }

        Ok(())
    }

    fn remove_node(&mut self, parent: InodeNumber, name: &str, inum: InodeNumber) -> Result<()> {
        if self.namespace.is_directory(inum) {
            let children = self.namespace.entries(inum)?.to_vec();
            for child in children {
                self.remove_node(inum, &child.name, child.inum)?;
            }

            self.namespace.remove_directory(inum)?;
        }

        self.unlink(inum)?;
        self.namespace.remove_entry(parent, name)?;
        self.store_directory(parent)
    }

    /// Drops one link. The inode is released once no link is left, or orphaned while open.
    fn unlink(&mut self, inum: InodeNumber) -> Result<()> {
        let inode = self
            .volume
            .modify_inode(inum, |inode| inode.nlink = inode.nlink.saturating_sub(1))?;

        if inode.nlink > 0 {
            return Ok(());
        }

        if self.sessions.is_open(inum) {
            info!("inode {inum} is still open; releasing it on close");
            self.orphans.insert(inum);
            return Ok(());
        }

        self.volume.release_inode(inum)
    }

    /// Undoes a partially created inode.
    fn discard_inode(&mut self, inum: InodeNumber) {
        let released = self
            .volume
            .modify_inode(inum, |inode| inode.nlink = 0)
            .and_then(|_| self.volume.release_inode(inum));

        if let Err(err) = released {
            warn!("unable to discard inode {inum}: {err}");
        }
    }
}
