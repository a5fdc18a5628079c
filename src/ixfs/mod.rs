//! The mounted filesystem: one context object holding the resident volume, the directory tree,
//! the open-file table and the current directory.

use std::collections::BTreeSet;

use log::{info, warn};

use crate::config::Config;
use crate::disk_format::directory_entry::{decode_entries, encode_entries};
use crate::disk_format::inode::{Inode, InodeNumber, ROOT_INODE};
use crate::error::{FsError, Result};
use crate::namespace::Namespace;
use crate::open_table::OpenFileTable;
use crate::storage::IxfsStorage;
use crate::volume::Volume;

/// Consistency checking.
mod check;
/// Opening, reading and writing files.
mod files;
/// Path-based commands on the directory tree.
mod paths;

/// Symbolic links followed while resolving a single path.
pub const MAX_SYMLINK_HOPS: usize = 8;

pub struct Ixfs<S: IxfsStorage> {
    volume: Volume<S>,
    namespace: Namespace,
    sessions: OpenFileTable,
    cwd: InodeNumber,
    /// Inodes that lost their last link while open. They are released when their session closes.
    orphans: BTreeSet<InodeNumber>,
}

impl<S: IxfsStorage> Ixfs<S> {
    /// Formats `storage` according to `config` and mounts the empty filesystem.
    pub fn format(storage: S, config: &Config) -> Result<Self> {
        let mut volume = Volume::format(storage, config)?;
        volume.init_root()?;

        let mut ixfs = Self::with_namespace(volume, Namespace::new());
        ixfs.store_directory(ROOT_INODE)?;
        ixfs.volume.flush()?;

        info!("formatted a new filesystem");
        Ok(ixfs)
    }

    /// Loads the volume, rebuilds the directory tree from the stored directory contents and
    /// checks the result for consistency.
    pub fn mount(storage: S) -> Result<Self> {
        let volume = Volume::load(storage)?;
        let namespace = load_namespace(&volume)?;

        let mut ixfs = Self::with_namespace(volume, namespace);
        ixfs.recover_orphans()?;
        ixfs.check_filesystem()?;

        info!(
            "mounted filesystem with {} directories",
            ixfs.namespace.dentries().count()
        );
        Ok(ixfs)
    }

    /// Writes dirty session copies and all volume metadata to storage. Sessions stay open.
    pub fn sync(&mut self) -> Result<()> {
        for handle in self.sessions.handles() {
            let session = self.sessions.session_mut(handle)?;
            if !session.dirty {
                continue;
            }

            let inode = session.inode;
            session.dirty = false;
            self.write_back(inode)?;
        }

        self.volume.flush()
    }

    /// Closes every session, releases the orphans that leaves behind, writes everything out and
    /// hands the storage back.
    pub fn unmount(mut self) -> Result<S> {
        for handle in self.sessions.handles() {
            self.close(handle)?;
        }

        self.sync()?;

        info!("unmounted filesystem");
        Ok(self.volume.storage)
    }

    pub fn volume(&self) -> &Volume<S> {
        &self.volume
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn sessions(&self) -> &OpenFileTable {
        &self.sessions
    }

    /// The current directory.
    pub fn cwd(&self) -> InodeNumber {
        self.cwd
    }

    pub fn orphans(&self) -> impl Iterator<Item = InodeNumber> + '_ {
        self.orphans.iter().copied()
    }

    fn with_namespace(volume: Volume<S>, namespace: Namespace) -> Self {
        Self {
            volume,
            namespace,
            sessions: OpenFileTable::new(),
            cwd: ROOT_INODE,
            orphans: BTreeSet::new(),
        }
    }

    /// Writes a directory's entries as its content.
    fn store_directory(&mut self, dir: InodeNumber) -> Result<()> {
        let content = encode_entries(self.namespace.entries(dir)?)?;

        let mut inode = self.volume.inode(dir)?;
        self.volume.replace_content(&mut inode, &content)?;
        inode.touch_modified();
        self.volume.update_inode(inode)
    }

    /// Stores a session's copy of an inode, keeping the link count the table holds now.
    fn write_back(&mut self, mut inode: Inode) -> Result<()> {
        inode.nlink = self.volume.inode(inode.inum)?.nlink;
        self.volume.update_inode(inode)
    }

    /// The freshest copy of an inode: the open session's if there is one.
    fn current_inode(&self, inum: InodeNumber) -> Result<Inode> {
        let mut inode = self.volume.inode(inum)?;

        if let Some(handle) = self.sessions.handle_of(inum) {
            let nlink = inode.nlink;
            inode = self.sessions.session(handle)?.inode;
            inode.nlink = nlink;
        }

        Ok(inode)
    }

    /// Releases inodes that were left unlinked but allocated, as happens when a filesystem is
    /// synced while an unlinked file is still open.
    fn recover_orphans(&mut self) -> Result<()> {
        let reachable = self.reachable_inodes();
        let unlinked: Vec<_> = self
            .volume
            .allocated_inodes()
            .filter(|inode| inode.nlink == 0 && !reachable.contains(&inode.inum))
            .map(|inode| inode.inum)
            .collect();

        for inum in unlinked {
            warn!("releasing orphaned inode {inum}");
            self.volume.release_inode(inum)?;
        }

        Ok(())
    }
}

/// Rebuilds the directory tree by walking directory contents from the root.
fn load_namespace<S: IxfsStorage>(volume: &Volume<S>) -> Result<Namespace> {
    let root = volume
        .inode(ROOT_INODE)
        .map_err(|_| FsError::Corrupt("root inode is free".to_string()))?;
    if !root.is_directory() {
        return Err(FsError::Corrupt(
            "root inode does not represent a directory".to_string(),
        ));
    }

    let mut namespace = Namespace::new();
    let mut queue = vec![root];

    while let Some(dir) = queue.pop() {
        let entries = decode_entries(&volume.read_all(&dir)?)?;

        for entry in entries {
            let target = volume.inode(entry.inum).map_err(|_| {
                FsError::Corrupt(format!(
                    "entry {:?} in directory {} refers to free inode {}",
                    entry.name, dir.inum, entry.inum
                ))
            })?;

            if target.is_directory() {
                if namespace.is_directory(target.inum) {
                    return Err(FsError::Corrupt(format!(
                        "directory {} is reachable more than once",
                        target.inum
                    )));
                }

                namespace.add_directory(target.inum, dir.inum, &entry.name);
                queue.push(target);
            }

            let name = entry.name.clone();
            namespace.insert_entry(dir.inum, entry).map_err(|_| {
                FsError::Corrupt(format!(
                    "directory {} contains duplicate entry {name:?}",
                    dir.inum
                ))
            })?;
        }
    }

    Ok(namespace)
}
