use log::info;

use crate::disk_format::inode::{InodeKind, InodeNumber};
use crate::error::{FsError, Result};
use crate::open_table::FileHandle;
use crate::storage::IxfsStorage;

use super::{Ixfs, MAX_SYMLINK_HOPS};

impl<S: IxfsStorage> Ixfs<S> {
    /// Opens a session on a file or symbolic link. Only one session per inode may be open.
    pub fn open(&mut self, inum: InodeNumber) -> Result<FileHandle> {
        let inode = self.volume.inode(inum)?;
        if inode.is_directory() {
            return Err(FsError::IsADirectory(format!("inode {inum}")));
        }

        self.sessions.open(inode)
    }

    /// Opens the file at `path`, following symbolic links.
    pub fn open_path(&mut self, path: &str) -> Result<FileHandle> {
        let inum = self.resolve_following(path)?;
        self.open(inum)
    }

    /// Ends a session. A dirty copy of the inode is stored first; an orphaned inode is then
    /// released.
    pub fn close(&mut self, handle: FileHandle) -> Result<()> {
        let session = self.sessions.close(handle)?;
        let inum = session.inode.inum;

        if session.dirty {
            self.write_back(session.inode)?;
        }

        if self.orphans.remove(&inum) {
            self.volume.release_inode(inum)?;
            info!("released orphaned inode {inum}");
        }

        Ok(())
    }

    pub fn read(&mut self, handle: FileHandle, len: usize) -> Result<Vec<u8>> {
        self.sessions.session_mut(handle)?.read(&self.volume, len)
    }

    pub fn write(&mut self, handle: FileHandle, data: &[u8]) -> Result<usize> {
        self.sessions
            .session_mut(handle)?
            .write(&mut self.volume, data)
    }

    pub fn seek(&mut self, handle: FileHandle, offset: u64) -> Result<()> {
        self.sessions.session_mut(handle)?.seek(offset);
        Ok(())
    }

    /// The whole content of the file at `path`.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let handle = self.open_path(path)?;
        let size = self.sessions.session(handle)?.inode.size as usize;
        let data = self.read(handle, size);
        self.close(handle)?;

        data
    }

    /// Replaces the content of the file at `path`, creating it if needed. A symbolic link whose
    /// target is missing gives `NotFound`.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let inum = match self.resolve_following(path) {
            Ok(inum) => inum,
            Err(FsError::NotFound(_)) if self.namespace.resolve(self.cwd, path).is_err() => {
                self.create_file(path)?
            }
            Err(err) => return Err(err),
        };

        let handle = self.open(inum)?;
        let written = self.write(handle, data).and_then(|_| {
            self.sessions
                .session_mut(handle)?
                .truncate(&mut self.volume, data.len() as u64)
        });
        self.close(handle)?;

        written
    }

    /// Resolves `path`, following a final symbolic link to its target. Relative targets are
    /// resolved from the directory holding the link.
    pub fn resolve_following(&self, path: &str) -> Result<InodeNumber> {
        let mut base = self.cwd;
        let mut current = path.to_string();

        for _ in 0..=MAX_SYMLINK_HOPS {
            let inum = self.namespace.resolve(base, &current)?;
            if self.volume.inode(inum)?.kind != InodeKind::Symlink {
                return Ok(inum);
            }

            let (dir, _) = self.namespace.resolve_parent(base, &current)?;
            base = dir;
            current = self.link_target(inum)?;
        }

        Err(FsError::SymlinkLoop(path.to_string()))
    }
}
