//! Open-file sessions. Each session works on its own copy of the inode, which goes back to the
//! inode table when the session is closed.

use std::fmt;

use log::debug;

use crate::disk_format::inode::{Inode, InodeNumber};
use crate::error::{FsError, Result};
use crate::storage::IxfsStorage;
use crate::volume::Volume;

/// Identifies an open session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(pub usize);

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// working copy of the inode
    pub inode: Inode,
    /// byte offset of the next read or write
    pub offset: u64,
    /// whether `inode` differs from the stored record
    pub dirty: bool,
}

impl Session {
    fn new(inode: Inode) -> Self {
        Self {
            inode,
            offset: 0,
            dirty: false,
        }
    }

    /// Reads up to `len` bytes at the current offset and advances past them. Returns fewer bytes
    /// only at the end of the file.
    pub fn read<S: IxfsStorage>(&mut self, volume: &Volume<S>, len: usize) -> Result<Vec<u8>> {
        let data = volume.read_at(&self.inode, self.offset, len)?;

        self.offset += data.len() as u64;
        self.inode.touch_accessed();
        self.dirty = true;

        Ok(data)
    }

    /// Writes all of `data` at the current offset and advances past it. Nothing is written if
    /// the write would leave the addressable range or run out of blocks.
    pub fn write<S: IxfsStorage>(&mut self, volume: &mut Volume<S>, data: &[u8]) -> Result<usize> {
        volume.write_at(&mut self.inode, self.offset, data)?;

        self.offset += data.len() as u64;
        self.inode.touch_modified();
        self.dirty = true;

        Ok(data.len())
    }

    /// Cuts the file down to `size` bytes.
    pub fn truncate<S: IxfsStorage>(&mut self, volume: &mut Volume<S>, size: u64) -> Result<()> {
        volume.truncate(&mut self.inode, size)?;

        self.inode.touch_modified();
        self.dirty = true;

        Ok(())
    }

    /// Moves the offset. Offsets past the end are allowed; writing there leaves a hole.
    pub fn seek(&mut self, offset: u64) {
        self.offset = offset;
    }
}

/// The table of open sessions. At most one session may be open per inode.
#[derive(Clone, Debug, Default)]
pub struct OpenFileTable {
    slots: Vec<Option<Session>>,
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session on a copy of `inode`, at offset zero.
    pub fn open(&mut self, inode: Inode) -> Result<FileHandle> {
        if self.is_open(inode.inum) {
            return Err(FsError::AlreadyOpen(inode.inum));
        }

        let session = Some(Session::new(inode));
        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = session;
                index
            }
            None => {
                self.slots.push(session);
                self.slots.len() - 1
            }
        };

        debug!("opened inode {} as {}", inode.inum, FileHandle(index));
        Ok(FileHandle(index))
    }

    /// Ends a session and hands it back so a dirty copy can be written out.
    pub fn close(&mut self, handle: FileHandle) -> Result<Session> {
        let session = self
            .slots
            .get_mut(handle.0)
            .and_then(Option::take)
            .ok_or_else(|| FsError::NotFound(format!("file handle {handle}")))?;

        debug!("closed {handle} (inode {})", session.inode.inum);
        Ok(session)
    }

    pub fn session(&self, handle: FileHandle) -> Result<&Session> {
        self.slots
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| FsError::NotFound(format!("file handle {handle}")))
    }

    pub fn session_mut(&mut self, handle: FileHandle) -> Result<&mut Session> {
        self.slots
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| FsError::NotFound(format!("file handle {handle}")))
    }

    /// The handle of the session open on `inum`, if any.
    pub fn handle_of(&self, inum: InodeNumber) -> Option<FileHandle> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|session| session.inode.inum == inum))
            .map(FileHandle)
    }

    pub fn is_open(&self, inum: InodeNumber) -> bool {
        self.handle_of(inum).is_some()
    }

    pub fn handles(&self) -> Vec<FileHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| FileHandle(index))
            .collect()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> + '_ {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.sessions().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use crate::disk_format::inode::InodeKind;
    use crate::volume::tests::{small_config, test_volume};

    use super::*;

    #[test]
    fn test_open_twice_is_refused() {
        let mut table = OpenFileTable::new();
        let inode = Inode::new(3, InodeKind::Regular);

        let handle = table.open(inode).unwrap();
        assert!(matches!(table.open(inode), Err(FsError::AlreadyOpen(3))));

        table.close(handle).unwrap();
        assert!(table.open(inode).is_ok());
    }

    #[test]
    fn test_handles_are_reused() {
        let mut table = OpenFileTable::new();

        let first = table.open(Inode::new(1, InodeKind::Regular)).unwrap();
        let second = table.open(Inode::new(2, InodeKind::Regular)).unwrap();
        assert_ne!(first, second);

        table.close(first).unwrap();
        let third = table.open(Inode::new(3, InodeKind::Regular)).unwrap();
        assert_eq!(third, first);
        assert_eq!(table.handles(), vec![first, second]);
        assert_eq!(table.handle_of(3), Some(first));
    }

    #[test]
    fn test_close_unknown_handle() {
        let mut table = OpenFileTable::new();
        let handle = table.open(Inode::new(1, InodeKind::Regular)).unwrap();
        table.close(handle).unwrap();

        assert!(matches!(table.close(handle), Err(FsError::NotFound(_))));
        assert!(matches!(
            table.close(FileHandle(42)),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_fresh_session_is_clean() {
        let mut table = OpenFileTable::new();
        let handle = table.open(Inode::new(1, InodeKind::Regular)).unwrap();
        let session = table.session(handle).unwrap();

        assert_eq!(session.offset, 0);
        assert!(!session.dirty);
    }

    #[test]
    fn test_write_then_read_moves_offset() {
        let mut volume = test_volume(&small_config());
        let mut table = OpenFileTable::new();
        let handle = table.open(Inode::new(1, InodeKind::Regular)).unwrap();
        let session = table.session_mut(handle).unwrap();

        assert_eq!(session.write(&mut volume, b"hello world").unwrap(), 11);
        assert_eq!(session.offset, 11);
        assert_eq!(session.inode.size, 11);
        assert!(session.dirty);

        session.seek(6);
        assert_eq!(session.read(&volume, 100).unwrap(), b"world");
        assert_eq!(session.offset, 11);
        assert!(session.read(&volume, 100).unwrap().is_empty());
    }

    #[test]
    fn test_failed_write_keeps_offset() {
        let mut volume = test_volume(&small_config());
        let mut table = OpenFileTable::new();
        let handle = table.open(Inode::new(1, InodeKind::Regular)).unwrap();
        let session = table.session_mut(handle).unwrap();

        let max = volume.superblock().max_file_size();
        session.seek(max);
        assert!(matches!(
            session.write(&mut volume, b"x"),
            Err(FsError::OutOfRange(_))
        ));
        assert_eq!(session.offset, max);
        assert_eq!(session.inode.size, 0);
        assert!(!session.dirty);
    }
}
