use log::info;

use crate::disk_format::inode::Inode;
use crate::error::{FsError, Resource, Result};
use crate::storage::IxfsStorage;

use super::Volume;

impl<S: IxfsStorage> Volume<S> {
    /// Reads up to `len` bytes starting at `offset`, clipped to the inode's size. Holes read as
    /// zeros.
    pub fn read_at(&self, inode: &Inode, offset: u64, len: usize) -> Result<Vec<u8>> {
        let end = offset.saturating_add(len as u64).min(inode.size);
        if offset >= end {
            return Ok(Vec::new());
        }

        let block_size = self.block_size() as u64;
        let mut data = Vec::with_capacity((end - offset) as usize);
        let mut position = offset;

        while position < end {
            let start_offset = (position % block_size) as usize;
            let block_start = position - start_offset as u64;
            let end_position = (block_start + block_size).min(end);
            let chunk_len = (end_position - position) as usize;

            let block_index = (position / block_size) as usize;
            match self.lookup(inode, block_index)? {
                Some(block_number) => {
                    let block = self.read_data_block(block_number)?;
                    data.extend_from_slice(&block[start_offset..start_offset + chunk_len]);
                }
                None => data.resize(data.len() + chunk_len, 0),
            }

            position = end_position;
        }

        Ok(data)
    }

    /// The whole content of an inode.
    pub fn read_all(&self, inode: &Inode) -> Result<Vec<u8>> {
        self.read_at(inode, 0, inode.size as usize)
    }

    /// Writes `data` at `offset`, allocating blocks as needed and growing `inode.size` if the
    /// write ends past it.
    ///
    /// The range and the number of blocks to allocate are checked up front, so a write that is
    /// out of range or cannot get enough blocks leaves both `inode` and the bitmaps untouched.
    pub fn write_at(&mut self, inode: &mut Inode, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let block_size = self.block_size() as u64;
        let end = offset.saturating_add(data.len() as u64);
        let first_index = (offset / block_size) as usize;
        let last_index = ((end - 1) / block_size) as usize;

        if end > self.superblock.max_file_size() {
            return Err(FsError::OutOfRange(last_index));
        }

        let required = self.blocks_required(inode, first_index..last_index + 1)?;
        if required > self.block_bitmap.count_free() {
            return Err(FsError::Exhausted(Resource::Block));
        }

        let mut working = *inode;
        let mut position = offset;

        while position < end {
            let start_offset = (position % block_size) as usize;
            let block_start = position - start_offset as u64;
            let end_position = (block_start + block_size).min(end);

            let block_index = (position / block_size) as usize;
            let block_number = self
                .resolve(&mut working, block_index, true)?
                .ok_or_else(|| {
                    FsError::Corrupt(format!(
                        "block {block_index} of inode {} was not allocated",
                        working.inum
                    ))
                })?;

            let mut block = self.read_data_block(block_number)?;
            let chunk = &data[(position - offset) as usize..(end_position - offset) as usize];
            block[start_offset..start_offset + chunk.len()].copy_from_slice(chunk);
            self.write_data_block(block_number, &block)?;

            position = end_position;
        }

        working.size = working.size.max(end);
        *inode = working;

        info!(
            "[inode #{}] wrote {} bytes at offset {offset}",
            inode.inum,
            data.len()
        );
        Ok(())
    }

    /// Replaces the whole content of an inode.
    pub fn replace_content(&mut self, inode: &mut Inode, data: &[u8]) -> Result<()> {
        self.write_at(inode, 0, data)?;
        self.truncate(inode, data.len() as u64)
    }

    /// Cuts the content of an inode down to `size` bytes. Blocks wholly past the new end are
    /// freed and the rest of the last block is zeroed, so a later write past the end leaves a
    /// hole instead of uncovering old bytes. A larger `size` only grows the recorded size.
    pub fn truncate(&mut self, inode: &mut Inode, size: u64) -> Result<()> {
        if size >= inode.size {
            inode.size = size;
            return Ok(());
        }

        let block_size = self.block_size() as u64;
        let tail = (size % block_size) as usize;
        let keep = size.div_ceil(block_size) as usize;

        if tail != 0 {
            if let Some(block_number) = self.lookup(inode, keep - 1)? {
                let mut block = self.read_data_block(block_number)?;
                block[tail..].fill(0);
                self.write_data_block(block_number, &block)?;
            }
        }

        self.release_from(inode, keep)?;
        inode.size = size;

        info!("[inode #{}] truncated to {size} bytes", inode.inum);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::disk_format::inode::{InodeKind, NULL_BLOCK};
    use crate::volume::tests::{small_config, test_volume};

    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_write_then_read_across_blocks() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);
        let data = pattern(1000);

        volume.write_at(&mut inode, 30, &data).unwrap();

        assert_eq!(inode.size, 1030);
        assert_eq!(volume.read_at(&inode, 30, 1000).unwrap(), data);
        // the first 30 bytes were never written
        assert_eq!(volume.read_at(&inode, 0, 30).unwrap(), vec![0; 30]);
    }

    #[test]
    fn test_read_is_clipped_to_size() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);
        volume.write_at(&mut inode, 0, b"hello").unwrap();

        assert_eq!(volume.read_at(&inode, 2, 100).unwrap(), b"llo");
        assert!(volume.read_at(&inode, 5, 10).unwrap().is_empty());
        assert!(volume.read_at(&inode, 50, 10).unwrap().is_empty());
    }

    #[test]
    fn test_size_is_max_of_old_size_and_write_end() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);

        volume.write_at(&mut inode, 0, &pattern(300)).unwrap();
        volume.write_at(&mut inode, 10, b"abc").unwrap();
        assert_eq!(inode.size, 300);

        volume.write_at(&mut inode, 299, b"xyz").unwrap();
        assert_eq!(inode.size, 302);
        assert_eq!(volume.read_at(&inode, 10, 3).unwrap(), b"abc");
    }

    #[test]
    fn test_sparse_write_leaves_holes() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);

        volume.write_at(&mut inode, 64 * 5, b"tail").unwrap();

        assert_eq!(inode.size, 64 * 5 + 4);
        assert_eq!(inode.direct[0], NULL_BLOCK);
        assert_ne!(inode.direct[5], NULL_BLOCK);
        assert_eq!(volume.block_bitmap().count_used(), 2);

        let content = volume.read_all(&inode).unwrap();
        assert!(content[..64 * 5].iter().all(|b| *b == 0));
        assert_eq!(&content[64 * 5..], b"tail");
    }

    #[test]
    fn test_write_past_addressable_range() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);
        let max = volume.superblock().max_file_size();

        let result = volume.write_at(&mut inode, max - 2, b"abc");

        assert!(matches!(result, Err(FsError::OutOfRange(_))));
        assert_eq!(inode.size, 0);
        assert_eq!(volume.block_bitmap().count_used(), 1);
    }

    #[test]
    fn test_write_without_enough_blocks_changes_nothing() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);
        volume.write_at(&mut inode, 0, b"keep").unwrap();
        let before = inode;
        let used = volume.block_bitmap().count_used();

        // the 46 free blocks cannot hold 60 data blocks plus indirection
        let result = volume.write_at(&mut inode, 0, &pattern(64 * 60));

        assert!(matches!(result, Err(FsError::Exhausted(Resource::Block))));
        assert_eq!(inode, before);
        assert_eq!(volume.block_bitmap().count_used(), used);
        assert_eq!(volume.read_all(&inode).unwrap(), b"keep");
    }

    #[test]
    fn test_replace_content_shrinks_size() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Directory);

        volume.replace_content(&mut inode, &pattern(200)).unwrap();
        volume.replace_content(&mut inode, b"short").unwrap();

        assert_eq!(inode.size, 5);
        assert_eq!(volume.read_all(&inode).unwrap(), b"short");
        // 200 bytes took four blocks; five bytes need one
        assert_eq!(volume.owned_blocks(&inode).unwrap().len(), 1);
        assert_eq!(volume.block_bitmap().count_used(), 2);
    }

    #[test]
    fn test_truncate_zeroes_the_cut_tail() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);
        volume.write_at(&mut inode, 0, b"SECRETDATA").unwrap();

        volume.truncate(&mut inode, 2).unwrap();
        volume.write_at(&mut inode, 8, b"!").unwrap();

        assert_eq!(volume.read_all(&inode).unwrap(), b"SE\0\0\0\0\0\0!");
    }

    #[test]
    fn test_truncate_to_zero_frees_everything() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);
        volume.write_at(&mut inode, 0, &pattern(64 * 12)).unwrap();

        volume.truncate(&mut inode, 0).unwrap();

        assert_eq!(inode.size, 0);
        assert!(volume.owned_blocks(&inode).unwrap().is_empty());
        assert_eq!(volume.block_bitmap().count_used(), 1);

        // old blocks do not come back as content
        volume.write_at(&mut inode, 64 * 11, b"x").unwrap();
        let content = volume.read_all(&inode).unwrap();
        assert!(content[..64 * 11].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_truncate_on_block_boundary() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);
        volume.write_at(&mut inode, 0, &pattern(64 * 3)).unwrap();

        volume.truncate(&mut inode, 64).unwrap();

        assert_eq!(volume.read_all(&inode).unwrap(), pattern(64));
        assert_eq!(volume.owned_blocks(&inode).unwrap().len(), 1);
    }
}
