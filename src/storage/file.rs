use std::fs::File;
use std::os::unix::prelude::FileExt;

use crate::disk_format::inode::BlockNumber;
use crate::disk_format::superblock::{SuperBlock, SUPERBLOCK_SIZE};
use crate::error::{DeviceError, Result};

use super::ixfs_storage::{Block, IxfsStorage};

/// A device backed by a disk image file.
pub struct FileBackedStorage {
    file: File,
    block_size: usize,
    num_blocks: usize,
}

impl FileBackedStorage {
    /// Wraps an image file, sizing the device from the file's length.
    pub fn new(file: File, block_size: usize) -> Result<Self> {
        let len = file
            .metadata()
            .map_err(|source| DeviceError::Io {
                block_number: 0,
                source,
            })?
            .len();

        Ok(Self {
            file,
            block_size,
            num_blocks: (len / block_size as u64) as usize,
        })
    }

    /// Resizes `file` to hold exactly `num_blocks` blocks of `block_size` bytes.
    pub fn create(file: File, block_size: usize, num_blocks: usize) -> Result<Self> {
        file.set_len((block_size * num_blocks) as u64)
            .map_err(|source| DeviceError::Io {
                block_number: 0,
                source,
            })?;

        Ok(Self {
            file,
            block_size,
            num_blocks,
        })
    }

    /// Wraps a formatted image, taking the block size from its superblock.
    pub fn open_formatted(file: File) -> Result<Self> {
        let mut header = [0; SUPERBLOCK_SIZE];
        file.read_exact_at(&mut header, 0)
            .map_err(|source| DeviceError::Io {
                block_number: 0,
                source,
            })?;

        let superblock: SuperBlock = bincode::deserialize(&header)?;
        superblock.validate()?;

        Self::new(file, superblock.block_size())
    }

    fn position(&self, block_number: BlockNumber) -> u64 {
        (block_number * self.block_size) as u64
    }
}

impl IxfsStorage for FileBackedStorage {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    fn read_block(&self, block_number: BlockNumber) -> Result<Block, DeviceError> {
        self.check_access(block_number, self.block_size)?;

        let mut buf = vec![0; self.block_size];
        self.file
            .read_exact_at(&mut buf, self.position(block_number))
            .map_err(|source| DeviceError::Io {
                block_number,
                source,
            })?;

        Ok(buf)
    }

    fn write_block(&mut self, block_number: BlockNumber, block: &[u8]) -> Result<(), DeviceError> {
        self.check_access(block_number, block.len())?;

        self.file
            .write_all_at(block, self.position(block_number))
            .map_err(|source| DeviceError::Io {
                block_number,
                source,
            })
    }
}
