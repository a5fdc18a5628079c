use crate::disk_format::inode::BlockNumber;
use crate::error::DeviceError;

use super::ixfs_storage::{Block, IxfsStorage};

/// A device held entirely in memory.
#[derive(Clone, Debug)]
pub struct MemoryStorage {
    block_size: usize,
    blocks: Vec<Block>,
}

impl MemoryStorage {
    /// Constructs a zero-filled device.
    #[must_use]
    pub fn new(block_size: usize, num_blocks: usize) -> Self {
        Self {
            block_size,
            blocks: vec![vec![0; block_size]; num_blocks],
        }
    }
}

impl IxfsStorage for MemoryStorage {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn read_block(&self, block_number: BlockNumber) -> Result<Block, DeviceError> {
        self.check_access(block_number, self.block_size)?;

        Ok(self.blocks[block_number].clone())
    }

    fn write_block(&mut self, block_number: BlockNumber, block: &[u8]) -> Result<(), DeviceError> {
        self.check_access(block_number, block.len())?;

        self.blocks[block_number].copy_from_slice(block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_device_is_zeroed() {
        let storage = MemoryStorage::new(64, 3);

        assert_eq!(storage.num_blocks(), 3);
        for b in 0..3 {
            assert_eq!(storage.read_block(b).unwrap(), vec![0; 64]);
        }
    }

    #[test]
    fn test_write_then_read() {
        let mut storage = MemoryStorage::new(64, 2);
        storage.write_block(1, &[0xab; 64]).unwrap();

        assert_eq!(storage.read_block(1).unwrap(), vec![0xab; 64]);
        assert_eq!(storage.read_block(0).unwrap(), vec![0; 64]);
    }

    #[test]
    fn test_read_out_of_bounds_block() {
        let storage = MemoryStorage::new(64, 2);

        assert!(storage.read_block(1).is_ok());
        assert!(matches!(
            storage.read_block(2),
            Err(DeviceError::OutOfRange {
                block_number: 2,
                num_blocks: 2
            })
        ));
    }

    #[test]
    fn test_write_wrong_length() {
        let mut storage = MemoryStorage::new(64, 2);

        assert!(matches!(
            storage.write_block(0, &[0; 32]),
            Err(DeviceError::BadBuffer {
                expected: 64,
                actual: 32
            })
        ));
    }
}
