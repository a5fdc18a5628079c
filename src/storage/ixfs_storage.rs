use crate::disk_format::inode::BlockNumber;
use crate::error::DeviceError;

/// The contents of one block. Its length always equals the device's block size.
pub type Block = Vec<u8>;

/// A device made of fixed-size blocks.
pub trait IxfsStorage {
    /// Size of every block in bytes.
    fn block_size(&self) -> usize;

    /// Number of blocks on the device.
    fn num_blocks(&self) -> usize;

    fn read_block(&self, block_number: BlockNumber) -> Result<Block, DeviceError>;

    fn write_block(&mut self, block_number: BlockNumber, block: &[u8]) -> Result<(), DeviceError>;

    /// Fails unless `block_number` exists and `len` matches the block size.
    fn check_access(&self, block_number: BlockNumber, len: usize) -> Result<(), DeviceError> {
        if block_number >= self.num_blocks() {
            return Err(DeviceError::OutOfRange {
                block_number,
                num_blocks: self.num_blocks(),
            });
        }

        if len != self.block_size() {
            return Err(DeviceError::BadBuffer {
                expected: self.block_size(),
                actual: len,
            });
        }

        Ok(())
    }
}
