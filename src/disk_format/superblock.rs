use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{FsError, Result};

use super::inode::{BlockNumber, InodeNumber, INODE_RECORD_SIZE, NUM_DIRECT};

/// Identifies an ixfs volume.
pub const MAGIC: u32 = 0x4958_4653;

/// The superblock lives in the first block of the device.
pub const SUPERBLOCK_BLOCK_NUMBER: BlockNumber = 0;

/// The number of bytes occupied by an encoded [`SuperBlock`].
pub const SUPERBLOCK_SIZE: usize = 36;

/// The smallest supported block size.
pub const MIN_BLOCK_SIZE: usize = 64;
const_assert!(SUPERBLOCK_SIZE <= MIN_BLOCK_SIZE);

/// Block numbers are stored in 16-bit slots, so at most this many blocks can be addressed.
pub const MAX_BLOCKS: usize = 1 << 16;

/// Inode numbers are 16 bits wide.
pub const MAX_INODES: usize = 1 << 16;

/// Each slot of an indirection block holds one 16-bit block number.
pub const SLOT_SIZE: usize = 2;

/// Describes where each region of the volume starts and how large the volume is.
///
/// `| superblock | inode bitmap | block bitmap | inode table | data region |`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperBlock {
    pub magic: u32,
    /// first block of the inode bitmap
    pub inode_bitmap_block: u32,
    /// first block of the block bitmap
    pub block_bitmap_block: u32,
    /// first block of the inode table
    pub inode_table_block: u32,
    /// first block of the data region
    pub data_block: u32,
    /// number of inodes
    pub inode_num: u32,
    /// number of blocks on the device, metadata included
    pub block_num: u32,
    /// size of an inode slot in bytes
    pub inode_size: u32,
    /// size of a block in bytes
    pub block_size: u32,
}

impl SuperBlock {
    /// Lays out a new volume, rejecting configurations that cannot be represented.
    pub fn new(config: &Config) -> Result<Self> {
        let block_size = config.block_size as usize;
        let inode_size = config.inode_size as usize;

        if block_size < MIN_BLOCK_SIZE || block_size % SLOT_SIZE != 0 {
            return Err(FsError::InvalidConfig(format!(
                "block size must be an even number of at least {MIN_BLOCK_SIZE} bytes, got {block_size}"
            )));
        }

        if inode_size < INODE_RECORD_SIZE {
            return Err(FsError::InvalidConfig(format!(
                "inode size must be at least {INODE_RECORD_SIZE} bytes, got {inode_size}"
            )));
        }

        if block_size % inode_size != 0 {
            return Err(FsError::InvalidConfig(format!(
                "block size {block_size} is not a multiple of inode size {inode_size}"
            )));
        }

        if config.inode_count == 0 || config.inode_count as usize > MAX_INODES {
            return Err(FsError::InvalidConfig(format!(
                "inode count must be between 1 and {MAX_INODES}, got {}",
                config.inode_count
            )));
        }

        if config.block_count as usize > MAX_BLOCKS {
            return Err(FsError::InvalidConfig(format!(
                "{} blocks cannot be addressed by 16-bit block numbers",
                config.block_count
            )));
        }

        let inode_bitmap_block = 1;
        let block_bitmap_block = inode_bitmap_block + config.inode_bitmap_blocks();
        let inode_table_block = block_bitmap_block + config.block_bitmap_blocks();
        let data_block = inode_table_block + config.inode_table_blocks();

        // the reserved null block plus the root directory's first block
        if config.block_count < data_block + 2 {
            return Err(FsError::InvalidConfig(format!(
                "{} blocks leave no room for data; metadata alone needs {data_block}",
                config.block_count
            )));
        }

        Ok(Self {
            magic: MAGIC,
            inode_bitmap_block,
            block_bitmap_block,
            inode_table_block,
            data_block,
            inode_num: config.inode_count,
            block_num: config.block_count,
            inode_size: config.inode_size,
            block_size: config.block_size,
        })
    }

    /// Checks a superblock read back from a device.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(FsError::Corrupt(format!(
                "bad magic number {:#x}",
                self.magic
            )));
        }

        let expected = Self::new(&self.config()).map_err(|err| match err {
            FsError::InvalidConfig(reason) => FsError::Corrupt(reason),
            err => err,
        })?;

        if expected != *self {
            return Err(FsError::Corrupt(
                "region offsets do not match the recorded geometry".to_string(),
            ));
        }

        Ok(())
    }

    /// The configuration this volume was formatted with.
    pub fn config(&self) -> Config {
        Config {
            block_size: self.block_size,
            inode_size: self.inode_size,
            inode_count: self.inode_num,
            block_count: self.block_num,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size as usize
    }

    pub fn num_inodes(&self) -> usize {
        self.inode_num as usize
    }

    pub fn num_blocks(&self) -> usize {
        self.block_num as usize
    }

    /// Number of blocks in the data region.
    pub fn num_data_blocks(&self) -> usize {
        (self.block_num - self.data_block) as usize
    }

    pub fn inode_table_blocks(&self) -> usize {
        (self.data_block - self.inode_table_block) as usize
    }

    /// Number of block-number slots in an indirection block.
    pub fn entries_per_block(&self) -> usize {
        self.block_size() / SLOT_SIZE
    }

    /// Number of logical blocks a single inode can address.
    pub fn max_file_blocks(&self) -> usize {
        let e = self.entries_per_block();
        NUM_DIRECT + e + e * e
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_blocks() as u64 * self.block_size as u64
    }

    /// Device block holding data block `block_number`.
    pub fn data_block_position(&self, block_number: BlockNumber) -> BlockNumber {
        self.data_block as usize + block_number
    }

    /// Device block and byte offset of inode `inum`'s slot in the inode table.
    pub fn inode_position(&self, inum: InodeNumber) -> (BlockNumber, usize) {
        let position = inum as usize * self.inode_size as usize;

        (
            self.inode_table_block as usize + position / self.block_size(),
            position % self.block_size(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(inode_count: u32, block_count: u32) -> Config {
        Config {
            inode_count,
            block_count,
            ..Config::default()
        }
    }

    #[test]
    fn test_encoded_size() {
        let superblock = SuperBlock::new(&Config::default()).unwrap();
        assert_eq!(bincode::serialize(&superblock).unwrap().len(), SUPERBLOCK_SIZE);
    }

    #[test]
    fn test_offsets_strictly_increase() {
        let superblock = SuperBlock::new(&config(100, 4096)).unwrap();

        assert_eq!(superblock.inode_bitmap_block, 1);
        assert!(superblock.inode_bitmap_block < superblock.block_bitmap_block);
        assert!(superblock.block_bitmap_block < superblock.inode_table_block);
        assert!(superblock.inode_table_block < superblock.data_block);
        // ceil(100 * 64 / 1024)
        assert_eq!(superblock.inode_table_blocks(), 7);
    }

    #[test]
    fn test_entries_per_block() {
        let superblock = SuperBlock::new(&Config::default()).unwrap();

        assert_eq!(superblock.entries_per_block(), 512);
        assert_eq!(superblock.max_file_blocks(), 10 + 512 + 512 * 512);
    }

    #[test]
    fn test_too_many_blocks() {
        let result = SuperBlock::new(&config(16, MAX_BLOCKS as u32 + 1));
        assert!(matches!(result, Err(FsError::InvalidConfig(_))));

        assert!(SuperBlock::new(&config(16, MAX_BLOCKS as u32)).is_ok());
    }

    #[test]
    fn test_no_room_for_data() {
        let config = config(16, 4);
        assert!(matches!(
            SuperBlock::new(&config),
            Err(FsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_sizes() {
        let odd_block = Config {
            block_size: 1023,
            ..Config::default()
        };
        assert!(SuperBlock::new(&odd_block).is_err());

        let small_inode = Config {
            inode_size: 32,
            ..Config::default()
        };
        assert!(SuperBlock::new(&small_inode).is_err());

        let no_inodes = config(0, 1024);
        assert!(SuperBlock::new(&no_inodes).is_err());
    }

    #[test]
    fn test_inode_position() {
        let superblock = SuperBlock::new(&config(64, 1024)).unwrap();
        let table = superblock.inode_table_block as usize;

        assert_eq!(superblock.inode_position(0), (table, 0));
        assert_eq!(superblock.inode_position(15), (table, 15 * 64));
        assert_eq!(superblock.inode_position(16), (table + 1, 0));
    }

    #[test]
    fn test_validate_rejects_bad_magic() {
        let mut superblock = SuperBlock::new(&Config::default()).unwrap();
        assert!(superblock.validate().is_ok());

        superblock.magic = 0;
        assert!(matches!(superblock.validate(), Err(FsError::Corrupt(_))));
    }
}
