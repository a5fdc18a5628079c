use serde::{Deserialize, Serialize};

/// Format-time parameters of a volume. They are recorded in the superblock and never change
/// afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Size of a block in bytes.
    pub block_size: u32,
    /// Size of an inode slot in the inode table, in bytes.
    pub inode_size: u32,
    /// Number of inodes in the inode table.
    pub inode_count: u32,
    /// Number of blocks on the device, metadata regions included.
    pub block_count: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 1024,
            inode_size: 64,
            inode_count: 1024,
            block_count: 1024,
        }
    }
}

impl Config {
    /// Blocks occupied by the inode bitmap.
    pub fn inode_bitmap_blocks(&self) -> u32 {
        self.bitmap_blocks(self.inode_count)
    }

    /// Blocks occupied by the block bitmap. Room is reserved for one bit per device block, but
    /// only the bits of the data region are used.
    pub fn block_bitmap_blocks(&self) -> u32 {
        self.bitmap_blocks(self.block_count)
    }

    /// `ceil(inode_count * inode_size / block_size)`
    pub fn inode_table_blocks(&self) -> u32 {
        let bytes = u64::from(self.inode_count) * u64::from(self.inode_size);
        bytes.div_ceil(u64::from(self.block_size.max(1))) as u32
    }

    /// Number of blocks taken by everything in front of the data region.
    pub fn metadata_blocks(&self) -> u32 {
        1 + self.inode_bitmap_blocks() + self.block_bitmap_blocks() + self.inode_table_blocks()
    }

    /// Returns a copy of `self` whose `block_count` leaves exactly `data_blocks` blocks in the
    /// data region.
    pub fn with_data_blocks(self, data_blocks: u32) -> Self {
        let mut config = self;

        // the block bitmap grows with the total, so settle on a fixed point
        loop {
            let block_count = config.metadata_blocks() + data_blocks;
            if block_count == config.block_count {
                return config;
            }

            config.block_count = block_count;
        }
    }

    fn bitmap_blocks(&self, bits: u32) -> u32 {
        let bytes = u64::from(bits).div_ceil(8);
        bytes.div_ceil(u64::from(self.block_size.max(1))).max(1) as u32
    }
}
