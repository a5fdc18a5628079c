//! The resident state of a mounted volume: superblock, allocation bitmaps and the inode table,
//! together with the block-level machinery built on them.

use log::{debug, info, warn};

use crate::bitmap::Bitmap;
use crate::config::Config;
use crate::disk_format::inode::{BlockNumber, Inode, InodeNumber, ROOT_INODE};
use crate::disk_format::superblock::{SuperBlock, SUPERBLOCK_BLOCK_NUMBER};
use crate::error::{FsError, Resource, Result};
use crate::storage::{Block, IxfsStorage};

/// Byte-range reads and writes of inode content.
mod content;
/// Creating, updating and releasing inodes.
mod inode_table;
/// Mapping logical block indices to data blocks.
mod translate;

pub use translate::Tier;

pub struct Volume<S: IxfsStorage> {
    pub storage: S,
    superblock: SuperBlock,
    /// Tracks the allocation status of inodes.
    inode_bitmap: Bitmap,
    /// Tracks the allocation status of data-region blocks.
    block_bitmap: Bitmap,
    /// The inode table, indexed by inode number.
    inodes: Vec<Inode>,
}

impl<S: IxfsStorage> Volume<S> {
    /// Lays out an empty volume on `storage` and writes its metadata. Only the reserved bits are
    /// set; the root inode is left for the caller to initialise.
    pub fn format(storage: S, config: &Config) -> Result<Self> {
        let superblock = SuperBlock::new(config)?;

        if storage.block_size() != superblock.block_size() {
            return Err(FsError::InvalidConfig(format!(
                "device block size is {} but {} was requested",
                storage.block_size(),
                superblock.block_size()
            )));
        }

        if storage.num_blocks() < superblock.num_blocks() {
            return Err(FsError::InvalidConfig(format!(
                "device has {} blocks but {} were requested",
                storage.num_blocks(),
                superblock.num_blocks()
            )));
        }

        let mut inode_bitmap = Bitmap::new(superblock.num_inodes());
        let mut block_bitmap = Bitmap::new(superblock.num_data_blocks());
        // inode zero is the root directory; data block zero is the null block
        inode_bitmap.reserve(ROOT_INODE as usize);
        block_bitmap.reserve(0);

        let inodes = (0..superblock.num_inodes())
            .map(|inum| Inode::free(inum as InodeNumber))
            .collect();

        let mut volume = Self {
            storage,
            superblock,
            inode_bitmap,
            block_bitmap,
            inodes,
        };

        volume.write_data_block(0, &volume.zeroed_block())?;
        volume.flush()?;

        info!(
            "formatted volume: {} inodes, {} blocks of {} bytes, data region at block {}",
            superblock.inode_num, superblock.block_num, superblock.block_size, superblock.data_block
        );

        Ok(volume)
    }

    /// Reads the superblock, both bitmaps and the inode table from `storage`.
    pub fn load(storage: S) -> Result<Self> {
        let header = storage.read_block(SUPERBLOCK_BLOCK_NUMBER)?;
        let superblock: SuperBlock = bincode::deserialize(&header)?;
        superblock.validate()?;

        if storage.block_size() != superblock.block_size()
            || storage.num_blocks() < superblock.num_blocks()
        {
            return Err(FsError::Corrupt(format!(
                "device geometry ({} blocks of {} bytes) does not match the superblock",
                storage.num_blocks(),
                storage.block_size()
            )));
        }

        info!("{} total blocks", superblock.block_num);
        info!("{} total inodes", superblock.inode_num);

        let inode_bitmap_bytes = read_region(
            &storage,
            superblock.inode_bitmap_block as usize,
            superblock.block_bitmap_block as usize,
        )?;
        let block_bitmap_bytes = read_region(
            &storage,
            superblock.block_bitmap_block as usize,
            superblock.inode_table_block as usize,
        )?;
        let table = read_region(
            &storage,
            superblock.inode_table_block as usize,
            superblock.data_block as usize,
        )?;

        let inode_bitmap = Bitmap::from_bytes(&inode_bitmap_bytes, superblock.num_inodes());
        let block_bitmap = Bitmap::from_bytes(&block_bitmap_bytes, superblock.num_data_blocks());

        let inodes = table
            .chunks(superblock.inode_size as usize)
            .take(superblock.num_inodes())
            .map(bincode::deserialize::<Inode>)
            .collect::<Result<Vec<_>, _>>()?;

        for (index, inode) in inodes.iter().enumerate() {
            if inode.inum as usize != index {
                return Err(FsError::Corrupt(format!(
                    "inode slot {index} holds inode {}",
                    inode.inum
                )));
            }

            if inode.is_free() == inode_bitmap.is_set(index) {
                return Err(FsError::Corrupt(format!(
                    "inode {index} disagrees with the inode bitmap"
                )));
            }
        }

        if !block_bitmap.is_set(0) {
            return Err(FsError::Corrupt("null block is marked free".to_string()));
        }

        Ok(Self {
            storage,
            superblock,
            inode_bitmap,
            block_bitmap,
            inodes,
        })
    }

    /// Writes the superblock, both bitmaps and the inode table back to their regions.
    pub fn flush(&mut self) -> Result<()> {
        let superblock = self.superblock;

        let mut header = bincode::serialize(&superblock)?;
        header.resize(superblock.block_size(), 0);
        self.storage.write_block(SUPERBLOCK_BLOCK_NUMBER, &header)?;

        let inode_bitmap = self.inode_bitmap.to_bytes();
        self.write_region(
            superblock.inode_bitmap_block as usize,
            superblock.block_bitmap_block as usize,
            &inode_bitmap,
        )?;

        let block_bitmap = self.block_bitmap.to_bytes();
        self.write_region(
            superblock.block_bitmap_block as usize,
            superblock.inode_table_block as usize,
            &block_bitmap,
        )?;

        let inode_size = superblock.inode_size as usize;
        let mut table = vec![0; superblock.inode_table_blocks() * superblock.block_size()];
        for (slot, inode) in table.chunks_mut(inode_size).zip(&self.inodes) {
            let encoded = bincode::serialize(inode)?;
            slot[..encoded.len()].copy_from_slice(&encoded);
        }
        self.write_region(
            superblock.inode_table_block as usize,
            superblock.data_block as usize,
            &table,
        )?;

        debug!("flushed volume metadata");
        Ok(())
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    pub fn inode_bitmap(&self) -> &Bitmap {
        &self.inode_bitmap
    }

    pub fn block_bitmap(&self) -> &Bitmap {
        &self.block_bitmap
    }

    pub fn block_size(&self) -> usize {
        self.superblock.block_size()
    }

    pub fn read_data_block(&self, block_number: BlockNumber) -> Result<Block> {
        let position = self.superblock.data_block_position(block_number);
        Ok(self.storage.read_block(position)?)
    }

    pub fn write_data_block(&mut self, block_number: BlockNumber, block: &[u8]) -> Result<()> {
        let position = self.superblock.data_block_position(block_number);
        Ok(self.storage.write_block(position, block)?)
    }

    /// Takes the lowest free data block and zeroes it.
    pub fn allocate_block(&mut self) -> Result<BlockNumber> {
        let block_number = self
            .block_bitmap
            .allocate()
            .ok_or(FsError::Exhausted(Resource::Block))?;

        if let Err(err) = self.write_data_block(block_number, &self.zeroed_block()) {
            self.block_bitmap.free(block_number);
            return Err(err);
        }

        debug!("allocated block {block_number}");
        Ok(block_number)
    }

    pub fn free_block(&mut self, block_number: BlockNumber) {
        if block_number == 0 {
            warn!("refusing to free the reserved null block");
            return;
        }

        if !self.block_bitmap.free(block_number) {
            warn!("block {block_number} was already free");
        }
    }

    fn zeroed_block(&self) -> Block {
        vec![0; self.block_size()]
    }

    fn write_region(&mut self, start: BlockNumber, end: BlockNumber, bytes: &[u8]) -> Result<()> {
        let block_size = self.block_size();

        for (i, block_number) in (start..end).enumerate() {
            let mut block = vec![0; block_size];
            let chunk = bytes.iter().skip(i * block_size).take(block_size);
            for (dst, src) in block.iter_mut().zip(chunk) {
                *dst = *src;
            }

            self.storage.write_block(block_number, &block)?;
        }

        Ok(())
    }
}

fn read_region<S: IxfsStorage>(storage: &S, start: BlockNumber, end: BlockNumber) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity((end - start) * storage.block_size());

    for block_number in start..end {
        bytes.extend(storage.read_block(block_number)?);
    }

    Ok(bytes)
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::disk_format::inode::InodeKind;
    use crate::storage::MemoryStorage;

    use super::*;

    pub(crate) fn small_config() -> Config {
        Config {
            block_size: 64,
            inode_size: 64,
            inode_count: 8,
            block_count: 0,
        }
        .with_data_blocks(48)
    }

    pub(crate) fn test_volume(config: &Config) -> Volume<MemoryStorage> {
        let storage = MemoryStorage::new(config.block_size as usize, config.block_count as usize);
        Volume::format(storage, config).unwrap()
    }

    #[test]
    fn test_format_reserves_bit_zero() {
        let volume = test_volume(&small_config());

        assert!(volume.inode_bitmap().is_set(0));
        assert!(volume.block_bitmap().is_set(0));
        assert_eq!(volume.inode_bitmap().count_used(), 1);
        assert_eq!(volume.block_bitmap().count_used(), 1);
        assert_eq!(volume.block_bitmap().len(), 48);
    }

    #[test]
    fn test_format_rejects_small_device() {
        let config = small_config();
        let storage = MemoryStorage::new(64, config.block_count as usize - 1);

        assert!(matches!(
            Volume::format(storage, &config),
            Err(FsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_format_rejects_block_size_mismatch() {
        let config = small_config();
        let storage = MemoryStorage::new(128, config.block_count as usize);

        assert!(Volume::format(storage, &config).is_err());
    }

    #[test]
    fn test_flush_then_load() {
        let mut volume = test_volume(&small_config());
        volume.init_root().unwrap();
        let inum = volume.create_inode(InodeKind::Regular).unwrap();
        let block = volume.allocate_block().unwrap();
        volume.flush().unwrap();

        let reloaded = Volume::load(volume.storage).unwrap();

        assert!(reloaded.inode_bitmap().is_set(inum as usize));
        assert!(reloaded.block_bitmap().is_set(block));
        assert_eq!(reloaded.inode(inum).unwrap().kind, InodeKind::Regular);
        assert_eq!(reloaded.inode(ROOT_INODE).unwrap().kind, InodeKind::Directory);
    }

    #[test]
    fn test_load_unformatted_device() {
        let storage = MemoryStorage::new(64, 64);
        assert!(matches!(Volume::load(storage), Err(FsError::Corrupt(_))));
    }

    #[test]
    fn test_allocate_block_until_exhausted() {
        let mut volume = test_volume(&small_config());

        for expected in 1..48 {
            assert_eq!(volume.allocate_block().unwrap(), expected);
        }

        assert!(matches!(
            volume.allocate_block(),
            Err(FsError::Exhausted(Resource::Block))
        ));
    }

    #[test]
    fn test_allocated_block_is_zeroed() {
        let mut volume = test_volume(&small_config());
        volume.write_data_block(1, &[0xfe; 64]).unwrap();

        let block = volume.allocate_block().unwrap();
        assert_eq!(block, 1);
        assert_eq!(volume.read_data_block(block).unwrap(), vec![0; 64]);
    }

    #[test]
    fn test_null_block_is_never_freed() {
        let mut volume = test_volume(&small_config());
        volume.free_block(0);

        assert!(volume.block_bitmap().is_set(0));
    }
}
