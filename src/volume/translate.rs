use std::collections::{HashMap, HashSet};
use std::ops::Range;

use crate::disk_format::inode::{BlockNumber, Inode, NULL_BLOCK, NUM_DIRECT};
use crate::disk_format::superblock::SLOT_SIZE;
use crate::error::{FsError, Result};
use crate::storage::IxfsStorage;

use super::Volume;

/// The addressing tier serving a logical block index, with the slot(s) to follow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    /// `inode.direct[slot]`
    Direct(usize),
    /// slot of the single-indirect block
    Single(usize),
    /// first-level slot of the double-indirect block, then slot of the second-level block
    Double(usize, usize),
}

/// An indirection block that a write would have to create.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum PendingTable {
    Single,
    DoubleRoot,
    DoubleSecond(usize),
}

impl<S: IxfsStorage> Volume<S> {
    pub fn tier(&self, index: usize) -> Result<Tier> {
        let e = self.superblock.entries_per_block();

        if index < NUM_DIRECT {
            Ok(Tier::Direct(index))
        } else if index < NUM_DIRECT + e {
            Ok(Tier::Single(index - NUM_DIRECT))
        } else if index < NUM_DIRECT + e + e * e {
            let index = index - NUM_DIRECT - e;
            Ok(Tier::Double(index / e, index % e))
        } else {
            Err(FsError::OutOfRange(index))
        }
    }

    /// Finds the data block backing logical block `index` of `inode`. Returns `None` for a hole,
    /// i.e. when a slot at any level is unallocated.
    pub fn lookup(&self, inode: &Inode, index: usize) -> Result<Option<BlockNumber>> {
        let pointer = match self.tier(index)? {
            Tier::Direct(slot) => self.checked(inode.direct[slot])?,
            Tier::Single(slot) => self.follow(inode.indirect, slot)?,
            Tier::Double(first, second) => {
                let table = self.follow(inode.double_indirect, first)?;
                self.follow(table, second)?
            }
        };

        Ok((pointer != NULL_BLOCK).then_some(pointer as BlockNumber))
    }

    /// Like [`Self::lookup`], but with `create` every missing block on the way (indirection
    /// blocks included) is allocated, zeroed and linked in, so the result is never a hole.
    pub fn resolve(
        &mut self,
        inode: &mut Inode,
        index: usize,
        create: bool,
    ) -> Result<Option<BlockNumber>> {
        if !create {
            return self.lookup(inode, index);
        }

        let block_number = match self.tier(index)? {
            Tier::Direct(slot) => self.ensure_pointer(&mut inode.direct[slot])?,
            Tier::Single(slot) => {
                let table = self.ensure_pointer(&mut inode.indirect)?;
                self.ensure_in_table(table, slot)?
            }
            Tier::Double(first, second) => {
                let root = self.ensure_pointer(&mut inode.double_indirect)?;
                let table = self.ensure_in_table(root, first)?;
                self.ensure_in_table(table, second)?
            }
        };

        Ok(Some(block_number))
    }

    /// Counts the blocks, indirection blocks included, that creating every logical block in
    /// `indices` would allocate.
    pub fn blocks_required(&self, inode: &Inode, indices: Range<usize>) -> Result<usize> {
        let mut required = 0;
        let mut pending = HashSet::new();
        let mut tables = HashMap::new();

        for index in indices {
            match self.tier(index)? {
                Tier::Direct(slot) => {
                    if inode.direct[slot] == NULL_BLOCK {
                        required += 1;
                    }
                }
                Tier::Single(slot) => {
                    if inode.indirect == NULL_BLOCK {
                        if pending.insert(PendingTable::Single) {
                            required += 1;
                        }
                        required += 1;
                    } else if self.cached_slot(&mut tables, inode.indirect, slot)? == NULL_BLOCK {
                        required += 1;
                    }
                }
                Tier::Double(first, second) => {
                    let table = if inode.double_indirect == NULL_BLOCK {
                        if pending.insert(PendingTable::DoubleRoot) {
                            required += 1;
                        }
                        NULL_BLOCK
                    } else {
                        self.cached_slot(&mut tables, inode.double_indirect, first)?
                    };

                    if table == NULL_BLOCK {
                        if pending.insert(PendingTable::DoubleSecond(first)) {
                            required += 1;
                        }
                        required += 1;
                    } else if self.cached_slot(&mut tables, table, second)? == NULL_BLOCK {
                        required += 1;
                    }
                }
            }
        }

        Ok(required)
    }

    /// Every block reachable from `inode`: data blocks and the indirection blocks themselves.
    /// A well-formed inode yields each block once.
    pub fn owned_blocks(&self, inode: &Inode) -> Result<Vec<BlockNumber>> {
        let mut blocks = Vec::new();

        for &pointer in &inode.direct {
            if self.checked(pointer)? != NULL_BLOCK {
                blocks.push(pointer as BlockNumber);
            }
        }

        if self.checked(inode.indirect)? != NULL_BLOCK {
            blocks.push(inode.indirect as BlockNumber);
            blocks.extend(self.table_pointers(inode.indirect)?);
        }

        if self.checked(inode.double_indirect)? != NULL_BLOCK {
            blocks.push(inode.double_indirect as BlockNumber);

            for table in self.table_pointers(inode.double_indirect)? {
                blocks.push(table);
                blocks.extend(self.table_pointers(table as u16)?);
            }
        }

        Ok(blocks)
    }

    /// Frees every data block at logical index `keep` or above and clears its slot. Indirection
    /// blocks left without any pointer are freed as well.
    pub fn release_from(&mut self, inode: &mut Inode, keep: usize) -> Result<()> {
        let e = self.superblock.entries_per_block();

        for slot in keep.min(NUM_DIRECT)..NUM_DIRECT {
            let pointer = std::mem::replace(&mut inode.direct[slot], NULL_BLOCK);
            if self.checked(pointer)? != NULL_BLOCK {
                self.free_block(pointer as BlockNumber);
            }
        }

        if self.checked(inode.indirect)? != NULL_BLOCK {
            let from = keep.saturating_sub(NUM_DIRECT).min(e);
            if self.clear_slots(inode.indirect, from)? {
                inode.indirect = NULL_BLOCK;
            }
        }

        if self.checked(inode.double_indirect)? != NULL_BLOCK {
            let root = inode.double_indirect;
            let mut slots = self.read_slots(root)?;
            let double_start = NUM_DIRECT + e;

            for (first, pointer) in slots.iter_mut().enumerate() {
                if *pointer == NULL_BLOCK {
                    continue;
                }

                let from = keep.saturating_sub(double_start + first * e).min(e);
                if self.clear_slots(*pointer, from)? {
                    *pointer = NULL_BLOCK;
                }
            }

            if slots.iter().all(|pointer| *pointer == NULL_BLOCK) {
                self.free_block(root as BlockNumber);
                inode.double_indirect = NULL_BLOCK;
            } else {
                self.write_table(root as BlockNumber, &slots)?;
            }
        }

        Ok(())
    }

    /// Frees the blocks in slots `from..` of `table`. Returns whether the table became empty, in
    /// which case it is freed too.
    fn clear_slots(&mut self, table: u16, from: usize) -> Result<bool> {
        let mut slots = self.read_slots(table)?;

        for pointer in &mut slots[from..] {
            if *pointer != NULL_BLOCK {
                self.free_block(*pointer as BlockNumber);
                *pointer = NULL_BLOCK;
            }
        }

        if slots.iter().all(|pointer| *pointer == NULL_BLOCK) {
            self.free_block(table as BlockNumber);
            return Ok(true);
        }

        self.write_table(table as BlockNumber, &slots)?;
        Ok(false)
    }

    fn write_table(&mut self, table: BlockNumber, slots: &[u16]) -> Result<()> {
        let mut block = self.zeroed_block();
        for (chunk, pointer) in block.chunks_exact_mut(SLOT_SIZE).zip(slots) {
            chunk.copy_from_slice(&pointer.to_le_bytes());
        }

        self.write_data_block(table, &block)
    }

    /// Reads every slot of an indirection block.
    pub fn read_slots(&self, table: u16) -> Result<Vec<u16>> {
        let block = self.read_data_block(table as BlockNumber)?;

        block
            .chunks_exact(SLOT_SIZE)
            .map(|slot| self.checked(u16::from_le_bytes([slot[0], slot[1]])))
            .collect()
    }

    fn table_pointers(&self, table: u16) -> Result<Vec<BlockNumber>> {
        Ok(self
            .read_slots(table)?
            .into_iter()
            .filter(|pointer| *pointer != NULL_BLOCK)
            .map(|pointer| pointer as BlockNumber)
            .collect())
    }

    fn follow(&self, table: u16, slot: usize) -> Result<u16> {
        if self.checked(table)? == NULL_BLOCK {
            return Ok(NULL_BLOCK);
        }

        self.read_slot(table as BlockNumber, slot)
    }

    fn cached_slot(
        &self,
        tables: &mut HashMap<u16, Vec<u16>>,
        table: u16,
        slot: usize,
    ) -> Result<u16> {
        if !tables.contains_key(&table) {
            tables.insert(table, self.read_slots(table)?);
        }

        Ok(tables[&table][slot])
    }

    fn read_slot(&self, table: BlockNumber, slot: usize) -> Result<u16> {
        let block = self.read_data_block(table)?;
        let offset = slot * SLOT_SIZE;

        self.checked(u16::from_le_bytes([block[offset], block[offset + 1]]))
    }

    fn write_slot(&mut self, table: BlockNumber, slot: usize, pointer: u16) -> Result<()> {
        let mut block = self.read_data_block(table)?;
        let offset = slot * SLOT_SIZE;
        block[offset..offset + SLOT_SIZE].copy_from_slice(&pointer.to_le_bytes());

        self.write_data_block(table, &block)
    }

    fn ensure_pointer(&mut self, pointer: &mut u16) -> Result<BlockNumber> {
        if self.checked(*pointer)? == NULL_BLOCK {
            *pointer = self.allocate_block()? as u16;
        }

        Ok(*pointer as BlockNumber)
    }

    fn ensure_in_table(&mut self, table: BlockNumber, slot: usize) -> Result<BlockNumber> {
        let mut pointer = self.read_slot(table, slot)?;

        if pointer == NULL_BLOCK {
            pointer = self.allocate_block()? as u16;
            self.write_slot(table, slot, pointer)?;
        }

        Ok(pointer as BlockNumber)
    }

    /// Rejects block numbers pointing past the data region.
    fn checked(&self, pointer: u16) -> Result<u16> {
        if pointer as usize >= self.superblock.num_data_blocks() {
            return Err(FsError::Corrupt(format!(
                "block number {pointer} is outside the data region"
            )));
        }

        Ok(pointer)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::config::Config;
    use crate::disk_format::inode::{Inode, InodeKind};
    use crate::volume::tests::{small_config, test_volume};

    use super::*;

    // 64-byte blocks: 32 slots per indirection block
    const E: usize = 32;

    #[test]
    fn test_tiers() {
        let volume = test_volume(&small_config());

        assert_eq!(volume.tier(0).unwrap(), Tier::Direct(0));
        assert_eq!(volume.tier(9).unwrap(), Tier::Direct(9));
        assert_eq!(volume.tier(10).unwrap(), Tier::Single(0));
        assert_eq!(volume.tier(10 + E - 1).unwrap(), Tier::Single(E - 1));
        assert_eq!(volume.tier(10 + E).unwrap(), Tier::Double(0, 0));
        assert_eq!(volume.tier(10 + E + E + 3).unwrap(), Tier::Double(1, 3));
        assert_eq!(
            volume.tier(10 + E + E * E - 1).unwrap(),
            Tier::Double(E - 1, E - 1)
        );
        assert!(matches!(
            volume.tier(10 + E + E * E),
            Err(FsError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_holes_read_as_none() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);

        assert_eq!(volume.resolve(&mut inode, 3, false).unwrap(), None);
        assert_eq!(volume.resolve(&mut inode, 20, false).unwrap(), None);
        assert_eq!(volume.resolve(&mut inode, 10 + E + 5, false).unwrap(), None);

        // allocating one single-indirect slot leaves its neighbours as holes
        volume.resolve(&mut inode, 15, true).unwrap();
        assert_eq!(volume.resolve(&mut inode, 16, false).unwrap(), None);
        assert_eq!(inode.direct, [NULL_BLOCK; NUM_DIRECT]);
    }

    #[test]
    fn test_resolve_does_not_allocate_without_create() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);
        let used = volume.block_bitmap().count_used();

        volume.resolve(&mut inode, 10 + E + 40, false).unwrap();

        assert_eq!(volume.block_bitmap().count_used(), used);
        assert_eq!(inode.double_indirect, NULL_BLOCK);
    }

    #[test]
    fn test_create_then_lookup_agree_for_every_index() {
        let config = Config {
            block_size: 64,
            inode_size: 64,
            inode_count: 4,
            block_count: 0,
        }
        .with_data_blocks(1200);
        let mut volume = test_volume(&config);
        let mut inode = Inode::new(1, InodeKind::Regular);
        let max = volume.superblock().max_file_blocks();

        let mut seen = HashSet::new();
        for index in 0..max {
            let created = volume.resolve(&mut inode, index, true).unwrap();
            let looked_up = volume.resolve(&mut inode, index, false).unwrap();

            assert_eq!(created, looked_up, "index {index}");
            assert!(seen.insert(created.unwrap()), "block reused at index {index}");
        }

        assert!(matches!(
            volume.resolve(&mut inode, max, true),
            Err(FsError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_indirection_blocks_are_allocated_on_demand() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);

        volume.resolve(&mut inode, 10 + E + 2 * E, true).unwrap();

        // double-indirect root, second-level table, data block
        assert_eq!(volume.block_bitmap().count_used(), 1 + 3);
        assert_ne!(inode.double_indirect, NULL_BLOCK);
        assert_eq!(inode.indirect, NULL_BLOCK);

        let root = volume.read_slots(inode.double_indirect).unwrap();
        assert_eq!(root.iter().filter(|p| **p != NULL_BLOCK).count(), 1);
        assert_ne!(root[2], NULL_BLOCK);
    }

    #[test]
    fn test_blocks_required() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);

        // ten direct blocks, the single-indirect block and two of its slots
        assert_eq!(volume.blocks_required(&inode, 0..12).unwrap(), 13);
        // double root, two second-level tables, three data blocks
        let start = 10 + E + E - 1;
        assert_eq!(
            volume.blocks_required(&inode, start..start + 3).unwrap(),
            1 + 2 + 3
        );

        for index in 0..12 {
            volume.resolve(&mut inode, index, true).unwrap();
        }
        assert_eq!(volume.blocks_required(&inode, 0..12).unwrap(), 0);
        assert_eq!(volume.blocks_required(&inode, 0..13).unwrap(), 1);
    }

    #[test]
    fn test_owned_blocks_include_indirection_blocks() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);

        for index in [0, 10, 10 + E, 10 + E + E] {
            volume.resolve(&mut inode, index, true).unwrap();
        }

        let owned = volume.owned_blocks(&inode).unwrap();
        // 1 direct + (table + 1) + (root + 2 tables + 2)
        assert_eq!(owned.len(), 1 + 2 + 5);
        assert_eq!(owned.iter().collect::<HashSet<_>>().len(), owned.len());
        assert_eq!(volume.block_bitmap().count_used(), 1 + owned.len());
    }

    #[test]
    fn test_release_from_frees_tail_and_empty_tables() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);

        for index in [0, 5, 10, 11, 10 + E, 10 + E + E] {
            volume.resolve(&mut inode, index, true).unwrap();
        }
        assert_eq!(volume.owned_blocks(&inode).unwrap().len(), 2 + 3 + 5);

        volume.release_from(&mut inode, 11).unwrap();

        // two direct blocks, the single-indirect block and its first slot
        assert_eq!(volume.owned_blocks(&inode).unwrap().len(), 4);
        assert_eq!(volume.block_bitmap().count_used(), 1 + 4);
        assert_eq!(inode.double_indirect, NULL_BLOCK);
        assert!(volume.lookup(&inode, 10).unwrap().is_some());
        assert_eq!(volume.lookup(&inode, 11).unwrap(), None);

        volume.release_from(&mut inode, 0).unwrap();

        assert_eq!(inode.direct, [NULL_BLOCK; NUM_DIRECT]);
        assert_eq!(inode.indirect, NULL_BLOCK);
        assert_eq!(volume.block_bitmap().count_used(), 1);
    }

    #[test]
    fn test_release_from_keeps_partly_used_second_level_table() {
        let mut volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);

        for index in [10 + E, 10 + E + 1, 10 + E + 2] {
            volume.resolve(&mut inode, index, true).unwrap();
        }

        volume.release_from(&mut inode, 10 + E + 1).unwrap();

        // double-indirect root, one second-level table, one data block
        assert_eq!(volume.owned_blocks(&inode).unwrap().len(), 3);
        assert!(volume.lookup(&inode, 10 + E).unwrap().is_some());
        assert_eq!(volume.lookup(&inode, 10 + E + 2).unwrap(), None);
    }

    #[test]
    fn test_out_of_region_pointer_is_corrupt() {
        let volume = test_volume(&small_config());
        let mut inode = Inode::new(1, InodeKind::Regular);
        inode.direct[0] = 500;

        assert!(matches!(volume.lookup(&inode, 0), Err(FsError::Corrupt(_))));
    }
}
