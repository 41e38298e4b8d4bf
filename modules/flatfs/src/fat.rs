//! File allocation table: the free map and the block chains of every file.
//!
//! The table is an arena of 16-bit entries, one per data block. A chain is a
//! singly linked list threaded through the arena by index. Entry 0 is
//! reserved so that a first-block pointer of 0 never names user data.

use alloc::vec;
use alloc::vec::Vec;

use flatvfs::{FsError, FsResult};

use crate::block::{Block, BlockDevice, BlockId};
use crate::config::BLOCK_SIZE;
use crate::layout::{read_u16, write_u16, Superblock};

/// End of chain, and the first-block pointer of an empty file.
pub const FAT_EOC: u16 = 0xffff;
pub const FAT_FREE: u16 = 0;
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / 2;

pub struct Fat {
    blocks: Vec<Block>,
    dirty: Vec<bool>,
    start: BlockId,
    data_blocks: usize,
}

impl Fat {
    pub fn load<D: BlockDevice + ?Sized>(device: &mut D, sb: &Superblock) -> FsResult<Self> {
        let count = sb.fat_blocks as usize;
        let mut blocks = vec![[0u8; BLOCK_SIZE]; count];
        for (index, block) in blocks.iter_mut().enumerate() {
            device.read_block(sb.fat_start() + index as BlockId, block)?;
        }
        Ok(Self {
            blocks,
            dirty: vec![false; count],
            start: sb.fat_start(),
            data_blocks: sb.data_blocks as usize,
        })
    }

    /// Table for a freshly formatted volume: everything free except the
    /// reserved entry 0. Every block is dirty so `sync` writes all of them.
    pub fn fresh(sb: &Superblock) -> Self {
        let count = sb.fat_blocks as usize;
        let mut fat = Self {
            blocks: vec![[0u8; BLOCK_SIZE]; count],
            dirty: vec![true; count],
            start: sb.fat_start(),
            data_blocks: sb.data_blocks as usize,
        };
        fat.set_entry(0, FAT_EOC);
        fat
    }

    pub fn data_blocks(&self) -> usize {
        self.data_blocks
    }

    pub fn entry(&self, index: u16) -> u16 {
        let index = index as usize;
        read_u16(&self.blocks[index / ENTRIES_PER_BLOCK], (index % ENTRIES_PER_BLOCK) * 2)
    }

    fn set_entry(&mut self, index: u16, value: u16) {
        let index = index as usize;
        let block = index / ENTRIES_PER_BLOCK;
        write_u16(&mut self.blocks[block], (index % ENTRIES_PER_BLOCK) * 2, value);
        self.dirty[block] = true;
    }

    pub fn free_count(&self) -> usize {
        (1..self.data_blocks)
            .filter(|&index| self.entry(index as u16) == FAT_FREE)
            .count()
    }

    pub fn find_free_block(&self) -> Option<u16> {
        (1..self.data_blocks)
            .map(|index| index as u16)
            .find(|&index| self.entry(index) == FAT_FREE)
    }

    /// Claims a free block as a new chain tail and links it after `last`.
    /// Only the FAT blocks holding the two touched entries are written.
    pub fn allocate_chain_extend<D: BlockDevice + ?Sized>(
        &mut self,
        device: &mut D,
        last: Option<u16>,
    ) -> FsResult<u16> {
        if let Some(last) = last {
            if !self.is_data_block(last) || self.entry(last) != FAT_EOC {
                log::error!("fat: block {last} is not a chain tail");
                return Err(FsError::Corrupted);
            }
        }
        let Some(block) = self.find_free_block() else {
            log::warn!("fat: no free data block");
            return Err(FsError::OutOfSpace);
        };
        self.set_entry(block, FAT_EOC);
        if let Some(last) = last {
            self.set_entry(last, block);
        }
        self.sync(device)?;
        log::trace!("fat: allocated block {block} after {last:?}");
        Ok(block)
    }

    /// Returns every block of the chain starting at `first` to the free map.
    /// The chain is validated before anything is released.
    pub fn free_chain<D: BlockDevice + ?Sized>(
        &mut self,
        device: &mut D,
        first: u16,
    ) -> FsResult<usize> {
        let len = self.chain_len(first)?;
        let mut block = first;
        for _ in 0..len {
            let next = self.entry(block);
            self.set_entry(block, FAT_FREE);
            block = next;
        }
        self.sync(device)?;
        Ok(len)
    }

    /// Follows one link. `None` marks the end of the chain.
    pub fn next_block(&self, block: u16) -> FsResult<Option<u16>> {
        if !self.is_data_block(block) {
            log::error!("fat: chain references block {block} outside the data area");
            return Err(FsError::Corrupted);
        }
        match self.entry(block) {
            FAT_EOC => Ok(None),
            next if self.is_data_block(next) => Ok(Some(next)),
            next => {
                log::error!("fat: block {block} links to invalid entry {next:#06x}");
                Err(FsError::Corrupted)
            }
        }
    }

    /// Data block at position `logical` of the chain starting at `first`.
    pub fn chain_block_at(&self, first: u16, logical: usize) -> FsResult<u16> {
        if first == FAT_EOC || logical >= self.data_blocks {
            return Err(FsError::ChainOutOfRange);
        }
        if !self.is_data_block(first) {
            return Err(FsError::Corrupted);
        }
        let mut block = first;
        for _ in 0..logical {
            block = self.next_block(block)?.ok_or(FsError::ChainOutOfRange)?;
        }
        Ok(block)
    }

    /// Number of blocks in the chain; 0 for an empty file. A chain longer
    /// than the data area can only be a cycle.
    pub fn chain_len(&self, first: u16) -> FsResult<usize> {
        if first == FAT_EOC {
            return Ok(0);
        }
        if !self.is_data_block(first) || self.entry(first) == FAT_FREE {
            return Err(FsError::Corrupted);
        }
        let mut len = 1usize;
        let mut block = first;
        while let Some(next) = self.next_block(block)? {
            len += 1;
            if len > self.data_blocks {
                log::error!("fat: cycle in chain starting at block {first}");
                return Err(FsError::Corrupted);
            }
            block = next;
        }
        Ok(len)
    }

    /// Writes back the FAT blocks modified since the last sync.
    pub(crate) fn sync<D: BlockDevice + ?Sized>(&mut self, device: &mut D) -> FsResult<()> {
        for (index, block) in self.blocks.iter().enumerate() {
            if self.dirty[index] {
                device.write_block(self.start + index as BlockId, block)?;
                self.dirty[index] = false;
            }
        }
        Ok(())
    }

    fn is_data_block(&self, index: u16) -> bool {
        index != 0 && (index as usize) < self.data_blocks
    }
}
