//! Superblock record and volume geometry.
//!
//! Block 0 layout (little-endian, packed):
//!
//! | offset | width | field            |
//! |--------|-------|------------------|
//! | 0      | 8     | signature        |
//! | 8      | 2     | total blocks     |
//! | 10     | 2     | root block index |
//! | 12     | 2     | data start index |
//! | 14     | 2     | data block count |
//! | 16     | 1     | FAT block count  |
//! | 17     | 4079  | zero padding     |

use flatvfs::{FsError, FsResult};

use crate::block::BlockId;
use crate::config::{BLOCK_SIZE, FAT_START, MAX_DATA_BLOCKS, SIGNATURE};
use crate::fat::{ENTRIES_PER_BLOCK, FAT_EOC};

const SIGNATURE_OFFSET: usize = 0;
const TOTAL_BLOCKS_OFFSET: usize = 8;
const ROOT_BLOCK_OFFSET: usize = 10;
const DATA_START_OFFSET: usize = 12;
const DATA_BLOCKS_OFFSET: usize = 14;
const FAT_BLOCKS_OFFSET: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Superblock {
    pub total_blocks: u16,
    pub root_block: u16,
    pub data_start: u16,
    pub data_blocks: u16,
    pub fat_blocks: u8,
}

impl Superblock {
    /// Lays out a volume with `data_blocks` data blocks: superblock, FAT,
    /// root directory, then data, with no gaps.
    pub fn for_data_blocks(data_blocks: usize) -> FsResult<Self> {
        if data_blocks == 0 || data_blocks > MAX_DATA_BLOCKS {
            return Err(FsError::GeometryMismatch);
        }
        let fat_blocks = (data_blocks * 2).div_ceil(BLOCK_SIZE);
        let root_block = FAT_START as usize + fat_blocks;
        let data_start = root_block + 1;
        let total_blocks = data_start + data_blocks;
        if total_blocks > u16::MAX as usize {
            return Err(FsError::GeometryMismatch);
        }
        Ok(Self {
            total_blocks: total_blocks as u16,
            root_block: root_block as u16,
            data_start: data_start as u16,
            data_blocks: data_blocks as u16,
            fat_blocks: fat_blocks as u8,
        })
    }

    pub fn parse(buf: &[u8]) -> FsResult<Self> {
        if buf.len() < BLOCK_SIZE {
            return Err(FsError::GeometryMismatch);
        }
        if &buf[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE.len()] != SIGNATURE {
            return Err(FsError::SignatureMismatch);
        }
        Ok(Self {
            total_blocks: read_u16(buf, TOTAL_BLOCKS_OFFSET),
            root_block: read_u16(buf, ROOT_BLOCK_OFFSET),
            data_start: read_u16(buf, DATA_START_OFFSET),
            data_blocks: read_u16(buf, DATA_BLOCKS_OFFSET),
            fat_blocks: buf[FAT_BLOCKS_OFFSET],
        })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        buf[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE.len()].copy_from_slice(SIGNATURE);
        write_u16(buf, TOTAL_BLOCKS_OFFSET, self.total_blocks);
        write_u16(buf, ROOT_BLOCK_OFFSET, self.root_block);
        write_u16(buf, DATA_START_OFFSET, self.data_start);
        write_u16(buf, DATA_BLOCKS_OFFSET, self.data_blocks);
        buf[FAT_BLOCKS_OFFSET] = self.fat_blocks;
    }

    /// Rejects a superblock that disagrees with the device size or whose
    /// regions are not laid out back to back.
    pub fn validate(&self, device_blocks: u64) -> FsResult<()> {
        let fat_blocks = self.fat_blocks as usize;
        let data_blocks = self.data_blocks as usize;
        if self.total_blocks as u64 != device_blocks
            || fat_blocks == 0
            || data_blocks == 0
            || data_blocks >= FAT_EOC as usize
            || fat_blocks * ENTRIES_PER_BLOCK < data_blocks
            || self.root_block as usize != FAT_START as usize + fat_blocks
            || self.data_start as usize != self.root_block as usize + 1
            || self.data_start as usize + data_blocks != self.total_blocks as usize
        {
            return Err(FsError::GeometryMismatch);
        }
        Ok(())
    }

    pub fn fat_start(&self) -> BlockId {
        FAT_START
    }

    pub fn root_block_id(&self) -> BlockId {
        self.root_block as BlockId
    }

    /// Device block holding data block `index`.
    pub fn data_block_id(&self, index: u16) -> BlockId {
        self.data_start as BlockId + index as BlockId
    }
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
