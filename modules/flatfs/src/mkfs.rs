//! Volume formatter.

use flatvfs::{FsError, FsResult};

use crate::block::{BlockDevice, MemDisk};
use crate::config::{BLOCK_SIZE, MAX_DATA_BLOCKS, SUPERBLOCK_ID};
use crate::fat::Fat;
use crate::layout::Superblock;
use crate::root_dir::RootDirectory;

/// Writes an empty volume with `data_blocks` data blocks. The device must
/// have exactly the number of blocks the layout needs.
pub fn format<D: BlockDevice + ?Sized>(device: &mut D, data_blocks: usize) -> FsResult<Superblock> {
    let sb = Superblock::for_data_blocks(data_blocks)?;
    if device.block_size() != BLOCK_SIZE || device.block_count() != sb.total_blocks as u64 {
        log::warn!(
            "format: {data_blocks} data blocks need a {}-block device, got {}",
            sb.total_blocks,
            device.block_count()
        );
        return Err(FsError::GeometryMismatch);
    }
    let mut block = [0u8; BLOCK_SIZE];
    sb.encode(&mut block);
    device.write_block(SUPERBLOCK_ID, &block)?;
    Fat::fresh(&sb).sync(device)?;
    RootDirectory::empty(sb.root_block_id()).sync(device)?;
    device.flush()?;
    log::info!(
        "formatted volume: {} blocks, {} data blocks, {} FAT blocks",
        sb.total_blocks,
        sb.data_blocks,
        sb.fat_blocks
    );
    Ok(sb)
}

/// Formats the largest volume that fills the device exactly.
pub fn format_device<D: BlockDevice + ?Sized>(device: &mut D) -> FsResult<Superblock> {
    let data_blocks = max_data_blocks(device.block_count()).ok_or_else(|| {
        log::warn!("format: no layout fills a {}-block device", device.block_count());
        FsError::GeometryMismatch
    })?;
    format(device, data_blocks)
}

/// Largest data block count whose layout spans exactly `total_blocks`.
/// Some sizes have no exact fit because the FAT grows a block at a time.
pub fn max_data_blocks(total_blocks: u64) -> Option<usize> {
    (1..=MAX_DATA_BLOCKS).rev().find(|&data_blocks| {
        Superblock::for_data_blocks(data_blocks)
            .is_ok_and(|sb| sb.total_blocks as u64 == total_blocks)
    })
}

impl MemDisk {
    /// An in-memory device sized for and formatted with `data_blocks` data
    /// blocks.
    pub fn formatted(data_blocks: usize) -> FsResult<Self> {
        let sb = Superblock::for_data_blocks(data_blocks)?;
        let mut disk = MemDisk::new(sb.total_blocks as u64);
        format(&mut disk, data_blocks)?;
        Ok(disk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::{ENTRIES_PER_BLOCK, FAT_EOC};
    use crate::layout::read_u16;

    #[test]
    fn formatted_image_layout() {
        let disk = MemDisk::formatted(100).unwrap();
        let bytes = disk.as_bytes();
        assert_eq!(disk.block_count(), 103);
        assert_eq!(&bytes[..8], b"ECS150FS");
        let fat = &bytes[BLOCK_SIZE..2 * BLOCK_SIZE];
        assert_eq!(read_u16(fat, 0), FAT_EOC);
        assert!((1..ENTRIES_PER_BLOCK).all(|i| read_u16(fat, i * 2) == 0));
        assert!(bytes[2 * BLOCK_SIZE..3 * BLOCK_SIZE].iter().all(|&b| b == 0));
    }

    #[test]
    fn format_requires_exact_size() {
        let mut disk = MemDisk::new(50);
        assert_eq!(format(&mut disk, 100), Err(FsError::GeometryMismatch));
        assert_eq!(format(&mut disk, 0), Err(FsError::GeometryMismatch));
    }

    #[test]
    fn format_device_fills_device() {
        let mut disk = MemDisk::new(8198);
        let sb = format_device(&mut disk).unwrap();
        assert_eq!(sb.data_blocks, 8192);
        assert_eq!(max_data_blocks(103), Some(100));
        assert_eq!(max_data_blocks(2052), None);
        assert_eq!(max_data_blocks(3), None);
        assert_eq!(format_device(&mut MemDisk::new(2052)), Err(FsError::GeometryMismatch));
    }
}
