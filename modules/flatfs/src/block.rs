use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

use flatvfs::DeviceError;

use crate::config::BLOCK_SIZE;

pub type BlockId = u64;
pub type Block = [u8; BLOCK_SIZE];
pub type DeviceResult<T> = core::result::Result<T, DeviceError>;

/// Whole-block storage addressed by absolute block number.
pub trait BlockDevice {
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }
    fn block_count(&self) -> u64;
    fn read_block(&mut self, block_id: BlockId, buf: &mut [u8]) -> DeviceResult<()>;
    fn write_block(&mut self, block_id: BlockId, buf: &[u8]) -> DeviceResult<()>;
    fn flush(&mut self) -> DeviceResult<()> {
        Ok(())
    }
}

impl<D: BlockDevice + ?Sized> BlockDevice for &mut D {
    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn block_count(&self) -> u64 {
        (**self).block_count()
    }

    fn read_block(&mut self, block_id: BlockId, buf: &mut [u8]) -> DeviceResult<()> {
        (**self).read_block(block_id, buf)
    }

    fn write_block(&mut self, block_id: BlockId, buf: &[u8]) -> DeviceResult<()> {
        (**self).write_block(block_id, buf)
    }

    fn flush(&mut self) -> DeviceResult<()> {
        (**self).flush()
    }
}

/// Checks that `block_id` exists and `len` is exactly one block.
pub(crate) fn check_access(block_id: BlockId, block_count: u64, len: usize) -> DeviceResult<()> {
    if block_id >= block_count {
        return Err(DeviceError::OutOfRange {
            block_id,
            block_count,
        });
    }
    if len != BLOCK_SIZE {
        return Err(DeviceError::BufferSize);
    }
    Ok(())
}

/// Block device backed by a heap buffer.
#[derive(Clone)]
pub struct MemDisk {
    data: Vec<u8>,
}

impl MemDisk {
    pub fn new(block_count: u64) -> Self {
        Self {
            data: vec![0u8; block_count as usize * BLOCK_SIZE],
        }
    }

    pub fn from_image(data: Vec<u8>) -> DeviceResult<Self> {
        if data.len() % BLOCK_SIZE != 0 {
            return Err(DeviceError::BufferSize);
        }
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_image(self) -> Vec<u8> {
        self.data
    }

    fn range(&self, block_id: BlockId, len: usize) -> DeviceResult<Range<usize>> {
        check_access(block_id, self.block_count(), len)?;
        let offset = block_id as usize * BLOCK_SIZE;
        Ok(offset..offset + BLOCK_SIZE)
    }
}

impl BlockDevice for MemDisk {
    fn block_count(&self) -> u64 {
        (self.data.len() / BLOCK_SIZE) as u64
    }

    fn read_block(&mut self, block_id: BlockId, buf: &mut [u8]) -> DeviceResult<()> {
        let range = self.range(block_id, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_block(&mut self, block_id: BlockId, buf: &[u8]) -> DeviceResult<()> {
        let range = self.range(block_id, buf.len())?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_disk_passthrough() {
        let mut disk = MemDisk::new(2);
        let buf = [7u8; BLOCK_SIZE];
        disk.write_block(1, &buf).unwrap();
        let mut read = [0u8; BLOCK_SIZE];
        disk.read_block(1, &mut read).unwrap();
        assert_eq!(read, buf);
        disk.read_block(0, &mut read).unwrap();
        assert!(read.iter().all(|&b| b == 0));
    }

    #[test]
    fn mem_disk_rejects_out_of_range() {
        let mut disk = MemDisk::new(2);
        let mut buf = [0u8; BLOCK_SIZE];
        assert_eq!(
            disk.read_block(2, &mut buf),
            Err(DeviceError::OutOfRange {
                block_id: 2,
                block_count: 2
            })
        );
        assert_eq!(disk.write_block(0, &buf[..16]), Err(DeviceError::BufferSize));
    }

    #[test]
    fn mem_disk_image_must_be_block_aligned() {
        assert!(MemDisk::from_image(vec![0u8; BLOCK_SIZE + 1]).is_err());
        let disk = MemDisk::from_image(vec![0u8; BLOCK_SIZE * 3]).unwrap();
        assert_eq!(disk.block_count(), 3);
    }

    fn stamp<D: BlockDevice>(mut device: D) -> u64 {
        device.write_block(0, &[1u8; BLOCK_SIZE]).unwrap();
        device.block_count()
    }

    #[test]
    fn borrowed_device_forwards() {
        let mut disk = MemDisk::new(1);
        assert_eq!(stamp(&mut disk), 1);
        assert_eq!(disk.as_bytes()[0], 1);
    }
}
