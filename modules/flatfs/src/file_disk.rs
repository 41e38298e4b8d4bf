//! Block device backed by a disk image file on the host.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use flatvfs::DeviceError;

use crate::block::{check_access, BlockDevice, BlockId, DeviceResult};
use crate::config::BLOCK_SIZE;

pub struct FileDisk {
    file: File,
    block_count: u64,
}

impl FileDisk {
    /// Opens an existing image read-write. Its length must be a whole number
    /// of blocks.
    pub fn open(path: impl AsRef<Path>) -> DeviceResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_error)?;
        let len = file.metadata().map_err(io_error)?.len();
        if len % BLOCK_SIZE as u64 != 0 {
            log::warn!("{}: length {len} is not a multiple of {BLOCK_SIZE}", path.display());
            return Err(DeviceError::BufferSize);
        }
        log::debug!("opened {} ({} blocks)", path.display(), len / BLOCK_SIZE as u64);
        Ok(Self {
            file,
            block_count: len / BLOCK_SIZE as u64,
        })
    }

    /// Creates (or truncates) an image of `block_count` zeroed blocks.
    pub fn create(path: impl AsRef<Path>, block_count: u64) -> DeviceResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(io_error)?;
        file.set_len(block_count * BLOCK_SIZE as u64)
            .map_err(io_error)?;
        Ok(Self { file, block_count })
    }

    fn seek_to(&mut self, block_id: BlockId, len: usize) -> DeviceResult<()> {
        check_access(block_id, self.block_count, len)?;
        self.file
            .seek(SeekFrom::Start(block_id * BLOCK_SIZE as u64))
            .map_err(io_error)?;
        Ok(())
    }
}

impl BlockDevice for FileDisk {
    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_block(&mut self, block_id: BlockId, buf: &mut [u8]) -> DeviceResult<()> {
        self.seek_to(block_id, buf.len())?;
        self.file.read_exact(buf).map_err(io_error)
    }

    fn write_block(&mut self, block_id: BlockId, buf: &[u8]) -> DeviceResult<()> {
        self.seek_to(block_id, buf.len())?;
        self.file.write_all(buf).map_err(io_error)
    }

    fn flush(&mut self) -> DeviceResult<()> {
        self.file.sync_data().map_err(io_error)
    }
}

fn io_error(err: io::Error) -> DeviceError {
    log::error!("disk image I/O: {err}");
    DeviceError::Io
}
