//! A mounted volume: the superblock, FAT, root directory and open-file table
//! over one block device, plus the byte-level read/write engine.

use core::cmp;

use flatvfs::{Fd, FileName, FsError, FsResult, VolumeInfo};

use crate::block::BlockDevice;
use crate::config::{BLOCK_SIZE, ROOT_ENTRY_COUNT, SUPERBLOCK_ID};
use crate::fat::{Fat, FAT_EOC};
use crate::fd_table::OpenFileTable;
use crate::layout::Superblock;
use crate::root_dir::{Entries, RootDirectory, RootEntry};

pub struct Volume<D: BlockDevice> {
    device: D,
    superblock: Superblock,
    fat: Fat,
    root: RootDirectory,
    files: OpenFileTable,
}

impl<D: BlockDevice> Volume<D> {
    /// Reads and validates the superblock, then loads the FAT and the root
    /// directory into memory.
    pub fn mount(mut device: D) -> FsResult<Self> {
        if device.block_size() != BLOCK_SIZE {
            log::warn!(
                "mount: device block size {} is not {BLOCK_SIZE}",
                device.block_size()
            );
            return Err(FsError::GeometryMismatch);
        }
        let mut block = [0u8; BLOCK_SIZE];
        device.read_block(SUPERBLOCK_ID, &mut block)?;
        let superblock = Superblock::parse(&block)?;
        if let Err(err) = superblock.validate(device.block_count()) {
            log::warn!(
                "mount: superblock {superblock:?} does not fit a {}-block device",
                device.block_count()
            );
            return Err(err);
        }
        let fat = Fat::load(&mut device, &superblock)?;
        let root = RootDirectory::load(&mut device, superblock.root_block_id())?;
        log::info!(
            "mounted volume: {} blocks, {} data blocks, {} FAT blocks",
            superblock.total_blocks,
            superblock.data_blocks,
            superblock.fat_blocks
        );
        Ok(Self {
            device,
            superblock,
            fat,
            root,
            files: OpenFileTable::new(),
        })
    }

    /// Flushes the device and hands it back. Metadata is written through on
    /// every mutation, so there is nothing else to persist.
    pub fn unmount(mut self) -> FsResult<D> {
        if self.files.open_count() > 0 {
            log::debug!("unmount: dropping {} open descriptors", self.files.open_count());
        }
        self.device.flush()?;
        log::info!("unmounted volume");
        Ok(self.device)
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn open_count(&self) -> usize {
        self.files.open_count()
    }

    pub fn info(&self) -> VolumeInfo {
        let sb = &self.superblock;
        VolumeInfo {
            total_blocks: sb.total_blocks,
            fat_blocks: sb.fat_blocks,
            root_block: sb.root_block,
            data_start: sb.data_start,
            data_blocks: sb.data_blocks,
            free_data_blocks: self.fat.free_count(),
            free_root_entries: self.root.free_count(),
            root_entries: ROOT_ENTRY_COUNT,
        }
    }

    /// Live files in directory order. The iterator borrows the volume and can
    /// be cloned to walk the listing again.
    pub fn list(&self) -> Entries<'_> {
        self.root.entries()
    }

    pub fn create(&mut self, name: &str) -> FsResult<()> {
        let index = self.root.create(&mut self.device, name)?;
        log::debug!("create {name:?} in slot {index}");
        Ok(())
    }

    /// Removes a file and releases its blocks. Open files cannot be deleted.
    pub fn delete(&mut self, name: &str) -> FsResult<()> {
        let index = self.lookup(name)?;
        if self.files.is_referenced(index) {
            log::warn!("delete {name:?}: file is open");
            return Err(FsError::InUse);
        }
        let first = self.root.entry(index).first_block;
        let freed = self.fat.free_chain(&mut self.device, first)?;
        self.root.remove(&mut self.device, index)?;
        log::debug!("delete {name:?}: released {freed} blocks");
        Ok(())
    }

    pub fn open(&mut self, name: &str) -> FsResult<Fd> {
        let index = self.lookup(name)?;
        let fd = self.files.open(index)?;
        log::debug!("open {name:?} as fd {fd}");
        Ok(fd)
    }

    pub fn close(&mut self, fd: Fd) -> FsResult<()> {
        self.files.close(fd)?;
        log::debug!("close fd {fd}");
        Ok(())
    }

    /// Current size of the open file.
    pub fn stat(&self, fd: Fd) -> FsResult<u32> {
        let file = self.files.get(fd)?;
        Ok(self.root.entry(file.entry).size)
    }

    pub fn stat_name(&self, name: &str) -> FsResult<u32> {
        let index = self.lookup(name)?;
        Ok(self.root.entry(index).size)
    }

    pub fn tell(&self, fd: Fd) -> FsResult<u32> {
        Ok(self.files.get(fd)?.offset)
    }

    /// Moves the cursor. Files only grow through `write`, so the offset may
    /// not pass the current size.
    pub fn seek(&mut self, fd: Fd, offset: u32) -> FsResult<()> {
        let entry = self.files.get(fd)?.entry;
        if offset > self.root.entry(entry).size {
            return Err(FsError::InvalidOffset);
        }
        self.files.get_mut(fd)?.offset = offset;
        Ok(())
    }

    /// Reads from the cursor into `buf`, stopping at end of file.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> FsResult<usize> {
        let file = *self.files.get(fd)?;
        let entry = *self.root.entry(file.entry);
        let offset = file.offset as usize;
        let size = entry.size as usize;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let count = cmp::min(buf.len(), size - offset);
        let mut block = self.fat.chain_block_at(entry.first_block, offset / BLOCK_SIZE)?;
        let mut in_block = offset % BLOCK_SIZE;
        let mut bounce = [0u8; BLOCK_SIZE];
        let mut done = 0usize;
        while done < count {
            let chunk = cmp::min(count - done, BLOCK_SIZE - in_block);
            let block_id = self.superblock.data_block_id(block);
            if chunk == BLOCK_SIZE {
                self.device.read_block(block_id, &mut buf[done..done + chunk])?;
            } else {
                self.device.read_block(block_id, &mut bounce)?;
                buf[done..done + chunk].copy_from_slice(&bounce[in_block..in_block + chunk]);
            }
            done += chunk;
            in_block = 0;
            if done < count {
                block = self.fat.next_block(block)?.ok_or(FsError::Corrupted)?;
            }
        }
        self.files.get_mut(fd)?.offset = (offset + done) as u32;
        Ok(done)
    }

    /// Writes `data` at the cursor, growing the chain as needed.
    ///
    /// Running out of data blocks ends the write early and the short count is
    /// returned; bytes already written stay in the file. A device failure
    /// returns the error, but the size and the cursor still cover what was
    /// written before it.
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> FsResult<usize> {
        let file = *self.files.get(fd)?;
        if data.is_empty() {
            return Ok(0);
        }
        let original = *self.root.entry(file.entry);
        let mut entry = original;
        let offset = file.offset as usize;
        let mut done = 0usize;
        let result = self.write_chain(&mut entry, offset, data, &mut done);

        let end = (offset + done) as u32;
        entry.size = cmp::max(entry.size, end);
        self.files.get_mut(fd)?.offset = end;
        if entry != original {
            *self.root.entry_mut(file.entry) = entry;
            let synced = self.root.sync(&mut self.device);
            result?;
            synced?;
        }
        result?;
        if done < data.len() {
            log::warn!("write fd {fd}: short write, {done} of {} bytes", data.len());
        }
        Ok(done)
    }

    /// Copies `data` into the chain block by block starting at `offset`,
    /// counting committed bytes in `done`. Allocation failure stops the loop
    /// without an error.
    fn write_chain(
        &mut self,
        entry: &mut RootEntry,
        offset: usize,
        data: &[u8],
        done: &mut usize,
    ) -> FsResult<()> {
        let logical = offset / BLOCK_SIZE;
        let mut in_block = offset % BLOCK_SIZE;
        let (mut prev, mut next) = if logical == 0 {
            (None, (entry.first_block != FAT_EOC).then_some(entry.first_block))
        } else {
            let prev = self.fat.chain_block_at(entry.first_block, logical - 1)?;
            (Some(prev), self.fat.next_block(prev)?)
        };
        let mut bounce = [0u8; BLOCK_SIZE];
        while *done < data.len() {
            let (block, fresh) = match next {
                Some(block) => (block, false),
                None => match self.fat.allocate_chain_extend(&mut self.device, prev) {
                    Ok(block) => {
                        if prev.is_none() {
                            entry.first_block = block;
                        }
                        log::debug!("grow chain: data block {block} after {prev:?}");
                        (block, true)
                    }
                    Err(FsError::OutOfSpace) => return Ok(()),
                    Err(err) => return Err(err),
                },
            };
            let chunk = cmp::min(data.len() - *done, BLOCK_SIZE - in_block);
            let src = &data[*done..*done + chunk];
            let block_id = self.superblock.data_block_id(block);
            if chunk == BLOCK_SIZE {
                self.device.write_block(block_id, src)?;
            } else {
                if fresh {
                    bounce.fill(0);
                } else {
                    self.device.read_block(block_id, &mut bounce)?;
                }
                bounce[in_block..in_block + chunk].copy_from_slice(src);
                self.device.write_block(block_id, &bounce)?;
            }
            *done += chunk;
            in_block = 0;
            prev = Some(block);
            if *done < data.len() {
                next = self.fat.next_block(block)?;
            }
        }
        Ok(())
    }

    /// Verifies that every file's chain matches its size and that every data
    /// block is either free, reserved, or owned by exactly one chain.
    pub fn check(&self) -> FsResult<()> {
        let mut reachable = 0usize;
        for (index, entry) in self.root.live() {
            let blocks = self.fat.chain_len(entry.first_block)?;
            let expected = (entry.size as usize).div_ceil(BLOCK_SIZE);
            if blocks != expected {
                log::error!(
                    "check: slot {index} has {blocks} blocks for {} bytes",
                    entry.size
                );
                return Err(FsError::Corrupted);
            }
            reachable += blocks;
        }
        let free = self.fat.free_count();
        if free + reachable + 1 != self.fat.data_blocks() {
            log::error!(
                "check: {free} free + {reachable} used + 1 reserved != {} data blocks",
                self.fat.data_blocks()
            );
            return Err(FsError::Corrupted);
        }
        Ok(())
    }

    /// A name that could never be created cannot exist either, so it is
    /// reported as `NotFound`.
    fn lookup(&self, name: &str) -> FsResult<usize> {
        let name = FileName::new(name).map_err(|_| FsError::NotFound)?;
        self.root.find_by_name(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockId, DeviceResult, MemDisk};
    use flatvfs::DeviceError;
    use std::vec;
    use std::vec::Vec;

    fn mounted(data_blocks: usize) -> Volume<MemDisk> {
        Volume::mount(MemDisk::formatted(data_blocks).unwrap()).unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn chain_len(vol: &Volume<MemDisk>, name: &str) -> usize {
        let index = vol.lookup(name).unwrap();
        vol.fat.chain_len(vol.root.entry(index).first_block).unwrap()
    }

    /// Fails every write once `budget` writes have gone through.
    struct FlakyDisk {
        inner: MemDisk,
        budget: usize,
    }

    impl BlockDevice for FlakyDisk {
        fn block_count(&self) -> u64 {
            self.inner.block_count()
        }

        fn read_block(&mut self, block_id: BlockId, buf: &mut [u8]) -> DeviceResult<()> {
            self.inner.read_block(block_id, buf)
        }

        fn write_block(&mut self, block_id: BlockId, buf: &[u8]) -> DeviceResult<()> {
            if self.budget == 0 {
                return Err(DeviceError::Io);
            }
            self.budget -= 1;
            self.inner.write_block(block_id, buf)
        }
    }

    #[test]
    fn mount_rejects_unformatted_device() {
        assert_eq!(
            Volume::mount(MemDisk::new(8)).err(),
            Some(FsError::SignatureMismatch)
        );
    }

    #[test]
    fn mount_rejects_size_mismatch() {
        let mut image = MemDisk::formatted(100).unwrap().into_image();
        image.extend_from_slice(&[0u8; BLOCK_SIZE]);
        let disk = MemDisk::from_image(image).unwrap();
        assert_eq!(Volume::mount(disk).err(), Some(FsError::GeometryMismatch));
    }

    #[test]
    fn fresh_volume_info() {
        let vol = mounted(8192);
        let info = vol.info();
        assert_eq!(info.total_blocks, 8198);
        assert_eq!(info.fat_blocks, 4);
        assert_eq!(info.root_block, 5);
        assert_eq!(info.data_start, 6);
        assert_eq!(info.free_fat_ratio(), (8191, 8192));
        assert_eq!(info.free_root_ratio(), (128, 128));
        assert_eq!(vol.list().count(), 0);
        vol.check().unwrap();
    }

    #[test]
    fn write_then_read_past_block_boundary() {
        let mut vol = mounted(8192);
        vol.create("a.txt").unwrap();
        let fd = vol.open("a.txt").unwrap();
        assert_eq!(vol.write(fd, &[0xab; 5000]).unwrap(), 5000);
        assert_eq!(vol.stat(fd).unwrap(), 5000);
        assert_eq!(chain_len(&vol, "a.txt"), 2);

        vol.seek(fd, 4090).unwrap();
        let mut buf = [0u8; 20];
        assert_eq!(vol.read(fd, &mut buf).unwrap(), 6);
        assert_eq!(buf[..6], [0xab; 6]);
        assert_eq!(vol.tell(fd).unwrap(), 5000);
        assert_eq!(vol.read(fd, &mut buf).unwrap(), 0);
        vol.check().unwrap();
    }

    #[test]
    fn round_trip_sizes() {
        let mut vol = mounted(64);
        for (i, len) in [0, 1, BLOCK_SIZE - 1, BLOCK_SIZE, BLOCK_SIZE + 1, 5 * BLOCK_SIZE + 17]
            .into_iter()
            .enumerate()
        {
            let name = std::format!("f{i}");
            let data = pattern(len);
            vol.create(&name).unwrap();
            let fd = vol.open(&name).unwrap();
            assert_eq!(vol.write(fd, &data).unwrap(), len);
            vol.seek(fd, 0).unwrap();
            let mut back = vec![0u8; len + 8];
            assert_eq!(vol.read(fd, &mut back).unwrap(), len);
            assert_eq!(back[..len], data[..]);
            assert_eq!(chain_len(&vol, &name), len.div_ceil(BLOCK_SIZE));
            vol.close(fd).unwrap();
        }
        vol.check().unwrap();
    }

    #[test]
    fn empty_file_keeps_eoc_pointer() {
        let mut vol = mounted(16);
        vol.create("empty").unwrap();
        let fd = vol.open("empty").unwrap();
        assert_eq!(vol.write(fd, &[]).unwrap(), 0);
        let entry = vol.list().next().unwrap();
        assert_eq!(entry.size, 0);
        assert_eq!(entry.first_block, FAT_EOC);
        assert_eq!(vol.info().free_data_blocks, 15);
    }

    #[test]
    fn overwrite_preserves_surrounding_bytes() {
        let mut vol = mounted(16);
        vol.create("f").unwrap();
        let fd = vol.open("f").unwrap();
        let data = pattern(3 * BLOCK_SIZE);
        vol.write(fd, &data).unwrap();

        vol.seek(fd, BLOCK_SIZE as u32 - 10).unwrap();
        assert_eq!(vol.write(fd, &[0xee; 20]).unwrap(), 20);
        assert_eq!(vol.stat(fd).unwrap(), 3 * BLOCK_SIZE as u32);
        assert_eq!(chain_len(&vol, "f"), 3);

        vol.seek(fd, 0).unwrap();
        let mut back = vec![0u8; 3 * BLOCK_SIZE];
        vol.read(fd, &mut back).unwrap();
        let mut expected = data.clone();
        expected[BLOCK_SIZE - 10..BLOCK_SIZE + 10].fill(0xee);
        assert_eq!(back, expected);
    }

    #[test]
    fn appends_grow_size() {
        let mut vol = mounted(16);
        vol.create("log").unwrap();
        let fd = vol.open("log").unwrap();
        let mut expected = Vec::new();
        for chunk in [100usize, BLOCK_SIZE - 100, 1, 3000, 5000] {
            let data = pattern(chunk);
            assert_eq!(vol.write(fd, &data).unwrap(), chunk);
            expected.extend_from_slice(&data);
            assert_eq!(vol.stat(fd).unwrap() as usize, expected.len());
        }
        let other = vol.open("log").unwrap();
        let mut back = vec![0u8; expected.len()];
        assert_eq!(vol.read(other, &mut back).unwrap(), expected.len());
        assert_eq!(back, expected);
        vol.check().unwrap();
    }

    #[test]
    fn exhaustion_returns_short_count() {
        let mut vol = mounted(4);
        vol.create("big").unwrap();
        let fd = vol.open("big").unwrap();
        let data = pattern(5 * BLOCK_SIZE);
        assert_eq!(vol.write(fd, &data).unwrap(), 3 * BLOCK_SIZE);
        assert_eq!(vol.write(fd, &data).unwrap(), 0);
        assert_eq!(vol.info().free_data_blocks, 0);

        vol.seek(fd, 0).unwrap();
        let mut back = vec![0u8; 3 * BLOCK_SIZE];
        assert_eq!(vol.read(fd, &mut back).unwrap(), 3 * BLOCK_SIZE);
        assert_eq!(back[..], data[..3 * BLOCK_SIZE]);
        vol.check().unwrap();
    }

    #[test]
    fn delete_releases_blocks() {
        let mut vol = mounted(16);
        vol.create("f").unwrap();
        let fd = vol.open("f").unwrap();
        vol.write(fd, &pattern(2 * BLOCK_SIZE + 1)).unwrap();
        assert_eq!(vol.delete("f"), Err(FsError::InUse));
        vol.close(fd).unwrap();
        assert_eq!(vol.info().free_data_blocks, 12);
        vol.delete("f").unwrap();
        assert_eq!(vol.info().free_data_blocks, 15);
        assert_eq!(vol.delete("f"), Err(FsError::NotFound));
        assert_eq!(vol.delete("missing"), Err(FsError::NotFound));
        vol.check().unwrap();
    }

    #[test]
    fn recreate_reuses_slot() {
        let mut vol = mounted(16);
        vol.create("x").unwrap();
        vol.create("y").unwrap();
        let fd = vol.open("x").unwrap();
        vol.write(fd, b"hello").unwrap();
        vol.close(fd).unwrap();
        vol.delete("x").unwrap();
        vol.create("x").unwrap();
        let entries: Vec<_> = vol.list().collect();
        assert_eq!(entries[0].name.as_bytes(), b"x");
        assert_eq!(entries[0].size, 0);
        assert_eq!(entries[0].first_block, FAT_EOC);
        assert_eq!(entries[1].name.as_bytes(), b"y");
    }

    #[test]
    fn descriptor_errors() {
        let mut vol = mounted(16);
        assert_eq!(vol.open("nope"), Err(FsError::NotFound));
        assert_eq!(vol.open(""), Err(FsError::NotFound));
        vol.create("f").unwrap();
        let fd = vol.open("f").unwrap();
        vol.write(fd, b"abc").unwrap();
        assert_eq!(vol.seek(fd, 4), Err(FsError::InvalidOffset));
        vol.seek(fd, 3).unwrap();
        vol.close(fd).unwrap();
        assert_eq!(vol.stat(fd), Err(FsError::InvalidDescriptor));
        assert_eq!(vol.close(fd), Err(FsError::InvalidDescriptor));

        let reused = vol.open("f").unwrap();
        assert_eq!(reused.slot(), fd.slot());
        assert_eq!(vol.write(fd, b"zz"), Err(FsError::InvalidDescriptor));
        assert_eq!(vol.stat(reused).unwrap(), 3);
    }

    #[test]
    fn list_is_restartable() {
        let mut vol = mounted(16);
        for name in ["a", "b", "c"] {
            vol.create(name).unwrap();
        }
        let listing = vol.list();
        assert_eq!(listing.clone().count(), 3);
        let names: Vec<_> = listing.map(|e| std::format!("{e}")).collect();
        assert_eq!(names[0], "file: a, size: 0, data_blk: 65535");
    }

    #[test]
    fn contents_survive_remount() {
        let mut vol = mounted(16);
        vol.create("keep").unwrap();
        let fd = vol.open("keep").unwrap();
        let data = pattern(BLOCK_SIZE + 300);
        vol.write(fd, &data).unwrap();
        vol.close(fd).unwrap();
        let disk = vol.unmount().unwrap();

        let mut vol = Volume::mount(disk).unwrap();
        assert_eq!(vol.stat_name("keep").unwrap(), data.len() as u32);
        let fd = vol.open("keep").unwrap();
        let mut back = vec![0u8; data.len()];
        vol.read(fd, &mut back).unwrap();
        assert_eq!(back, data);
        vol.check().unwrap();
    }

    #[test]
    fn device_failure_mid_write_propagates() {
        let disk = MemDisk::formatted(16).unwrap();
        let mut vol = Volume::mount(FlakyDisk {
            inner: disk,
            budget: usize::MAX,
        })
        .unwrap();
        vol.create("f").unwrap();
        let fd = vol.open("f").unwrap();
        // FAT update, data block, FAT update, then the second data block fails.
        vol.device.budget = 3;
        let result = vol.write(fd, &pattern(2 * BLOCK_SIZE));
        assert_eq!(result, Err(FsError::Device(DeviceError::Io)));
        vol.device.budget = usize::MAX;
        assert_eq!(vol.stat(fd).unwrap(), BLOCK_SIZE as u32);
        assert_eq!(vol.tell(fd).unwrap(), BLOCK_SIZE as u32);
    }

    #[test]
    fn device_failure_on_directory_sync_still_moves_cursor() {
        let disk = MemDisk::formatted(16).unwrap();
        let mut vol = Volume::mount(FlakyDisk {
            inner: disk,
            budget: usize::MAX,
        })
        .unwrap();
        vol.create("f").unwrap();
        let fd = vol.open("f").unwrap();
        // FAT update and data block succeed, the directory write fails.
        vol.device.budget = 2;
        assert_eq!(vol.write(fd, b"abc"), Err(FsError::Device(DeviceError::Io)));
        vol.device.budget = usize::MAX;
        assert_eq!(vol.stat(fd).unwrap(), 3);
        assert_eq!(vol.tell(fd).unwrap(), 3);
    }

    #[test]
    fn invalid_names_are_never_found() {
        let mut vol = mounted(16);
        assert_eq!(vol.delete("0123456789abcdef"), Err(FsError::NotFound));
        assert_eq!(vol.delete(""), Err(FsError::NotFound));
        assert_eq!(vol.open("a\0b"), Err(FsError::NotFound));
        assert_eq!(vol.stat_name("0123456789abcdef"), Err(FsError::NotFound));
        assert_eq!(vol.create("0123456789abcdef"), Err(FsError::InvalidName));
    }

    #[test]
    fn check_detects_size_mismatch() {
        let mut vol = mounted(16);
        vol.create("f").unwrap();
        let fd = vol.open("f").unwrap();
        vol.write(fd, &pattern(10)).unwrap();
        vol.root.entry_mut(0).size = BLOCK_SIZE as u32 + 1;
        assert_eq!(vol.check(), Err(FsError::Corrupted));
    }
}
