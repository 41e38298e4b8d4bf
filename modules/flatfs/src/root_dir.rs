//! The single root directory block: 128 packed 32-byte entries.
//!
//! Entry layout: name field at 0 (16 bytes, NUL padded), size at 16 (u32),
//! first data block at 20 (u16), reserved bytes 22..32. An entry whose first
//! name byte is NUL is free.

use flatvfs::{DirEntry, FileName, FsError, FsResult};

use crate::block::{Block, BlockDevice, BlockId};
use crate::config::{BLOCK_SIZE, FILENAME_LEN, ROOT_ENTRY_COUNT};
use crate::fat::FAT_EOC;
use crate::layout::{read_u16, read_u32, write_u16, write_u32};

const ENTRY_SIZE: usize = BLOCK_SIZE / ROOT_ENTRY_COUNT;
const SIZE_OFFSET: usize = FILENAME_LEN;
const FIRST_BLOCK_OFFSET: usize = SIZE_OFFSET + 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootEntry {
    pub name: [u8; FILENAME_LEN],
    pub size: u32,
    pub first_block: u16,
}

impl RootEntry {
    const FREE: Self = Self {
        name: [0; FILENAME_LEN],
        size: 0,
        first_block: 0,
    };

    fn decode(raw: &[u8]) -> Self {
        let mut name = [0u8; FILENAME_LEN];
        name.copy_from_slice(&raw[..FILENAME_LEN]);
        Self {
            name,
            size: read_u32(raw, SIZE_OFFSET),
            first_block: read_u16(raw, FIRST_BLOCK_OFFSET),
        }
    }

    fn encode(&self, raw: &mut [u8]) {
        raw[..FILENAME_LEN].copy_from_slice(&self.name);
        write_u32(raw, SIZE_OFFSET, self.size);
        write_u16(raw, FIRST_BLOCK_OFFSET, self.first_block);
    }

    pub fn is_free(&self) -> bool {
        self.name[0] == 0
    }

    pub fn file_name(&self) -> Option<FileName> {
        FileName::from_field(&self.name)
    }

    fn to_dir_entry(self) -> Option<DirEntry> {
        self.file_name().map(|name| DirEntry {
            name,
            size: self.size,
            first_block: self.first_block,
        })
    }
}

pub struct RootDirectory {
    block_id: BlockId,
    /// Raw block image; reserved bytes of each entry survive a rewrite.
    raw: Block,
    entries: [RootEntry; ROOT_ENTRY_COUNT],
}

impl RootDirectory {
    pub fn load<D: BlockDevice + ?Sized>(device: &mut D, block_id: BlockId) -> FsResult<Self> {
        let mut raw = [0u8; BLOCK_SIZE];
        device.read_block(block_id, &mut raw)?;
        let mut entries = [RootEntry::FREE; ROOT_ENTRY_COUNT];
        for (entry, chunk) in entries.iter_mut().zip(raw.chunks_exact(ENTRY_SIZE)) {
            *entry = RootEntry::decode(chunk);
        }
        Ok(Self {
            block_id,
            raw,
            entries,
        })
    }

    pub fn empty(block_id: BlockId) -> Self {
        Self {
            block_id,
            raw: [0u8; BLOCK_SIZE],
            entries: [RootEntry::FREE; ROOT_ENTRY_COUNT],
        }
    }

    pub fn entry(&self, index: usize) -> &RootEntry {
        &self.entries[index]
    }

    pub(crate) fn entry_mut(&mut self, index: usize) -> &mut RootEntry {
        &mut self.entries[index]
    }

    /// Case-sensitive lookup on the name up to its NUL. Bytes after the
    /// terminator are ignored, as in the listing.
    pub fn find_by_name(&self, name: &FileName) -> FsResult<usize> {
        self.entries
            .iter()
            .position(|entry| entry.file_name().as_ref() == Some(name))
            .ok_or(FsError::NotFound)
    }

    pub fn find_free_slot(&self) -> FsResult<usize> {
        self.entries
            .iter()
            .position(RootEntry::is_free)
            .ok_or(FsError::DirectoryFull)
    }

    /// Adds an empty file and writes the directory block back.
    pub fn create<D: BlockDevice + ?Sized>(
        &mut self,
        device: &mut D,
        name: &str,
    ) -> FsResult<usize> {
        let name = FileName::new(name)?;
        if self.find_by_name(&name).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        let index = self.find_free_slot()?;
        self.entries[index] = RootEntry {
            name: *name.field(),
            size: 0,
            first_block: FAT_EOC,
        };
        self.sync(device)?;
        Ok(index)
    }

    /// Clears entry `index` and writes the directory block back. The caller
    /// releases the chain first.
    pub fn remove<D: BlockDevice + ?Sized>(&mut self, device: &mut D, index: usize) -> FsResult<()> {
        self.entries[index] = RootEntry::FREE;
        self.sync(device)
    }

    pub fn free_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_free()).count()
    }

    /// Live entries in slot order.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            inner: self.entries.iter(),
        }
    }

    /// Indices and records of the live entries.
    pub fn live(&self) -> impl Iterator<Item = (usize, &RootEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_free())
    }

    pub(crate) fn sync<D: BlockDevice + ?Sized>(&mut self, device: &mut D) -> FsResult<()> {
        for (entry, chunk) in self.entries.iter().zip(self.raw.chunks_exact_mut(ENTRY_SIZE)) {
            if entry.is_free() {
                chunk.fill(0);
            } else {
                entry.encode(chunk);
            }
        }
        device.write_block(self.block_id, &self.raw)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct Entries<'a> {
    inner: core::slice::Iter<'a, RootEntry>,
}

impl Iterator for Entries<'_> {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        self.inner.by_ref().find_map(|entry| entry.to_dir_entry())
    }
}
