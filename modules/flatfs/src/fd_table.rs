//! Open-file table: descriptor slots pointing at root directory entries.

use flatvfs::{Fd, FsError, FsResult, FD_GENERATION_MASK};

use crate::config::MAX_OPEN_FILES;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenFile {
    /// Index into the root directory.
    pub entry: usize,
    pub offset: u32,
}

#[derive(Clone, Copy, Default)]
struct Slot {
    file: Option<OpenFile>,
    generation: u32,
}

pub struct OpenFileTable {
    slots: [Slot; MAX_OPEN_FILES],
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self {
            slots: [Slot::default(); MAX_OPEN_FILES],
        }
    }

    /// Takes the lowest free slot, with the offset at 0.
    pub fn open(&mut self, entry: usize) -> FsResult<Fd> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.file.is_none())
            .ok_or(FsError::TableFull)?;
        slot.file = Some(OpenFile { entry, offset: 0 });
        Ok(Fd::new(index, slot.generation))
    }

    pub fn close(&mut self, fd: Fd) -> FsResult<OpenFile> {
        self.get(fd)?;
        let slot = &mut self.slots[fd.slot()];
        slot.generation = slot.generation.wrapping_add(1) & FD_GENERATION_MASK;
        slot.file.take().ok_or(FsError::InvalidDescriptor)
    }

    pub fn get(&self, fd: Fd) -> FsResult<&OpenFile> {
        match self.slots.get(fd.slot()) {
            Some(Slot {
                file: Some(file),
                generation,
            }) if *generation == fd.generation() => Ok(file),
            _ => Err(FsError::InvalidDescriptor),
        }
    }

    pub fn get_mut(&mut self, fd: Fd) -> FsResult<&mut OpenFile> {
        match self.slots.get_mut(fd.slot()) {
            Some(Slot {
                file: Some(file),
                generation,
            }) if *generation == fd.generation() => Ok(file),
            _ => Err(FsError::InvalidDescriptor),
        }
    }

    /// Whether any descriptor refers to root entry `entry`.
    pub fn is_referenced(&self, entry: usize) -> bool {
        self.open_files().any(|file| file.entry == entry)
    }

    pub fn open_count(&self) -> usize {
        self.open_files().count()
    }

    fn open_files(&self) -> impl Iterator<Item = &OpenFile> + '_ {
        self.slots.iter().filter_map(|slot| slot.file.as_ref())
    }
}

impl Default for OpenFileTable {
    fn default() -> Self {
        Self::new()
    }
}
