#![no_std]

// Shared vocabulary for the flat FAT volume: errors, handles and listing records.
// Kept free of any device or allocator dependency so callers can name results
// without pulling in the engine.

use core::fmt;

/// Size of the on-disk filename field, NUL terminator included.
pub const FILENAME_LEN: usize = 16;
/// Longest usable filename in bytes.
pub const MAX_NAME_LEN: usize = FILENAME_LEN - 1;

/// Failure reported by a block device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("block {block_id} is out of range (device has {block_count} blocks)")]
    OutOfRange { block_id: u64, block_count: u64 },
    #[error("buffer length does not match the device block size")]
    BufferSize,
    #[error("device I/O failure")]
    Io,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("no volume is mounted")]
    NotMounted,
    #[error("a volume is already mounted")]
    AlreadyMounted,
    #[error("volume signature does not match")]
    SignatureMismatch,
    #[error("volume geometry does not match the device")]
    GeometryMismatch,
    #[error("invalid filename")]
    InvalidName,
    #[error("file already exists")]
    AlreadyExists,
    #[error("file not found")]
    NotFound,
    #[error("root directory is full")]
    DirectoryFull,
    #[error("file is open")]
    InUse,
    #[error("invalid file descriptor")]
    InvalidDescriptor,
    #[error("open-file table is full")]
    TableFull,
    #[error("no free data block")]
    OutOfSpace,
    #[error("offset is past the end of the file")]
    InvalidOffset,
    #[error("block chain is shorter than requested")]
    ChainOutOfRange,
    #[error("file allocation table is corrupted")]
    Corrupted,
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

pub type FsResult<T> = core::result::Result<T, FsError>;

/// A validated filename, stored the way the directory stores it: a
/// zero-padded 16-byte field.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileName {
    field: [u8; FILENAME_LEN],
    len: u8,
}

impl FileName {
    pub fn new(name: &str) -> FsResult<Self> {
        Self::from_bytes(name.as_bytes())
    }

    /// Accepts 1..=15 bytes without an interior NUL, so the name always stays
    /// NUL-terminated inside the field.
    pub fn from_bytes(name: &[u8]) -> FsResult<Self> {
        if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains(&0) {
            return Err(FsError::InvalidName);
        }
        let mut field = [0u8; FILENAME_LEN];
        field[..name.len()].copy_from_slice(name);
        Ok(Self {
            field,
            len: name.len() as u8,
        })
    }

    /// Decodes an on-disk field. An empty first byte marks an unused slot.
    pub fn from_field(field: &[u8; FILENAME_LEN]) -> Option<Self> {
        if field[0] == 0 {
            return None;
        }
        let len = field.iter().position(|&b| b == 0).unwrap_or(FILENAME_LEN);
        let mut copy = [0u8; FILENAME_LEN];
        copy[..len].copy_from_slice(&field[..len]);
        Some(Self {
            field: copy,
            len: len as u8,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.field[..self.len as usize]
    }

    pub fn field(&self) -> &[u8; FILENAME_LEN] {
        &self.field
    }

}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in self.as_bytes().utf8_chunks() {
            f.write_str(chunk.valid())?;
            if !chunk.invalid().is_empty() {
                f.write_str("\u{fffd}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileName(\"{self}\")")
    }
}

const FD_SLOT_BITS: u32 = 8;
const FD_SLOT_MASK: u32 = (1 << FD_SLOT_BITS) - 1;
pub const FD_GENERATION_MASK: u32 = u32::MAX >> FD_SLOT_BITS;

/// Open-file handle: a table slot plus the slot's generation at open time.
///
/// Closing a descriptor bumps its slot's generation, so a handle kept after
/// `close` stops resolving instead of aliasing whichever file reuses the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fd(u32);

impl Fd {
    pub const fn new(slot: usize, generation: u32) -> Self {
        Self(((generation & FD_GENERATION_MASK) << FD_SLOT_BITS) | (slot as u32 & FD_SLOT_MASK))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn into_raw(self) -> u32 {
        self.0
    }

    pub const fn slot(self) -> usize {
        (self.0 & FD_SLOT_MASK) as usize
    }

    pub const fn generation(self) -> u32 {
        self.0 >> FD_SLOT_BITS
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One live root-directory entry, as produced by a listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: FileName,
    pub size: u32,
    pub first_block: u16,
}

impl fmt::Display for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file: {}, size: {}, data_blk: {}",
            self.name, self.size, self.first_block
        )
    }
}

/// Geometry and occupancy snapshot of a mounted volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeInfo {
    pub total_blocks: u16,
    pub fat_blocks: u8,
    pub root_block: u16,
    pub data_start: u16,
    pub data_blocks: u16,
    pub free_data_blocks: usize,
    pub free_root_entries: usize,
    pub root_entries: usize,
}

impl VolumeInfo {
    pub fn free_fat_ratio(&self) -> (usize, usize) {
        (self.free_data_blocks, self.data_blocks as usize)
    }

    pub fn free_root_ratio(&self) -> (usize, usize) {
        (self.free_root_entries, self.root_entries)
    }
}

impl fmt::Display for VolumeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fat_free, fat_total) = self.free_fat_ratio();
        let (root_free, root_total) = self.free_root_ratio();
        writeln!(f, "FS Info:")?;
        writeln!(f, "total_blk_count={}", self.total_blocks)?;
        writeln!(f, "fat_blk_count={}", self.fat_blocks)?;
        writeln!(f, "rdir_blk={}", self.root_block)?;
        writeln!(f, "data_blk={}", self.data_start)?;
        writeln!(f, "data_blk_count={}", self.data_blocks)?;
        writeln!(f, "fat_free_ratio={fat_free}/{fat_total}")?;
        write!(f, "rdir_free_ratio={root_free}/{root_total}")
    }
}
