//! Compile-time limits of the on-disk format and the open-file table.

use crate::block::BlockId;

pub use flatvfs::FILENAME_LEN;

/// Size of every device block, in bytes.
pub const BLOCK_SIZE: usize = 4096;
/// Magic at the start of the superblock.
pub const SIGNATURE: &[u8; 8] = b"ECS150FS";
/// Maximum number of concurrently open descriptors.
pub const MAX_OPEN_FILES: usize = 32;
/// Number of fixed-size entries in the root directory block.
pub const ROOT_ENTRY_COUNT: usize = 128;
/// Largest data area the formatter will lay out (four FAT blocks).
pub const MAX_DATA_BLOCKS: usize = 8192;
/// Block holding the superblock.
pub const SUPERBLOCK_ID: BlockId = 0;
/// First FAT block; the table is contiguous from here.
pub const FAT_START: BlockId = 1;
