#![no_std]

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod block;
pub mod config;
pub mod fat;
pub mod fd_table;
#[cfg(feature = "std")]
pub mod file_disk;
pub mod layout;
pub mod mkfs;
pub mod mount;
pub mod root_dir;
pub mod volume;

pub use block::{Block, BlockDevice, BlockId, DeviceResult, MemDisk};
pub use config::BLOCK_SIZE;
#[cfg(feature = "std")]
pub use file_disk::FileDisk;
pub use flatvfs::{DeviceError, DirEntry, Fd, FileName, FsError, FsResult, VolumeInfo};
pub use layout::Superblock;
pub use mkfs::{format, format_device};
pub use mount::MountSlot;
pub use volume::Volume;
