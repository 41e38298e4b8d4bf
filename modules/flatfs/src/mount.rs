//! Holder for at most one mounted volume.

use flatvfs::{FsError, FsResult};

use crate::block::BlockDevice;
use crate::volume::Volume;

pub struct MountSlot<D: BlockDevice> {
    volume: Option<Volume<D>>,
}

impl<D: BlockDevice> MountSlot<D> {
    pub const fn new() -> Self {
        Self { volume: None }
    }

    pub fn mount(&mut self, device: D) -> FsResult<()> {
        if self.volume.is_some() {
            return Err(FsError::AlreadyMounted);
        }
        self.volume = Some(Volume::mount(device)?);
        Ok(())
    }

    /// Unmounts and returns the device. Refused while files are open.
    pub fn unmount(&mut self) -> FsResult<D> {
        let volume = self.volume.as_ref().ok_or(FsError::NotMounted)?;
        if volume.open_count() > 0 {
            log::warn!("unmount: {} files still open", volume.open_count());
            return Err(FsError::InUse);
        }
        match self.volume.take() {
            Some(volume) => volume.unmount(),
            None => Err(FsError::NotMounted),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    pub fn volume(&self) -> FsResult<&Volume<D>> {
        self.volume.as_ref().ok_or(FsError::NotMounted)
    }

    pub fn volume_mut(&mut self) -> FsResult<&mut Volume<D>> {
        self.volume.as_mut().ok_or(FsError::NotMounted)
    }
}

impl<D: BlockDevice> Default for MountSlot<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl MountSlot<crate::file_disk::FileDisk> {
    /// Opens the disk image at `path` and mounts it.
    pub fn mount_path(&mut self, path: impl AsRef<std::path::Path>) -> FsResult<()> {
        if self.volume.is_some() {
            return Err(FsError::AlreadyMounted);
        }
        let disk = crate::file_disk::FileDisk::open(path)?;
        self.mount(disk)
    }
}
