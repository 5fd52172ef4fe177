//! # Read-Only Block Device
//!
//! `BlockDevice` wraps an APFS image file opened read-only and maps single
//! blocks on demand. Every map is an independent `memmap2::Mmap` view of
//! exactly `block_size` bytes at `block_nr * block_size`.
//!
//! ## Geometry Bootstrap
//!
//! Block size is set by the container superblock, which itself lives in a
//! block. The device therefore opens with the format's minimum geometry
//! (4KiB blocks), which is enough to read the superblock's `block_size`
//! field; the superblock reader then calls [`BlockDevice::set_geometry`]
//! and re-maps block zero at its true size before checksumming it.
//!
//! ## Safety
//!
//! Mapping a file is unsafe because another process could mutate it behind
//! the map. The checker opens the image read-only and assumes exclusive
//! access for the duration of the run, the same contract every offline
//! fsck has.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::{Mmap, MmapOptions};

use crate::ondisk::NX_DEFAULT_BLOCK_SIZE;

#[derive(Debug)]
pub struct BlockDevice {
    file: File,
    block_size: usize,
    block_count: u64,
}

impl BlockDevice {
    /// Opens an image read-only with the provisional 4KiB geometry. The
    /// real geometry is adopted via [`set_geometry`](Self::set_geometry)
    /// once the container superblock has been read.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open image '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        let block_size = NX_DEFAULT_BLOCK_SIZE as usize;

        ensure!(
            file_size >= block_size as u64,
            "image '{}' is smaller than one block",
            path.display()
        );

        Ok(Self {
            file,
            block_size,
            block_count: file_size / block_size as u64,
        })
    }

    /// Adopts the geometry recorded in the container superblock.
    pub fn set_geometry(&mut self, block_size: u32, block_count: u64) -> Result<()> {
        ensure!(
            block_size.is_power_of_two(),
            "block size {} is not a power of two",
            block_size
        );

        let file_size = self.file.metadata()?.len();
        let needed = block_count
            .checked_mul(block_size as u64)
            .ok_or_else(|| eyre::eyre!("block count {} overflows the device", block_count))?;

        ensure!(
            needed <= file_size,
            "superblock claims {} blocks of {} bytes but the image holds {} bytes",
            block_count,
            block_size,
            file_size
        );

        self.block_size = block_size as usize;
        self.block_count = block_count;
        Ok(())
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Maps one block read-only. The returned view unmaps on drop.
    pub fn map_block(&self, block_nr: u64) -> Result<Mmap> {
        ensure!(
            block_nr < self.block_count,
            "block 0x{:x} out of bounds (block_count={})",
            block_nr,
            self.block_count
        );

        let offset = block_nr * self.block_size as u64;

        // SAFETY: Mmap::map is unsafe because the file could be truncated or
        // modified externally while mapped. This is safe because:
        // 1. The image is opened read-only and the checker is the only
        //    intended user for the duration of the run
        // 2. block_nr was bounds-checked above, so offset + block_size is
        //    within the file size recorded at open/set_geometry time
        // 3. The view's lifetime is tied to the returned Mmap, so a dropped
        //    Node cannot leave a dangling reference behind
        let mmap = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(self.block_size)
                .map(&self.file)
                .wrap_err_with(|| format!("failed to map block 0x{:x}", block_nr))?
        };

        Ok(mmap)
    }
}
