//! # Container Bring-Up
//!
//! The checker reaches the trees through two superblocks. Block zero holds
//! the container superblock, which fixes the block geometry and names the
//! container's object map and its volumes. Each volume superblock is a
//! virtual object resolved through the container omap and names the
//! volume's own omap and catalog root.
//!
//! ```text
//! block 0 (NXSB)
//!   ├── nx_omap_oid ──────> container omap ──┐
//!   └── nx_fs_oid[i] ── resolved through ────┘
//!                              │
//!                              ▼
//!                      volume superblock (APSB)
//!                        ├── apfs_omap_oid ──────> volume omap
//!                        └── apfs_root_tree_oid ─> catalog tree
//!                                                  (children resolved
//!                                                   through volume omap)
//! ```
//!
//! ## Geometry Bootstrap
//!
//! The device opens with the format's minimum 4KiB geometry, enough to
//! read the superblock's `nx_block_size`; the device then adopts the real
//! geometry and block zero is re-mapped at full size before its checksum
//! is verified.

use std::path::Path;
use std::rc::Rc;

use eyre::{ensure, Result};
use tracing::{debug, info};

use crate::btree::{omap_lookup, Btree};
use crate::checksum::verify_object_checksum;
use crate::ondisk::{
    ApfsSuperblock, NxSuperblock, NX_BLOCK_NUM, NX_MAXIMUM_BLOCK_SIZE, NX_MAX_FILE_SYSTEMS,
    NX_MINIMUM_BLOCK_SIZE, OID_NX_SUPERBLOCK,
};
use crate::storage::BlockDevice;

/// An opened container: the device plus the tree oids recorded in block
/// zero. The device is owned here for the whole run.
#[derive(Debug)]
pub struct Container {
    device: BlockDevice,
    block_size: u32,
    block_count: u64,
    omap_oid: u64,
    fs_oids: Vec<u64>,
}

impl Container {
    /// Opens an image and validates its container superblock.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut device = BlockDevice::open(path)?;

        // First pass under the provisional geometry: learn the real one.
        let (block_size, block_count) = {
            let raw = device.map_block(NX_BLOCK_NUM)?;
            let sb = NxSuperblock::from_bytes(&raw)?;
            (sb.block_size(), sb.block_count())
        };
        ensure!(
            (NX_MINIMUM_BLOCK_SIZE..=NX_MAXIMUM_BLOCK_SIZE).contains(&block_size),
            "unsupported block size {}",
            block_size
        );
        ensure!(block_count >= 1, "container superblock claims no blocks");
        device.set_geometry(block_size, block_count)?;

        // Second pass at full block size: the checksum covers the whole
        // block, so it can only be verified now.
        let raw = device.map_block(NX_BLOCK_NUM)?;
        verify_object_checksum(&raw, NX_BLOCK_NUM)
            .map_err(|e| e.wrap_err("bad checksum for container superblock"))?;
        let sb = NxSuperblock::from_bytes(&raw)?;
        ensure!(
            sb.object().oid() == OID_NX_SUPERBLOCK,
            "wrong object id on container superblock"
        );

        let omap_oid = sb.omap_oid();
        ensure!(omap_oid != 0, "container superblock names no object map");

        let fs_oids: Vec<u64> = (0..NX_MAX_FILE_SYSTEMS)
            .map(|i| sb.fs_oid(i))
            .filter(|&oid| oid != 0)
            .collect();

        debug!(
            block_size,
            block_count,
            volumes = fs_oids.len(),
            "container superblock verified"
        );
        drop(raw);

        Ok(Self {
            device,
            block_size,
            block_count,
            omap_oid,
            fs_oids,
        })
    }

    pub fn device(&self) -> &BlockDevice {
        &self.device
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    pub fn omap_oid(&self) -> u64 {
        self.omap_oid
    }

    pub fn volume_count(&self) -> usize {
        self.fs_oids.len()
    }

    /// Verifies the container omap and every volume it names: each
    /// volume's superblock, omap and catalog tree. Returns the number of
    /// volumes checked.
    pub fn check(&self) -> Result<usize> {
        let container_omap = Btree::open_omap(&self.device, self.omap_oid)?;

        for (index, &fs_oid) in self.fs_oids.iter().enumerate() {
            self.check_volume(index, fs_oid, &container_omap)?;
        }

        Ok(self.fs_oids.len())
    }

    fn check_volume(&self, index: usize, fs_oid: u64, container_omap: &Btree<'_>) -> Result<()> {
        let bno = omap_lookup(&self.device, container_omap.root(), fs_oid)?;

        let raw = self.device.map_block(bno)?;
        verify_object_checksum(&raw, bno)
            .map_err(|e| e.wrap_err("bad checksum for volume superblock"))?;
        let vsb = ApfsSuperblock::from_bytes(&raw)?;
        ensure!(
            vsb.object().oid() == fs_oid,
            "wrong object id on volume superblock in block 0x{:x}",
            bno
        );
        let omap_oid = vsb.omap_oid();
        let root_tree_oid = vsb.root_tree_oid();
        drop(raw);

        let volume_omap = Btree::open_omap(&self.device, omap_oid)?;
        let _catalog =
            Btree::open_catalog(&self.device, root_tree_oid, Rc::clone(volume_omap.root()))?;

        info!(volume = index, oid = fs_oid, "volume verified");
        Ok(())
    }
}
