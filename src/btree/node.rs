//! # B-Tree Node Loading and Record Location
//!
//! A [`Node`] is an in-memory descriptor over one mapped block. Loading
//! decodes the node header, computes the intra-block area offsets, verifies
//! the object checksum and rejects structurally insane headers before any
//! record is touched. Without those checks a crafted image could claim more
//! records than the locator table holds and walk reads out of the block.
//!
//! ## Area Offsets
//!
//! Three monotonic offsets partition the block after the 56-byte header:
//!
//! ```text
//! key_start  = header + table_space.off + table_space.len
//! free_start = key_start + free_space.off
//! data_start = free_start + free_space.len
//! ```
//!
//! Key offsets in locator entries are relative to `key_start` and grow
//! upward; value offsets are counted backwards from the end of the block,
//! or from the start of the `BtreeInfo` footer when the node is a root.
//!
//! ## Bounds Discipline
//!
//! [`Node::locate_key`] and [`Node::locate_value`] are the only way other
//! components obtain record byte ranges. Both return `(offset, length)`
//! pairs checked against the block bounds, so callers can slice the raw
//! block without further arithmetic.
//!
//! ## Lifecycle
//!
//! A `Node` owns its mapped view and unmaps on drop. Tree roots are shared
//! behind `Rc` by the entry points, so a root stays mapped for as long as
//! any cursor or caller still holds it; there is no flag-driven free path
//! that could be confused by corrupted flags.

use eyre::{ensure, Result};
use memmap2::Mmap;
use tracing::trace;

use crate::checksum::verify_object_checksum;
use crate::ondisk::{
    parse_prefix, BtreeNodeHeader, KvLoc, KvOff, BTNODE_FIXED_KV_SIZE, BTNODE_LEAF, BTNODE_ROOT,
    BTREE_INFO_SIZE, CHILD_PTR_SIZE, FIXED_KEY_SIZE, KVLOC_SIZE, KVOFF_SIZE, NODE_HEADER_SIZE,
    OMAP_VAL_SIZE,
};
use crate::storage::BlockDevice;

#[derive(Debug)]
pub struct Node {
    mmap: Mmap,
    flags: u16,
    level: u16,
    records: u32,
    key_start: usize,
    free_start: usize,
    data_start: usize,
    oid: u64,
    block_nr: u64,
}

impl Node {
    /// Loads and validates the node stored in @block_nr.
    pub fn load(device: &BlockDevice, block_nr: u64) -> Result<Self> {
        let mmap = device.map_block(block_nr)?;
        let block_size = mmap.len();

        verify_object_checksum(&mmap, block_nr)?;

        let header = BtreeNodeHeader::from_bytes(&mmap)?;
        let table = header.table_space();
        let free = header.free_space();

        let key_start = NODE_HEADER_SIZE + table.off() as usize + table.len() as usize;
        let free_start = key_start + free.off() as usize;
        let data_start = free_start + free.len() as usize;

        let node = Self {
            flags: header.flags(),
            level: header.level(),
            records: header.nkeys(),
            key_start,
            free_start,
            data_start,
            oid: header.object().oid(),
            block_nr,
            mmap,
        };

        // An empty node could keep a range query spinning forever.
        ensure!(
            node.records >= 1,
            "node in block 0x{:x} has no records",
            block_nr
        );
        ensure!(
            node.key_start <= block_size && node.data_start <= block_size,
            "node in block 0x{:x} has areas out of bounds",
            block_nr
        );

        let entry_size = if node.has_fixed_kv_size() {
            KVOFF_SIZE
        } else {
            KVLOC_SIZE
        };
        ensure!(
            node.records as usize * entry_size <= node.key_start - NODE_HEADER_SIZE,
            "record locator table of node in block 0x{:x} does not fit",
            block_nr
        );

        trace!(
            block_nr,
            oid = node.oid,
            level = node.level,
            records = node.records,
            "loaded b-tree node"
        );
        Ok(node)
    }

    pub fn raw(&self) -> &[u8] {
        &self.mmap
    }

    pub fn block_size(&self) -> usize {
        self.mmap.len()
    }

    pub fn records(&self) -> u32 {
        self.records
    }

    pub fn level(&self) -> u16 {
        self.level
    }

    pub fn oid(&self) -> u64 {
        self.oid
    }

    pub fn block_nr(&self) -> u64 {
        self.block_nr
    }

    pub fn free_start(&self) -> usize {
        self.free_start
    }

    pub fn data_start(&self) -> usize {
        self.data_start
    }

    pub fn is_root(&self) -> bool {
        self.flags & BTNODE_ROOT != 0
    }

    pub fn is_leaf(&self) -> bool {
        self.flags & BTNODE_LEAF != 0
    }

    pub fn has_fixed_kv_size(&self) -> bool {
        self.flags & BTNODE_FIXED_KV_SIZE != 0
    }

    fn kvoff_entry(&self, index: u32) -> Result<&KvOff> {
        let start = NODE_HEADER_SIZE + index as usize * KVOFF_SIZE;
        parse_prefix(&self.mmap[start..], "KvOff")
    }

    fn kvloc_entry(&self, index: u32) -> Result<&KvLoc> {
        let start = NODE_HEADER_SIZE + index as usize * KVLOC_SIZE;
        parse_prefix(&self.mmap[start..], "KvLoc")
    }

    /// Locates the key of record @index. Returns its `(offset, length)`
    /// within the block; callers must stay inside the returned span.
    pub fn locate_key(&self, index: u32) -> Result<(usize, usize)> {
        ensure!(
            index < self.records,
            "requested record {} out of bounds in node 0x{:x}",
            index,
            self.block_nr
        );

        let (off, len) = if self.has_fixed_kv_size() {
            let entry = self.kvoff_entry(index)?;
            (self.key_start + entry.k() as usize, FIXED_KEY_SIZE)
        } else {
            let entry = self.kvloc_entry(index)?;
            let k = entry.k();
            (self.key_start + k.off() as usize, k.len() as usize)
        };

        ensure!(
            off + len <= self.block_size(),
            "b-tree key out of bounds in node 0x{:x}",
            self.block_nr
        );
        Ok((off, len))
    }

    /// Locates the value of record @index. Value offsets count backwards
    /// from the end of the block, or from the footer on root nodes.
    pub fn locate_value(&self, index: u32) -> Result<(usize, usize)> {
        ensure!(
            index < self.records,
            "requested record {} out of bounds in node 0x{:x}",
            index,
            self.block_nr
        );

        let area_end = if self.is_root() {
            self.block_size() - BTREE_INFO_SIZE
        } else {
            self.block_size()
        };

        let (back_off, len) = if self.has_fixed_kv_size() {
            let entry = self.kvoff_entry(index)?;
            // Fixed-size trees store 16-byte values at leaves and child
            // object ids everywhere else.
            let len = if self.is_leaf() {
                OMAP_VAL_SIZE
            } else {
                CHILD_PTR_SIZE
            };
            (entry.v() as usize, len)
        } else {
            let entry = self.kvloc_entry(index)?;
            let v = entry.v();
            (v.off() as usize, v.len() as usize)
        };

        let off = area_end.checked_sub(back_off).ok_or_else(|| {
            eyre::eyre!("b-tree value out of bounds in node 0x{:x}", self.block_nr)
        })?;
        ensure!(
            off + len <= area_end,
            "b-tree value out of bounds in node 0x{:x}",
            self.block_nr
        );
        Ok((off, len))
    }

    /// Reads the little-endian u64 at a located span. Used for interior
    /// child pointers after their 8-byte length has been checked.
    pub(crate) fn read_u64(&self, off: usize) -> u64 {
        u64::from_le_bytes(self.mmap[off..off + 8].try_into().expect("8-byte slice"))
    }
}
