//! # On-Disk Format Definitions
//!
//! This module provides type-safe, zerocopy-based structs for the APFS
//! structures the checker reads: the common object header, B-tree node
//! headers and record locator entries, the object map, and the container
//! and volume superblocks.
//!
//! ## Object Header
//!
//! Every persistent object starts with the same 32-byte header:
//!
//! ```text
//! Offset  Size  Field     Description
//! ------  ----  --------  -----------------------------------------
//! 0       8     cksum     fletcher64 checksum of block[8..]
//! 8       8     oid       object identifier (virtual or physical)
//! 16      8     xid       transaction that last wrote the object
//! 24      4     otype     object type and storage-class flags
//! 28      4     subtype   subtype (e.g. the kind of tree a node is in)
//! ```
//!
//! ## B-Tree Node Layout
//!
//! A node occupies exactly one block:
//!
//! ```text
//! +---------------------------+
//! | ObjectHeader (32B)        |
//! +---------------------------+
//! | BtreeNodeHeader tail (24B)|  flags, level, nkeys, four area locators
//! +---------------------------+
//! | Record locator table      |  KvOff (4B) or KvLoc (8B) per record
//! +---------------------------+
//! | Key area (grows upward)   |
//! +---------------------------+
//! | Free space                |
//! +---------------------------+
//! | Value area (grows down)   |  offsets counted back from block end,
//! |                           |  or from the footer on root nodes
//! +---------------------------+
//! | BtreeInfo footer (40B)    |  root nodes only
//! +---------------------------+
//! ```
//!
//! Key offsets in locator entries are relative to the start of the key
//! area; value offsets are counted backwards from the end of the block
//! (or from the start of the footer when the node is a root).
//!
//! ## Zerocopy Safety
//!
//! All structs use zerocopy traits for safe, zero-copy reads out of mapped
//! blocks: `FromBytes`, `Immutable`, `KnownLayout`, `Unaligned`, with
//! little-endian wrapper types for every multi-byte field. Compile-time
//! assertions pin each struct to its on-disk size.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Size of the common object header.
pub const OBJECT_HEADER_SIZE: usize = 32;

/// Size of a B-tree node header, object header included.
pub const NODE_HEADER_SIZE: usize = 56;

/// Size of the `BtreeInfo` footer carried by root nodes.
pub const BTREE_INFO_SIZE: usize = 40;

/// Locator entry sizes for the two node layouts.
pub const KVOFF_SIZE: usize = 4;
pub const KVLOC_SIZE: usize = 8;

/// Fixed-layout nodes store 16-byte keys.
pub const FIXED_KEY_SIZE: usize = 16;

/// Interior records hold an 8-byte child object id.
pub const CHILD_PTR_SIZE: usize = 8;

/// Size of an object-map leaf value.
pub const OMAP_VAL_SIZE: usize = 16;

/// B-tree node flags.
pub const BTNODE_ROOT: u16 = 0x0001;
pub const BTNODE_LEAF: u16 = 0x0002;
pub const BTNODE_FIXED_KV_SIZE: u16 = 0x0004;

/// Container superblock magic, "NXSB" in little-endian.
pub const NX_MAGIC: u32 = 0x4253_584E;

/// Volume superblock magic, "APSB" in little-endian.
pub const APFS_MAGIC: u32 = 0x4253_5041;

/// The container superblock always lives in block zero with this oid.
pub const NX_BLOCK_NUM: u64 = 0;
pub const OID_NX_SUPERBLOCK: u64 = 1;

/// Block-size bounds fixed by the format.
pub const NX_DEFAULT_BLOCK_SIZE: u32 = 4096;
pub const NX_MINIMUM_BLOCK_SIZE: u32 = 4096;
pub const NX_MAXIMUM_BLOCK_SIZE: u32 = 65536;

/// Maximum number of volumes a container can carry.
pub const NX_MAX_FILE_SYSTEMS: usize = 100;

/// Parses a zerocopy struct from the front of a byte slice.
#[inline]
pub(crate) fn parse_prefix<'a, T: FromBytes + KnownLayout + Immutable>(
    bytes: &'a [u8],
    type_name: &str,
) -> Result<&'a T> {
    let size = std::mem::size_of::<T>();
    ensure!(
        bytes.len() >= size,
        "buffer too small for {}: {} < {}",
        type_name,
        bytes.len(),
        size
    );
    T::ref_from_bytes(&bytes[..size])
        .map_err(|e| eyre::eyre!("failed to parse {}: {:?}", type_name, e))
}

/// The 32-byte header shared by every checksummed object.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ObjectHeader {
    cksum: [u8; 8],
    oid: U64,
    xid: U64,
    otype: U32,
    subtype: U32,
}

const _: () = assert!(std::mem::size_of::<ObjectHeader>() == OBJECT_HEADER_SIZE);

impl ObjectHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        parse_prefix(bytes, "ObjectHeader")
    }

    zerocopy_getters! {
        oid: u64,
        xid: u64,
        otype: u32,
        subtype: u32,
    }
}

/// An `(offset, length)` pair describing a region inside a node.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Nloc {
    off: U16,
    len: U16,
}

impl Nloc {
    zerocopy_getters! {
        off: u16,
        len: u16,
    }
}

/// The header of a B-tree node, object header included. The record locator
/// table follows immediately after.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BtreeNodeHeader {
    o: ObjectHeader,
    flags: U16,
    level: U16,
    nkeys: U32,
    table_space: Nloc,
    free_space: Nloc,
    key_free_list: Nloc,
    val_free_list: Nloc,
}

const _: () = assert!(std::mem::size_of::<BtreeNodeHeader>() == NODE_HEADER_SIZE);

impl BtreeNodeHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        parse_prefix(bytes, "BtreeNodeHeader")
    }

    pub fn object(&self) -> &ObjectHeader {
        &self.o
    }

    pub fn table_space(&self) -> Nloc {
        self.table_space
    }

    pub fn free_space(&self) -> Nloc {
        self.free_space
    }

    zerocopy_getters! {
        flags: u16,
        level: u16,
        nkeys: u32,
    }
}

/// Fixed-layout record locator: key and value offsets only, lengths are
/// implied by the tree.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct KvOff {
    k: U16,
    v: U16,
}

const _: () = assert!(std::mem::size_of::<KvOff>() == KVOFF_SIZE);

impl KvOff {
    zerocopy_getters! {
        k: u16,
        v: u16,
    }
}

/// Variable-layout record locator: an `(offset, length)` pair each for the
/// key and the value.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct KvLoc {
    k: Nloc,
    v: Nloc,
}

const _: () = assert!(std::mem::size_of::<KvLoc>() == KVLOC_SIZE);

impl KvLoc {
    pub fn k(&self) -> Nloc {
        self.k
    }

    pub fn v(&self) -> Nloc {
        self.v
    }
}

/// The `BtreeInfo` footer stored at the tail of root nodes.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BtreeInfo {
    flags: U32,
    node_size: U32,
    key_size: U32,
    val_size: U32,
    longest_key: U32,
    longest_val: U32,
    key_count: U64,
    node_count: U64,
}

const _: () = assert!(std::mem::size_of::<BtreeInfo>() == BTREE_INFO_SIZE);

impl BtreeInfo {
    zerocopy_getters! {
        flags: u32,
        node_size: u32,
        key_size: u32,
        val_size: u32,
        longest_key: u32,
        longest_val: u32,
        key_count: u64,
        node_count: u64,
    }
}

/// The object-map phys object: not itself a tree node, but the container
/// object that names the omap tree root.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct OmapPhys {
    o: ObjectHeader,
    flags: U32,
    snap_count: U32,
    tree_type: U32,
    snapshot_tree_type: U32,
    tree_oid: U64,
    snapshot_tree_oid: U64,
    most_recent_snap: U64,
    pending_revert_min: U64,
    pending_revert_max: U64,
}

const _: () = assert!(std::mem::size_of::<OmapPhys>() == 88);

impl OmapPhys {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        parse_prefix(bytes, "OmapPhys")
    }

    pub fn object(&self) -> &ObjectHeader {
        &self.o
    }

    zerocopy_getters! {
        flags: u32,
        snap_count: u32,
        tree_oid: u64,
    }
}

/// An object-map record key.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct OmapKey {
    oid: U64,
    xid: U64,
}

const _: () = assert!(std::mem::size_of::<OmapKey>() == FIXED_KEY_SIZE);

impl OmapKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        parse_prefix(bytes, "OmapKey")
    }

    zerocopy_getters! {
        oid: u64,
        xid: u64,
    }
}

/// An object-map leaf value: the physical address of the mapped object.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct OmapVal {
    flags: U32,
    size: U32,
    paddr: U64,
}

const _: () = assert!(std::mem::size_of::<OmapVal>() == OMAP_VAL_SIZE);

impl OmapVal {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        parse_prefix(bytes, "OmapVal")
    }

    zerocopy_getters! {
        flags: u32,
        size: u32,
        paddr: u64,
    }
}

/// The leading portion of the container superblock in block zero. The
/// full on-disk structure continues with counters and ephemeral info the
/// checker does not read.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct NxSuperblock {
    o: ObjectHeader,
    magic: U32,
    block_size: U32,
    block_count: U64,
    features: U64,
    readonly_compatible_features: U64,
    incompatible_features: U64,
    uuid: [u8; 16],
    next_oid: U64,
    next_xid: U64,
    xp_desc_blocks: U32,
    xp_data_blocks: U32,
    xp_desc_base: U64,
    xp_data_base: U64,
    xp_desc_next: U32,
    xp_data_next: U32,
    xp_desc_index: U32,
    xp_desc_len: U32,
    xp_data_index: U32,
    xp_data_len: U32,
    spaceman_oid: U64,
    omap_oid: U64,
    reaper_oid: U64,
    test_type: U32,
    max_file_systems: U32,
    fs_oid: [U64; NX_MAX_FILE_SYSTEMS],
}

const _: () = assert!(std::mem::size_of::<NxSuperblock>() == 984);

impl NxSuperblock {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let sb: &Self = parse_prefix(bytes, "NxSuperblock")?;
        ensure!(
            sb.magic.get() == NX_MAGIC,
            "container superblock has wrong magic 0x{:08x}",
            sb.magic.get()
        );
        Ok(sb)
    }

    pub fn object(&self) -> &ObjectHeader {
        &self.o
    }

    pub fn uuid(&self) -> &[u8; 16] {
        &self.uuid
    }

    pub fn fs_oid(&self, index: usize) -> u64 {
        self.fs_oid[index].get()
    }

    zerocopy_getters! {
        block_size: u32,
        block_count: u64,
        next_oid: u64,
        next_xid: u64,
        spaceman_oid: u64,
        omap_oid: u64,
        reaper_oid: u64,
        max_file_systems: u32,
    }
}

/// The leading portion of a volume superblock. The full structure goes on
/// with inode counters, the volume name and timestamps; the checker only
/// needs the magic and the tree oids.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ApfsSuperblock {
    o: ObjectHeader,
    magic: U32,
    fs_index: U32,
    features: U64,
    readonly_compatible_features: U64,
    incompatible_features: U64,
    unmount_time: U64,
    fs_reserve_block_count: U64,
    fs_quota_block_count: U64,
    fs_alloc_count: U64,
    meta_crypto: [u8; 20],
    root_tree_type: U32,
    extentref_tree_type: U32,
    snap_meta_tree_type: U32,
    omap_oid: U64,
    root_tree_oid: U64,
    extentref_tree_oid: U64,
    snap_meta_tree_oid: U64,
}

const _: () = assert!(std::mem::size_of::<ApfsSuperblock>() == 160);

impl ApfsSuperblock {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let sb: &Self = parse_prefix(bytes, "ApfsSuperblock")?;
        ensure!(
            sb.magic.get() == APFS_MAGIC,
            "volume superblock has wrong magic 0x{:08x}",
            sb.magic.get()
        );
        Ok(sb)
    }

    pub fn object(&self) -> &ObjectHeader {
        &self.o
    }

    zerocopy_getters! {
        fs_index: u32,
        omap_oid: u64,
        root_tree_oid: u64,
        extentref_tree_oid: u64,
        snap_meta_tree_oid: u64,
    }
}
