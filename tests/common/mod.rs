//! Shared fixtures: builds small synthetic APFS images in memory, with
//! valid checksums, and opens them through the public API. Corruption
//! tests tamper with the built blocks and re-seal them (or not, when the
//! checksum itself is the subject).

#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;

use apfschk::checksum::seal_block;
use apfschk::ondisk::{
    BTNODE_FIXED_KV_SIZE, BTNODE_LEAF, BTNODE_ROOT, BTREE_INFO_SIZE, KVLOC_SIZE, KVOFF_SIZE,
    NODE_HEADER_SIZE, NX_MAGIC, OID_NX_SUPERBLOCK,
};
use apfschk::BlockDevice;
use tempfile::TempDir;

pub const BS: usize = 4096;

/// Volume superblock magic, "APSB" little-endian.
const APFS_MAGIC: u32 = 0x4253_5041;

/// An image under construction: a vector of BS-sized blocks.
pub struct Image {
    blocks: Vec<Vec<u8>>,
}

impl Image {
    pub fn new(block_count: usize) -> Self {
        Self {
            blocks: vec![vec![0u8; BS]; block_count],
        }
    }

    pub fn block_mut(&mut self, bno: u64) -> &mut [u8] {
        &mut self.blocks[bno as usize]
    }

    /// Recomputes the object checksum of a block after tampering.
    pub fn reseal(&mut self, bno: u64) {
        seal_block(self.block_mut(bno));
    }

    pub fn set_block(&mut self, bno: u64, data: Vec<u8>) {
        assert_eq!(data.len(), BS);
        self.blocks[bno as usize] = data;
    }

    /// Writes the image to a temp file and returns its path.
    pub fn write_to_temp(&self) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.img");
        let mut file = std::fs::File::create(&path).unwrap();
        for block in &self.blocks {
            file.write_all(block).unwrap();
        }
        (dir, path)
    }

    pub fn open_device(&self) -> (TempDir, BlockDevice) {
        let (dir, path) = self.write_to_temp();
        (dir, BlockDevice::open(&path).unwrap())
    }

    /// Writes an object-map phys object: the container object naming the
    /// omap tree root.
    pub fn write_omap_phys(&mut self, bno: u64, tree_oid: u64) {
        let block = self.block_mut(bno);
        block[8..16].copy_from_slice(&bno.to_le_bytes());
        block[16..24].copy_from_slice(&1u64.to_le_bytes()); // xid
        block[48..56].copy_from_slice(&tree_oid.to_le_bytes());
        seal_block(block);
    }

    /// Writes a container superblock into block zero.
    pub fn write_container_sb(&mut self, omap_oid: u64, fs_oids: &[u64]) {
        let block_count = self.blocks.len() as u64;
        let block = self.block_mut(0);
        block[8..16].copy_from_slice(&OID_NX_SUPERBLOCK.to_le_bytes());
        block[32..36].copy_from_slice(&NX_MAGIC.to_le_bytes());
        block[36..40].copy_from_slice(&(BS as u32).to_le_bytes());
        block[40..48].copy_from_slice(&block_count.to_le_bytes());
        block[160..168].copy_from_slice(&omap_oid.to_le_bytes());
        for (i, oid) in fs_oids.iter().enumerate() {
            let off = 184 + i * 8;
            block[off..off + 8].copy_from_slice(&oid.to_le_bytes());
        }
        seal_block(block);
    }

    /// Writes a volume superblock naming the volume's omap and catalog.
    pub fn write_volume_sb(&mut self, bno: u64, oid: u64, omap_oid: u64, root_tree_oid: u64) {
        let block = self.block_mut(bno);
        block.fill(0);
        block[8..16].copy_from_slice(&oid.to_le_bytes());
        block[16..24].copy_from_slice(&1u64.to_le_bytes());
        block[32..36].copy_from_slice(&APFS_MAGIC.to_le_bytes());
        block[128..136].copy_from_slice(&omap_oid.to_le_bytes());
        block[136..144].copy_from_slice(&root_tree_oid.to_le_bytes());
        seal_block(block);
    }

    /// Writes a complete, sealed B-tree node. Records are laid out in the
    /// order given, which lets tests construct misordered nodes. Any
    /// previous content of the block is discarded, so corruption tests can
    /// rewrite a node wholesale.
    pub fn write_node(&mut self, bno: u64, spec: &NodeSpec) {
        let block = self.block_mut(bno);
        block.fill(0);

        let entry_size = if spec.fixed { KVOFF_SIZE } else { KVLOC_SIZE };
        let table_len = spec.records.len() * entry_size;
        let key_start = NODE_HEADER_SIZE + table_len;
        let area_end = if spec.root { BS - BTREE_INFO_SIZE } else { BS };

        block[8..16].copy_from_slice(&spec.oid.to_le_bytes());
        block[16..24].copy_from_slice(&1u64.to_le_bytes());

        let mut flags = 0u16;
        if spec.root {
            flags |= BTNODE_ROOT;
        }
        if spec.leaf {
            flags |= BTNODE_LEAF;
        }
        if spec.fixed {
            flags |= BTNODE_FIXED_KV_SIZE;
        }
        block[32..34].copy_from_slice(&flags.to_le_bytes());
        block[34..36].copy_from_slice(&spec.level.to_le_bytes());
        block[36..40].copy_from_slice(&(spec.records.len() as u32).to_le_bytes());
        block[42..44].copy_from_slice(&(table_len as u16).to_le_bytes());

        let mut key_off = 0usize;
        let mut val_back = 0usize;
        for (i, (key, val)) in spec.records.iter().enumerate() {
            val_back += val.len();
            let entry = NODE_HEADER_SIZE + i * entry_size;
            if spec.fixed {
                block[entry..entry + 2].copy_from_slice(&(key_off as u16).to_le_bytes());
                block[entry + 2..entry + 4].copy_from_slice(&(val_back as u16).to_le_bytes());
            } else {
                block[entry..entry + 2].copy_from_slice(&(key_off as u16).to_le_bytes());
                block[entry + 2..entry + 4].copy_from_slice(&(key.len() as u16).to_le_bytes());
                block[entry + 4..entry + 6].copy_from_slice(&(val_back as u16).to_le_bytes());
                block[entry + 6..entry + 8].copy_from_slice(&(val.len() as u16).to_le_bytes());
            }

            let k = key_start + key_off;
            block[k..k + key.len()].copy_from_slice(key);
            key_off += key.len();

            let v = area_end - val_back;
            block[v..v + val.len()].copy_from_slice(val);
        }

        // Describe the free region between the key and value areas.
        let key_end = key_start + key_off;
        let free_len = area_end - val_back - key_end;
        block[44..46].copy_from_slice(&(key_off as u16).to_le_bytes());
        block[46..48].copy_from_slice(&(free_len as u16).to_le_bytes());

        seal_block(block);
    }
}

/// Description of one node for [`Image::write_node`].
pub struct NodeSpec {
    pub oid: u64,
    pub root: bool,
    pub leaf: bool,
    pub fixed: bool,
    pub level: u16,
    pub records: Vec<(Vec<u8>, Vec<u8>)>,
}

impl NodeSpec {
    pub fn omap_leaf(oid: u64, records: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            oid,
            root: false,
            leaf: true,
            fixed: true,
            level: 0,
            records,
        }
    }

    pub fn omap_root_leaf(oid: u64, records: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            root: true,
            ..Self::omap_leaf(oid, records)
        }
    }

    pub fn omap_interior(oid: u64, level: u16, records: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            oid,
            root: false,
            leaf: false,
            fixed: true,
            level,
            records,
        }
    }

    pub fn cat_leaf(oid: u64, records: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            oid,
            root: false,
            leaf: true,
            fixed: false,
            level: 0,
            records,
        }
    }

    pub fn cat_root(oid: u64, level: u16, records: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            oid,
            root: true,
            leaf: level == 0,
            fixed: false,
            level,
            records,
        }
    }

    pub fn cat_interior(oid: u64, level: u16, records: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            oid,
            root: false,
            leaf: false,
            fixed: false,
            level,
            records,
        }
    }
}

// ---- record byte encoders ----

pub fn omap_key_bytes(oid: u64, xid: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&oid.to_le_bytes());
    buf.extend_from_slice(&xid.to_le_bytes());
    buf
}

pub fn omap_val_bytes(paddr: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags
    buf.extend_from_slice(&(BS as u32).to_le_bytes()); // size
    buf.extend_from_slice(&paddr.to_le_bytes());
    buf
}

/// An 8-byte interior value naming a child object.
pub fn child_val_bytes(child_oid: u64) -> Vec<u8> {
    child_oid.to_le_bytes().to_vec()
}

const OBJ_TYPE_SHIFT: u32 = 60;
pub const TYPE_INODE: u8 = 3;
pub const TYPE_DIR_REC: u8 = 9;

fn cat_key_header(id: u64, kind: u8) -> Vec<u8> {
    (((kind as u64) << OBJ_TYPE_SHIFT) | id).to_le_bytes().to_vec()
}

pub fn inode_key_bytes(id: u64) -> Vec<u8> {
    cat_key_header(id, TYPE_INODE)
}

/// A hashed directory-record key: header, packed name length and hash,
/// then the NUL-terminated name.
pub fn drec_key_bytes(parent_id: u64, hash: u32, name: &[u8]) -> Vec<u8> {
    let mut buf = cat_key_header(parent_id, TYPE_DIR_REC);
    let len_and_hash = (hash << 10) | (name.len() as u32 + 1);
    buf.extend_from_slice(&len_and_hash.to_le_bytes());
    buf.extend_from_slice(name);
    buf.push(0);
    buf
}

/// Builds the standard catalog fixture: an omap at blocks 1-2 translating
/// catalog node oids, and a two-level catalog at blocks 3-5.
///
/// ```text
/// block 1: omap phys (tree root oid 2)
/// block 2: omap root leaf  100->3, 101->4, 102->5
/// block 3: catalog root (interior), separators K1 -> 101, K3 -> 102
/// block 4: leaf L1 [K1, K2]
/// block 5: leaf L2 [K3, K4]
/// ```
///
/// K1..K4 are inode keys with ids 10, 20, 30, 40 and values "v1".."v4".
pub const CAT_ROOT_OID: u64 = 100;
pub const CAT_L1_OID: u64 = 101;
pub const CAT_L2_OID: u64 = 102;
pub const OMAP_PHYS_BNO: u64 = 1;

pub fn standard_catalog_image() -> Image {
    let mut img = Image::new(6);
    img.write_omap_phys(OMAP_PHYS_BNO, 2);
    img.write_node(
        2,
        &NodeSpec::omap_root_leaf(
            2,
            vec![
                (omap_key_bytes(CAT_ROOT_OID, 1), omap_val_bytes(3)),
                (omap_key_bytes(CAT_L1_OID, 1), omap_val_bytes(4)),
                (omap_key_bytes(CAT_L2_OID, 1), omap_val_bytes(5)),
            ],
        ),
    );
    img.write_node(
        3,
        &NodeSpec::cat_root(
            CAT_ROOT_OID,
            1,
            vec![
                (inode_key_bytes(10), child_val_bytes(CAT_L1_OID)),
                (inode_key_bytes(30), child_val_bytes(CAT_L2_OID)),
            ],
        ),
    );
    img.write_node(
        4,
        &NodeSpec::cat_leaf(
            CAT_L1_OID,
            vec![
                (inode_key_bytes(10), b"v1".to_vec()),
                (inode_key_bytes(20), b"v2".to_vec()),
            ],
        ),
    );
    img.write_node(
        5,
        &NodeSpec::cat_leaf(
            CAT_L2_OID,
            vec![
                (inode_key_bytes(30), b"v3".to_vec()),
                (inode_key_bytes(40), b"v4".to_vec()),
            ],
        ),
    );
    img
}
