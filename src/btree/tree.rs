//! # Tree-Level Checking and Lookup
//!
//! This module ties node loading and queries together into whole-tree
//! operations: opening (and structurally verifying) the object map and
//! catalog trees, and resolving object ids to block numbers through the
//! object map.
//!
//! ## Structural Walk
//!
//! Opening a tree runs a full pre-order walk that asserts, for every
//! subtree, the invariants a reader later relies on:
//!
//! - keys are non-decreasing across the whole traversal,
//! - consecutive keys within one leaf are strictly increasing,
//! - every nonleaf value is an 8-byte child object id,
//! - each loaded child reports the object id its parent recorded,
//! - the tree is no deeper than [`MAX_TREE_DEPTH`].
//!
//! The walk threads one `last_key` through the entire traversal, so
//! ordering is checked across node boundaries, not just within nodes.
//! The walker owns a copy of the key rather than borrowing it from the
//! child block: the child's mapping is gone by the time the parent
//! compares against it.

use std::rc::Rc;

use eyre::{bail, ensure, Result};
use tracing::debug;

use super::node::Node;
use super::query::{execute_query, Query, QueryResult, TreeKind, QUERY_EXACT};
use super::MAX_TREE_DEPTH;
use crate::checksum::verify_object_checksum;
use crate::key::{parse_cat_key, parse_omap_key, Key};
use crate::ondisk::{OmapPhys, OmapVal, CHILD_PTR_SIZE, OMAP_VAL_SIZE};
use crate::storage::BlockDevice;

/// A verified B-tree: the root node plus whatever the tree kind needs to
/// resolve child pointers.
#[derive(Debug)]
pub struct Btree<'dev> {
    device: &'dev BlockDevice,
    kind: TreeKind,
    root: Rc<Node>,
    omap: Option<Rc<Node>>,
}

impl<'dev> Btree<'dev> {
    /// Opens and verifies an object map from its phys object.
    ///
    /// @oid names the omap phys object, which for an omap is also the
    /// block where it lives. The phys object is not a tree node itself;
    /// it records the oid of the tree root, which inside the omap equals
    /// its block number.
    pub fn open_omap(device: &'dev BlockDevice, oid: u64) -> Result<Self> {
        let raw = device.map_block(oid)?;
        verify_object_checksum(&raw, oid)
            .map_err(|e| e.wrap_err("bad checksum for object map"))?;
        let phys = OmapPhys::from_bytes(&raw)?;
        ensure!(
            phys.object().oid() == oid,
            "wrong object id on object map in block 0x{:x}",
            oid
        );
        let tree_oid = phys.tree_oid();
        drop(raw);

        let root = Rc::new(Node::load(device, tree_oid)?);
        let mut last_key = Key::default();
        check_subtree(device, &root, &mut last_key, None, 0)?;

        debug!(oid, tree_root = tree_oid, "object map verified");
        Ok(Self {
            device,
            kind: TreeKind::Omap,
            root,
            omap: None,
        })
    }

    /// Opens and verifies a catalog tree whose root oid resolves through
    /// @omap_root. The omap stays attached to the returned tree so that
    /// queries can translate child ids.
    pub fn open_catalog(device: &'dev BlockDevice, oid: u64, omap_root: Rc<Node>) -> Result<Self> {
        let bno = omap_lookup(device, &omap_root, oid)?;
        let root = Rc::new(Node::load(device, bno)?);
        let mut last_key = Key::default();
        check_subtree(device, &root, &mut last_key, Some(&omap_root), 0)?;

        debug!(oid, root_block = bno, "catalog tree verified");
        Ok(Self {
            device,
            kind: TreeKind::Catalog,
            root,
            omap: Some(omap_root),
        })
    }

    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    /// The tree root. Entry-point callers keep this alive for the whole
    /// run; every cursor holds its own reference.
    pub fn root(&self) -> &Rc<Node> {
        &self.root
    }

    /// Runs @query against this tree.
    pub fn query(&self, query: &mut Query) -> Result<QueryResult> {
        execute_query(self.device, self.omap.as_ref(), query)
    }
}

/// Finds the block number of a virtual object from its id.
///
/// Omap records must exist for every id the trees reference, so a missing
/// record is corruption, not a miss.
pub fn omap_lookup(device: &BlockDevice, omap_root: &Rc<Node>, id: u64) -> Result<u64> {
    let mut query = Query::new(
        Rc::clone(omap_root),
        TreeKind::Omap,
        Key::omap(id),
        QUERY_EXACT,
    );

    match execute_query(device, None, &mut query)? {
        QueryResult::NotFound => bail!("omap record missing for id 0x{:x}", id),
        QueryResult::Found => {}
    }

    let value = query.value();
    ensure!(
        value.len() == OMAP_VAL_SIZE,
        "wrong size of omap leaf record value for id 0x{:x}",
        id
    );
    let val = OmapVal::from_bytes(value)?;
    Ok(val.paddr())
}

/// Walks a subtree in pre-order, checking key ordering, leaf uniqueness
/// and child-id consistency. @last_key carries the greatest key seen so
/// far across the whole traversal; @omap_root is `None` while walking the
/// object map itself, where child ids are block numbers.
fn check_subtree(
    device: &BlockDevice,
    node: &Node,
    last_key: &mut Key,
    omap_root: Option<&Rc<Node>>,
    depth: u32,
) -> Result<()> {
    ensure!(
        depth < MAX_TREE_DEPTH,
        "corrupted b-tree is too deep below node 0x{:x}",
        node.block_nr()
    );

    for i in 0..node.records() {
        let (key_off, key_len) = node.locate_key(i)?;
        let key_bytes = &node.raw()[key_off..key_off + key_len];
        let curr = match omap_root {
            Some(_) => parse_cat_key(key_bytes)?,
            None => parse_omap_key(key_bytes)?,
        };

        ensure!(
            *last_key <= curr,
            "b-tree keys out of order in node 0x{:x}",
            node.block_nr()
        );
        if i != 0 && node.is_leaf() {
            ensure!(
                *last_key != curr,
                "leaf keys are repeated in node 0x{:x}",
                node.block_nr()
            );
        }
        *last_key = curr;

        if node.is_leaf() {
            continue;
        }

        let (off, len) = node.locate_value(i)?;
        ensure!(
            len == CHILD_PTR_SIZE,
            "wrong size of nonleaf record value in node 0x{:x}",
            node.block_nr()
        );
        let child_id = node.read_u64(off);

        let child_bno = match omap_root {
            Some(omap) => omap_lookup(device, omap, child_id)?,
            None => child_id,
        };

        let child = Node::load(device, child_bno)?;
        ensure!(
            child.oid() == child_id,
            "wrong object id on b-tree node in block 0x{:x}",
            child_bno
        );

        check_subtree(device, &child, last_key, omap_root, depth + 1)?;
    }

    Ok(())
}
