//! # B-Tree Queries
//!
//! A [`Query`] is a search cursor over one node, chained to the cursor for
//! the node's parent. Point lookups keep a single cursor and swap the node
//! out as they descend; range queries push one cursor per level so the
//! search can climb back up and continue in a sibling subtree.
//!
//! ## Search Direction
//!
//! The in-node search finds the greatest record whose key is less than or
//! equal to the target — the separator convention of the tree. Range
//! queries then step *backwards* through matching records, unwinding to
//! the parent when a node is exhausted, so a full iteration visits every
//! match in descending key order.
//!
//! ## Backtracking Ownership
//!
//! The cursor chain is a singly linked ancestor list. Unwinding detaches
//! the parent (`Option::take`) before the child cursor is overwritten, so
//! the child and its mapped node drop while the parent lives on. A cursor
//! never frees a node still referenced above it; root nodes are shared
//! behind `Rc` and survive every cursor.

use std::cmp::Ordering;
use std::rc::Rc;

use eyre::{ensure, Result};

use super::node::Node;
use super::tree::omap_lookup;
use super::MAX_TREE_DEPTH;
use crate::key::{parse_cat_key, parse_omap_key, Key};
use crate::ondisk::CHILD_PTR_SIZE;
use crate::storage::BlockDevice;

/// Which tree a query runs against; selects the key decoder and whether
/// child ids pass through the object map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Omap,
    Catalog,
}

/// A leaf hit must equal the target key exactly.
pub const QUERY_EXACT: u32 = 0x0001;

/// Return every record matching the target key, disambiguators ignored.
pub const QUERY_MULTIPLE: u32 = 0x0002;

/// The cursor has returned a record at this level; step past it next time.
const QUERY_NEXT: u32 = 0x0004;

/// No further candidates exist at this level.
const QUERY_DONE: u32 = 0x0008;

/// Outcome of a full tree query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    Found,
    NotFound,
}

/// Outcome of a single-node search step.
enum Step {
    Found,
    NotFound,
    /// The next match can only live in a different subtree; unwind.
    TryAnotherBranch,
}

#[derive(Debug)]
pub struct Query {
    node: Rc<Node>,
    parent: Option<Box<Query>>,
    kind: TreeKind,
    key: Key,
    flags: u32,
    index: u32,
    depth: u32,
    key_off: usize,
    key_len: usize,
    off: usize,
    len: usize,
}

impl Query {
    /// Creates a cursor positioned one past the last record of @node, the
    /// starting point for the backwards bisection. @node is normally a
    /// tree root handed out by the entry points.
    pub fn new(node: Rc<Node>, kind: TreeKind, key: Key, flags: u32) -> Self {
        let index = node.records();
        Self {
            node,
            parent: None,
            kind,
            key,
            flags,
            index,
            depth: 0,
            key_off: 0,
            key_len: 0,
            off: 0,
            len: 0,
        }
    }

    pub fn node(&self) -> &Rc<Node> {
        &self.node
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The value bytes of the last record found. Only meaningful after
    /// [`execute_query`] returned [`QueryResult::Found`].
    pub fn value(&self) -> &[u8] {
        &self.node.raw()[self.off..self.off + self.len]
    }

    /// The `(offset, length)` of the last value within its node's block.
    pub fn value_span(&self) -> (usize, usize) {
        (self.off, self.len)
    }

    /// The key bytes of the last record found.
    pub fn located_key(&self) -> &[u8] {
        &self.node.raw()[self.key_off..self.key_off + self.key_len]
    }

    /// Decodes record key bytes with this query's decoder. Range queries
    /// compare in stripped form: records differing only in disambiguators
    /// must collide with the target.
    fn decode_key(&self, bytes: &[u8]) -> Result<Key> {
        let mut key = match self.kind {
            TreeKind::Catalog => parse_cat_key(bytes)?,
            TreeKind::Omap => parse_omap_key(bytes)?,
        };
        if self.flags & QUERY_MULTIPLE != 0 {
            key.strip_disambiguators();
        }
        Ok(key)
    }

    /// Pushes a cursor for @child below this one, inheriting the target
    /// key and flags. The new level starts its own bisection from the
    /// child's record count.
    fn push_level(&mut self, child: Rc<Node>) {
        let child_query = Query {
            index: child.records(),
            node: child,
            parent: None,
            kind: self.kind,
            key: self.key.clone(),
            flags: self.flags & !(QUERY_DONE | QUERY_NEXT),
            depth: self.depth + 1,
            key_off: 0,
            key_len: 0,
            off: 0,
            len: 0,
        };
        let parent = std::mem::replace(self, child_query);
        self.parent = Some(Box::new(parent));
    }

    /// Bisection search within the current node for the greatest record
    /// whose key is ≤ the target.
    ///
    /// On entry `self.index` is the exclusive upper bound of the search
    /// range. On success the located value span is stored in the cursor;
    /// the final `index` is remembered so a range query can resume here.
    fn search_node(&mut self) -> Result<Step> {
        let node = Rc::clone(&self.node);
        let multiple = self.flags & QUERY_MULTIPLE != 0;

        let mut cmp = Ordering::Greater;
        let mut left: u32 = 0;
        let mut right: u32 = 0;

        loop {
            if cmp == Ordering::Greater {
                if self.index == 0 {
                    return Ok(Step::NotFound);
                }
                right = self.index - 1;
                if right < left {
                    return Ok(Step::NotFound);
                }
                self.index = (left + right) / 2;
            } else {
                left = self.index;
                // Round up, or the midpoint stalls at `left` when the
                // bounds are adjacent and the mid-key equals the target.
                self.index = (left + right + 1) / 2;
            }

            let (key_off, key_len) = node.locate_key(self.index)?;
            self.key_off = key_off;
            self.key_len = key_len;
            let curr = self.decode_key(&node.raw()[key_off..key_off + key_len])?;

            cmp = curr.cmp(&self.key);
            if cmp == Ordering::Equal && !multiple {
                break;
            }
            if left == right {
                break;
            }
        }

        if cmp == Ordering::Greater {
            return Ok(Step::NotFound);
        }
        if cmp != Ordering::Equal && node.is_leaf() && self.flags & QUERY_EXACT != 0 {
            return Ok(Step::NotFound);
        }
        if multiple {
            if cmp != Ordering::Equal {
                // Last relevant entry at this level.
                self.flags |= QUERY_DONE;
            }
            self.flags |= QUERY_NEXT;
        }

        let (off, len) = node.locate_value(self.index)?;
        ensure!(
            len != 0,
            "corrupted record value in node 0x{:x}",
            node.block_nr()
        );
        self.off = off;
        self.len = len;
        Ok(Step::Found)
    }

    /// Steps a range cursor past the record it returned last time.
    fn advance_node(&mut self) -> Result<Step> {
        let node = Rc::clone(&self.node);

        if self.flags & QUERY_DONE != 0 {
            // Nothing left to search at this level.
            return Ok(Step::NotFound);
        }
        if self.index == 0 {
            // The next match may be in another node.
            return Ok(Step::TryAnotherBranch);
        }
        self.index -= 1;

        let (key_off, key_len) = node.locate_key(self.index)?;
        self.key_off = key_off;
        self.key_len = key_len;
        let curr = self.decode_key(&node.raw()[key_off..key_off + key_len])?;

        let cmp = curr.cmp(&self.key);
        ensure!(
            cmp != Ordering::Greater,
            "b-tree records out of order in node 0x{:x}",
            node.block_nr()
        );

        if cmp != Ordering::Equal && node.is_leaf() && self.flags & QUERY_EXACT != 0 {
            return Ok(Step::NotFound);
        }

        let (off, len) = node.locate_value(self.index)?;
        ensure!(
            len != 0,
            "corrupted record value in node 0x{:x}",
            node.block_nr()
        );
        self.off = off;
        self.len = len;

        if cmp != Ordering::Equal {
            // This is the last entry that can be relevant in this node.
            // Keep searching the children, but don't return to this level.
            self.flags |= QUERY_DONE;
        }
        Ok(Step::Found)
    }
}

/// Executes @query against its tree, descending from the cursor's current
/// node to a leaf record.
///
/// On [`QueryResult::Found`] the cursor points at the leaf holding the
/// record and its key and value spans are populated. Catalog descents
/// resolve child ids through @omap_root; omap descents use child ids as
/// block numbers directly.
pub fn execute_query(
    device: &BlockDevice,
    omap_root: Option<&Rc<Node>>,
    query: &mut Query,
) -> Result<QueryResult> {
    loop {
        ensure!(
            query.depth < MAX_TREE_DEPTH,
            "corrupted b-tree is too deep below node 0x{:x}",
            query.node.block_nr()
        );

        let step = if query.flags & QUERY_NEXT != 0 {
            query.advance_node()?
        } else {
            query.search_node()?
        };

        match step {
            Step::TryAnotherBranch => {
                match query.parent.take() {
                    // Already at the root of the tree.
                    None => return Ok(QueryResult::NotFound),
                    // Move back up one level and continue the query there.
                    // The detached child cursor and its node drop here.
                    Some(parent) => {
                        *query = *parent;
                        continue;
                    }
                }
            }
            Step::NotFound => return Ok(QueryResult::NotFound),
            Step::Found => {}
        }

        if query.node.is_leaf() {
            return Ok(QueryResult::Found);
        }

        // The value of a nonleaf record is the child's object id.
        ensure!(
            query.len == CHILD_PTR_SIZE,
            "wrong size of nonleaf record value in node 0x{:x}",
            query.node.block_nr()
        );
        let child_id = query.node.read_u64(query.off);

        // The omap maps a node id into a block number. The nodes of the
        // omap itself do not need this translation.
        let child_bno = match query.kind {
            TreeKind::Omap => child_id,
            TreeKind::Catalog => {
                let omap = omap_root
                    .ok_or_else(|| eyre::eyre!("catalog query without an object map"))?;
                omap_lookup(device, omap, child_id)?
            }
        };

        let child = Node::load(device, child_bno)?;
        ensure!(
            child.oid() == child_id,
            "wrong object id on b-tree node in block 0x{:x}",
            child_bno
        );
        let child = Rc::new(child);

        if query.flags & QUERY_MULTIPLE != 0 {
            // Remember the parent node and index so the search can
            // continue here later.
            query.push_level(child);
        } else {
            // Reuse this cursor to search the child.
            query.index = child.records();
            query.node = child;
            query.depth += 1;
        }
    }
}
