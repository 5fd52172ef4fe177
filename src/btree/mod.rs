//! # B-Tree Traversal and Integrity Checking
//!
//! This module implements the checker's core: loading on-disk B-tree nodes,
//! verifying their structural invariants, and running point and range
//! queries over the object map and catalog trees.
//!
//! ## Architecture Overview
//!
//! Both trees share one node format; they differ in key encoding and in
//! how child pointers resolve. The object map stores physical block
//! numbers directly, while catalog child ids are virtual and translate
//! through the omap:
//!
//! ```text
//!              raw block
//!                 │ Node::load (checksum, bounds, sanity)
//!                 ▼
//!               Node ── locate_key / locate_value ──> record byte spans
//!                 │                                        │
//!                 │ check_subtree                          │ key decoding
//!                 ▼                                        ▼
//!        structural verification                 Query / execute_query
//!                                                          │
//!                                              omap_lookup (catalog only)
//! ```
//!
//! ## Trees Are Untrusted Input
//!
//! Every offset, length and count in a node comes from the image being
//! checked. The loader validates counts and areas before anything else
//! reads the node, and the record locator re-checks each span against the
//! block bounds; all other components access record bytes only through
//! those spans.
//!
//! ## Module Organization
//!
//! - `node`: node loading, validation, record location
//! - `query`: cursor state, in-node bisection, descent with backtracking
//! - `tree`: whole-tree verification, omap lookup, entry points

mod node;
mod query;
mod tree;

pub use node::Node;
pub use query::{execute_query, Query, QueryResult, TreeKind, QUERY_EXACT, QUERY_MULTIPLE};
pub use tree::{omap_lookup, Btree};

/// Maximum depth of any valid tree; a deeper descent is corruption.
pub const MAX_TREE_DEPTH: u32 = 12;
