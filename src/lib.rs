//! # apfschk - Read-Only APFS Consistency Checker
//!
//! apfschk walks the B-trees of an APFS container image and verifies their
//! structural invariants: object checksums, record bounds, key ordering,
//! leaf-key uniqueness, child-id consistency and bounded depth. It repairs
//! nothing and writes nothing; any corruption it finds is reported and the
//! run stops.
//!
//! ## Quick Start
//!
//! ```ignore
//! use apfschk::Container;
//!
//! let container = Container::open("./disk.img")?;
//! let volumes = container.check()?;
//! println!("verified {volumes} volume(s)");
//! ```
//!
//! ## Architecture
//!
//! The checker reaches its trees through the container superblock in
//! block zero:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Container (superblock)        │
//! ├─────────────────────────────────────┤
//! │   B-Tree core (node/query/tree)      │
//! ├──────────────────┬──────────────────┤
//! │   Key decoding   │    Checksums     │
//! ├──────────────────┴──────────────────┤
//! │   Block device (read-only mmap)      │
//! └─────────────────────────────────────┘
//! ```
//!
//! Child pointers in the catalog are virtual object ids; the object map
//! B-tree translates them to physical blocks, and the checker resolves
//! that indirection transparently while walking and querying.
//!
//! ## Trust Model
//!
//! Every byte of the image is untrusted. Node headers are validated
//! before their records are touched, every record access goes through
//! bounds-checked `(offset, length)` spans, and any structural anomaly
//! fails the run with a diagnostic naming the offending block.
//!
//! ## Module Overview
//!
//! - [`storage`]: read-only block device with per-block mmap views
//! - [`ondisk`]: zerocopy layout structs for the format structures read
//! - [`checksum`]: the fletcher64 object checksum
//! - [`key`]: catalog/omap key decoding and total ordering
//! - [`btree`]: node loading, structural walk, point and range queries
//! - [`superblock`]: container and volume bring-up

#[macro_use]
mod macros;

pub mod btree;
pub mod checksum;
pub mod key;
pub mod ondisk;
pub mod storage;
pub mod superblock;

pub use btree::{
    execute_query, omap_lookup, Btree, Node, Query, QueryResult, TreeKind, MAX_TREE_DEPTH,
    QUERY_EXACT, QUERY_MULTIPLE,
};
pub use key::Key;
pub use storage::BlockDevice;
pub use superblock::Container;
