//! # Storage Module
//!
//! This module provides the block-device layer for apfschk: read-only,
//! memory-mapped access to single filesystem blocks.
//!
//! ## Design
//!
//! The checker never writes, never caches, and never holds more than a
//! handful of blocks at once (one per level of the tree being walked), so
//! the layer is deliberately small: open the image read-only, learn the
//! block geometry from the container superblock, and hand out one
//! immutable mapped view per requested block.
//!
//! ```text
//! BlockDevice::open(path)          -> device (provisional 4KiB geometry)
//! device.set_geometry(bs, count)   -> adopt the superblock's geometry
//! device.map_block(bno)            -> Mmap view of exactly one block
//! ```
//!
//! Views are released on drop; the OS page cache is the only cache. Page
//! faults may block on disk I/O, which is fine for a synchronous,
//! single-threaded checker.

mod device;

pub use device::BlockDevice;
