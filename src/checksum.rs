//! # Object Checksums
//!
//! Every persistent APFS object begins with a 32-byte header whose first
//! eight bytes hold a fletcher64 checksum of the rest of the block. This
//! module implements that checksum and the verification helper used by the
//! node loader and the superblock readers.
//!
//! ## Algorithm
//!
//! The variant APFS uses is fletcher64 over little-endian 32-bit words, with
//! a final step that folds the two running sums so that a block whose stored
//! checksum is correct sums to zero:
//!
//! ```text
//! sum1 = Σ word[i]          (mod 2^64 accumulation)
//! sum2 = Σ sum1 after each word
//! c1 = 0xFFFF_FFFF - (sum1 + sum2) % 0xFFFF_FFFF
//! c2 = 0xFFFF_FFFF - (sum1 + c1)   % 0xFFFF_FFFF
//! checksum = c2 << 32 | c1
//! ```
//!
//! The checksum covers `block[8..block_size]`; the stored value lives in
//! `block[0..8]`, little-endian.

use eyre::{ensure, Result};

/// Size of the on-disk checksum field at the start of every object.
pub const CKSUM_SIZE: usize = 8;

/// Computes the APFS fletcher64 checksum of a byte region.
///
/// The region length must be a multiple of four; on-disk blocks always are
/// once the 8-byte checksum field has been skipped.
pub fn fletcher64(data: &[u8]) -> u64 {
    debug_assert!(data.len() % 4 == 0);

    let mut sum1: u64 = 0;
    let mut sum2: u64 = 0;

    for word in data.chunks_exact(4) {
        sum1 = sum1.wrapping_add(u32::from_le_bytes([word[0], word[1], word[2], word[3]]) as u64);
        sum2 = sum2.wrapping_add(sum1);
    }

    let c1 = 0xFFFF_FFFF - (sum1.wrapping_add(sum2)) % 0xFFFF_FFFF;
    let c2 = 0xFFFF_FFFF - (sum1.wrapping_add(c1)) % 0xFFFF_FFFF;

    (c2 << 32) | c1
}

/// Verifies the object checksum of a fully mapped block.
///
/// Returns an error naming @block_nr when the stored checksum does not match
/// the computed one.
pub fn verify_object_checksum(block: &[u8], block_nr: u64) -> Result<()> {
    ensure!(
        block.len() > CKSUM_SIZE,
        "block 0x{:x} too small to hold an object header",
        block_nr
    );

    let stored = u64::from_le_bytes(block[..CKSUM_SIZE].try_into().expect("8-byte slice"));
    let computed = fletcher64(&block[CKSUM_SIZE..]);

    ensure!(
        stored == computed,
        "bad checksum for object in block 0x{:x}",
        block_nr
    );
    Ok(())
}

/// Stamps a valid checksum onto a block. Only test fixtures forge blocks,
/// but the routine lives here next to the verifier so the two cannot drift.
pub fn seal_block(block: &mut [u8]) {
    let cksum = fletcher64(&block[CKSUM_SIZE..]);
    block[..CKSUM_SIZE].copy_from_slice(&cksum.to_le_bytes());
}
