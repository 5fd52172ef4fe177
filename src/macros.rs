//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in apfschk.
//!
//! ## zerocopy_getters!
//!
//! Generates getter methods for zerocopy struct fields that use little-endian
//! wrapper types (U16, U32, U64). The checker never writes the on-disk
//! structures it parses, so only the read side is generated.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{U32, U64};
//!
//! #[repr(C)]
//! struct Header {
//!     oid: U64,
//!     block_size: U32,
//! }
//!
//! impl Header {
//!     zerocopy_getters! {
//!         oid: u64,
//!         block_size: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn oid(&self) -> u64 { self.oid.get() }
//! // pub fn block_size(&self) -> u32 { self.block_size.get() }
//! ```

/// Generates getter methods for zerocopy little-endian fields (read-only).
#[macro_export]
macro_rules! zerocopy_getters {
    ($($field:ident : $native_ty:ty),* $(,)?) => {
        $(
            #[inline]
            pub fn $field(&self) -> $native_ty {
                self.$field.get()
            }
        )*
    };
}
