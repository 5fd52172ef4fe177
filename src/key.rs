//! # Record Keys
//!
//! Decoding and ordering of B-tree record keys. Two key kinds exist: object
//! map keys (fixed 16 bytes, ordered by object id) and catalog keys (a
//! common 8-byte header followed by a type-specific tail).
//!
//! ## Catalog Key Header
//!
//! The first eight bytes of every catalog key pack the owning object id
//! into the low 60 bits and the record type into the high 4:
//!
//! ```text
//! 63      60 59                                              0
//! +--------+------------------------------------------------+
//! | type   |                object id                       |
//! +--------+------------------------------------------------+
//! ```
//!
//! ## Ordering
//!
//! Keys order by object id, then record type, then the per-type subkey
//! (`number`: a logical address, name hash or sibling id), then the name
//! bytes. `Key::default()` is the least key and serves as the traversal
//! sentinel. The field order of [`Key`] encodes this; the derived `Ord`
//! is the comparison.
//!
//! Range queries match every record that shares a primary key and differs
//! only in its disambiguators; [`Key::strip_disambiguators`] zeroes
//! `number` and drops the name so that such records compare equal.

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use crate::ondisk::{OmapKey, FIXED_KEY_SIZE};

/// Mask and shift splitting a catalog key header into id and record type.
pub const OBJ_ID_MASK: u64 = 0x0FFF_FFFF_FFFF_FFFF;
pub const OBJ_TYPE_SHIFT: u32 = 60;

/// Catalog record types.
pub const TYPE_SNAP_METADATA: u8 = 1;
pub const TYPE_EXTENT: u8 = 2;
pub const TYPE_INODE: u8 = 3;
pub const TYPE_XATTR: u8 = 4;
pub const TYPE_SIBLING_LINK: u8 = 5;
pub const TYPE_DSTREAM_ID: u8 = 6;
pub const TYPE_CRYPTO_STATE: u8 = 7;
pub const TYPE_FILE_EXTENT: u8 = 8;
pub const TYPE_DIR_REC: u8 = 9;
pub const TYPE_DIR_STATS: u8 = 10;
pub const TYPE_SNAP_NAME: u8 = 11;
pub const TYPE_SIBLING_MAP: u8 = 12;

/// Directory records store the name length and hash packed in one word.
const DREC_LEN_MASK: u32 = 0x0000_03FF;
const DREC_HASH_MASK: u32 = 0xFFFF_FC00;
const DREC_HASH_SHIFT: u32 = 10;

/// Most names fit inline; longer ones spill to the heap.
type NameBuf = SmallVec<[u8; 24]>;

/// A decoded record key, comparable across both tree kinds.
///
/// Field order matters: the derived `Ord` compares `id`, then `kind`, then
/// `number`, then `name`, which is the on-disk sort order of both trees.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Key {
    id: u64,
    kind: u8,
    number: u64,
    name: Option<NameBuf>,
}

impl Key {
    /// A bare catalog key: primary fields only, no disambiguators. This is
    /// the shape callers hand to range queries.
    pub fn catalog(id: u64, kind: u8) -> Self {
        Self {
            id,
            kind,
            number: 0,
            name: None,
        }
    }

    /// The key an object-map lookup searches for.
    pub fn omap(oid: u64) -> Self {
        Self {
            id: oid,
            kind: 0,
            number: 0,
            name: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn name(&self) -> Option<&[u8]> {
        self.name.as_deref()
    }

    /// Drops the fields that individuate records sharing a primary key.
    /// Range queries compare keys in this stripped form.
    pub fn strip_disambiguators(&mut self) {
        self.number = 0;
        self.name = None;
    }
}

/// Decodes an object-map key.
///
/// The transaction id in the second word is not used for ordering: the
/// checker resolves one stable mapping per object id and treats a second
/// mapping for the same id as a repeated leaf key.
pub fn parse_omap_key(buf: &[u8]) -> Result<Key> {
    ensure!(
        buf.len() == FIXED_KEY_SIZE,
        "wrong size of key in object map: {} bytes",
        buf.len()
    );

    let raw = OmapKey::from_bytes(buf)?;
    Ok(Key::omap(raw.oid()))
}

/// Decodes a catalog key: the packed header plus the record type's tail.
pub fn parse_cat_key(buf: &[u8]) -> Result<Key> {
    ensure!(
        buf.len() >= 8,
        "catalog key too small: {} bytes",
        buf.len()
    );

    let id_and_type = u64::from_le_bytes(buf[..8].try_into().expect("8-byte slice"));
    let id = id_and_type & OBJ_ID_MASK;
    let kind = (id_and_type >> OBJ_TYPE_SHIFT) as u8;

    match kind {
        TYPE_DIR_REC => {
            ensure!(buf.len() >= 12, "directory record key too small");
            let len_and_hash = u32::from_le_bytes(buf[8..12].try_into().expect("4-byte slice"));
            let name_len = (len_and_hash & DREC_LEN_MASK) as usize;
            let hash = ((len_and_hash & DREC_HASH_MASK) >> DREC_HASH_SHIFT) as u64;
            let name = read_name(&buf[12..], name_len, "directory record")?;
            Ok(Key {
                id,
                kind,
                number: hash,
                name: Some(name),
            })
        }
        TYPE_XATTR => {
            let name = read_prefixed_name(buf, "xattr")?;
            Ok(Key {
                id,
                kind,
                number: 0,
                name: Some(name),
            })
        }
        TYPE_SNAP_NAME => {
            let name = read_prefixed_name(buf, "snapshot name")?;
            Ok(Key {
                id,
                kind,
                number: 0,
                name: Some(name),
            })
        }
        TYPE_FILE_EXTENT => {
            ensure!(buf.len() == 16, "wrong size of file extent key");
            let addr = u64::from_le_bytes(buf[8..16].try_into().expect("8-byte slice"));
            Ok(Key {
                id,
                kind,
                number: addr,
                name: None,
            })
        }
        TYPE_SIBLING_LINK => {
            ensure!(buf.len() == 16, "wrong size of sibling link key");
            let sibling = u64::from_le_bytes(buf[8..16].try_into().expect("8-byte slice"));
            Ok(Key {
                id,
                kind,
                number: sibling,
                name: None,
            })
        }
        TYPE_SNAP_METADATA | TYPE_EXTENT | TYPE_INODE | TYPE_DSTREAM_ID | TYPE_CRYPTO_STATE
        | TYPE_DIR_STATS | TYPE_SIBLING_MAP => {
            ensure!(
                buf.len() == 8,
                "wrong size of catalog key for record type {}",
                kind
            );
            Ok(Key {
                id,
                kind,
                number: 0,
                name: None,
            })
        }
        _ => bail!("invalid catalog record type {}", kind),
    }
}

/// Reads a name whose u16 length prefix directly follows the key header.
fn read_prefixed_name(buf: &[u8], what: &str) -> Result<NameBuf> {
    ensure!(buf.len() >= 10, "{} key too small", what);
    let name_len = u16::from_le_bytes(buf[8..10].try_into().expect("2-byte slice")) as usize;
    read_name(&buf[10..], name_len, what)
}

/// Validates a counted, NUL-terminated on-disk name and returns it without
/// the terminator.
fn read_name(tail: &[u8], name_len: usize, what: &str) -> Result<NameBuf> {
    ensure!(name_len >= 1, "{} key has an empty name", what);
    ensure!(
        tail.len() == name_len,
        "wrong size of {} key: name length {} does not match",
        what,
        name_len
    );
    ensure!(
        tail[name_len - 1] == 0,
        "{} name is not null-terminated",
        what
    );
    Ok(NameBuf::from_slice(&tail[..name_len - 1]))
}
