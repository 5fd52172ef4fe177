//! Whole-container checks through the public entry point: superblock,
//! container omap, volume superblock, volume omap and catalog in one run.

mod common;

use apfschk::Container;
use common::*;

const VOL_OID: u64 = 500;

/// A minimal but complete container:
///
/// ```text
/// block 0: container superblock (omap 1, one volume, oid 500)
/// block 1: container omap phys (tree root 2)
/// block 2: container omap root leaf   500 -> 3
/// block 3: volume superblock (omap 4, catalog root oid 100)
/// block 4: volume omap phys (tree root 5)
/// block 5: volume omap root leaf      100 -> 6
/// block 6: catalog root leaf
/// ```
fn full_container_image() -> Image {
    let mut img = Image::new(7);
    img.write_container_sb(1, &[VOL_OID]);
    img.write_omap_phys(1, 2);
    img.write_node(
        2,
        &NodeSpec::omap_root_leaf(2, vec![(omap_key_bytes(VOL_OID, 1), omap_val_bytes(3))]),
    );
    img.write_volume_sb(3, VOL_OID, 4, CAT_ROOT_OID);
    img.write_omap_phys(4, 5);
    img.write_node(
        5,
        &NodeSpec::omap_root_leaf(5, vec![(omap_key_bytes(CAT_ROOT_OID, 1), omap_val_bytes(6))]),
    );
    img.write_node(
        6,
        &NodeSpec::cat_root(
            CAT_ROOT_OID,
            0,
            vec![
                (inode_key_bytes(10), b"v1".to_vec()),
                (inode_key_bytes(20), b"v2".to_vec()),
            ],
        ),
    );
    img
}

#[test]
fn clean_container_verifies() {
    let img = full_container_image();
    let (_dir, path) = img.write_to_temp();

    let container = Container::open(&path).unwrap();

    assert_eq!(container.block_size(), BS as u32);
    assert_eq!(container.volume_count(), 1);
    assert_eq!(container.check().unwrap(), 1);
}

#[test]
fn container_without_volumes_checks_its_omap_only() {
    let mut img = Image::new(3);
    img.write_container_sb(1, &[]);
    img.write_omap_phys(1, 2);
    img.write_node(
        2,
        &NodeSpec::omap_root_leaf(2, vec![(omap_key_bytes(9, 1), omap_val_bytes(0xAB))]),
    );
    let (_dir, path) = img.write_to_temp();

    let container = Container::open(&path).unwrap();

    assert_eq!(container.check().unwrap(), 0);
}

#[test]
fn corrupt_catalog_fails_the_whole_check() {
    let mut img = full_container_image();
    img.write_node(
        6,
        &NodeSpec::cat_root(
            CAT_ROOT_OID,
            0,
            vec![
                (inode_key_bytes(20), b"v2".to_vec()),
                (inode_key_bytes(10), b"v1".to_vec()),
            ],
        ),
    );
    let (_dir, path) = img.write_to_temp();

    let container = Container::open(&path).unwrap();
    let result = container.check();

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("out of order"));
}

#[test]
fn missing_volume_mapping_fails_the_check() {
    let mut img = full_container_image();
    // Re-point the container omap at a different volume oid.
    img.write_node(
        2,
        &NodeSpec::omap_root_leaf(2, vec![(omap_key_bytes(VOL_OID + 1, 1), omap_val_bytes(3))]),
    );
    let (_dir, path) = img.write_to_temp();

    let container = Container::open(&path).unwrap();
    let result = container.check();

    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("omap record missing"));
}

#[test]
fn volume_superblock_oid_mismatch_fails_the_check() {
    let mut img = full_container_image();
    img.write_volume_sb(3, VOL_OID + 7, 4, CAT_ROOT_OID);
    let (_dir, path) = img.write_to_temp();

    let container = Container::open(&path).unwrap();
    let result = container.check();

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("wrong object id"));
}
