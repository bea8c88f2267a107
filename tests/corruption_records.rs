//! Record corruption detection tests
//!
//! Damaged bytes on disk must surface as typed errors, never as wrong data

use ggpk_rs::core::FreeRecord;
use ggpk_rs::{Container, Ggpk, GgpkError, GgpkOptions};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn patch(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

fn populated() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Content.ggpk");
    let ggpk = Ggpk::create(&path, GgpkOptions::default()).unwrap();
    ggpk.add_file("Data/a.dat", &[1u8; 200]).unwrap();
    ggpk.add_file("Data/b.dat", &[2u8; 200]).unwrap();
    ggpk.add_file("Data/c.dat", &[3u8; 200]).unwrap();
    ggpk.add_file("Data/d.dat", &[4u8; 200]).unwrap();
    ggpk.sync().unwrap();
    (dir, path)
}

/// Two free records that are not adjacent
fn two_free_records(path: &Path) -> Vec<FreeRecord> {
    let ggpk = Ggpk::open(path, GgpkOptions::default()).unwrap();
    ggpk.remove("Data/a.dat").unwrap();
    ggpk.remove("Data/c.dat").unwrap();
    ggpk.sync().unwrap();
    let free = ggpk.free_records();
    assert!(free.len() >= 2);
    free
}

#[test]
fn test_bad_magic_rejected() {
    let (_dir, path) = populated();
    patch(&path, 4, b"NOPE");

    assert!(matches!(
        Ggpk::open(&path, GgpkOptions::default()),
        Err(GgpkError::InvalidMagic)
    ));
}

#[test]
fn test_unknown_version_rejected() {
    let (_dir, path) = populated();
    patch(&path, 8, &99u32.to_le_bytes());

    assert!(matches!(
        Ggpk::open(&path, GgpkOptions::default()),
        Err(GgpkError::UnsupportedVersion(99))
    ));
}

#[test]
fn test_bad_record_tag_is_malformed() {
    let (_dir, path) = populated();
    let record = {
        let ggpk = Ggpk::open(&path, GgpkOptions::default()).unwrap();
        ggpk.find_file("Data/b.dat").unwrap().unwrap()
    };
    patch(&path, record.offset + 4, b"JUNK");

    let container = Container::load(&path).unwrap();
    assert!(matches!(
        container.read("Data/b.dat"),
        Err(GgpkError::MalformedRecord { offset, .. }) if offset == record.offset
    ));
    assert_eq!(container.read("Data/a.dat").unwrap(), vec![1u8; 200]);
    assert!(container.ggpk().verify_tree(false).is_err());

    // One damaged record does not sink the rest of a batch
    let report = container.read_many(&["Data/a.dat", "Data/b.dat"]).unwrap();
    assert_eq!(report.items[0].result.as_ref().unwrap(), &vec![1u8; 200]);
    assert!(matches!(
        report.items[1].result,
        Err(GgpkError::MalformedRecord { .. })
    ));
}

#[test]
fn test_length_past_eof_is_malformed() {
    let (_dir, path) = populated();
    let record = {
        let ggpk = Ggpk::open(&path, GgpkOptions::default()).unwrap();
        ggpk.find_file("Data/d.dat").unwrap().unwrap()
    };
    patch(&path, record.offset, &u32::MAX.to_le_bytes());

    let ggpk = Ggpk::open(&path, GgpkOptions::default()).unwrap();
    assert!(matches!(
        ggpk.lookup("Data/d.dat"),
        Err(GgpkError::MalformedRecord { .. })
    ));
}

#[test]
fn test_root_offset_outside_container() {
    let (_dir, path) = populated();
    patch(&path, 12, &u64::MAX.to_le_bytes());

    assert!(matches!(
        Ggpk::open(&path, GgpkOptions::default()),
        Err(GgpkError::MalformedRecord { .. })
    ));
}

#[test]
fn test_free_chain_cycle_detected_on_open() {
    let (_dir, path) = populated();
    let free = two_free_records(&path);
    let last = free[free.len() - 1];
    patch(&path, last.offset + 8, &free[0].offset.to_le_bytes());

    assert!(matches!(
        Ggpk::open(&path, GgpkOptions::default()),
        Err(GgpkError::MalformedRecord { offset, .. }) if offset == free[0].offset
    ));
}

#[test]
fn test_free_chain_pointing_at_file_record() {
    let (_dir, path) = populated();
    two_free_records(&path);
    let target = {
        let ggpk = Ggpk::open(&path, GgpkOptions::default()).unwrap();
        ggpk.find_file("Data/b.dat").unwrap().unwrap()
    };
    patch(&path, 20, &target.offset.to_le_bytes());

    assert!(matches!(
        Ggpk::open(&path, GgpkOptions::default()),
        Err(GgpkError::MalformedRecord { .. })
    ));
}

#[test]
fn test_revalidate_sees_external_damage() {
    let (_dir, path) = populated();
    let free = two_free_records(&path);
    let ggpk = Ggpk::open(&path, GgpkOptions::default()).unwrap();
    ggpk.revalidate().unwrap();
    assert!(!ggpk.is_poisoned());

    let last = free[free.len() - 1];
    patch(&path, last.offset + 8, &free[0].offset.to_le_bytes());

    assert!(matches!(
        ggpk.revalidate(),
        Err(GgpkError::MalformedRecord { .. })
    ));
}

#[test]
fn test_invalid_free_ranges_rejected() {
    let (_dir, path) = populated();
    let free = two_free_records(&path);
    let ggpk = Ggpk::open(&path, GgpkOptions::default()).unwrap();

    // Overlaps the header
    assert!(matches!(
        ggpk.free(0, 64),
        Err(GgpkError::InvalidRange { .. })
    ));
    // Too small to host a free record
    assert!(matches!(
        ggpk.free(ggpk.len() - 8, 8),
        Err(GgpkError::InvalidRange { .. })
    ));
    // Past the end of the container
    assert!(matches!(
        ggpk.free(ggpk.len(), 64),
        Err(GgpkError::InvalidRange { .. })
    ));
    // End wraps past u64::MAX
    assert!(matches!(
        ggpk.free(u64::MAX - 8, 32),
        Err(GgpkError::InvalidRange { .. })
    ));
    // Already free
    assert!(matches!(
        ggpk.free(free[0].offset, free[0].length as u64),
        Err(GgpkError::InvalidRange { .. })
    ));

    assert!(!ggpk.is_poisoned());
    assert_eq!(ggpk.free_records(), free);
}

#[test]
fn test_digest_mismatch_reported() {
    let (_dir, path) = populated();
    let record = {
        let ggpk = Ggpk::open(&path, GgpkOptions::default()).unwrap();
        ggpk.find_file("Data/c.dat").unwrap().unwrap()
    };
    patch(&path, record.data_offset() + 10, b"tampered");

    let ggpk = Ggpk::open(&path, GgpkOptions::default()).unwrap();
    let stats = ggpk.verify_tree(true).unwrap();
    assert_eq!(stats.digest_mismatches, vec!["Data/c.dat".to_string()]);
}
