//! Lookup order across the record tree and the bundle index
//!
//! Covers source preference, fallthrough on misses, collision reporting,
//! format filtering, batch reads, and both places bundles can live.

use ggpk_rs::core::hash::path_hash;
use ggpk_rs::core::index::{IndexRow, IndexTable};
use ggpk_rs::core::ContainerBundles;
use ggpk_rs::{
    BundleIndex, BundleInfo, BundleLocation, BundleWriter, CompressionConfig, Container,
    ContainerBuilder, DataFormat, Ggpk, GgpkError, GgpkOptions, IndexBuilder, SourceKind,
    SourceMode,
};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const MODS_BUNDLE: &[u8] = b"bundled-mods";
const ONLY_BUNDLE: &[u8] = b"only in the bundle";

struct Fixture {
    _dir: TempDir,
    container: PathBuf,
    bundles: PathBuf,
    index: PathBuf,
}

/// One bundle holding `Data/Mods.dat64` and `Data/OnlyBundle.dat`; the tree
/// holds its own `Data/Mods.dat64` plus `Data/OnlyTree.txt`
fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let container = dir.path().join("Content.ggpk");
    let bundles = dir.path().join("Bundles2");
    std::fs::create_dir_all(&bundles).unwrap();

    let ggpk = Ggpk::create(&container, GgpkOptions::default()).unwrap();
    ggpk.add_file("Data/Mods.dat64", b"tree-mods").unwrap();
    ggpk.add_file("Data/OnlyTree.txt", b"only in the tree").unwrap();
    drop(ggpk);

    let mut payload = MODS_BUNDLE.to_vec();
    payload.extend_from_slice(ONLY_BUNDLE);
    let blob = BundleWriter::new(CompressionConfig::zstd())
        .encode(&payload)
        .unwrap();
    std::fs::write(bundles.join("Data.bundle.bin"), &blob).unwrap();

    let mut builder = IndexBuilder::new();
    let id = builder.add_bundle("Data", payload.len() as u32);
    builder
        .add_file("Data/Mods.dat64", id, 0, MODS_BUNDLE.len() as u32)
        .add_file(
            "Data/OnlyBundle.dat",
            id,
            MODS_BUNDLE.len() as u32,
            ONLY_BUNDLE.len() as u32,
        );
    let index = bundles.join("_.index.bin");
    builder.write_to(&index).unwrap();

    Fixture {
        _dir: dir,
        container,
        bundles,
        index,
    }
}

fn open(fx: &Fixture, mode: SourceMode) -> Container {
    ContainerBuilder::new()
        .path(&fx.container)
        .source_mode(mode)
        .bundle_dir(&fx.bundles)
        .index_path(&fx.index)
        .build()
        .unwrap()
}

#[test]
fn test_tree_first_prefers_tree() {
    let fx = fixture();
    let container = open(&fx, SourceMode::TreeFirst);

    let stream = container.open("Data/Mods.dat64").unwrap();
    assert_eq!(stream.source_kind(), SourceKind::Tree);
    assert_eq!(stream.into_bytes().unwrap(), b"tree-mods");
}

#[test]
fn test_index_first_prefers_index() {
    let fx = fixture();
    let container = open(&fx, SourceMode::IndexFirst);

    let stream = container.open("Data/Mods.dat64").unwrap();
    assert_eq!(stream.source_kind(), SourceKind::Bundle);
    assert_eq!(stream.format(), DataFormat::Dat64);
    assert_eq!(stream.into_bytes().unwrap(), MODS_BUNDLE);
}

#[test]
fn test_misses_fall_through() {
    let fx = fixture();

    let tree_first = open(&fx, SourceMode::TreeFirst);
    assert_eq!(tree_first.read("Data/OnlyBundle.dat").unwrap(), ONLY_BUNDLE);

    let index_first = open(&fx, SourceMode::IndexFirst);
    assert_eq!(
        index_first.read("Data/OnlyTree.txt").unwrap(),
        b"only in the tree"
    );
    assert!(matches!(
        index_first.open("Data/Nowhere.dat"),
        Err(GgpkError::FileNotFound(_))
    ));
}

#[test]
fn test_exclusive_modes() {
    let fx = fixture();

    let tree_only = open(&fx, SourceMode::TreeOnly);
    assert!(tree_only.index().is_none());
    assert!(!tree_only.exists("Data/OnlyBundle.dat").unwrap());

    let index_only = open(&fx, SourceMode::IndexOnly);
    assert!(!index_only.exists("Data/OnlyTree.txt").unwrap());
    assert_eq!(index_only.read("data/onlybundle.DAT").unwrap(), ONLY_BUNDLE);
}

fn colliding_index() -> BundleIndex {
    // A row whose hash belongs to one path but whose stored path is another
    BundleIndex::from_table(IndexTable {
        bundles: vec![BundleInfo {
            name: "Data".to_string(),
            uncompressed_size: 64,
        }],
        rows: vec![IndexRow {
            hash: path_hash("Data/Shared.dat"),
            location: BundleLocation {
                bundle_id: 0,
                offset: 0,
                size: 8,
            },
            path: Some("Data/Impostor.dat".to_string()),
        }],
    })
    .unwrap()
}

#[test]
fn test_collision_is_reported_not_skipped() {
    let fx = fixture();

    let index_first = ContainerBuilder::new()
        .path(&fx.container)
        .source_mode(SourceMode::IndexFirst)
        .with_index(colliding_index())
        .bundle_dir(&fx.bundles)
        .build()
        .unwrap();
    assert!(matches!(
        index_first.open("Data/Shared.dat"),
        Err(GgpkError::IndexCollision { .. })
    ));

    // A tree hit never consults the index
    let ggpk = Ggpk::open(&fx.container, GgpkOptions::default()).unwrap();
    ggpk.add_file("Data/Shared.dat", b"tree copy").unwrap();
    drop(ggpk);

    let tree_first = ContainerBuilder::new()
        .path(&fx.container)
        .with_index(colliding_index())
        .bundle_dir(&fx.bundles)
        .build()
        .unwrap();
    assert_eq!(tree_first.read("Data/Shared.dat").unwrap(), b"tree copy");
}

#[test]
fn test_open_as_filters_bundle_files() {
    let fx = fixture();
    let container = open(&fx, SourceMode::IndexFirst);

    let stream = container
        .open_as("Data/OnlyBundle.dat", &[DataFormat::Dat, DataFormat::Dat64])
        .unwrap();
    assert_eq!(stream.len(), ONLY_BUNDLE.len() as u64);

    assert!(matches!(
        container.open_as("Data/OnlyTree.txt", &[DataFormat::Dat]),
        Err(GgpkError::UnsupportedFormat {
            found: DataFormat::Text,
            ..
        })
    ));
}

#[test]
fn test_batch_mixes_sources_and_failures() {
    let fx = fixture();
    let container = ContainerBuilder::new()
        .path(&fx.container)
        .bundle_dir(&fx.bundles)
        .index_path(&fx.index)
        .read_workers(3)
        .build()
        .unwrap();

    let paths = [
        "Data/Mods.dat64",
        "Data/OnlyBundle.dat",
        "Data/Missing.dat",
        "Data/OnlyTree.txt",
        "Data/Mods.dat64/child",
    ];
    let report = container.read_many(&paths).unwrap();

    assert_eq!(report.items.len(), paths.len());
    for (item, path) in report.items.iter().zip(paths) {
        assert_eq!(item.path, path);
    }
    assert_eq!(report.items[0].result.as_ref().unwrap(), b"tree-mods");
    assert_eq!(report.items[1].result.as_ref().unwrap(), ONLY_BUNDLE);
    assert!(matches!(
        report.items[2].result,
        Err(GgpkError::FileNotFound(_))
    ));
    assert_eq!(report.items[3].result.as_ref().unwrap(), b"only in the tree");
    assert!(report.items[4].result.is_err());

    let summary = report.summary();
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 2);
    assert!(!report.is_complete());
}

#[test]
fn test_batch_keeps_going_past_damaged_record() {
    let fx = fixture();
    let offset = {
        let ggpk = Ggpk::open(&fx.container, GgpkOptions::default()).unwrap();
        ggpk.find_file("Data/OnlyTree.txt").unwrap().unwrap().offset
    };
    let mut file = OpenOptions::new().write(true).open(&fx.container).unwrap();
    file.seek(SeekFrom::Start(offset + 4)).unwrap();
    file.write_all(b"JUNK").unwrap();
    file.sync_all().unwrap();
    drop(file);

    let container = open(&fx, SourceMode::TreeFirst);
    let report = container
        .read_many(&["Data/Mods.dat64", "Data/OnlyTree.txt", "Data/OnlyBundle.dat"])
        .unwrap();

    assert_eq!(report.items[0].result.as_ref().unwrap(), b"tree-mods");
    assert!(matches!(
        report.items[1].result,
        Err(GgpkError::MalformedRecord { offset: at, .. }) if at == offset
    ));
    assert_eq!(report.items[2].result.as_ref().unwrap(), ONLY_BUNDLE);
    assert_eq!(report.summary().failed, 1);
}

#[test]
fn test_missing_bundle_file_is_codec_error() {
    let fx = fixture();
    std::fs::remove_file(fx.bundles.join("Data.bundle.bin")).unwrap();
    let container = open(&fx, SourceMode::IndexOnly);

    assert!(matches!(
        container.read("Data/OnlyBundle.dat"),
        Err(GgpkError::Codec(_))
    ));

    let report = container.read_many(&["Data/OnlyBundle.dat"]).unwrap();
    assert!(matches!(report.items[0].result, Err(GgpkError::Codec(_))));
}

fn embed(container: &Path, bundles: &Path) {
    let ggpk = Ggpk::open(container, GgpkOptions::default()).unwrap();
    let blob = std::fs::read(bundles.join("Data.bundle.bin")).unwrap();
    let index = std::fs::read(bundles.join("_.index.bin")).unwrap();
    ggpk.add_file(&ContainerBundles::record_path("Data"), &blob)
        .unwrap();
    ggpk.add_file("Bundles2/_.index.bin", &index).unwrap();
}

#[test]
fn test_bundles_stored_in_container() {
    let fx = fixture();
    embed(&fx.container, &fx.bundles);
    std::fs::remove_dir_all(&fx.bundles).unwrap();

    let container = ContainerBuilder::new()
        .path(&fx.container)
        .source_mode(SourceMode::IndexFirst)
        .build()
        .unwrap();

    assert_eq!(container.index().unwrap().len(), 2);
    assert_eq!(container.read("Data/Mods.dat64").unwrap(), MODS_BUNDLE);
    assert_eq!(container.read("Data/OnlyBundle.dat").unwrap(), ONLY_BUNDLE);
}
