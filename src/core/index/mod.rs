//! Content-addressed bundle index
//!
//! Maps the 64-bit FNV-1a hash of a normalized path (see
//! [`crate::core::hash::path_key`]) to a byte range inside a decompressed
//! bundle. The index is loaded once and never changes afterwards.
//!
//! Rows that carry their path are checked on lookup, so two different paths
//! that hash alike are reported as [`GgpkError::IndexCollision`] instead of
//! silently returning the wrong bytes. Rows without a path are trusted by
//! hash alone.

pub mod table;

pub use table::{IndexBuilder, IndexRow, IndexTable};

use crate::core::error::{GgpkError, Result};
use crate::core::hash::{fnv1a64, path_key};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// A compressed blob referenced by the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleInfo {
    /// Bundle name without the `.bundle.bin` suffix
    pub name: String,
    pub uncompressed_size: u32,
}

/// Where a file lives inside a decompressed bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleLocation {
    pub bundle_id: u32,
    pub offset: u32,
    pub size: u32,
}

impl BundleLocation {
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Entry {
        location: BundleLocation,
        path: Option<String>,
    },
    /// Several different paths share this hash
    Collided(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct BundleIndex {
    bundles: Vec<BundleInfo>,
    slots: AHashMap<u64, Slot>,
}

impl BundleIndex {
    /// Validate a parsed table and build the lookup map
    pub fn from_table(table: IndexTable) -> Result<Self> {
        let mut slots: AHashMap<u64, Slot> = AHashMap::with_capacity(table.rows.len());
        let mut collided = 0usize;

        for row in table.rows {
            let bundle = table
                .bundles
                .get(row.location.bundle_id as usize)
                .ok_or_else(|| {
                    GgpkError::MalformedIndex(format!(
                        "row {:#018x} references unknown bundle {}",
                        row.hash, row.location.bundle_id
                    ))
                })?;
            if row.location.end() > bundle.uncompressed_size as u64 {
                return Err(GgpkError::MalformedIndex(format!(
                    "row {:#018x} runs past the end of bundle {:?}",
                    row.hash, bundle.name
                )));
            }

            match slots.get_mut(&row.hash) {
                None => {
                    slots.insert(
                        row.hash,
                        Slot::Entry {
                            location: row.location,
                            path: row.path,
                        },
                    );
                }
                Some(slot) => {
                    let mut paths = match slot {
                        Slot::Entry { path, .. } => {
                            if path.is_some()
                                && row.path.is_some()
                                && path.as_deref().map(path_key) == row.path.as_deref().map(path_key)
                            {
                                return Err(GgpkError::MalformedIndex(format!(
                                    "duplicate row for {:?}",
                                    row.path.unwrap_or_default()
                                )));
                            }
                            collided += 1;
                            path.iter().cloned().collect::<Vec<_>>()
                        }
                        Slot::Collided(paths) => std::mem::take(paths),
                    };
                    paths.extend(row.path);
                    *slot = Slot::Collided(paths);
                }
            }
        }

        if collided > 0 {
            warn!(hashes = collided, "bundle index contains colliding path hashes");
        }

        Ok(BundleIndex {
            bundles: table.bundles,
            slots,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_table(IndexTable::from_bytes(bytes)?)
    }

    /// Load a persisted table from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(&path)?;
        let index = Self::from_bytes(&bytes)?;
        info!(
            path = %path.as_ref().display(),
            bundles = index.bundles.len(),
            files = index.len(),
            "loaded bundle index"
        );
        Ok(index)
    }

    /// Number of distinct hashes
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn bundles(&self) -> &[BundleInfo] {
        &self.bundles
    }

    pub fn bundle(&self, id: u32) -> Option<&BundleInfo> {
        self.bundles.get(id as usize)
    }

    /// Look up a path. `Ok(None)` when no row has its hash.
    pub fn resolve(&self, path: &str) -> Result<Option<BundleLocation>> {
        let key = path_key(path);
        let hash = fnv1a64(key.as_bytes());

        match self.slots.get(&hash) {
            None => Ok(None),
            Some(Slot::Entry { location, path: stored }) => match stored {
                Some(stored) if path_key(stored) != key => Err(GgpkError::IndexCollision {
                    path: path.to_string(),
                    hash,
                }),
                _ => Ok(Some(*location)),
            },
            Some(Slot::Collided(_)) => Err(GgpkError::IndexCollision {
                path: path.to_string(),
                hash,
            }),
        }
    }

    /// Look up a precomputed hash; collided hashes are errors
    pub fn resolve_hash(&self, hash: u64) -> Result<Option<BundleLocation>> {
        match self.slots.get(&hash) {
            None => Ok(None),
            Some(Slot::Entry { location, .. }) => Ok(Some(*location)),
            Some(Slot::Collided(paths)) => Err(GgpkError::IndexCollision {
                path: paths.join(", "),
                hash,
            }),
        }
    }

    /// Stored paths of unambiguous rows, in no particular order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.slots.values().filter_map(|slot| match slot {
            Slot::Entry {
                path: Some(path), ..
            } => Some(path.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::path_hash;

    #[test]
    fn test_resolve_is_case_insensitive() {
        let mut builder = IndexBuilder::new();
        let id = builder.add_bundle("Data", 100);
        builder.add_file("Data/Mods.dat", id, 10, 20);
        let index = builder.build().unwrap();

        let expected = BundleLocation {
            bundle_id: id,
            offset: 10,
            size: 20,
        };
        assert_eq!(index.resolve("Data/Mods.dat").unwrap(), Some(expected));
        assert_eq!(index.resolve("data/mods.DAT").unwrap(), Some(expected));
        assert_eq!(index.resolve("Data/Other.dat").unwrap(), None);
        assert_eq!(index.bundle(id).unwrap().name, "Data");
    }

    #[test]
    fn test_hash_only_rows_are_trusted() {
        let mut builder = IndexBuilder::new();
        let id = builder.add_bundle("Data", 100);
        builder.add_hashed(path_hash("Data/a.dat"), id, 0, 5);
        let index = builder.build().unwrap();

        assert!(index.resolve("Data/a.dat").unwrap().is_some());
        assert_eq!(index.paths().count(), 0);
    }

    #[test]
    fn test_fabricated_collision_in_table() {
        let mut builder = IndexBuilder::new();
        let id = builder.add_bundle("Data", 100);
        let hash = path_hash("Data/a.dat");
        builder.add_file("Data/a.dat", id, 0, 5);
        // Same hash stored under a different path
        builder.add_hashed(hash, id, 5, 5);
        let mut table = builder.table().clone();
        table.rows[1].path = Some("Data/b.dat".to_string());

        let index = BundleIndex::from_table(table).unwrap();
        assert!(matches!(
            index.resolve("Data/a.dat"),
            Err(GgpkError::IndexCollision { hash: h, .. }) if h == hash
        ));
        assert!(index.resolve_hash(hash).is_err());
    }

    #[test]
    fn test_stored_path_mismatch_is_collision() {
        let mut builder = IndexBuilder::new();
        let id = builder.add_bundle("Data", 100);
        builder.add_file("Data/a.dat", id, 0, 5);
        let mut table = builder.table().clone();
        // Row claims another path's hash
        table.rows[0].hash = path_hash("Data/z.dat");

        let index = BundleIndex::from_table(table).unwrap();
        assert!(matches!(
            index.resolve("Data/z.dat"),
            Err(GgpkError::IndexCollision { .. })
        ));
    }

    #[test]
    fn test_duplicate_row_rejected() {
        let mut builder = IndexBuilder::new();
        let id = builder.add_bundle("Data", 100);
        builder.add_file("Data/a.dat", id, 0, 5);
        builder.add_file("DATA/A.DAT", id, 5, 5);

        assert!(matches!(
            builder.build(),
            Err(GgpkError::MalformedIndex(_))
        ));
    }

    #[test]
    fn test_row_validation() {
        let mut builder = IndexBuilder::new();
        let id = builder.add_bundle("Data", 100);
        builder.add_file("Data/a.dat", id, 90, 20);
        assert!(matches!(
            builder.build(),
            Err(GgpkError::MalformedIndex(_))
        ));

        let mut builder = IndexBuilder::new();
        builder.add_file("Data/a.dat", 3, 0, 1);
        assert!(matches!(
            builder.build(),
            Err(GgpkError::MalformedIndex(_))
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("_.index.bin");

        let mut builder = IndexBuilder::new();
        let id = builder.add_bundle("Data", 64);
        builder.add_file("Data/a.dat", id, 0, 64);
        builder.write_to(&path).unwrap();

        let index = BundleIndex::load(&path).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.paths().collect::<Vec<_>>(), vec!["Data/a.dat"]);
    }
}
