//! Persisted bundle index table
//!
//! ```text
//! "BIDX"
//! u32  version (1)
//! u32  bundle count
//!      bundle count x (u32 name length, UTF-8 name, u32 uncompressed size)
//! u32  file count
//!      file count x (u64 path hash, u32 bundle id, u32 offset, u32 size,
//!                    u16 path length, UTF-8 path)
//! u32  CRC32 of everything above
//! ```
//!
//! A path length of 0 means the row is known by hash only.

use super::{BundleIndex, BundleInfo, BundleLocation};
use crate::core::error::{GgpkError, Result};
use crate::core::hash::path_hash;
use std::path::Path;
use tracing::debug;

pub const INDEX_MAGIC: [u8; 4] = *b"BIDX";
pub const INDEX_VERSION: u32 = 1;

/// One file row of the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub hash: u64,
    pub location: BundleLocation,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexTable {
    pub bundles: Vec<BundleInfo>,
    pub rows: Vec<IndexRow>,
}

/// Bounds-checked cursor over the table bytes
struct TableReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> TableReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                GgpkError::MalformedIndex(format!("table truncated at byte {}", self.pos))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn string(&mut self, len: usize) -> Result<String> {
        let at = self.pos;
        String::from_utf8(self.take(len)?.to_vec())
            .map_err(|_| GgpkError::MalformedIndex(format!("invalid UTF-8 string at byte {at}")))
    }
}

impl IndexTable {
    /// Serialize the table; paths longer than a `u16` length are rejected
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&INDEX_MAGIC);
        bytes.extend_from_slice(&INDEX_VERSION.to_le_bytes());

        bytes.extend_from_slice(&(self.bundles.len() as u32).to_le_bytes());
        for bundle in &self.bundles {
            bytes.extend_from_slice(&(bundle.name.len() as u32).to_le_bytes());
            bytes.extend_from_slice(bundle.name.as_bytes());
            bytes.extend_from_slice(&bundle.uncompressed_size.to_le_bytes());
        }

        bytes.extend_from_slice(&(self.rows.len() as u32).to_le_bytes());
        for row in &self.rows {
            let path = row.path.as_deref().unwrap_or("");
            let path_len = u16::try_from(path.len()).map_err(|_| {
                GgpkError::MalformedIndex(format!(
                    "path of row {:#018x} is {} bytes, longer than {}",
                    row.hash,
                    path.len(),
                    u16::MAX
                ))
            })?;
            bytes.extend_from_slice(&row.hash.to_le_bytes());
            bytes.extend_from_slice(&row.location.bundle_id.to_le_bytes());
            bytes.extend_from_slice(&row.location.offset.to_le_bytes());
            bytes.extend_from_slice(&row.location.size.to_le_bytes());
            bytes.extend_from_slice(&path_len.to_le_bytes());
            bytes.extend_from_slice(path.as_bytes());
        }

        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 + 4 + 4 + 4 + 4 {
            return Err(GgpkError::MalformedIndex("table too short".to_string()));
        }

        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(GgpkError::MalformedIndex(format!(
                "checksum mismatch (stored {stored:#010x}, computed {computed:#010x})"
            )));
        }

        let mut reader = TableReader { bytes: body, pos: 0 };
        if reader.take(4)? != INDEX_MAGIC {
            return Err(GgpkError::MalformedIndex("missing BIDX magic".to_string()));
        }
        let version = reader.u32()?;
        if version != INDEX_VERSION {
            return Err(GgpkError::MalformedIndex(format!(
                "unsupported table version {version}"
            )));
        }

        let bundle_count = reader.u32()? as usize;
        let mut bundles = Vec::with_capacity(bundle_count.min(body.len()));
        for _ in 0..bundle_count {
            let name_len = reader.u32()? as usize;
            let name = reader.string(name_len)?;
            let uncompressed_size = reader.u32()?;
            bundles.push(BundleInfo {
                name,
                uncompressed_size,
            });
        }

        let row_count = reader.u32()? as usize;
        let mut rows = Vec::with_capacity(row_count.min(body.len()));
        for _ in 0..row_count {
            let hash = reader.u64()?;
            let location = BundleLocation {
                bundle_id: reader.u32()?,
                offset: reader.u32()?,
                size: reader.u32()?,
            };
            let path_len = reader.u16()? as usize;
            let path = match path_len {
                0 => None,
                len => Some(reader.string(len)?),
            };
            rows.push(IndexRow {
                hash,
                location,
                path,
            });
        }

        if reader.pos != body.len() {
            return Err(GgpkError::MalformedIndex(format!(
                "{} trailing bytes after file table",
                body.len() - reader.pos
            )));
        }

        Ok(IndexTable { bundles, rows })
    }
}

/// Assembles an index table, mostly for tooling and tests
#[derive(Debug, Clone, Default)]
pub struct IndexBuilder {
    table: IndexTable,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bundle and return its id
    pub fn add_bundle(&mut self, name: &str, uncompressed_size: u32) -> u32 {
        self.table.bundles.push(BundleInfo {
            name: name.to_string(),
            uncompressed_size,
        });
        (self.table.bundles.len() - 1) as u32
    }

    /// Add a file row keyed by its path
    pub fn add_file(&mut self, path: &str, bundle_id: u32, offset: u32, size: u32) -> &mut Self {
        self.table.rows.push(IndexRow {
            hash: path_hash(path),
            location: BundleLocation {
                bundle_id,
                offset,
                size,
            },
            path: Some(path.to_string()),
        });
        self
    }

    /// Add a file row known only by its hash
    pub fn add_hashed(&mut self, hash: u64, bundle_id: u32, offset: u32, size: u32) -> &mut Self {
        self.table.rows.push(IndexRow {
            hash,
            location: BundleLocation {
                bundle_id,
                offset,
                size,
            },
            path: None,
        });
        self
    }

    pub fn table(&self) -> &IndexTable {
        &self.table
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.table.to_bytes()
    }

    /// Write the persisted table to a file
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(&path, &bytes)?;
        debug!(
            path = %path.as_ref().display(),
            rows = self.table.rows.len(),
            "wrote bundle index"
        );
        Ok(())
    }

    pub fn build(&self) -> Result<BundleIndex> {
        BundleIndex::from_table(self.table.clone())
    }
}
