//! Directory records (`PDIR`)
//!
//! ```text
//! +0   u32       length
//! +4   [4]       "PDIR"
//! +8   u32       name length in UTF-16 units, NUL included
//! +12  u32       entry count
//! +16  [u8; 32]  digest
//! +48  name      UTF-16LE, NUL-terminated
//!      entries   count x (u32 name hash, u64 child offset), sorted by hash
//! ```

use super::{decode_name, encode_name, RecordKind, RecordPrefix};
use crate::core::error::{GgpkError, Result};
use crate::core::hash::name_hash;
use crate::core::io::GgpkFile;

/// Bytes before the name: prefix, name length, entry count, digest
pub const DIRECTORY_FIXED_SIZE: u64 = 48;

/// Bytes per child entry
pub const ENTRY_SIZE: u64 = 12;

/// One child reference inside a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name_hash: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub offset: u64,
    pub length: u32,
    pub name: String,
    /// Opaque digest, preserved across rewrites
    pub digest: [u8; 32],
    pub entries: Vec<DirectoryEntry>,
}

impl DirectoryRecord {
    /// New empty directory, not yet placed in the container
    pub fn new(name: &str) -> Self {
        DirectoryRecord {
            offset: 0,
            length: 0,
            name: name.to_string(),
            digest: [0u8; 32],
            entries: Vec::new(),
        }
    }

    fn name_bytes_len(&self) -> u64 {
        (self.name.encode_utf16().count() as u64 + 1) * 2
    }

    /// True byte extent of the serialized record
    pub fn extent(&self) -> u64 {
        DIRECTORY_FIXED_SIZE + self.name_bytes_len() + self.entries.len() as u64 * ENTRY_SIZE
    }

    /// Absolute position of the first entry
    pub fn entries_offset(&self) -> u64 {
        self.offset + DIRECTORY_FIXED_SIZE + self.name_bytes_len()
    }

    /// Absolute position of the child-offset field of entry `index`
    pub fn entry_offset_field(&self, index: usize) -> u64 {
        self.entries_offset() + index as u64 * ENTRY_SIZE + 4
    }

    /// Indices of entries whose hash equals `hash`
    pub fn candidates(&self, hash: u32) -> std::ops::Range<usize> {
        let start = self.entries.partition_point(|e| e.name_hash < hash);
        let end = self.entries.partition_point(|e| e.name_hash <= hash);
        start..end
    }

    /// Candidate entries for a child name
    pub fn candidates_for(&self, name: &str) -> std::ops::Range<usize> {
        self.candidates(name_hash(name))
    }

    /// Insert an entry keeping the list sorted by hash
    pub fn insert_entry(&mut self, entry: DirectoryEntry) -> usize {
        let index = self.entries.partition_point(|e| e.name_hash <= entry.name_hash);
        self.entries.insert(index, entry);
        index
    }

    /// Remove the entry pointing at `child_offset`
    pub fn remove_entry(&mut self, child_offset: u64) -> Option<DirectoryEntry> {
        let index = self.entries.iter().position(|e| e.offset == child_offset)?;
        Some(self.entries.remove(index))
    }

    /// Index of the entry pointing at `child_offset`
    pub fn position_of(&self, child_offset: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.offset == child_offset)
    }

    pub fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].name_hash <= w[1].name_hash)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let (name, units) = encode_name(&self.name);
        let mut bytes = Vec::with_capacity(self.extent() as usize);

        bytes.extend_from_slice(&self.length.to_le_bytes());
        bytes.extend_from_slice(&RecordKind::Directory.tag());
        bytes.extend_from_slice(&units.to_le_bytes());
        bytes.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.digest);
        bytes.extend_from_slice(&name);
        for entry in &self.entries {
            bytes.extend_from_slice(&entry.name_hash.to_le_bytes());
            bytes.extend_from_slice(&entry.offset.to_le_bytes());
        }

        bytes
    }

    pub fn read_at(file: &mut GgpkFile, offset: u64) -> Result<Self> {
        let prefix = RecordPrefix::expect(file, offset, RecordKind::Directory)?;
        if (prefix.length as u64) < DIRECTORY_FIXED_SIZE {
            return Err(GgpkError::malformed(
                offset,
                format!("directory length {} below fixed header size", prefix.length),
            ));
        }

        let fixed = file.read_vec_at(offset + 8, (DIRECTORY_FIXED_SIZE - 8) as usize)?;
        let name_units = u32::from_le_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]) as u64;
        let count = u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]) as u64;
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&fixed[8..40]);

        let body_len = name_units * 2 + count * ENTRY_SIZE;
        if DIRECTORY_FIXED_SIZE + body_len > prefix.length as u64 {
            return Err(GgpkError::malformed(
                offset,
                format!(
                    "directory body ({} bytes) exceeds declared length {}",
                    DIRECTORY_FIXED_SIZE + body_len,
                    prefix.length
                ),
            ));
        }

        let body = file.read_vec_at(offset + DIRECTORY_FIXED_SIZE, body_len as usize)?;
        let (name_bytes, entry_bytes) = body.split_at((name_units * 2) as usize);
        let name = decode_name(offset, name_bytes)?;

        let entries = entry_bytes
            .chunks_exact(ENTRY_SIZE as usize)
            .map(|chunk| {
                let mut hash = [0u8; 4];
                hash.copy_from_slice(&chunk[0..4]);
                let mut child = [0u8; 8];
                child.copy_from_slice(&chunk[4..12]);
                DirectoryEntry {
                    name_hash: u32::from_le_bytes(hash),
                    offset: u64::from_le_bytes(child),
                }
            })
            .collect();

        Ok(DirectoryRecord {
            offset,
            length: prefix.length,
            name,
            digest,
            entries,
        })
    }

    /// Serialize at `offset` and record where it landed.
    ///
    /// `length` must already cover `extent()`; bytes between the extent and
    /// `offset + length` are left untouched.
    pub fn write_at(&mut self, file: &mut GgpkFile, offset: u64) -> Result<()> {
        if (self.length as u64) < self.extent() {
            return Err(GgpkError::malformed(
                offset,
                format!(
                    "directory length {} smaller than its extent {}",
                    self.length,
                    self.extent()
                ),
            ));
        }
        file.write_all_at(offset, &self.to_bytes())?;
        self.offset = offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_extent_and_field_positions() {
        let mut dir = DirectoryRecord::new("Data");
        dir.offset = 100;
        assert_eq!(dir.extent(), 48 + 10);

        dir.insert_entry(DirectoryEntry {
            name_hash: 7,
            offset: 1000,
        });
        dir.insert_entry(DirectoryEntry {
            name_hash: 3,
            offset: 2000,
        });
        assert_eq!(dir.extent(), 48 + 10 + 24);
        assert_eq!(dir.entries_offset(), 100 + 58);
        assert_eq!(dir.entry_offset_field(1), 100 + 58 + 12 + 4);
        assert!(dir.is_sorted());
        assert_eq!(dir.entries[0].offset, 2000);
    }

    #[test]
    fn test_candidates_for_equal_hashes() {
        let mut dir = DirectoryRecord::new("");
        for (hash, offset) in [(5, 1), (9, 2), (5, 3), (1, 4)] {
            dir.insert_entry(DirectoryEntry {
                name_hash: hash,
                offset,
            });
        }
        let range = dir.candidates(5);
        assert_eq!(range.len(), 2);
        let offsets: Vec<u64> = dir.entries[range].iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![1, 3]);
        assert!(dir.candidates(6).is_empty());
    }

    #[test]
    fn test_write_and_parse() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = GgpkFile::create(temp.path()).unwrap();

        let mut dir = DirectoryRecord::new("Textures");
        dir.digest = [0xAB; 32];
        dir.insert_entry(DirectoryEntry {
            name_hash: 42,
            offset: 4096,
        });
        dir.length = dir.extent() as u32 + 20;
        dir.write_at(&mut file, 64).unwrap();
        file.grow_to(64 + dir.length as u64).unwrap();
        assert_eq!(dir.offset, 64);

        let parsed = DirectoryRecord::read_at(&mut file, 64).unwrap();
        assert_eq!(parsed, dir);
    }

    #[test]
    fn test_write_rejects_short_length() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = GgpkFile::create(temp.path()).unwrap();

        let mut dir = DirectoryRecord::new("Data");
        dir.length = 10;
        assert!(dir.write_at(&mut file, 0).is_err());
    }

    #[test]
    fn test_entry_count_exceeding_length_is_malformed() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = GgpkFile::create(temp.path()).unwrap();

        let mut dir = DirectoryRecord::new("a");
        dir.length = dir.extent() as u32;
        dir.write_at(&mut file, 0).unwrap();
        // Claim 3 entries without the bytes to back them
        file.write_u32_at(12, 3).unwrap();
        file.grow_to(4096).unwrap();

        assert!(matches!(
            DirectoryRecord::read_at(&mut file, 0),
            Err(GgpkError::MalformedRecord { offset: 0, .. })
        ));
    }

    #[test]
    fn test_wrong_tag_is_malformed() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = GgpkFile::create(temp.path()).unwrap();

        let mut bytes = 64u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"FILE");
        bytes.resize(64, 0);
        file.write_all_at(0, &bytes).unwrap();

        assert!(matches!(
            DirectoryRecord::read_at(&mut file, 0),
            Err(GgpkError::MalformedRecord { .. })
        ));
    }
}
