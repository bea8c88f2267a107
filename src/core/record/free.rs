//! Free records (`FREE`)
//!
//! A free record marks a reclaimed byte range. Only the first 16 bytes are
//! meaningful; the rest of the range is left as it was.
//!
//! ```text
//! +0  u32  length
//! +4  [4]  "FREE"
//! +8  u64  offset of the next free record (0 = end of chain)
//! ```

use super::{RecordKind, RecordPrefix};
use crate::core::error::{GgpkError, Result};
use crate::core::io::GgpkFile;

/// Smallest range that can host a free record
pub const FREE_RECORD_MIN: u64 = 16;

/// Byte position of the length field inside a free record
pub const LENGTH_FIELD: u64 = 0;

/// Byte position of the next-free field inside a free record
pub const NEXT_FIELD: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRecord {
    pub offset: u64,
    pub length: u32,
    pub next: u64,
}

impl FreeRecord {
    pub fn new(offset: u64, length: u32, next: u64) -> Self {
        FreeRecord {
            offset,
            length,
            next,
        }
    }

    /// First byte after the reclaimed range
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }

    pub fn to_bytes(&self) -> [u8; FREE_RECORD_MIN as usize] {
        let mut bytes = [0u8; FREE_RECORD_MIN as usize];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&RecordKind::Free.tag());
        bytes[8..16].copy_from_slice(&self.next.to_le_bytes());
        bytes
    }

    pub fn read_at(file: &mut GgpkFile, offset: u64) -> Result<Self> {
        let prefix = RecordPrefix::expect(file, offset, RecordKind::Free)?;
        if (prefix.length as u64) < FREE_RECORD_MIN {
            return Err(GgpkError::malformed(
                offset,
                format!("free record length {} below minimum", prefix.length),
            ));
        }

        let next = file.read_u64_at(offset + NEXT_FIELD)?;

        Ok(FreeRecord {
            offset,
            length: prefix.length,
            next,
        })
    }

    /// Write the 16-byte record header at `offset` and record where it landed
    pub fn write_at(&mut self, file: &mut GgpkFile, offset: u64) -> Result<()> {
        if (self.length as u64) < FREE_RECORD_MIN {
            return Err(GgpkError::InvalidRange {
                offset,
                length: self.length as u64,
                reason: "too small to host a free record".to_string(),
            });
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
    fn test_free_record_roundtrip() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = GgpkFile::create(temp.path()).unwrap();
        file.grow_to(256).unwrap();

        let mut record = FreeRecord::new(0, 100, 200);
        record.write_at(&mut file, 40).unwrap();
        assert_eq!(record.offset, 40);
        assert_eq!(record.end(), 140);

        let parsed = FreeRecord::read_at(&mut file, 40).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_too_small_rejected() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = GgpkFile::create(temp.path()).unwrap();

        let mut record = FreeRecord::new(0, 12, 0);
        assert!(matches!(
            record.write_at(&mut file, 0),
            Err(GgpkError::InvalidRange { .. })
        ));
    }
}
