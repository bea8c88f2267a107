//! File records (`FILE`)
//!
//! ```text
//! +0   u32       length
//! +4   [4]       "FILE"
//! +8   u32       name length in UTF-16 units, NUL included
//! +12  [u8; 32]  SHA-256 of the payload
//! +44  u32       payload length
//! +48  name      UTF-16LE, NUL-terminated
//!      payload   immediately after the name
//! ```

use super::{decode_name, encode_name, RecordKind, RecordPrefix};
use crate::core::error::{GgpkError, Result};
use crate::core::format::DataFormat;
use crate::core::io::GgpkFile;
use sha2::{Digest, Sha256};

/// Bytes before the name: prefix, name length, digest, payload length
pub const FILE_FIXED_SIZE: u64 = 48;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub offset: u64,
    pub length: u32,
    pub name: String,
    /// SHA-256 of the payload
    pub digest: [u8; 32],
    pub data_length: u32,
}

/// SHA-256 of a payload
pub fn digest_of(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

impl FileRecord {
    /// Describe a payload; the record is not placed until `write_at`
    pub fn new(name: &str, data: &[u8]) -> Result<Self> {
        let data_length = u32::try_from(data.len()).map_err(|_| GgpkError::AllocationExhausted {
            requested: data.len() as u64,
        })?;

        Ok(FileRecord {
            offset: 0,
            length: 0,
            name: name.to_string(),
            digest: digest_of(data),
            data_length,
        })
    }

    fn name_bytes_len(&self) -> u64 {
        (self.name.encode_utf16().count() as u64 + 1) * 2
    }

    /// Size of everything before the payload
    pub fn header_size(&self) -> u64 {
        FILE_FIXED_SIZE + self.name_bytes_len()
    }

    /// True byte extent: header plus payload
    pub fn extent(&self) -> u64 {
        self.header_size() + self.data_length as u64
    }

    /// Absolute position of the first payload byte
    pub fn data_offset(&self) -> u64 {
        self.offset + self.header_size()
    }

    /// Content type declared by the file name
    pub fn format(&self) -> DataFormat {
        DataFormat::from_path(&self.name)
    }

    fn header_bytes(&self) -> Vec<u8> {
        let (name, units) = encode_name(&self.name);
        let mut bytes = Vec::with_capacity(self.header_size() as usize);

        bytes.extend_from_slice(&self.length.to_le_bytes());
        bytes.extend_from_slice(&RecordKind::File.tag());
        bytes.extend_from_slice(&units.to_le_bytes());
        bytes.extend_from_slice(&self.digest);
        bytes.extend_from_slice(&self.data_length.to_le_bytes());
        bytes.extend_from_slice(&name);

        bytes
    }

    pub fn read_at(file: &mut GgpkFile, offset: u64) -> Result<Self> {
        let prefix = RecordPrefix::expect(file, offset, RecordKind::File)?;
        if (prefix.length as u64) < FILE_FIXED_SIZE {
            return Err(GgpkError::malformed(
                offset,
                format!("file length {} below fixed header size", prefix.length),
            ));
        }

        let fixed = file.read_vec_at(offset + 8, (FILE_FIXED_SIZE - 8) as usize)?;
        let name_units = u32::from_le_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]) as u64;
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&fixed[4..36]);
        let data_length = u32::from_le_bytes([fixed[36], fixed[37], fixed[38], fixed[39]]);

        let extent = FILE_FIXED_SIZE + name_units * 2 + data_length as u64;
        if extent > prefix.length as u64 {
            return Err(GgpkError::malformed(
                offset,
                format!(
                    "file extent ({extent} bytes) exceeds declared length {}",
                    prefix.length
                ),
            ));
        }

        let name_bytes = file.read_vec_at(offset + FILE_FIXED_SIZE, (name_units * 2) as usize)?;
        let name = decode_name(offset, &name_bytes)?;

        Ok(FileRecord {
            offset,
            length: prefix.length,
            name,
            digest,
            data_length,
        })
    }

    /// Serialize header and payload at `offset` and record where it landed
    pub fn write_at(&mut self, file: &mut GgpkFile, offset: u64, data: &[u8]) -> Result<()> {
        if data.len() as u64 != self.data_length as u64 {
            return Err(GgpkError::malformed(
                offset,
                format!(
                    "payload is {} bytes, record declares {}",
                    data.len(),
                    self.data_length
                ),
            ));
        }
        if (self.length as u64) < self.extent() {
            return Err(GgpkError::malformed(
                offset,
                format!(
                    "file length {} smaller than its extent {}",
                    self.length,
                    self.extent()
                ),
            ));
        }

        let mut bytes = self.header_bytes();
        bytes.extend_from_slice(data);
        file.write_all_at(offset, &bytes)?;
        self.offset = offset;
        Ok(())
    }

    /// Read the payload bytes
    pub fn read_data(&self, file: &mut GgpkFile) -> Result<Vec<u8>> {
        file.read_vec_at(self.data_offset(), self.data_length as usize)
    }

    /// Recompute the payload digest and compare with the stored one
    pub fn verify(&self, file: &mut GgpkFile) -> Result<bool> {
        let data = self.read_data(file)?;
        Ok(digest_of(&data) == self.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_layout_sizes() {
        let record = FileRecord::new("Example.dat", &[0u8; 100]).unwrap();
        // 48 fixed + 12 UTF-16 units
        assert_eq!(record.header_size(), 72);
        assert_eq!(record.extent(), 172);
        assert_eq!(record.format(), DataFormat::Dat);
    }

    #[test]
    fn test_write_read_payload() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = GgpkFile::create(temp.path()).unwrap();

        let payload = b"row data".repeat(10);
        let mut record = FileRecord::new("Mods.dat64", &payload).unwrap();
        record.length = record.extent() as u32;
        record.write_at(&mut file, 128, &payload).unwrap();

        let parsed = FileRecord::read_at(&mut file, 128).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.read_data(&mut file).unwrap(), payload);
        assert!(parsed.verify(&mut file).unwrap());
    }

    #[test]
    fn test_slack_after_payload() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = GgpkFile::create(temp.path()).unwrap();

        let mut record = FileRecord::new("a.txt", b"abc").unwrap();
        record.length = record.extent() as u32 + 9;
        record.write_at(&mut file, 0, b"abc").unwrap();
        file.grow_to(record.length as u64).unwrap();

        let parsed = FileRecord::read_at(&mut file, 0).unwrap();
        assert_eq!(parsed.data_length, 3);
        assert_eq!(parsed.read_data(&mut file).unwrap(), b"abc");
    }

    #[test]
    fn test_verify_detects_changed_payload() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = GgpkFile::create(temp.path()).unwrap();

        let mut record = FileRecord::new("a.txt", b"original").unwrap();
        record.length = record.extent() as u32;
        record.write_at(&mut file, 0, b"original").unwrap();

        file.write_all_at(record.data_offset(), b"tampered").unwrap();
        assert!(!record.verify(&mut file).unwrap());
    }

    #[test]
    fn test_payload_length_mismatch_rejected() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = GgpkFile::create(temp.path()).unwrap();

        let mut record = FileRecord::new("a.txt", b"four").unwrap();
        record.length = record.extent() as u32;
        assert!(record.write_at(&mut file, 0, b"five!").is_err());
    }

    #[test]
    fn test_extent_past_length_is_malformed() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = GgpkFile::create(temp.path()).unwrap();

        let mut record = FileRecord::new("a.txt", b"abc").unwrap();
        record.length = record.extent() as u32;
        record.write_at(&mut file, 0, b"abc").unwrap();
        // Payload length field at +44
        file.write_u32_at(44, 1000).unwrap();

        assert!(matches!(
            FileRecord::read_at(&mut file, 0),
            Err(GgpkError::MalformedRecord { offset: 0, .. })
        ));
    }
}
