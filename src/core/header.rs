use crate::core::error::{GgpkError, Result};
use crate::core::io::GgpkFile;
use serde::{Deserialize, Serialize};

pub const MAGIC: [u8; 4] = *b"GGPK";
pub const VERSION: u32 = 3;

/// Total on-disk length of the header record
pub const HEADER_LENGTH: u32 = 28;

/// Byte position of the root-directory pointer inside the header record
pub const ROOT_OFFSET_FIELD: u64 = 12;

/// Byte position of the first-free pointer inside the header record
pub const FIRST_FREE_FIELD: u64 = 20;

/// Container header record
///
/// The header is the first record of every container. It carries the
/// format version and the two entry points into the file: the root
/// directory record and the head of the free-record chain.
///
/// # Layout
///
/// ```text
/// +0   u32  length (always 28)
/// +4   [4]  tag "GGPK"
/// +8   u32  version
/// +12  u64  root directory offset
/// +20  u64  first free record offset (0 = none)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GgpkHeader {
    /// Where the header record lives (always 0 for containers we create)
    pub offset: u64,

    /// Format version
    pub version: u32,

    /// Offset of the root directory record
    pub root_offset: u64,

    /// Offset of the first free record, 0 if the chain is empty
    pub first_free_offset: u64,
}

impl GgpkHeader {
    /// Create a header for a new container
    pub fn new(root_offset: u64) -> Self {
        GgpkHeader {
            offset: 0,
            version: VERSION,
            root_offset,
            first_free_offset: 0,
        }
    }

    /// Check version and pointer sanity against the container length
    pub fn validate(&self, file_len: u64) -> Result<()> {
        if self.version != VERSION {
            return Err(GgpkError::UnsupportedVersion(self.version));
        }

        if self.root_offset < HEADER_LENGTH as u64 || self.root_offset >= file_len {
            return Err(GgpkError::malformed(
                self.offset,
                format!("root offset {} outside container", self.root_offset),
            ));
        }

        if self.first_free_offset != 0
            && (self.first_free_offset < HEADER_LENGTH as u64 || self.first_free_offset >= file_len)
        {
            return Err(GgpkError::malformed(
                self.offset,
                format!("first free offset {} outside container", self.first_free_offset),
            ));
        }

        Ok(())
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LENGTH as usize);

        bytes.extend_from_slice(&HEADER_LENGTH.to_le_bytes());
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.root_offset.to_le_bytes());
        bytes.extend_from_slice(&self.first_free_offset.to_le_bytes());

        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LENGTH as usize {
            return Err(GgpkError::malformed(0, "insufficient bytes for header"));
        }

        let read_u32 = |at: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[at..at + 4]);
            u32::from_le_bytes(buf)
        };
        let read_u64 = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(buf)
        };

        let length = read_u32(0);
        if bytes[4..8] != MAGIC {
            return Err(GgpkError::InvalidMagic);
        }
        if length != HEADER_LENGTH {
            return Err(GgpkError::malformed(
                0,
                format!("header declares length {length}, expected {HEADER_LENGTH}"),
            ));
        }

        Ok(GgpkHeader {
            offset: 0,
            version: read_u32(8),
            root_offset: read_u64(ROOT_OFFSET_FIELD as usize),
            first_free_offset: read_u64(FIRST_FREE_FIELD as usize),
        })
    }

    /// Read and validate the header at the start of the container
    pub fn read_from(file: &mut GgpkFile) -> Result<Self> {
        let bytes = file.read_vec_at(0, HEADER_LENGTH as usize)?;
        let header = Self::from_bytes(&bytes)?;
        header.validate(file.len())?;
        Ok(header)
    }

    /// Write the whole header record at its offset
    pub fn write_to(&self, file: &mut GgpkFile) -> Result<()> {
        file.write_all_at(self.offset, &self.to_bytes())
    }

    /// Patch only the root pointer field, then mirror it
    pub fn set_root_offset(&mut self, file: &mut GgpkFile, root_offset: u64) -> Result<()> {
        file.write_u64_at(self.offset + ROOT_OFFSET_FIELD, root_offset)?;
        self.root_offset = root_offset;
        Ok(())
    }

    /// Patch only the first-free pointer field, then mirror it
    pub fn set_first_free_offset(&mut self, file: &mut GgpkFile, offset: u64) -> Result<()> {
        file.write_u64_at(self.offset + FIRST_FREE_FIELD, offset)?;
        self.first_free_offset = offset;
        Ok(())
    }
}
