//! Typed views over the records of a container
//!
//! Every record starts with the same 8 bytes:
//!
//! ```text
//! +0  u32  length  (total bytes owned by the record, >= its true extent)
//! +4  [4]  tag     ("GGPK", "PDIR", "FILE" or "FREE")
//! ```
//!
//! Records are not cached. They are re-read from the container whenever they
//! are needed and written back through their `write_at` method, which also
//! updates the record's `offset`.

pub mod directory;
pub mod file;
pub mod free;

pub use directory::{DirectoryEntry, DirectoryRecord};
pub use file::FileRecord;
pub use free::FreeRecord;

use crate::core::error::{GgpkError, Result};
use crate::core::header::{GgpkHeader, MAGIC};
use crate::core::io::GgpkFile;

/// Size of the common length + tag prefix
pub const RECORD_PREFIX_SIZE: u64 = 8;

pub const DIRECTORY_TAG: [u8; 4] = *b"PDIR";
pub const FILE_TAG: [u8; 4] = *b"FILE";
pub const FREE_TAG: [u8; 4] = *b"FREE";

/// Record kind, dispatched on the on-disk tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Header,
    Directory,
    File,
    Free,
}

impl RecordKind {
    pub fn from_tag(tag: &[u8; 4]) -> Option<Self> {
        match tag {
            t if *t == MAGIC => Some(RecordKind::Header),
            t if *t == DIRECTORY_TAG => Some(RecordKind::Directory),
            t if *t == FILE_TAG => Some(RecordKind::File),
            t if *t == FREE_TAG => Some(RecordKind::Free),
            _ => None,
        }
    }

    pub fn tag(&self) -> [u8; 4] {
        match self {
            RecordKind::Header => MAGIC,
            RecordKind::Directory => DIRECTORY_TAG,
            RecordKind::File => FILE_TAG,
            RecordKind::Free => FREE_TAG,
        }
    }
}

/// The common prefix of every record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPrefix {
    pub length: u32,
    pub tag: [u8; 4],
}

impl RecordPrefix {
    /// Read the prefix at `offset` and check that the declared length fits
    /// inside the container
    pub fn read_at(file: &mut GgpkFile, offset: u64) -> Result<Self> {
        let mut buf = [0u8; RECORD_PREFIX_SIZE as usize];
        file.read_exact_at(offset, &mut buf)?;

        let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let tag = [buf[4], buf[5], buf[6], buf[7]];

        if (length as u64) < RECORD_PREFIX_SIZE {
            return Err(GgpkError::malformed(
                offset,
                format!("declared length {length} shorter than record prefix"),
            ));
        }
        if offset + length as u64 > file.len() {
            return Err(GgpkError::malformed(
                offset,
                format!(
                    "declared length {length} runs past end of file ({})",
                    file.len()
                ),
            ));
        }

        Ok(RecordPrefix { length, tag })
    }

    /// Read the prefix and require a specific record kind
    pub fn expect(file: &mut GgpkFile, offset: u64, kind: RecordKind) -> Result<Self> {
        let prefix = Self::read_at(file, offset)?;
        if prefix.tag != kind.tag() {
            return Err(GgpkError::malformed(
                offset,
                format!(
                    "expected {:?} tag, found {:?}",
                    String::from_utf8_lossy(&kind.tag()),
                    String::from_utf8_lossy(&prefix.tag)
                ),
            ));
        }
        Ok(prefix)
    }

    pub fn kind(&self) -> Option<RecordKind> {
        RecordKind::from_tag(&self.tag)
    }
}

/// Any record, parsed according to its tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Header(GgpkHeader),
    Directory(DirectoryRecord),
    File(FileRecord),
    Free(FreeRecord),
}

impl Record {
    /// Parse whatever record lives at `offset`
    pub fn read_at(file: &mut GgpkFile, offset: u64) -> Result<Self> {
        let prefix = RecordPrefix::read_at(file, offset)?;
        match prefix.kind() {
            Some(RecordKind::Header) => {
                let bytes = file.read_vec_at(offset, prefix.length as usize)?;
                let mut header = GgpkHeader::from_bytes(&bytes)?;
                header.offset = offset;
                Ok(Record::Header(header))
            }
            Some(RecordKind::Directory) => Ok(Record::Directory(DirectoryRecord::read_at(file, offset)?)),
            Some(RecordKind::File) => Ok(Record::File(FileRecord::read_at(file, offset)?)),
            Some(RecordKind::Free) => Ok(Record::Free(FreeRecord::read_at(file, offset)?)),
            None => Err(GgpkError::malformed(
                offset,
                format!("unknown record tag {:?}", String::from_utf8_lossy(&prefix.tag)),
            )),
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Header(_) => RecordKind::Header,
            Record::Directory(_) => RecordKind::Directory,
            Record::File(_) => RecordKind::File,
            Record::Free(_) => RecordKind::Free,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            Record::Header(h) => h.offset,
            Record::Directory(d) => d.offset,
            Record::File(f) => f.offset,
            Record::Free(f) => f.offset,
        }
    }
}

/// A node of the record tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Directory(DirectoryRecord),
    File(FileRecord),
}

impl Node {
    /// Parse a tree node; header and free records are not valid tree nodes
    pub fn read_at(file: &mut GgpkFile, offset: u64) -> Result<Self> {
        match Record::read_at(file, offset)? {
            Record::Directory(dir) => Ok(Node::Directory(dir)),
            Record::File(f) => Ok(Node::File(f)),
            other => Err(GgpkError::malformed(
                offset,
                format!("expected directory or file record, found {:?}", other.kind()),
            )),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Directory(d) => &d.name,
            Node::File(f) => &f.name,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            Node::Directory(d) => d.offset,
            Node::File(f) => f.offset,
        }
    }

    pub fn length(&self) -> u32 {
        match self {
            Node::Directory(d) => d.length,
            Node::File(f) => f.length,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Directory(_))
    }
}

/// Encode a record name as NUL-terminated UTF-16LE.
/// Returns the bytes and the length in UTF-16 units (terminator included).
pub(crate) fn encode_name(name: &str) -> (Vec<u8>, u32) {
    let mut units: Vec<u16> = name.encode_utf16().collect();
    units.push(0);
    let count = units.len() as u32;
    let bytes = units.into_iter().flat_map(|u| u.to_le_bytes()).collect();
    (bytes, count)
}

/// Decode a NUL-terminated UTF-16LE name
pub(crate) fn decode_name(offset: u64, bytes: &[u8]) -> Result<String> {
    if bytes.len() < 2 || bytes.len() % 2 != 0 {
        return Err(GgpkError::malformed(offset, "name field has odd or zero length"));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let (last, body) = units
        .split_last()
        .ok_or_else(|| GgpkError::malformed(offset, "empty name field"))?;
    if *last != 0 {
        return Err(GgpkError::malformed(offset, "name is not NUL-terminated"));
    }

    String::from_utf16(body).map_err(|_| GgpkError::malformed(offset, "name is not valid UTF-16"))
}
