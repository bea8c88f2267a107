//! Uniform read access to resolved files

use crate::core::error::Result;
use crate::core::format::DataFormat;
use crate::core::index::{BundleInfo, BundleLocation};
use crate::core::record::FileRecord;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom, Take};
use std::path::Path;

/// Where a resolved path's bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// A file record stored directly in the container
    Tree(FileRecord),
    /// A range inside a decompressed bundle
    Bundle {
        bundle: BundleInfo,
        location: BundleLocation,
    },
}

impl FileSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            FileSource::Tree(_) => SourceKind::Tree,
            FileSource::Bundle { .. } => SourceKind::Bundle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Tree,
    Bundle,
}

/// A path that resolved to readable bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// The path as requested
    pub path: String,
    pub source: FileSource,
    pub format: DataFormat,
}

impl ResolvedFile {
    pub fn size(&self) -> u64 {
        match &self.source {
            FileSource::Tree(record) => record.data_length as u64,
            FileSource::Bundle { location, .. } => location.size as u64,
        }
    }
}

enum Inner {
    Tree(Take<BufReader<File>>),
    Bundle(Cursor<Vec<u8>>),
}

/// Readable payload of a resolved file, wherever it came from
pub struct FileStream {
    inner: Inner,
    len: u64,
    format: DataFormat,
}

impl FileStream {
    /// Stream a file record's payload through a fresh read-only handle
    pub(crate) fn from_record(container: &Path, record: &FileRecord) -> Result<Self> {
        let mut file = File::open(container)?;
        file.seek(SeekFrom::Start(record.data_offset()))?;
        let len = record.data_length as u64;

        Ok(FileStream {
            inner: Inner::Tree(BufReader::new(file).take(len)),
            len,
            format: record.format(),
        })
    }

    pub(crate) fn from_bytes(data: Vec<u8>, format: DataFormat) -> Self {
        FileStream {
            len: data.len() as u64,
            inner: Inner::Bundle(Cursor::new(data)),
            format,
        }
    }

    /// Total payload length
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }

    pub fn source_kind(&self) -> SourceKind {
        match self.inner {
            Inner::Tree(_) => SourceKind::Tree,
            Inner::Bundle(_) => SourceKind::Bundle,
        }
    }

    /// Read the whole payload
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.len as usize);
        self.read_to_end(&mut data)?;
        if (data.len() as u64) < self.len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("payload ended after {} of {} bytes", data.len(), self.len),
            )
            .into());
        }
        Ok(data)
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            Inner::Tree(reader) => reader.read(buf),
            Inner::Bundle(cursor) => cursor.read(buf),
        }
    }
}

impl std::fmt::Debug for FileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStream")
            .field("source", &self.source_kind())
            .field("len", &self.len)
            .field("format", &self.format)
            .finish()
    }
}

/// Read a record's payload through an already open handle
pub(crate) fn read_record_with(file: &mut File, record: &FileRecord) -> Result<Vec<u8>> {
    let mut data = vec![0u8; record.data_length as usize];
    file.seek(SeekFrom::Start(record.data_offset()))?;
    file.read_exact(&mut data)?;
    Ok(data)
}
