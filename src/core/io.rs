//! Disk I/O operations for pack containers
//!
//! Every record read and write goes through [`GgpkFile`], which addresses the
//! container by absolute byte offset.

use crate::core::error::{GgpkError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Disk-backed container storage
pub struct GgpkFile {
    file: File,
    path: PathBuf,
    len: u64,
}

impl GgpkFile {
    /// Create (or truncate) a container file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(GgpkFile {
            file,
            path: path.as_ref().to_path_buf(),
            len: 0,
        })
    }

    /// Open an existing container file for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();

        Ok(GgpkFile {
            file,
            path: path.as_ref().to_path_buf(),
            len,
        })
    }

    /// Current length of the container in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read exactly `buf.len()` bytes at `offset`
    pub fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset.checked_add(buf.len() as u64);
        if end.map_or(true, |end| end > self.len) {
            return Err(GgpkError::malformed(
                offset,
                format!("read of {} bytes runs past end of file ({})", buf.len(), self.len),
            ));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Read `len` bytes at `offset` into a new buffer
    pub fn read_vec_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        self.read_exact_at(offset, &mut buffer)?;
        Ok(buffer)
    }

    pub fn read_u32_at(&mut self, offset: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact_at(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64_at(&mut self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact_at(offset, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Write all of `data` at `offset`, extending the file if needed
    pub fn write_all_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.len = self.len.max(offset + data.len() as u64);
        Ok(())
    }

    /// Patch a single 32-bit field in place
    pub fn write_u32_at(&mut self, offset: u64, value: u32) -> Result<()> {
        self.write_all_at(offset, &value.to_le_bytes())
    }

    /// Patch a single 64-bit field in place
    pub fn write_u64_at(&mut self, offset: u64, value: u64) -> Result<()> {
        self.write_all_at(offset, &value.to_le_bytes())
    }

    /// Grow the container to `new_len` bytes (never shrinks)
    pub fn grow_to(&mut self, new_len: u64) -> Result<()> {
        if new_len > self.len {
            self.file.set_len(new_len)?;
            self.len = new_len;
        }
        Ok(())
    }

    /// Flush buffered writes
    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
