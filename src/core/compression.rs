//! Body codecs for bundle blobs
//!
//! The method byte in a blob header names one of these codecs. Bodies are
//! block-compressed as a whole, so the uncompressed size from the header is
//! always known before inflating.

use crate::core::error::{GgpkError, Result};
use serde::{Deserialize, Serialize};

/// Codec tag stored in byte 4 of a bundle blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionMethod {
    None = 0,
    Lz4 = 1,
    Zstd = 2,
}

impl TryFrom<u8> for CompressionMethod {
    type Error = GgpkError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(CompressionMethod::None),
            1 => Ok(CompressionMethod::Lz4),
            2 => Ok(CompressionMethod::Zstd),
            other => Err(GgpkError::Codec(format!("unknown compression method {other}"))),
        }
    }
}

impl CompressionMethod {
    /// Compress a whole body; `level` only matters for Zstd
    pub fn pack(self, data: &[u8], level: i32) -> Result<Vec<u8>> {
        match self {
            CompressionMethod::None => Ok(data.to_vec()),
            CompressionMethod::Lz4 => Ok(lz4_flex::block::compress(data)),
            CompressionMethod::Zstd => zstd::bulk::compress(data, level)
                .map_err(|e| GgpkError::Codec(format!("zstd: {e}"))),
        }
    }

    /// Inflate a body that must come out at exactly `len` bytes
    pub fn unpack(self, body: &[u8], len: usize) -> Result<Vec<u8>> {
        let out = match self {
            CompressionMethod::None => body.to_vec(),
            CompressionMethod::Lz4 => lz4_flex::block::decompress(body, len)
                .map_err(|e| GgpkError::Codec(format!("lz4: {e}")))?,
            CompressionMethod::Zstd => zstd::bulk::decompress(body, len)
                .map_err(|e| GgpkError::Codec(format!("zstd: {e}")))?,
        };
        if out.len() != len {
            return Err(GgpkError::Codec(format!(
                "{self:?} body inflated to {} bytes, header says {len}",
                out.len()
            )));
        }
        Ok(out)
    }
}

/// How [`BundleWriter`](crate::core::bundle::BundleWriter) stores bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionConfig {
    pub method: CompressionMethod,
    /// Zstd level
    pub level: i32,
    /// Bodies that shrink by fewer bytes than this are stored raw
    pub min_savings: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::lz4()
    }
}

impl CompressionConfig {
    pub const fn none() -> Self {
        CompressionConfig {
            method: CompressionMethod::None,
            level: 0,
            min_savings: 0,
        }
    }

    pub const fn lz4() -> Self {
        CompressionConfig {
            method: CompressionMethod::Lz4,
            level: 0,
            min_savings: 64,
        }
    }

    pub const fn zstd() -> Self {
        CompressionConfig {
            method: CompressionMethod::Zstd,
            level: 3,
            min_savings: 64,
        }
    }

    pub const fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    /// Encode `data`, falling back to raw storage when compression does
    /// not pay for itself. Returns the body and the method it was stored with.
    pub fn pack(&self, data: &[u8]) -> Result<(Vec<u8>, CompressionMethod)> {
        if self.method == CompressionMethod::None {
            return Ok((data.to_vec(), CompressionMethod::None));
        }
        let packed = self.method.pack(data, self.level)?;
        if packed.len() + self.min_savings <= data.len() {
            Ok((packed, self.method))
        } else {
            Ok((data.to_vec(), CompressionMethod::None))
        }
    }
}
