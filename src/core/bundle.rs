//! Bundle blobs and the codecs that inflate them
//!
//! A bundle is one compressed blob holding many files back to back. The
//! bundle index says which bundle a path lives in and where; a
//! [`BundleCodec`] turns that into bytes.
//!
//! ```text
//! +0  [4]  "BNDL"
//! +4  u8   compression method (0 none, 1 LZ4, 2 Zstd)
//! +5  u32  uncompressed size
//! +9       body
//! ```
//!
//! Two sources are provided. [`DirectoryBundles`] reads
//! `<dir>/<name>.bundle.bin` from the file system. [`ContainerBundles`] reads
//! `Bundles2/<name>.bundle.bin` out of the container itself. Both keep
//! recently inflated bundles in an LRU.

use crate::core::compression::{CompressionConfig, CompressionMethod};
use crate::core::error::{GgpkError, Result};
use crate::core::ggpk::Ggpk;
use crate::core::index::BundleInfo;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const BUNDLE_MAGIC: [u8; 4] = *b"BNDL";
pub const BUNDLE_HEADER_SIZE: usize = 9;

/// File name suffix of bundle blobs
pub const BUNDLE_SUFFIX: &str = ".bundle.bin";

/// Directory inside a container that holds bundles and the index
pub const BUNDLES_DIR: &str = "Bundles2";

/// File name of the persisted index next to the bundles
pub const INDEX_FILE_NAME: &str = "_.index.bin";

/// `<name>.bundle.bin`
pub fn bundle_file_name(name: &str) -> String {
    format!("{name}{BUNDLE_SUFFIX}")
}

/// Inflates byte ranges out of bundles.
///
/// Implementations are deterministic and shared across reader threads.
pub trait BundleCodec: Send + Sync {
    /// Bytes `[offset, offset + size)` of the decompressed bundle
    fn inflate(&self, bundle: &BundleInfo, offset: u32, size: u32) -> Result<Vec<u8>>;
}

/// Produces bundle blobs
#[derive(Debug, Clone, Default)]
pub struct BundleWriter {
    config: CompressionConfig,
}

impl BundleWriter {
    pub fn new(config: CompressionConfig) -> Self {
        BundleWriter { config }
    }

    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let size = u32::try_from(data.len()).map_err(|_| {
            GgpkError::Codec(format!("bundle of {} bytes exceeds 32-bit size", data.len()))
        })?;
        let (body, method) = self.config.pack(data)?;

        let mut blob = Vec::with_capacity(BUNDLE_HEADER_SIZE + body.len());
        blob.extend_from_slice(&BUNDLE_MAGIC);
        blob.push(method as u8);
        blob.extend_from_slice(&size.to_le_bytes());
        blob.extend_from_slice(&body);
        Ok(blob)
    }
}

/// Inflate a whole bundle blob.
///
/// The size in the blob header must match the size the index declares for
/// `bundle`; it is checked before anything is decompressed.
pub fn decode_bundle(blob: &[u8], bundle: &BundleInfo) -> Result<Vec<u8>> {
    if blob.len() < BUNDLE_HEADER_SIZE || blob[0..4] != BUNDLE_MAGIC {
        return Err(GgpkError::Codec(format!("{:?} is not a bundle blob", bundle.name)));
    }
    let method = CompressionMethod::try_from(blob[4])?;
    let size = u32::from_le_bytes([blob[5], blob[6], blob[7], blob[8]]);
    if size != bundle.uncompressed_size {
        return Err(GgpkError::Codec(format!(
            "bundle {:?} declares {size} bytes, index says {}",
            bundle.name, bundle.uncompressed_size
        )));
    }

    method.unpack(&blob[BUNDLE_HEADER_SIZE..], size as usize)
}

/// Copy a file's range out of an inflated bundle
fn slice_bundle(bundle: &BundleInfo, data: &[u8], offset: u32, size: u32) -> Result<Vec<u8>> {
    let start = offset as usize;
    let end = start + size as usize;
    data.get(start..end).map(<[u8]>::to_vec).ok_or_else(|| {
        GgpkError::Codec(format!(
            "range {start}..{end} outside bundle {:?}",
            bundle.name
        ))
    })
}

/// LRU of inflated bundles keyed by bundle name
struct BundleCache {
    entries: Mutex<LruCache<String, Arc<Vec<u8>>>>,
}

impl BundleCache {
    fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        BundleCache {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached bundle, or `load` it. The lock is not held while loading.
    fn get_or_load(
        &self,
        name: &str,
        load: impl FnOnce() -> Result<Vec<u8>>,
    ) -> Result<Arc<Vec<u8>>> {
        if let Some(data) = self.entries.lock().get(name) {
            return Ok(Arc::clone(data));
        }

        let data = Arc::new(load()?);
        debug!(bundle = name, size = data.len(), "inflated bundle");
        self.entries.lock().put(name.to_string(), Arc::clone(&data));
        Ok(data)
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Bundles stored as files under a directory
pub struct DirectoryBundles {
    root: PathBuf,
    cache: BundleCache,
}

impl DirectoryBundles {
    pub fn new<P: AsRef<Path>>(root: P, cache_capacity: usize) -> Self {
        DirectoryBundles {
            root: root.as_ref().to_path_buf(),
            cache: BundleCache::new(cache_capacity),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of inflated bundles currently cached
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl BundleCodec for DirectoryBundles {
    fn inflate(&self, bundle: &BundleInfo, offset: u32, size: u32) -> Result<Vec<u8>> {
        let data = self.cache.get_or_load(&bundle.name, || {
            let path = self.root.join(bundle_file_name(&bundle.name));
            let blob = std::fs::read(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    GgpkError::Codec(format!("bundle file {} is missing", path.display()))
                }
                _ => GgpkError::Io(e),
            })?;
            decode_bundle(&blob, bundle)
        })?;
        slice_bundle(bundle, &data, offset, size)
    }
}

/// Bundles stored as file records inside the container
pub struct ContainerBundles {
    ggpk: Arc<Ggpk>,
    cache: BundleCache,
}

impl ContainerBundles {
    pub fn new(ggpk: Arc<Ggpk>, cache_capacity: usize) -> Self {
        ContainerBundles {
            ggpk,
            cache: BundleCache::new(cache_capacity),
        }
    }

    /// Container path of a bundle blob
    pub fn record_path(name: &str) -> String {
        format!("{BUNDLES_DIR}/{}", bundle_file_name(name))
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl BundleCodec for ContainerBundles {
    fn inflate(&self, bundle: &BundleInfo, offset: u32, size: u32) -> Result<Vec<u8>> {
        let data = self.cache.get_or_load(&bundle.name, || {
            let path = Self::record_path(&bundle.name);
            let record = self.ggpk.find_file(&path)?.ok_or_else(|| {
                GgpkError::Codec(format!("bundle record {path} is missing"))
            })?;
            decode_bundle(&self.ggpk.read_record(&record)?, bundle)
        })?;
        slice_bundle(bundle, &data, offset, size)
    }
}
