//! # ggpk-rs - Pack Container Storage Engine
//!
//! `ggpk-rs` reads and edits GGPK pack containers: a single file holding a
//! tree of named blobs, plus an optional bundle index that maps logical
//! paths into large compressed bundles.
//!
//! - **In-place edits**: files are added, replaced and removed without
//!   rewriting the container; freed space is reused first-fit
//! - **Two lookup sources**: the record tree and the bundle index, consulted
//!   in a configurable order behind one [`Container::open`] call
//! - **Collision-checked index**: path hashes that match a different stored
//!   path are reported instead of returning the wrong bytes
//! - **Batch reads** on scoped worker threads
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ggpk_rs::{Container, Result};
//! use std::io::Read;
//!
//! # fn main() -> Result<()> {
//! let container = Container::load("Content.ggpk")?;
//!
//! let mut stream = container.open("Data/Mods.dat64")?;
//! let mut rows = Vec::new();
//! stream.read_to_end(&mut rows)?;
//!
//! for entry in container.list_children("Data")? {
//!     println!("{} ({} bytes)", entry.path, entry.size.unwrap_or(0));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Bundle Sources
//!
//! ```rust,no_run
//! use ggpk_rs::{ContainerBuilder, DataFormat, Result, SourceMode};
//!
//! # fn main() -> Result<()> {
//! let container = ContainerBuilder::new()
//!     .path("Content.ggpk")
//!     .source_mode(SourceMode::IndexFirst)
//!     .bundle_dir("Bundles2")
//!     .index_path("Bundles2/_.index.bin")
//!     .build()?;
//!
//! let table = container.open_as("Data/Stats.dat64", &[DataFormat::Dat64])?;
//! println!("{} bytes from {:?}", table.len(), table.source_kind());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod core;
pub mod stream;

pub use crate::batch::{BatchItem, BatchReport, BatchSummary};
pub use crate::config::{GgpkConfig, SourceMode};
pub use crate::core::{
    bundle::{BundleCodec, BundleWriter, ContainerBundles, DirectoryBundles},
    compression::{CompressionConfig, CompressionMethod},
    error::{GgpkError, Result},
    format::DataFormat,
    ggpk::{Ggpk, GgpkOptions},
    index::{BundleIndex, BundleInfo, BundleLocation, IndexBuilder},
    record::Node,
};
pub use crate::stream::{FileSource, FileStream, ResolvedFile, SourceKind};

use crate::core::bundle::{BUNDLES_DIR, INDEX_FILE_NAME};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A file or directory of the record tree
///
/// # Examples
///
/// ```rust,no_run
/// use ggpk_rs::Container;
///
/// # fn main() -> ggpk_rs::Result<()> {
/// let container = Container::load("Content.ggpk")?;
/// for entry in container.list_entries("Art")? {
///     if entry.is_dir {
///         println!("{}/", entry.path);
///     } else {
///         println!("{} {:?}", entry.path, entry.format);
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    /// Full path in the container (e.g., "Data/Mods.dat64")
    pub path: String,

    /// Just the name (e.g., "Mods.dat64" or "Data")
    pub name: String,

    /// Parent directory path, empty for root-level entries
    pub parent: String,

    pub is_dir: bool,

    /// Payload size in bytes (None for directories)
    pub size: Option<u64>,

    /// Content type (None for directories)
    pub format: Option<DataFormat>,

    /// Offset of the record in the container
    pub offset: u64,
}

impl Entry {
    fn from_node(path: String, node: &Node) -> Self {
        let parent = match path.rfind('/') {
            Some(idx) => path[..idx].to_string(),
            None => String::new(),
        };
        let (size, format) = match node {
            Node::File(f) => (Some(f.data_length as u64), Some(f.format())),
            Node::Directory(_) => (None, None),
        };

        Entry {
            name: node.name().to_string(),
            parent,
            is_dir: node.is_dir(),
            size,
            format,
            offset: node.offset(),
            path,
        }
    }
}

/// Read-only view over a container and its bundles
///
/// Resolves logical paths through the record tree and the bundle index in
/// the configured [`SourceMode`] order. Structural edits go through
/// [`Container::ggpk`].
pub struct Container {
    ggpk: Arc<Ggpk>,
    index: Option<Arc<BundleIndex>>,
    codec: Option<Arc<dyn BundleCodec>>,
    config: GgpkConfig,
}

#[derive(Clone, Copy)]
enum Lookup {
    Tree,
    Index,
}

impl Container {
    /// Open a container with default settings
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        ContainerBuilder::new().path(path).build()
    }

    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    /// The underlying container handle
    pub fn ggpk(&self) -> &Arc<Ggpk> {
        &self.ggpk
    }

    pub fn index(&self) -> Option<&BundleIndex> {
        self.index.as_deref()
    }

    pub fn config(&self) -> &GgpkConfig {
        &self.config
    }

    fn lookup_order(&self) -> Vec<Lookup> {
        let mode = self.config.source_mode;
        let mut order = Vec::with_capacity(2);
        if mode.index_first() {
            order.push(Lookup::Index);
        }
        if mode.uses_tree() {
            order.push(Lookup::Tree);
        }
        if mode.uses_index() && !mode.index_first() {
            order.push(Lookup::Index);
        }
        order
    }

    fn resolve_tree(&self, path: &str) -> Result<Option<ResolvedFile>> {
        Ok(self.ggpk.find_file(path)?.map(|record| ResolvedFile {
            path: path.to_string(),
            format: record.format(),
            source: FileSource::Tree(record),
        }))
    }

    fn resolve_index(&self, path: &str) -> Result<Option<ResolvedFile>> {
        let Some(index) = &self.index else {
            return Ok(None);
        };
        let Some(location) = index.resolve(path.trim_start_matches('/'))? else {
            return Ok(None);
        };
        let bundle = index.bundle(location.bundle_id).cloned().ok_or_else(|| {
            GgpkError::MalformedIndex(format!("unknown bundle id {}", location.bundle_id))
        })?;

        Ok(Some(ResolvedFile {
            path: path.to_string(),
            format: DataFormat::from_path(path),
            source: FileSource::Bundle { bundle, location },
        }))
    }

    /// Find where `path` lives. `Ok(None)` when no source has it.
    ///
    /// A miss in one source falls through to the next; collisions and
    /// malformed records do not.
    pub fn resolve(&self, path: &str) -> Result<Option<ResolvedFile>> {
        for lookup in self.lookup_order() {
            let found = match lookup {
                Lookup::Tree => self.resolve_tree(path)?,
                Lookup::Index => self.resolve_index(path)?,
            };
            if let Some(resolved) = found {
                debug!(path, source = ?resolved.source.kind(), "resolved");
                return Ok(Some(resolved));
            }
        }
        Ok(None)
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.is_some())
    }

    /// Stream the bytes of `path` from whichever source has it
    pub fn open(&self, path: &str) -> Result<FileStream> {
        let resolved = self
            .resolve(path)?
            .ok_or_else(|| GgpkError::FileNotFound(path.to_string()))?;
        self.stream(&resolved)
    }

    /// Like [`Container::open`], but only for the listed content types
    pub fn open_as(&self, path: &str, formats: &[DataFormat]) -> Result<FileStream> {
        let resolved = self
            .resolve(path)?
            .ok_or_else(|| GgpkError::FileNotFound(path.to_string()))?;
        if !formats.contains(&resolved.format) {
            return Err(GgpkError::UnsupportedFormat {
                path: path.to_string(),
                found: resolved.format,
            });
        }
        self.stream(&resolved)
    }

    /// Read the whole payload of `path`
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.open(path)?.into_bytes()
    }

    /// Read many paths on worker threads
    pub fn read_many<S: AsRef<str>>(&self, paths: &[S]) -> Result<BatchReport> {
        batch::read_many(self, paths)
    }

    /// Open a stream for an already resolved file
    pub fn stream(&self, resolved: &ResolvedFile) -> Result<FileStream> {
        match &resolved.source {
            FileSource::Tree(record) => FileStream::from_record(self.ggpk.path(), record),
            FileSource::Bundle { bundle, location } => {
                let data = self.inflate(bundle, location.offset, location.size)?;
                Ok(FileStream::from_bytes(data, resolved.format))
            }
        }
    }

    pub(crate) fn inflate(&self, bundle: &BundleInfo, offset: u32, size: u32) -> Result<Vec<u8>> {
        let codec = self
            .codec
            .as_ref()
            .ok_or_else(|| GgpkError::Codec("no bundle source configured".to_string()))?;
        codec.inflate(bundle, offset, size)
    }

    /// Immediate children of a tree directory
    pub fn list_children(&self, parent: &str) -> Result<Vec<Entry>> {
        let base = tree_path(parent);
        Ok(self
            .ggpk
            .list(parent)?
            .iter()
            .map(|node| {
                let path = if base.is_empty() {
                    node.name().to_string()
                } else {
                    format!("{base}/{}", node.name())
                };
                Entry::from_node(path, node)
            })
            .collect())
    }

    /// Everything below a tree directory
    pub fn list_entries(&self, prefix: &str) -> Result<Vec<Entry>> {
        Ok(self
            .ggpk
            .walk(prefix)?
            .into_iter()
            .map(|(path, node)| Entry::from_node(path, &node))
            .collect())
    }
}

/// A path with empty segments removed
fn tree_path(path: &str) -> String {
    crate::core::tree::segments(path).join("/")
}

/// Builder for opening or creating a [`Container`]
///
/// # Examples
///
/// ```rust,no_run
/// use ggpk_rs::{ContainerBuilder, SourceMode};
///
/// let container = ContainerBuilder::new()
///     .path("Content.ggpk")
///     .source_mode(SourceMode::TreeOnly)
///     .case_sensitive(true)
///     .build()?;
/// # Ok::<(), ggpk_rs::GgpkError>(())
/// ```
pub struct ContainerBuilder {
    path: Option<PathBuf>,
    config: GgpkConfig,
    index: Option<BundleIndex>,
    codec: Option<Arc<dyn BundleCodec>>,
}

impl ContainerBuilder {
    /// Create a new ContainerBuilder with default settings
    pub fn new() -> Self {
        ContainerBuilder {
            path: None,
            config: GgpkConfig::default(),
            index: None,
            codec: None,
        }
    }

    /// Container file to open or create
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Replace all settings at once, e.g. with a loaded TOML file
    pub fn config(mut self, config: GgpkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn source_mode(mut self, mode: SourceMode) -> Self {
        self.config.source_mode = mode;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.config.case_sensitive = case_sensitive;
        self
    }

    pub fn max_container_size(mut self, bytes: u64) -> Self {
        self.config.max_container_size = bytes;
        self
    }

    /// Read bundles from `<dir>/<name>.bundle.bin` instead of the container
    pub fn bundle_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.config.bundle_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Load the bundle index from a file instead of the container
    pub fn index_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.index_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_workers(mut self, workers: usize) -> Self {
        self.config.read_workers = workers;
        self
    }

    pub fn bundle_cache_capacity(mut self, bundles: usize) -> Self {
        self.config.bundle_cache_capacity = bundles;
        self
    }

    /// Use an already loaded index
    pub fn with_index(mut self, index: BundleIndex) -> Self {
        self.index = Some(index);
        self
    }

    /// Use a custom bundle codec
    pub fn with_codec(mut self, codec: Arc<dyn BundleCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    fn take_path(&mut self) -> Result<PathBuf> {
        self.path
            .take()
            .ok_or_else(|| GgpkError::Config("container path must be set".to_string()))
    }

    /// Open an existing container
    pub fn build(mut self) -> Result<Container> {
        self.config.validate()?;
        let path = self.take_path()?;
        let ggpk = Arc::new(Ggpk::open(&path, self.config.ggpk_options())?);
        self.finish(ggpk)
    }

    /// Create a new, empty container
    pub fn create(mut self) -> Result<Container> {
        self.config.validate()?;
        let path = self.take_path()?;
        let ggpk = Arc::new(Ggpk::create(&path, self.config.ggpk_options())?);
        self.finish(ggpk)
    }

    fn finish(self, ggpk: Arc<Ggpk>) -> Result<Container> {
        let config = self.config;
        let mode = config.source_mode;

        let index = if !mode.uses_index() {
            None
        } else if let Some(index) = self.index {
            Some(index)
        } else if let Some(path) = &config.index_path {
            Some(BundleIndex::load(path)?)
        } else {
            load_embedded_index(&ggpk)?
        };

        if index.is_none() && mode.index_first() {
            return Err(GgpkError::Config(format!(
                "source mode {mode:?} needs a bundle index"
            )));
        }

        let codec = match (&index, self.codec) {
            (None, _) => None,
            (Some(_), Some(codec)) => Some(codec),
            (Some(_), None) => {
                let codec: Arc<dyn BundleCodec> = match &config.bundle_dir {
                    Some(dir) => Arc::new(DirectoryBundles::new(dir, config.bundle_cache_capacity)),
                    None => Arc::new(ContainerBundles::new(
                        Arc::clone(&ggpk),
                        config.bundle_cache_capacity,
                    )),
                };
                Some(codec)
            }
        };

        info!(
            path = %ggpk.path().display(),
            mode = ?mode,
            indexed_files = index.as_ref().map_or(0, |i| i.len()),
            "container ready"
        );

        Ok(Container {
            ggpk,
            index: index.map(Arc::new),
            codec,
            config,
        })
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `Bundles2/_.index.bin` stored inside the container, if present
fn load_embedded_index(ggpk: &Ggpk) -> Result<Option<BundleIndex>> {
    let path = format!("{BUNDLES_DIR}/{INDEX_FILE_NAME}");
    match ggpk.find_file(&path)? {
        Some(record) => {
            let bytes = ggpk.read_record(&record)?;
            Ok(Some(BundleIndex::from_bytes(&bytes)?))
        }
        None => Ok(None),
    }
}

/// Read a stream to its end
pub fn read_stream(mut stream: FileStream) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(stream.len() as usize);
    stream.read_to_end(&mut data)?;
    Ok(data)
}
