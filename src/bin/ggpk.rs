//! GGPK command-line tool
//!
//! Extract, list, inspect and verify pack containers

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ggpk_rs::core::{FreeSpaceStats, GgpkHeader, TreeStats};
use ggpk_rs::{Container, ContainerBuilder, GgpkConfig, SourceMode};
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ggpk")]
#[command(version, about = "Inspect and extract GGPK pack containers")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML settings applied before command-line flags
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write files from a container to a directory
    Extract {
        container: PathBuf,

        /// Logical paths to extract
        #[arg(required = true)]
        paths: Vec<String>,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Lookup order (tree-first, index-first, tree-only, index-only)
        #[arg(long)]
        source: Option<SourceMode>,

        /// Bundle index file
        #[arg(long)]
        index: Option<PathBuf>,

        /// Directory of .bundle.bin files
        #[arg(long)]
        bundles: Option<PathBuf>,
    },

    /// List a directory of the record tree
    List {
        container: PathBuf,

        #[arg(default_value = "")]
        dir: String,

        /// Include everything below the directory
        #[arg(short, long)]
        recursive: bool,
    },

    /// Show header, free-space and tree statistics
    Info {
        container: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Check the free chain and every file digest
    Verify { container: PathBuf },
}

#[derive(Serialize)]
struct InfoReport {
    path: PathBuf,
    length: u64,
    header: GgpkHeader,
    free_space: FreeSpaceStats,
    tree: TreeStats,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{e:#}");
            std::process::exit(2);
        }
    }
}

/// Returns false when the command finished but something failed
fn run(cli: Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => GgpkConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => GgpkConfig::default(),
    };

    match cli.command {
        Command::Extract {
            container,
            paths,
            output,
            source,
            index,
            bundles,
        } => {
            let mut builder = ContainerBuilder::new().config(config).path(&container);
            if let Some(mode) = source {
                builder = builder.source_mode(mode);
            }
            if let Some(index) = index {
                builder = builder.index_path(index);
            }
            if let Some(dir) = bundles {
                builder = builder.bundle_dir(dir);
            }
            let container = builder
                .build()
                .with_context(|| format!("opening {}", container.display()))?;
            extract(&container, &paths, &output)
        }
        Command::List {
            container,
            dir,
            recursive,
        } => {
            let container = open_tree(&container, config)?;
            let entries = if recursive {
                container.list_entries(&dir)?
            } else {
                container.list_children(&dir)?
            };
            for entry in entries {
                if entry.is_dir {
                    println!("{:>12}  {}/", "-", entry.path);
                } else {
                    println!("{:>12}  {}", entry.size.unwrap_or(0), entry.path);
                }
            }
            Ok(true)
        }
        Command::Info { container, json } => {
            let container = open_tree(&container, config)?;
            let ggpk = container.ggpk();
            let report = InfoReport {
                path: ggpk.path().to_path_buf(),
                length: ggpk.len(),
                header: ggpk.header(),
                free_space: ggpk.free_space(),
                tree: ggpk.verify_tree(false)?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("container:    {}", report.path.display());
                println!("length:       {} bytes", report.length);
                println!("version:      {}", report.header.version);
                println!("root:         {}", report.header.root_offset);
                println!("directories:  {}", report.tree.directories);
                println!("files:        {}", report.tree.files);
                println!("payload:      {} bytes", report.tree.payload_bytes);
                println!(
                    "free:         {} bytes in {} records (largest {}, fragmentation {:.2})",
                    report.free_space.total_bytes,
                    report.free_space.records,
                    report.free_space.largest,
                    report.free_space.fragmentation
                );
            }
            Ok(true)
        }
        Command::Verify { container } => {
            let container = open_tree(&container, config)?;
            let ggpk = container.ggpk();
            ggpk.verify_free_list().context("free chain")?;
            let stats = ggpk.verify_tree(true).context("record tree")?;

            for path in &stats.digest_mismatches {
                error!(path = %path, "digest mismatch");
            }
            info!(
                directories = stats.directories,
                files = stats.files,
                mismatches = stats.digest_mismatches.len(),
                "verify finished"
            );
            Ok(stats.digest_mismatches.is_empty())
        }
    }
}

fn open_tree(path: &Path, config: GgpkConfig) -> Result<Container> {
    ContainerBuilder::new()
        .config(config)
        .source_mode(SourceMode::TreeOnly)
        .path(path)
        .build()
        .with_context(|| format!("opening {}", path.display()))
}

/// Where `path` lands below `output`, or `None` if it could escape it
fn safe_target(output: &Path, path: &str) -> Option<PathBuf> {
    let mut target = output.to_path_buf();
    let mut depth = 0;
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => {
                target.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    (depth > 0).then_some(target)
}

fn extract(container: &Container, paths: &[String], output: &Path) -> Result<bool> {
    let report = container.read_many(paths)?;
    let mut rejected = 0;

    for (path, data) in report.succeeded() {
        let Some(target) = safe_target(output, path) else {
            error!(path, "refusing to write outside the output directory");
            rejected += 1;
            continue;
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&target, data).with_context(|| format!("writing {}", target.display()))?;
    }
    for (path, e) in report.failed() {
        error!(path, error = %e, "extract failed");
    }

    let summary = report.summary();
    info!(
        extracted = summary.succeeded - rejected,
        failed = summary.failed + rejected,
        bytes = summary.bytes,
        output = %output.display(),
        "extract finished"
    );
    Ok(report.is_complete() && rejected == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_target_stays_below_output() {
        let out = Path::new("/tmp/out");
        assert_eq!(
            safe_target(out, "/Data/Mods.dat"),
            Some(PathBuf::from("/tmp/out/Data/Mods.dat"))
        );
        assert_eq!(
            safe_target(out, "Art/./icon.dds"),
            Some(PathBuf::from("/tmp/out/Art/icon.dds"))
        );

        assert_eq!(safe_target(out, "../etc/passwd"), None);
        assert_eq!(safe_target(out, "Data/../../escape.txt"), None);
        assert_eq!(safe_target(out, "Data/.."), None);
        assert_eq!(safe_target(out, "/"), None);
        assert_eq!(safe_target(out, ""), None);
    }
}
