//! Batch reads
//!
//! Paths are resolved one after another under the container lock, then the
//! payloads are read on scoped worker threads. Each worker opens its own
//! read-only handle to the container file; bundle reads share the codec.

use crate::core::error::{GgpkError, Result};
use crate::stream::{read_record_with, FileSource, ResolvedFile};
use crate::Container;
use serde::Serialize;
use std::fs::File;
use std::io;
use tracing::info;

/// Outcome for one requested path
#[derive(Debug)]
pub struct BatchItem {
    pub path: String,
    pub result: Result<Vec<u8>>,
}

/// Per-path results, in request order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
}

/// Counts for logging and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes: u64,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.items.iter().filter_map(|item| match &item.result {
            Ok(data) => Some((item.path.as_str(), data.as_slice())),
            Err(_) => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &GgpkError)> {
        self.items.iter().filter_map(|item| match &item.result {
            Ok(_) => None,
            Err(e) => Some((item.path.as_str(), e)),
        })
    }

    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|item| item.result.is_ok())
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            requested: self.items.len(),
            succeeded: 0,
            failed: 0,
            bytes: 0,
        };
        for item in &self.items {
            match &item.result {
                Ok(data) => {
                    summary.succeeded += 1;
                    summary.bytes += data.len() as u64;
                }
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }
}

type Outcome = (usize, Result<Vec<u8>>);

/// Read every path. Recoverable failures land in the report; anything else
/// aborts the batch.
pub(crate) fn read_many<S: AsRef<str>>(container: &Container, paths: &[S]) -> Result<BatchReport> {
    let mut results: Vec<Option<Result<Vec<u8>>>> = Vec::with_capacity(paths.len());
    let mut jobs: Vec<(usize, ResolvedFile)> = Vec::new();

    for (index, path) in paths.iter().enumerate() {
        let path = path.as_ref();
        match container.resolve(path) {
            Ok(Some(resolved)) => {
                jobs.push((index, resolved));
                results.push(None);
            }
            Ok(None) => results.push(Some(Err(GgpkError::FileNotFound(path.to_string())))),
            Err(e) if e.is_recoverable() => results.push(Some(Err(e))),
            Err(e) => return Err(e),
        }
    }

    let workers = container.config().read_workers.max(1);
    let chunk_size = jobs.len().div_ceil(workers).max(1);

    let outcomes: Vec<Vec<Outcome>> = crossbeam::scope(|scope| {
        let handles: Vec<_> = jobs
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move |_| read_chunk(container, chunk)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<std::thread::Result<Vec<_>>>()
    })
    .and_then(|joined| joined)
    .unwrap_or_else(|panic| std::panic::resume_unwind(panic));

    for chunk in outcomes {
        for (index, result) in chunk {
            match result {
                Err(e) if !is_item_failure(&e) => return Err(e),
                result => results[index] = Some(result),
            }
        }
    }

    let items = paths
        .iter()
        .zip(results)
        .map(|(path, result)| BatchItem {
            path: path.as_ref().to_string(),
            result: result.unwrap_or_else(|| {
                Err(GgpkError::Corrupted(format!(
                    "{} was resolved but never read",
                    path.as_ref()
                )))
            }),
        })
        .collect();

    let report = BatchReport { items };
    let summary = report.summary();
    info!(
        requested = summary.requested,
        succeeded = summary.succeeded,
        failed = summary.failed,
        bytes = summary.bytes,
        "batch read finished"
    );
    Ok(report)
}

/// Read-phase errors that belong to one path. I/O errors count: the
/// container handle used for resolution is not touched by the workers.
fn is_item_failure(e: &GgpkError) -> bool {
    e.is_recoverable() || matches!(e, GgpkError::Io(_))
}

fn read_chunk(container: &Container, chunk: &[(usize, ResolvedFile)]) -> Vec<Outcome> {
    let needs_handle = chunk
        .iter()
        .any(|(_, resolved)| matches!(resolved.source, FileSource::Tree(_)));
    let mut handle = needs_handle.then(|| File::open(container.ggpk().path()));

    chunk
        .iter()
        .map(|(index, resolved)| {
            let result = match &resolved.source {
                FileSource::Tree(record) => match handle.as_mut() {
                    Some(Ok(file)) => read_record_with(file, record),
                    Some(Err(e)) => Err(io::Error::new(e.kind(), e.to_string()).into()),
                    None => Err(GgpkError::Corrupted(
                        "tree read without a container handle".to_string(),
                    )),
                },
                FileSource::Bundle { bundle, location } => {
                    container.inflate(bundle, location.offset, location.size)
                }
            };
            (*index, result)
        })
        .collect()
}
