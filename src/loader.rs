// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Loads all objects of an organ, from the cache where possible.
//!
//! A load first walks the cache in distributor order. Whatever the cache could not
//! provide is then decoded from the sample files on a pool of loader threads. If
//! every object ended up loaded and cache management is enabled, a fresh cache is
//! written afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::arena::SampleArena;
use crate::cache::{
    self, CacheError, CacheHash, CacheReader, CacheWriter, RecordReader, RecordWriter,
};
use crate::distributor::ObjectDistributor;
use crate::files::FileStore;
use crate::objects::CacheObject;

mod progress;
mod worker;

pub use progress::{LoadPhase, LoadProgress, NoProgress};

/// Message shown when the arena ran out of memory.
pub const OUT_OF_MEMORY_MESSAGE: &str = "Out of memory - only parts of the organ are loaded";

/// Message shown when the user cancelled the load.
pub const CANCELLED_MESSAGE: &str =
    "Load aborted by the user - only parts of the organ are loaded.";

/// Where the cache of an organ lives and the hash it must carry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheTarget {
    pub path: PathBuf,
    pub hash: CacheHash,
}

/// Options that control a single load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Number of loader threads in addition to the calling thread.
    pub load_concurrency: usize,
    /// Write a fresh cache after a complete load.
    pub manage_cache: bool,
    /// Compress caches written by this load.
    pub compress_cache: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            load_concurrency: num_cpus::get(),
            manage_cache: true,
            compress_cache: false,
        }
    }
}

/// How a load ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Every object is loaded.
    Complete,
    /// Some objects failed to load; the others are loaded.
    PartiallyFailed,
    /// The arena ran out of memory and the load stopped.
    OutOfMemory,
    /// The user cancelled the load.
    Cancelled,
}

/// How much of the cache was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUsage {
    /// There was no cache file.
    Absent,
    /// The cache file was rejected as a whole.
    Rejected,
    /// The first `records` objects were read from the cache.
    Partial { records: usize },
    /// Every object was read from the cache.
    Full,
}

/// An object that failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    /// Position of the object in distributor order.
    pub index: usize,
    pub title: String,
    pub message: String,
}

/// The result of loading an organ.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub outcome: LoadOutcome,
    pub cache_usage: CacheUsage,
    /// True if the loaded state may be written to the cache.
    pub cacheable: bool,
    /// True if this load wrote a new cache.
    pub cache_written: bool,
    pub failures: Vec<LoadFailure>,
    /// Number of objects that are ready.
    pub loaded: usize,
    pub total: usize,
}

impl LoadReport {
    /// Returns the messages to show the user, if any.
    pub fn summary(&self) -> Vec<String> {
        let mut messages = Vec::new();
        match self.outcome {
            LoadOutcome::OutOfMemory => messages.push(OUT_OF_MEMORY_MESSAGE.to_string()),
            LoadOutcome::Cancelled => messages.push(CANCELLED_MESSAGE.to_string()),
            LoadOutcome::Complete | LoadOutcome::PartiallyFailed => {}
        }
        if !self.failures.is_empty() {
            let titles: Vec<&str> = self.failures.iter().map(|f| f.title.as_str()).collect();
            messages.push(format!(
                "Unable to load {} of {} objects: {}",
                self.failures.len(),
                self.total,
                titles.join(", ")
            ));
        }
        messages
    }
}

/// Errors raised while writing a cache.
#[derive(Debug, thiserror::Error)]
pub enum UpdateCacheError {
    #[error("cache update cancelled")]
    Cancelled,

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<std::io::Error> for UpdateCacheError {
    fn from(e: std::io::Error) -> Self {
        UpdateCacheError::Cache(CacheError::Io(e))
    }
}

/// Result of walking the cache.
struct CacheAttempt<'a> {
    usage: CacheUsage,
    /// The object whose record could not be used. It is loaded first afterwards.
    pending: Option<(usize, &'a mut Box<dyn CacheObject>)>,
    failures: Vec<LoadFailure>,
    out_of_memory: bool,
    cancelled: bool,
}

impl CacheAttempt<'_> {
    fn bypassed(usage: CacheUsage) -> Self {
        CacheAttempt {
            usage,
            pending: None,
            failures: Vec::new(),
            out_of_memory: false,
            cancelled: false,
        }
    }
}

/// Feeds the cache records to the objects in distributor order.
fn read_cache<'a>(
    distributor: &ObjectDistributor<'a>,
    arena: &SampleArena,
    target: &CacheTarget,
    progress: &mut dyn LoadProgress,
) -> CacheAttempt<'a> {
    if !target.path.exists() {
        return CacheAttempt::bypassed(CacheUsage::Absent);
    }

    let mut reader = match CacheReader::open(&target.path) {
        Ok(reader) => reader,
        Err(e) => {
            warn!(path = ?target.path, err = %e, "Unable to open cache file - bypassing cache");
            return CacheAttempt::bypassed(CacheUsage::Rejected);
        }
    };
    match reader.validate(&target.hash) {
        Ok(()) => {}
        Err(CacheError::BadMagic) => {
            warn!(path = ?target.path, "Cache file had bad magic - bypassing cache");
            return CacheAttempt::bypassed(CacheUsage::Rejected);
        }
        Err(CacheError::HashMismatch) => {
            warn!(path = ?target.path, "Cache file had different hash - bypassing cache");
            return CacheAttempt::bypassed(CacheUsage::Rejected);
        }
        Err(e) => {
            warn!(path = ?target.path, err = %e, "Cache file is unreadable - bypassing cache");
            return CacheAttempt::bypassed(CacheUsage::Rejected);
        }
    }

    let total = distributor.n_objects();
    progress.setup(total, LoadPhase::ReadingCache);
    let mut attempt = CacheAttempt::bypassed(CacheUsage::Full);
    let mut records = 0;

    while let Some((index, object)) = distributor.fetch_next() {
        let result = reader.next_record().and_then(|record| match record {
            Some(bytes) => object.load_from_cache(arena, &mut RecordReader::new(&bytes)),
            None => Err(CacheError::UnexpectedEnd),
        });

        match result {
            Ok(()) => {
                records += 1;
                distributor.record_loaded();
                if !progress.update(distributor.pos(), total, object.load_title()) {
                    info!(pos = distributor.pos(), total, "Load cancelled");
                    distributor.abort();
                    attempt.cancelled = true;
                    if records < total {
                        attempt.usage = CacheUsage::Partial { records };
                    }
                    break;
                }
            }
            Err(e) if e.is_out_of_memory() => {
                error!(object = object.load_title(), err = %e, "Unable to load object from cache");
                object.fail(e.to_string());
                attempt.failures.push(LoadFailure {
                    index,
                    title: object.load_title().to_string(),
                    message: e.to_string(),
                });
                distributor.abort();
                attempt.out_of_memory = true;
                attempt.usage = CacheUsage::Partial { records };
                break;
            }
            Err(e) => {
                // Objects already read stay loaded. The rest come from the sample files.
                warn!(
                    object = object.load_title(),
                    index,
                    err = %e,
                    "Unable to read object from cache - loading the rest from sample files"
                );
                attempt.pending = Some((index, object));
                attempt.usage = CacheUsage::Partial { records };
                break;
            }
        }
    }

    info!(path = ?target.path, records, total, "Read sample cache");
    attempt
}

/// Loads all objects, trying the cache first and decoding the rest.
pub fn load_objects(
    objects: &mut [Box<dyn CacheObject>],
    arena: &SampleArena,
    files: &dyn FileStore,
    target: &CacheTarget,
    options: &LoadOptions,
    progress: &mut dyn LoadProgress,
) -> LoadReport {
    let total = objects.len();
    // Readiness from an earlier session refers to blocks of another arena.
    for object in objects.iter_mut() {
        object.reset();
    }
    let distributor = ObjectDistributor::new(objects);

    let attempt = read_cache(&distributor, arena, target, progress);
    let usage = attempt.usage;
    let mut failures = attempt.failures;
    let mut out_of_memory = attempt.out_of_memory;
    let mut cancelled = attempt.cancelled;

    if usage != CacheUsage::Full && usage != CacheUsage::Absent && !options.manage_cache {
        warn!(
            path = ?target.path,
            "The sample cache for this organ is outdated. Please update or delete it."
        );
    }

    let remaining = attempt.pending.is_some() || distributor.pos() < total;
    if remaining && !out_of_memory && !cancelled {
        progress.setup(total, LoadPhase::LoadingSamples);
        let direct = worker::direct_load(
            &distributor,
            attempt.pending,
            arena,
            files,
            options.load_concurrency,
            progress,
        );
        failures.extend(direct.failures);
        out_of_memory |= direct.out_of_memory;
        cancelled |= direct.cancelled;
    }

    let loaded = distributor.loaded();
    let cacheable =
        distributor.is_complete() && failures.is_empty() && !cancelled && !out_of_memory;
    drop(distributor);

    let outcome = if out_of_memory {
        LoadOutcome::OutOfMemory
    } else if cancelled {
        LoadOutcome::Cancelled
    } else if !failures.is_empty() || loaded < total {
        LoadOutcome::PartiallyFailed
    } else {
        LoadOutcome::Complete
    };

    let mut cache_written = false;
    if cacheable && options.manage_cache && usage != CacheUsage::Full {
        match update_cache(objects, arena, target, options.compress_cache, progress) {
            Ok(_) => cache_written = true,
            Err(e) => warn!(path = ?target.path, err = %e, "Unable to write sample cache"),
        }
    }

    match outcome {
        LoadOutcome::Complete => info!(objects = total, ?usage, "Organ loaded"),
        _ => warn!(
            objects = total,
            loaded,
            failures = failures.len(),
            ?outcome,
            "Organ only partially loaded"
        ),
    }

    LoadReport {
        outcome,
        cache_usage: usage,
        cacheable,
        cache_written,
        failures,
        loaded,
        total,
    }
}

/// Writes the cache for fully loaded objects, replacing any existing cache.
///
/// Returns the number of records written. On failure or cancellation the partial
/// file is removed so that no corrupt cache is left behind.
pub fn update_cache(
    objects: &[Box<dyn CacheObject>],
    arena: &SampleArena,
    target: &CacheTarget,
    compress: bool,
    progress: &mut dyn LoadProgress,
) -> Result<usize, UpdateCacheError> {
    cache::delete_cache(&target.path)?;
    if let Some(parent) = target.path.parent() {
        fs::create_dir_all(parent)?;
    }

    progress.setup(objects.len(), LoadPhase::WritingCache);
    let result = write_cache(objects, arena, target, compress, progress);
    match &result {
        Ok(records) => info!(path = ?target.path, records, compress, "Wrote sample cache"),
        Err(e) => {
            warn!(path = ?target.path, err = %e, "Unable to write sample cache - removing it");
            remove_partial(&target.path);
        }
    }
    result
}

fn write_cache(
    objects: &[Box<dyn CacheObject>],
    arena: &SampleArena,
    target: &CacheTarget,
    compress: bool,
    progress: &mut dyn LoadProgress,
) -> Result<usize, UpdateCacheError> {
    let mut writer = CacheWriter::create(&target.path, compress)?;
    writer.write_header()?;
    writer.write_hash(&target.hash)?;

    let total = objects.len();
    for (i, object) in objects.iter().enumerate() {
        let mut record = RecordWriter::new();
        object.save_to_cache(arena, &mut record)?;
        writer.write_record(&record)?;
        if !progress.update(i + 1, total, object.load_title()) {
            return Err(UpdateCacheError::Cancelled);
        }
    }

    let records = writer.records();
    writer.close()?;
    Ok(records)
}

fn remove_partial(path: &Path) {
    if let Err(e) = cache::delete_cache(path) {
        error!(path = ?path, err = %e, "Unable to remove partial cache file");
    }
}
