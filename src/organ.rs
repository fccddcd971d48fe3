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

//! An organ session: the loadable objects of one definition and its cache file.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::arena::SampleArena;
use crate::cache::{self, CacheHash, CacheStatus, OrganHash};
use crate::config::{ConfigError, LoaderSettings, SampleSet};
use crate::files::{DirectoryStore, FileStore};
use crate::loader::{self, CacheTarget, LoadProgress, LoadReport, UpdateCacheError};
use crate::objects::CacheObject;

/// Number of hex digits of the organ identity used in cache file names.
const CACHE_NAME_DIGITS: usize = 16;

/// Errors raised by organ level cache operations.
#[derive(Debug, thiserror::Error)]
pub enum OrganError {
    #[error("the organ is not completely loaded and cannot be cached")]
    NotCacheable,

    #[error(transparent)]
    UpdateCache(#[from] UpdateCacheError),

    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A parsed organ and everything needed to load it.
pub struct Organ {
    name: String,
    definition_path: PathBuf,
    /// Hash of the definition text. Part of the cache hash.
    content_hash: OrganHash,
    /// Hash of the definition location. Names the cache file.
    identity: OrganHash,
    objects: Vec<Box<dyn CacheObject>>,
    files: Box<dyn FileStore>,
}

impl Organ {
    /// Reads and parses the definition at `path`. Sample files are resolved relative
    /// to the definition's directory.
    pub fn from_definition(path: &Path) -> Result<Organ, ConfigError> {
        let io_error = |source: io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let definition_path = path.canonicalize().map_err(io_error)?;
        let text = fs::read_to_string(&definition_path).map_err(io_error)?;
        let root = definition_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Organ::from_text(definition_path, &text, Box::new(DirectoryStore::new(root)))
    }

    /// Parses a definition whose text is already in memory.
    pub fn from_text(
        definition_path: PathBuf,
        text: &str,
        files: Box<dyn FileStore>,
    ) -> Result<Organ, ConfigError> {
        let set = SampleSet::parse(text)?;
        let identity = OrganHash::of_definition(definition_path.to_string_lossy().as_bytes());
        Ok(Organ {
            name: set.name().to_string(),
            content_hash: OrganHash::of_definition(text.as_bytes()),
            identity,
            objects: set.objects(),
            definition_path,
            files,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition_path(&self) -> &Path {
        &self.definition_path
    }

    pub fn objects(&self) -> &[Box<dyn CacheObject>] {
        &self.objects
    }

    pub fn content_hash(&self) -> &OrganHash {
        &self.content_hash
    }

    /// Returns the hash a cache must carry to be used for this organ.
    pub fn cache_hash(&self) -> CacheHash {
        CacheHash::compute(&self.content_hash)
    }

    /// Returns the cache file for this organ and the configured preset.
    pub fn cache_path(&self, settings: &LoaderSettings) -> PathBuf {
        let definition_dir = self.definition_path.parent().unwrap_or(Path::new(""));
        let identity = self.identity.to_hex();
        settings.cache_dir(definition_dir).join(format!(
            "{}-{}.cache",
            &identity[..CACHE_NAME_DIGITS],
            settings.preset()
        ))
    }

    fn cache_target(&self, settings: &LoaderSettings) -> CacheTarget {
        CacheTarget {
            path: self.cache_path(settings),
            hash: self.cache_hash(),
        }
    }

    /// Loads every object, from the cache where possible.
    pub fn load(
        &mut self,
        arena: &SampleArena,
        settings: &LoaderSettings,
        progress: &mut dyn LoadProgress,
    ) -> LoadReport {
        let target = self.cache_target(settings);
        info!(
            organ = self.name.as_str(),
            objects = self.objects.len(),
            cache = ?target.path,
            "Loading organ"
        );
        loader::load_objects(
            &mut self.objects,
            arena,
            self.files.as_ref(),
            &target,
            &settings.load_options(),
            progress,
        )
    }

    /// Frees every sample block of the organ at once. Objects must be loaded again
    /// before they can be played or cached.
    pub fn unload(&mut self, arena: &mut SampleArena) {
        arena.release_all();
        for object in self.objects.iter_mut() {
            object.reset();
        }
        info!(organ = self.name.as_str(), "Unloaded organ");
    }

    /// Returns true if every object is loaded, so that a cache can be written.
    pub fn is_cacheable(&self) -> bool {
        self.objects.iter().all(|object| object.is_ready())
    }

    /// Writes the cache for the loaded organ. Returns the number of records written.
    pub fn update_cache(
        &self,
        arena: &SampleArena,
        settings: &LoaderSettings,
        progress: &mut dyn LoadProgress,
    ) -> Result<usize, OrganError> {
        if !self.is_cacheable() {
            return Err(OrganError::NotCacheable);
        }
        Ok(loader::update_cache(
            &self.objects,
            arena,
            &self.cache_target(settings),
            settings.compress_cache(),
            progress,
        )?)
    }

    /// Deletes the cache. Returns false if there was none.
    pub fn delete_cache(&self, settings: &LoaderSettings) -> Result<bool, OrganError> {
        let path = self.cache_path(settings);
        let deleted = cache::delete_cache(&path)?;
        if deleted {
            info!(path = ?path, "Deleted sample cache");
        }
        Ok(deleted)
    }

    pub fn cache_present(&self, settings: &LoaderSettings) -> bool {
        self.cache_path(settings).exists()
    }

    /// Returns whether the cache on disk could be used for this organ.
    pub fn cache_status(&self, settings: &LoaderSettings) -> CacheStatus {
        cache::probe_cache(&self.cache_path(settings), &self.cache_hash())
    }
}

impl fmt::Debug for Organ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Organ")
            .field("name", &self.name)
            .field("definition_path", &self.definition_path)
            .field("content_hash", &self.content_hash)
            .field("objects", &self.objects.len())
            .finish()
    }
}
