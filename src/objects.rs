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

//! Loadable objects: the units of sample data an organ keeps resident.
//!
//! Every object can be populated either by decoding its sample files or by reading
//! the record it previously wrote to the cache. The loader only ever sees objects
//! through [`CacheObject`].

use std::mem::size_of;

use crate::arena::{ArenaError, SampleArena};
use crate::audio::DecodeError;
use crate::cache::{CacheError, RecordReader, RecordWriter};
use crate::files::FileStore;

mod pipe;
mod section;
mod tremulant;

pub use pipe::{PipeSample, SampleFile};
pub use section::{
    AudioSection, EndSegment, LoopPoint, PendingSection, ReleaseAlignTable,
    ALIGN_AMPLITUDE_BUCKETS, MAX_READ_AHEAD_FRAMES, RELEASE_ALIGN_WINDOW, SHORT_LOOP_FRAMES,
};
pub use tremulant::{TremulantParams, TremulantWave};

/// Errors raised while loading an object from its sample files.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    OutOfMemory(#[from] ArenaError),

    #[error("unable to decode {file}: {source}")]
    Decode {
        file: String,
        #[source]
        source: DecodeError,
    },

    #[error("unable to open {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

impl LoadError {
    /// Returns true if the error is an arena exhaustion.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, LoadError::OutOfMemory(_))
    }
}

/// An object whose sample data can be decoded from files or restored from the cache.
///
/// An object is only ever touched by one loader thread at a time. A failed load
/// leaves the object not ready, and any arena reservation it made that was not
/// committed is returned to the arena.
pub trait CacheObject: Send {
    /// Title shown while this object loads.
    fn load_title(&self) -> &str;

    /// Returns true once the sample data is resident.
    fn is_ready(&self) -> bool;

    /// Returns the error recorded by the last failed load.
    fn load_error(&self) -> Option<&str>;

    /// Decodes the sample data from the object's files.
    fn load_from_file(&mut self, arena: &SampleArena, files: &dyn FileStore)
        -> Result<(), LoadError>;

    /// Restores the sample data from a verified cache record.
    fn load_from_cache(
        &mut self,
        arena: &SampleArena,
        record: &mut RecordReader<'_>,
    ) -> Result<(), CacheError>;

    /// Encodes the resident sample data into a cache record.
    fn save_to_cache(&self, arena: &SampleArena, record: &mut RecordWriter)
        -> Result<(), CacheError>;

    /// Marks the object as failed with the given message.
    fn fail(&mut self, message: String);

    /// Forgets the resident sample data. Called before every load session and when
    /// the arena holding the data is released.
    fn reset(&mut self);
}

/// Readiness shared by every object type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LoadState {
    ready: bool,
    error: Option<String>,
}

impl LoadState {
    pub(crate) fn reset(&mut self) {
        self.ready = false;
        self.error = None;
    }

    pub(crate) fn set_ready(&mut self) {
        self.ready = true;
        self.error = None;
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.ready = false;
        self.error = Some(message);
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready
    }

    pub(crate) fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// In-memory sizes of every structure the cache encodes. Any change invalidates
/// existing caches through the global hash.
pub fn cache_layout() -> Vec<(&'static str, u64)> {
    vec![
        ("AudioSection", size_of::<AudioSection>() as u64),
        ("LoopPoint", size_of::<LoopPoint>() as u64),
        ("EndSegment", size_of::<EndSegment>() as u64),
        ("ReleaseAlignTable", size_of::<ReleaseAlignTable>() as u64),
        ("PipeSample", size_of::<PipeSample>() as u64),
        ("TremulantWave", size_of::<TremulantWave>() as u64),
        ("sample", size_of::<f32>() as u64),
    ]
}

/// Constants that change the derived sample data.
pub fn cache_constants() -> Vec<(&'static str, u64)> {
    vec![
        ("MAX_READ_AHEAD_FRAMES", MAX_READ_AHEAD_FRAMES as u64),
        ("SHORT_LOOP_FRAMES", SHORT_LOOP_FRAMES as u64),
        ("RELEASE_ALIGN_WINDOW", RELEASE_ALIGN_WINDOW as u64),
        ("ALIGN_AMPLITUDE_BUCKETS", ALIGN_AMPLITUDE_BUCKETS as u64),
        ("TREMULANT_RELEASE_PERIODS", tremulant::RELEASE_PERIODS as u64),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_state() {
        let mut state = LoadState::default();
        assert!(!state.is_ready());

        state.fail("broken".to_string());
        assert!(!state.is_ready());
        assert_eq!(state.error(), Some("broken"));

        state.set_ready();
        assert!(state.is_ready());
        assert_eq!(state.error(), None);

        state.reset();
        assert_eq!(state, LoadState::default());
    }

    #[test]
    fn test_hash_inputs_are_named_uniquely() {
        let mut names: Vec<_> = cache_layout()
            .into_iter()
            .chain(cache_constants())
            .map(|(name, _)| name)
            .collect();
        let count = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), count);
    }
}
