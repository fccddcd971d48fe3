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
use crate::arena::ArenaError;

/// Errors raised while reading or writing a sample cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache file had bad magic")]
    BadMagic,

    #[error("Cache file had a different hash")]
    HashMismatch,

    #[error("Cache file ended inside the global hash")]
    MissingHash,

    #[error("Cache record truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: u64, available: u64 },

    #[error("Cache record checksum mismatch")]
    ChecksumMismatch,

    #[error("Cache ended before all objects were read")]
    UnexpectedEnd,

    #[error("Malformed cache record: {0}")]
    Malformed(String),

    #[error("{0} is not loaded and cannot be cached")]
    NotReady(String),

    #[error(transparent)]
    OutOfMemory(#[from] ArenaError),
}

impl CacheError {
    /// Returns true if the error is an arena exhaustion rather than a cache problem.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, CacheError::OutOfMemory(_))
    }
}
