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

//! The on-disk sample cache.
//!
//! A cache file is a magic header, the global hash, then one record per object in
//! distributor order. Records carry no index: their position is the key. Each record
//! is framed with its length and a CRC32 so that a damaged record is detected before
//! an object tries to decode it. The whole stream may optionally be zstd compressed.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

mod error;
mod hash;
mod reader;
mod record;
mod writer;

pub use error::CacheError;
pub use hash::{CacheHash, CacheHashInputs, OrganHash, HASH_LEN};
pub use reader::CacheReader;
pub use record::{RecordReader, RecordWriter};
pub use writer::CacheWriter;

/// Magic bytes at the start of every cache file.
pub const MAGIC: &[u8; 10] = b"PIPECACHE\0";

/// Version of the container format. Part of the global hash.
pub const FORMAT_VERSION: u16 = 1;

/// Length of the magic header plus the format version.
pub const HEADER_LEN: usize = MAGIC.len() + 2;

/// Length of the frame in front of every record (u64 length, u32 checksum).
pub const RECORD_FRAME_LEN: usize = 8 + 4;

/// Magic bytes of a zstd frame.
pub(crate) const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// What a cache file on disk looks like to the current build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// No cache file exists.
    Absent,
    /// Header and global hash match.
    Valid,
    /// The file is not a cache file, or was written with another format version.
    BadMagic,
    /// The cache was written for another build or another definition.
    HashMismatch,
    /// The file exists but could not be read.
    Unreadable,
}

impl CacheStatus {
    /// Returns true if the cache can be used for loading.
    pub fn is_valid(&self) -> bool {
        *self == CacheStatus::Valid
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CacheStatus::Absent => "absent",
            CacheStatus::Valid => "valid",
            CacheStatus::BadMagic => "bad magic",
            CacheStatus::HashMismatch => "outdated",
            CacheStatus::Unreadable => "unreadable",
        };
        f.write_str(text)
    }
}

/// Checks the header and global hash of the cache at `path` without reading records.
pub fn probe_cache(path: &Path, hash: &CacheHash) -> CacheStatus {
    if !path.exists() {
        return CacheStatus::Absent;
    }
    let mut reader = match CacheReader::open(path) {
        Ok(reader) => reader,
        Err(_) => return CacheStatus::Unreadable,
    };
    match reader.validate(hash) {
        Ok(()) => CacheStatus::Valid,
        Err(CacheError::BadMagic) => CacheStatus::BadMagic,
        Err(CacheError::HashMismatch) => CacheStatus::HashMismatch,
        Err(_) => CacheStatus::Unreadable,
    }
}

/// Removes the cache at `path`. Returns false if there was nothing to remove.
pub fn delete_cache(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
