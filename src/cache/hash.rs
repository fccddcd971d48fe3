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

//! The global validation hash stored at the head of every cache file.

use std::fmt;

use super::FORMAT_VERSION;
use crate::objects;

/// Length in bytes of every hash used by the cache.
pub const HASH_LEN: usize = 32;

/// Content hash of an organ definition.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrganHash([u8; HASH_LEN]);

impl OrganHash {
    /// Hashes the text of an organ definition.
    pub fn of_definition(text: &[u8]) -> OrganHash {
        OrganHash(*blake3::hash(text).as_bytes())
    }

    /// Returns the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Returns the hash as lowercase hex.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for OrganHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrganHash({})", self.to_hex())
    }
}

/// The digest that decides whether a cache file may be trusted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CacheHash([u8; HASH_LEN]);

impl CacheHash {
    /// Computes the hash for the current build and the given organ definition.
    pub fn compute(organ: &OrganHash) -> CacheHash {
        CacheHashInputs::current(*organ).digest()
    }

    /// Wraps raw hash bytes read from a cache file.
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> CacheHash {
        CacheHash(bytes)
    }

    /// Returns the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl fmt::Debug for CacheHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheHash({})", blake3::Hash::from(self.0).to_hex())
    }
}

/// Everything that feeds the global hash.
///
/// Layout sizes cover every in-memory structure the cache encodes, so changing one
/// invalidates all earlier caches. Constants cover every parameter that alters the
/// derived sample data.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHashInputs {
    pub format_version: u16,
    pub layout: Vec<(&'static str, u64)>,
    pub constants: Vec<(&'static str, u64)>,
    pub organ: OrganHash,
}

impl CacheHashInputs {
    /// Returns the inputs of the current build for the given organ.
    pub fn current(organ: OrganHash) -> CacheHashInputs {
        CacheHashInputs {
            format_version: FORMAT_VERSION,
            layout: objects::cache_layout(),
            constants: objects::cache_constants(),
            organ,
        }
    }

    /// Computes the digest of all inputs.
    pub fn digest(&self) -> CacheHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"pipecache-global-v1");
        hasher.update(&self.format_version.to_le_bytes());
        for (name, value) in self.layout.iter().chain(self.constants.iter()) {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(&value.to_le_bytes());
        }
        hasher.update(b"organ:");
        hasher.update(self.organ.as_bytes());
        CacheHash(*hasher.finalize().as_bytes())
    }
}
