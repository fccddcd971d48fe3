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
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;

use super::error::CacheError;
use super::hash::{CacheHash, HASH_LEN};
use super::{FORMAT_VERSION, MAGIC, ZSTD_MAGIC};

/// Reads a cache file sequentially.
pub struct CacheReader {
    source: Box<dyn Read + Send>,
    records: usize,
}

impl CacheReader {
    /// Opens the cache file at `path`.
    pub fn open(path: &Path) -> Result<CacheReader, CacheError> {
        let file = File::open(path)?;
        CacheReader::new(BufReader::new(file))
    }

    /// Wraps an input stream, decompressing it if it starts with a zstd frame.
    pub fn new<R: Read + Send + 'static>(mut inner: R) -> Result<CacheReader, CacheError> {
        let mut peek = [0u8; 4];
        let peeked = read_fully(&mut inner, &mut peek)?;
        let head = Cursor::new(peek[..peeked].to_vec()).chain(inner);

        let source: Box<dyn Read + Send> = if peeked == peek.len() && peek == ZSTD_MAGIC {
            Box::new(zstd::stream::read::Decoder::new(head)?)
        } else {
            Box::new(head)
        };
        Ok(CacheReader { source, records: 0 })
    }

    /// Fills `buf` completely. Returns false on a short read or I/O error.
    pub fn read(&mut self, buf: &mut [u8]) -> bool {
        self.source.read_exact(buf).is_ok()
    }

    /// Reads and checks the magic header and format version.
    pub fn read_header(&mut self) -> bool {
        let mut magic = [0u8; MAGIC.len()];
        let mut version = [0u8; 2];
        self.read(&mut magic)
            && &magic == MAGIC
            && self.read(&mut version)
            && u16::from_le_bytes(version) == FORMAT_VERSION
    }

    /// Reads the stored global hash.
    pub fn read_hash(&mut self) -> Option<CacheHash> {
        let mut bytes = [0u8; HASH_LEN];
        self.read(&mut bytes)
            .then_some(CacheHash::from_bytes(bytes))
    }

    /// Checks the header and the global hash against `expected`.
    pub fn validate(&mut self, expected: &CacheHash) -> Result<(), CacheError> {
        if !self.read_header() {
            return Err(CacheError::BadMagic);
        }
        match self.read_hash() {
            Some(hash) if hash == *expected => Ok(()),
            Some(_) => Err(CacheError::HashMismatch),
            None => Err(CacheError::MissingHash),
        }
    }

    /// Reads the next framed record. Returns `Ok(None)` at a clean end of file.
    ///
    /// The record length and checksum are verified before the bytes are returned.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>, CacheError> {
        let mut len = [0u8; 8];
        match read_fully(&mut self.source, &mut len)? {
            0 => return Ok(None),
            8 => {}
            short => {
                return Err(CacheError::Truncated {
                    needed: 8,
                    available: short as u64,
                })
            }
        }
        let len = u64::from_le_bytes(len);

        let mut crc = [0u8; 4];
        let got = read_fully(&mut self.source, &mut crc)?;
        if got != crc.len() {
            return Err(CacheError::Truncated {
                needed: crc.len() as u64,
                available: got as u64,
            });
        }
        let crc = u32::from_le_bytes(crc);

        // Read through a limit so a corrupt length cannot force a huge allocation.
        let mut data = Vec::new();
        (&mut self.source).take(len).read_to_end(&mut data)?;
        if data.len() as u64 != len {
            return Err(CacheError::Truncated {
                needed: len,
                available: data.len() as u64,
            });
        }
        if crc32fast::hash(&data) != crc {
            return Err(CacheError::ChecksumMismatch);
        }

        self.records += 1;
        Ok(Some(data))
    }

    /// Returns the number of records read so far.
    pub fn records(&self) -> usize {
        self.records
    }
}

/// Reads until `buf` is full or the stream ends. Returns the number of bytes read.
fn read_fully<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
