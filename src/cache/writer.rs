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
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::error::CacheError;
use super::hash::CacheHash;
use super::record::RecordWriter;
use super::{FORMAT_VERSION, MAGIC};

/// zstd level used when the cache is compressed.
const COMPRESSION_LEVEL: i32 = 3;

/// The byte stream under a cache writer.
enum Sink<W: Write> {
    Plain(W),
    Compressed(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Write for Sink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Plain(w) => w.write(buf),
            Sink::Compressed(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(w) => w.flush(),
            Sink::Compressed(w) => w.flush(),
        }
    }
}

/// Writes a cache file: header, global hash, then one framed record per object.
pub struct CacheWriter<W: Write> {
    sink: Sink<W>,
    records: usize,
}

impl CacheWriter<BufWriter<File>> {
    /// Creates (or truncates) the cache file at `path`.
    pub fn create(path: &Path, compress: bool) -> Result<Self, CacheError> {
        let file = File::create(path)?;
        CacheWriter::new(BufWriter::new(file), compress)
    }
}

impl<W: Write> CacheWriter<W> {
    /// Wraps an output stream. When `compress` is set the whole stream is zstd compressed.
    pub fn new(inner: W, compress: bool) -> Result<Self, CacheError> {
        let sink = if compress {
            Sink::Compressed(zstd::stream::write::Encoder::new(inner, COMPRESSION_LEVEL)?)
        } else {
            Sink::Plain(inner)
        };
        Ok(CacheWriter { sink, records: 0 })
    }

    /// Writes the magic header and format version.
    pub fn write_header(&mut self) -> Result<(), CacheError> {
        self.write(MAGIC)?;
        self.write(&FORMAT_VERSION.to_le_bytes())
    }

    /// Writes the global hash.
    pub fn write_hash(&mut self, hash: &CacheHash) -> Result<(), CacheError> {
        self.write(hash.as_bytes())
    }

    /// Writes raw bytes.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), CacheError> {
        self.sink.write_all(bytes)?;
        Ok(())
    }

    /// Writes one object record with its length and checksum.
    pub fn write_record(&mut self, record: &RecordWriter) -> Result<(), CacheError> {
        let bytes = record.as_bytes();
        self.write(&(bytes.len() as u64).to_le_bytes())?;
        self.write(&crc32fast::hash(bytes).to_le_bytes())?;
        self.write(bytes)?;
        self.records += 1;
        Ok(())
    }

    /// Returns the number of records written so far.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Finishes the stream and returns the underlying writer.
    pub fn close(self) -> Result<W, CacheError> {
        let mut inner = match self.sink {
            Sink::Plain(w) => w,
            Sink::Compressed(encoder) => encoder.finish()?,
        };
        inner.flush()?;
        Ok(inner)
    }
}
