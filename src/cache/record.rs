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

//! Field encoding for a single object record. All values are little endian.

use std::mem::size_of;

use super::error::CacheError;

/// Collects the fields of one object record.
#[derive(Debug, Default)]
pub struct RecordWriter {
    buf: Vec<u8>,
}

impl RecordWriter {
    /// Creates an empty record.
    pub fn new() -> RecordWriter {
        RecordWriter::default()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a length prefix followed by the raw sample bits.
    pub fn write_samples(&mut self, samples: &[f32]) {
        self.write_u64(samples.len() as u64);
        self.buf.reserve(samples.len() * size_of::<f32>());
        for sample in samples {
            self.buf.extend_from_slice(&sample.to_le_bytes());
        }
    }

    /// Returns the encoded record.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the encoded length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Decodes the fields of one object record.
#[derive(Debug)]
pub struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    /// Creates a reader over a verified record.
    pub fn new(data: &'a [u8]) -> RecordReader<'a> {
        RecordReader { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CacheError> {
        let available = self.remaining();
        if len > available {
            return Err(CacheError::Truncated {
                needed: len as u64,
                available: available as u64,
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CacheError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    pub fn read_u8(&mut self) -> Result<u8, CacheError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CacheError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CacheError::Malformed(format!(
                "invalid boolean value {}",
                other
            ))),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, CacheError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CacheError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CacheError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CacheError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Reads a count of elements that each occupy at least `min_element_size` bytes.
    /// Counts that could not possibly fit in the rest of the record are rejected
    /// before anything is allocated for them.
    pub fn read_count(&mut self, min_element_size: usize) -> Result<usize, CacheError> {
        let count = self.read_u32()? as usize;
        let needed = count.saturating_mul(min_element_size.max(1));
        if needed > self.remaining() {
            return Err(CacheError::Malformed(format!(
                "count {} exceeds remaining record size {}",
                count,
                self.remaining()
            )));
        }
        Ok(count)
    }

    /// Reads the length prefix written by [`RecordWriter::write_samples`].
    pub fn read_samples_len(&mut self) -> Result<usize, CacheError> {
        let len = self.read_u64()?;
        let needed = len.saturating_mul(size_of::<f32>() as u64);
        if needed > self.remaining() as u64 {
            return Err(CacheError::Truncated {
                needed,
                available: self.remaining() as u64,
            });
        }
        Ok(len as usize)
    }

    /// Fills `output` with samples. The caller obtains the length from
    /// [`RecordReader::read_samples_len`] first.
    pub fn read_samples_into(&mut self, output: &mut [f32]) -> Result<(), CacheError> {
        let bytes = self.take(output.len() * size_of::<f32>())?;
        for (sample, chunk) in output.iter_mut().zip(bytes.chunks_exact(size_of::<f32>())) {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(chunk);
            *sample = f32::from_le_bytes(raw);
        }
        Ok(())
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Fails if the record has unread bytes left.
    pub fn finish(&self) -> Result<(), CacheError> {
        if self.remaining() != 0 {
            return Err(CacheError::Malformed(format!(
                "{} trailing bytes in record",
                self.remaining()
            )));
        }
        Ok(())
    }
}
