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
use std::error::Error;
use std::fs::File;
use std::io::{self, Cursor, Seek, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;

use crate::arena::{BlockId, SampleArena};
use crate::cache::{CacheError, RecordReader, RecordWriter};
use crate::files::FileStore;
use crate::loader::{LoadPhase, LoadProgress};
use crate::objects::{CacheObject, LoadError, LoadState};

fn write_samples<W: Write + Seek>(
    writer: W,
    channels: u16,
    interleaved: &[f32],
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let mut writer = WavWriter::new(
        writer,
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    )?;
    for sample in interleaved {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Writes interleaved float samples to a WAV file.
pub fn write_wav(
    path: &Path,
    channels: u16,
    interleaved: &[f32],
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    write_samples(File::create(path)?, channels, interleaved, sample_rate)
}

/// Returns interleaved float samples encoded as a WAV file.
pub fn wav_bytes(
    channels: u16,
    interleaved: &[f32],
    sample_rate: u32,
) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut cursor = Cursor::new(Vec::new());
    write_samples(&mut cursor, channels, interleaved, sample_rate)?;
    Ok(cursor.into_inner())
}

/// Observes a [`TestObject`] after it has been handed to the loader.
#[derive(Debug, Default)]
pub struct TestProbe {
    file_loads: AtomicUsize,
    cache_loads: AtomicUsize,
    block: Mutex<Option<BlockId>>,
}

impl TestProbe {
    pub fn file_loads(&self) -> usize {
        self.file_loads.load(Ordering::Acquire)
    }

    pub fn cache_loads(&self) -> usize {
        self.cache_loads.load(Ordering::Acquire)
    }

    /// Returns the resident payload of the object, if it is loaded.
    pub fn payload(&self, arena: &SampleArena) -> Option<Vec<f32>> {
        let block = (*self.block.lock())?;
        arena.block(block).map(|samples| samples.to_vec())
    }
}

/// A scriptable object. Its payload is derived from its title.
pub struct TestObject {
    title: String,
    state: LoadState,
    probe: Arc<TestProbe>,
    fail_load: bool,
    panic_load: bool,
    fail_save: bool,
    delay: Option<Duration>,
}

impl TestObject {
    /// Number of samples every test object allocates.
    pub const PAYLOAD_SAMPLES: usize = 256;

    pub fn new(title: &str) -> TestObject {
        TestObject {
            title: title.to_string(),
            state: LoadState::default(),
            probe: Arc::new(TestProbe::default()),
            fail_load: false,
            panic_load: false,
            fail_save: false,
            delay: None,
        }
    }

    /// Loading from file returns an error.
    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Loading from file panics.
    pub fn panicking_load(mut self) -> Self {
        self.panic_load = true;
        self
    }

    /// Saving to the cache returns an I/O error.
    pub fn failing_save(mut self) -> Self {
        self.fail_save = true;
        self
    }

    /// Loading from file sleeps first.
    pub fn slow_load(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn probe(&self) -> Arc<TestProbe> {
        self.probe.clone()
    }

    /// Returns the title stored in a record written by a test object.
    pub fn record_title(record: &[u8]) -> Result<String, CacheError> {
        read_title(&mut RecordReader::new(record))
    }

    fn expected_payload(&self) -> impl Iterator<Item = f32> + '_ {
        let seed = self.title.bytes().map(u32::from).sum::<u32>();
        (0..Self::PAYLOAD_SAMPLES as u32).map(move |i| ((seed + i * 7) % 101) as f32 / 101.0)
    }
}

fn read_title(record: &mut RecordReader<'_>) -> Result<String, CacheError> {
    let len = record.read_count(1)?;
    let bytes = (0..len)
        .map(|_| record.read_u8())
        .collect::<Result<Vec<u8>, _>>()?;
    String::from_utf8(bytes).map_err(|e| CacheError::Malformed(e.to_string()))
}

impl CacheObject for TestObject {
    fn load_title(&self) -> &str {
        &self.title
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    fn load_error(&self) -> Option<&str> {
        self.state.error()
    }

    fn load_from_file(
        &mut self,
        arena: &SampleArena,
        _files: &dyn FileStore,
    ) -> Result<(), LoadError> {
        self.state.reset();
        self.probe.file_loads.fetch_add(1, Ordering::AcqRel);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.panic_load {
            panic!("{} exploded", self.title);
        }
        if self.fail_load {
            return Err(LoadError::Invalid(format!("{} is broken", self.title)));
        }

        let mut buffer = arena.allocate(Self::PAYLOAD_SAMPLES)?;
        for (sample, value) in buffer.as_mut_slice().iter_mut().zip(self.expected_payload()) {
            *sample = value;
        }
        *self.probe.block.lock() = Some(buffer.commit());
        self.state.set_ready();
        Ok(())
    }

    fn load_from_cache(
        &mut self,
        arena: &SampleArena,
        record: &mut RecordReader<'_>,
    ) -> Result<(), CacheError> {
        self.state.reset();
        self.probe.cache_loads.fetch_add(1, Ordering::AcqRel);
        let title = read_title(record)?;
        if title != self.title {
            return Err(CacheError::Malformed(format!(
                "record for {} found at {}",
                title, self.title
            )));
        }
        let len = record.read_samples_len()?;
        if len != Self::PAYLOAD_SAMPLES {
            return Err(CacheError::Malformed(format!("payload of {} samples", len)));
        }
        let mut buffer = arena.allocate(len)?;
        record.read_samples_into(buffer.as_mut_slice())?;
        record.finish()?;
        *self.probe.block.lock() = Some(buffer.commit());
        self.state.set_ready();
        Ok(())
    }

    fn save_to_cache(
        &self,
        arena: &SampleArena,
        record: &mut RecordWriter,
    ) -> Result<(), CacheError> {
        if self.fail_save {
            return Err(CacheError::Io(io::Error::other("disk full")));
        }
        if !self.is_ready() {
            return Err(CacheError::NotReady(self.title.clone()));
        }
        let payload = self
            .probe
            .payload(arena)
            .ok_or_else(|| CacheError::NotReady(self.title.clone()))?;
        record.write_u32(self.title.len() as u32);
        for byte in self.title.bytes() {
            record.write_u8(byte);
        }
        record.write_samples(&payload);
        Ok(())
    }

    fn fail(&mut self, message: String) {
        *self.probe.block.lock() = None;
        self.state.fail(message);
    }

    fn reset(&mut self) {
        *self.probe.block.lock() = None;
        self.state.reset();
    }
}

/// Cancels on the n-th progress update.
#[derive(Debug)]
pub struct CancelAfter {
    remaining: usize,
}

impl CancelAfter {
    pub fn new(updates: usize) -> CancelAfter {
        CancelAfter { remaining: updates }
    }
}

impl LoadProgress for CancelAfter {
    fn setup(&mut self, _total: usize, _phase: LoadPhase) {}

    fn update(&mut self, _pos: usize, _total: usize, _title: &str) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining > 0
    }
}

/// Records every phase and title it is given.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    pub phases: Vec<LoadPhase>,
    pub titles: Vec<String>,
}

impl LoadProgress for RecordingProgress {
    fn setup(&mut self, _total: usize, phase: LoadPhase) {
        self.phases.push(phase);
    }

    fn update(&mut self, _pos: usize, _total: usize, title: &str) -> bool {
        self.titles.push(title.to_string());
        true
    }
}
