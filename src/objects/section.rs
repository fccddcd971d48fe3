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

//! A single resident sample: one attack, one release or one synthesized wave.
//!
//! All sample data of a section lives in one arena block. The interleaved frames come
//! first, followed by one read-ahead tail per end point so that the renderer can read
//! past an end point without wrapping.

use std::sync::Arc;

use serde::Deserialize;

use super::LoadError;
use crate::arena::{ArenaBuffer, BlockId, SampleArena};
use crate::audio::DecodedAudio;
use crate::cache::{CacheError, RecordReader, RecordWriter};

/// Frames of read-ahead appended after every end point.
pub const MAX_READ_AHEAD_FRAMES: usize = 16;

/// Loops shorter than this are unrolled into their tail.
pub const SHORT_LOOP_FRAMES: usize = 2048;

/// Number of frames at the start of a release searched for alignment points.
pub const RELEASE_ALIGN_WINDOW: usize = 4096;

/// Number of amplitude buckets in a release alignment table.
pub const ALIGN_AMPLITUDE_BUCKETS: usize = 16;

const ALIGN_SLOTS: usize = ALIGN_AMPLITUDE_BUCKETS * 2;

/// A loop within a section. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LoopPoint {
    pub start: u32,
    pub end: u32,
}

impl LoopPoint {
    /// Returns the loop length in frames.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    /// Returns true if the loop is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where playback goes when it reaches an end point, and where the tail for that
/// end point lives in the section's block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndSegment {
    /// Frame at which this segment ends (exclusive).
    pub end_frame: usize,
    /// Frame playback jumps to, or None if the section ends here.
    pub next_start: Option<usize>,
    /// Offset of the tail in frames from the start of the block.
    pub tail_offset: usize,
    /// Length of the tail in frames.
    pub tail_frames: usize,
}

impl EndSegment {
    const RECORD_SIZE: usize = 8 + 1 + 8 + 8 + 8;
}

/// First frames of a release at which the waveform reaches a given amplitude and slope.
///
/// Used to start a release in phase with the attack it replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseAlignTable {
    positions: [u32; ALIGN_SLOTS],
}

impl ReleaseAlignTable {
    /// Builds the table from the interleaved frames of a release.
    pub fn compute(samples: &[f32], channels: usize, peak: f32) -> ReleaseAlignTable {
        let mut positions = [u32::MAX; ALIGN_SLOTS];
        let frames = if channels == 0 {
            0
        } else {
            samples.len() / channels
        };

        if peak > 0.0 {
            let mut previous = samples.first().copied().unwrap_or_default();
            for frame in 1..frames.min(RELEASE_ALIGN_WINDOW) {
                let value = samples[frame * channels];
                let slot = Self::slot(value / peak, value > previous);
                if positions[slot] == u32::MAX {
                    positions[slot] = frame as u32;
                }
                previous = value;
            }
        }

        for position in positions.iter_mut() {
            if *position == u32::MAX {
                *position = 0;
            }
        }
        ReleaseAlignTable { positions }
    }

    fn slot(relative: f32, rising: bool) -> usize {
        let bucket = (relative.abs() * ALIGN_AMPLITUDE_BUCKETS as f32) as usize;
        bucket.min(ALIGN_AMPLITUDE_BUCKETS - 1) * 2 + usize::from(rising)
    }

    /// Returns the release frame matching a relative amplitude and slope.
    pub fn position(&self, relative_amplitude: f32, rising: bool) -> usize {
        self.positions[Self::slot(relative_amplitude, rising)] as usize
    }
}

/// Shape and metadata of a section, everything but the sample block itself.
#[derive(Debug, Clone, PartialEq)]
struct SectionFormat {
    sample_rate: u32,
    channels: u16,
    frames: usize,
    peak: f32,
    loops: Vec<LoopPoint>,
    end_segments: Vec<EndSegment>,
    release_align: Option<ReleaseAlignTable>,
}

impl SectionFormat {
    /// Total frames in the block, tails included.
    fn block_frames(&self) -> usize {
        self.end_segments
            .last()
            .map(|segment| segment.tail_offset + segment.tail_frames)
            .unwrap_or(self.frames)
    }

    fn block_samples(&self) -> usize {
        self.block_frames() * self.channels as usize
    }
}

/// A resident section. The samples live in the arena under `block`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSection {
    format: SectionFormat,
    block: BlockId,
}

/// A section whose samples are reserved in the arena but not yet committed.
///
/// Dropping it returns the reservation to the arena.
pub struct PendingSection<'a> {
    format: SectionFormat,
    buffer: ArenaBuffer<'a>,
}

impl PendingSection<'_> {
    /// Hands the samples to the arena.
    pub fn commit(self) -> AudioSection {
        AudioSection {
            format: self.format,
            block: self.buffer.commit(),
        }
    }

    /// Returns the interleaved frames and tails of the pending section.
    pub fn samples(&self) -> &[f32] {
        self.buffer.as_slice()
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }
}

/// Lays out one end segment per loop, or a single silent end if there are none.
fn end_segments(frames: usize, loops: &[LoopPoint]) -> Vec<EndSegment> {
    let mut offset = frames;
    let mut segments = Vec::with_capacity(loops.len().max(1));

    if loops.is_empty() {
        segments.push(EndSegment {
            end_frame: frames,
            next_start: None,
            tail_offset: offset,
            tail_frames: MAX_READ_AHEAD_FRAMES,
        });
        return segments;
    }

    for lp in loops {
        let tail_frames = if lp.len() < SHORT_LOOP_FRAMES {
            SHORT_LOOP_FRAMES + MAX_READ_AHEAD_FRAMES
        } else {
            MAX_READ_AHEAD_FRAMES
        };
        segments.push(EndSegment {
            end_frame: lp.end as usize,
            next_start: Some(lp.start as usize),
            tail_offset: offset,
            tail_frames,
        });
        offset += tail_frames;
    }
    segments
}

fn validate_loops(frames: usize, loops: &[LoopPoint]) -> Result<(), String> {
    for lp in loops {
        if lp.start >= lp.end || lp.end as usize > frames {
            return Err(format!(
                "loop {}..{} does not fit in {} frames",
                lp.start, lp.end, frames
            ));
        }
    }
    Ok(())
}

impl AudioSection {
    /// Derives a section from decoded audio and reserves its block in the arena.
    ///
    /// Release sections get an alignment table.
    pub fn build<'a>(
        arena: &'a SampleArena,
        audio: &DecodedAudio,
        loops: &[LoopPoint],
        with_release_align: bool,
    ) -> Result<PendingSection<'a>, LoadError> {
        let channels = audio.channels as usize;
        let frames = audio.frames();
        if channels == 0 || frames == 0 {
            return Err(LoadError::Invalid("sample contains no audio".to_string()));
        }
        validate_loops(frames, loops).map_err(LoadError::Invalid)?;

        let main = &audio.samples[..frames * channels];
        let peak = main.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
        let format = SectionFormat {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            frames,
            peak,
            loops: loops.to_vec(),
            end_segments: end_segments(frames, loops),
            release_align: with_release_align
                .then(|| ReleaseAlignTable::compute(main, channels, peak)),
        };

        let mut buffer = arena.allocate(format.block_samples())?;
        let data = buffer.as_mut_slice();
        data[..main.len()].copy_from_slice(main);

        for segment in &format.end_segments {
            let tail = &mut data[segment.tail_offset * channels
                ..(segment.tail_offset + segment.tail_frames) * channels];
            match segment.next_start {
                Some(start) => {
                    let loop_len = segment.end_frame - start;
                    for (i, frame) in tail.chunks_exact_mut(channels).enumerate() {
                        let source = (start + i % loop_len) * channels;
                        frame.copy_from_slice(&main[source..source + channels]);
                    }
                }
                None => tail.fill(0.0),
            }
        }

        Ok(PendingSection { format, buffer })
    }

    /// Writes the section metadata and samples to a cache record.
    pub fn encode(&self, arena: &SampleArena, record: &mut RecordWriter) -> Result<(), CacheError> {
        let samples = self.samples(arena).ok_or_else(|| {
            CacheError::Malformed(format!("block {} is not resident", self.block.index()))
        })?;
        let format = &self.format;

        record.write_u32(format.sample_rate);
        record.write_u16(format.channels);
        record.write_u64(format.frames as u64);
        record.write_f32(format.peak);

        record.write_u32(format.loops.len() as u32);
        for lp in &format.loops {
            record.write_u32(lp.start);
            record.write_u32(lp.end);
        }

        record.write_u32(format.end_segments.len() as u32);
        for segment in &format.end_segments {
            record.write_u64(segment.end_frame as u64);
            record.write_bool(segment.next_start.is_some());
            record.write_u64(segment.next_start.unwrap_or_default() as u64);
            record.write_u64(segment.tail_offset as u64);
            record.write_u64(segment.tail_frames as u64);
        }

        record.write_bool(format.release_align.is_some());
        if let Some(table) = &format.release_align {
            for position in table.positions {
                record.write_u32(position);
            }
        }

        record.write_samples(&samples);
        Ok(())
    }

    /// Reads a section written by [`AudioSection::encode`] and reserves its block.
    ///
    /// Every field is checked against the others so that a damaged record is rejected
    /// instead of producing a section the renderer would read out of bounds.
    pub fn decode<'a>(
        arena: &'a SampleArena,
        record: &mut RecordReader<'_>,
    ) -> Result<PendingSection<'a>, CacheError> {
        let sample_rate = record.read_u32()?;
        let channels = record.read_u16()?;
        let frames = record.read_u64()? as usize;
        let peak = record.read_f32()?;
        if channels == 0 || frames == 0 {
            return Err(CacheError::Malformed("empty section".to_string()));
        }

        let loop_count = record.read_count(8)?;
        let mut loops = Vec::with_capacity(loop_count);
        for _ in 0..loop_count {
            let start = record.read_u32()?;
            let end = record.read_u32()?;
            loops.push(LoopPoint { start, end });
        }
        validate_loops(frames, &loops).map_err(CacheError::Malformed)?;

        let segment_count = record.read_count(EndSegment::RECORD_SIZE)?;
        let mut end_segments = Vec::with_capacity(segment_count);
        for _ in 0..segment_count {
            let end_frame = record.read_u64()? as usize;
            let has_next = record.read_bool()?;
            let next_start = record.read_u64()? as usize;
            let tail_offset = record.read_u64()? as usize;
            let tail_frames = record.read_u64()? as usize;
            end_segments.push(EndSegment {
                end_frame,
                next_start: has_next.then_some(next_start),
                tail_offset,
                tail_frames,
            });
        }
        if end_segments != self::end_segments(frames, &loops) {
            return Err(CacheError::Malformed(
                "end segments do not match loops".to_string(),
            ));
        }

        let release_align = if record.read_bool()? {
            let mut positions = [0u32; ALIGN_SLOTS];
            for position in positions.iter_mut() {
                *position = record.read_u32()?;
                if *position as usize >= frames {
                    return Err(CacheError::Malformed(format!(
                        "alignment position {} beyond {} frames",
                        position, frames
                    )));
                }
            }
            Some(ReleaseAlignTable { positions })
        } else {
            None
        };

        let format = SectionFormat {
            sample_rate,
            channels,
            frames,
            peak,
            loops,
            end_segments,
            release_align,
        };

        let stored = record.read_samples_len()?;
        if stored != format.block_samples() {
            return Err(CacheError::Malformed(format!(
                "section holds {} samples, expected {}",
                stored,
                format.block_samples()
            )));
        }
        let mut buffer = arena.allocate(stored)?;
        record.read_samples_into(buffer.as_mut_slice())?;

        Ok(PendingSection { format, buffer })
    }

    /// Returns the block holding the frames followed by the tails.
    pub fn samples(&self, arena: &SampleArena) -> Option<Arc<[f32]>> {
        arena.block(self.block)
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    /// Returns the number of playable frames, tails excluded.
    pub fn frames(&self) -> usize {
        self.format.frames
    }

    pub fn peak(&self) -> f32 {
        self.format.peak
    }

    pub fn loops(&self) -> &[LoopPoint] {
        &self.format.loops
    }

    pub fn end_segments(&self) -> &[EndSegment] {
        &self.format.end_segments
    }

    pub fn release_align(&self) -> Option<&ReleaseAlignTable> {
        self.format.release_align.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, channels: u16) -> DecodedAudio {
        let samples = (0..frames * channels as usize)
            .map(|i| (i as f32 / 100.0).sin() * 0.5)
            .collect();
        DecodedAudio {
            samples,
            channels,
            sample_rate: 44100,
        }
    }

    #[test]
    fn test_section_without_loops_has_silent_tail() {
        let arena = SampleArena::unbounded();
        let audio = ramp(100, 2);
        let section = AudioSection::build(&arena, &audio, &[], false)
            .unwrap()
            .commit();

        assert_eq!(section.frames(), 100);
        assert_eq!(section.end_segments().len(), 1);
        let segment = section.end_segments()[0];
        assert_eq!(segment.next_start, None);
        assert_eq!(segment.tail_frames, MAX_READ_AHEAD_FRAMES);

        let samples = section.samples(&arena).unwrap();
        assert_eq!(samples.len(), (100 + MAX_READ_AHEAD_FRAMES) * 2);
        assert_eq!(&samples[..200], audio.samples.as_slice());
        assert!(samples[200..].iter().all(|s| *s == 0.0));
        assert!(section.release_align().is_none());
    }

    #[test]
    fn test_short_loop_is_unrolled() {
        let arena = SampleArena::unbounded();
        let audio = ramp(500, 1);
        let lp = LoopPoint {
            start: 100,
            end: 400,
        };
        let section = AudioSection::build(&arena, &audio, &[lp], false)
            .unwrap()
            .commit();

        let segment = section.end_segments()[0];
        assert_eq!(segment.end_frame, 400);
        assert_eq!(segment.next_start, Some(100));
        assert_eq!(segment.tail_offset, 500);
        assert_eq!(segment.tail_frames, SHORT_LOOP_FRAMES + MAX_READ_AHEAD_FRAMES);

        let samples = section.samples(&arena).unwrap();
        for i in 0..segment.tail_frames {
            assert_eq!(samples[500 + i], audio.samples[100 + i % 300]);
        }
    }

    #[test]
    fn test_long_loop_gets_read_ahead_only() {
        let arena = SampleArena::unbounded();
        let audio = ramp(SHORT_LOOP_FRAMES * 2, 1);
        let lp = LoopPoint {
            start: 0,
            end: SHORT_LOOP_FRAMES as u32 + 10,
        };
        let section = AudioSection::build(&arena, &audio, &[lp], false)
            .unwrap()
            .commit();
        assert_eq!(section.end_segments()[0].tail_frames, MAX_READ_AHEAD_FRAMES);
    }

    #[test]
    fn test_invalid_loop_is_rejected() {
        let arena = SampleArena::unbounded();
        let audio = ramp(100, 1);
        let lp = LoopPoint { start: 50, end: 101 };
        assert!(matches!(
            AudioSection::build(&arena, &audio, &[lp], false),
            Err(LoadError::Invalid(_))
        ));
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_uncommitted_section_returns_memory() {
        let arena = SampleArena::new(4096);
        let pending = AudioSection::build(&arena, &ramp(100, 1), &[], false).unwrap();
        assert!(arena.used() > 0);
        drop(pending);
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.block_count(), 0);
    }

    #[test]
    fn test_out_of_memory() {
        let arena = SampleArena::new(64);
        assert!(matches!(
            AudioSection::build(&arena, &ramp(100, 1), &[], false),
            Err(LoadError::OutOfMemory(_))
        ));
    }

    #[test]
    fn test_release_align_table() {
        let samples: Vec<f32> = (0..1000)
            .map(|i| (i as f32 * std::f32::consts::TAU / 100.0).sin())
            .collect();
        let table = ReleaseAlignTable::compute(&samples, 1, 1.0);

        let rising = table.position(0.99, true);
        let falling = table.position(0.99, false);
        assert!(rising > 0 && rising < 100);
        assert!(falling > rising);
        assert!(samples[rising] > 0.9);
    }

    #[test]
    fn test_cache_record_restores_section() {
        let arena = SampleArena::unbounded();
        let lp = LoopPoint { start: 10, end: 90 };
        let section = AudioSection::build(&arena, &ramp(100, 2), &[lp], true)
            .unwrap()
            .commit();

        let mut record = RecordWriter::new();
        section.encode(&arena, &mut record).unwrap();

        let other = SampleArena::unbounded();
        let mut reader = RecordReader::new(record.as_bytes());
        let restored = AudioSection::decode(&other, &mut reader).unwrap().commit();
        reader.finish().unwrap();

        assert_eq!(restored.format, section.format);
        assert_eq!(
            restored.samples(&other).unwrap(),
            section.samples(&arena).unwrap()
        );
    }

    #[test]
    fn test_damaged_record_is_rejected() {
        let arena = SampleArena::unbounded();
        let lp = LoopPoint { start: 10, end: 90 };
        let section = AudioSection::build(&arena, &ramp(100, 1), &[lp], false)
            .unwrap()
            .commit();
        let mut record = RecordWriter::new();
        section.encode(&arena, &mut record).unwrap();
        let bytes = record.as_bytes();

        // Loop end moved past the frame count.
        let mut damaged = bytes.to_vec();
        damaged[26..30].copy_from_slice(&200u32.to_le_bytes());
        let mut reader = RecordReader::new(&damaged);
        assert!(matches!(
            AudioSection::decode(&arena, &mut reader),
            Err(CacheError::Malformed(_))
        ));

        // Record cut short inside the samples.
        let mut reader = RecordReader::new(&bytes[..bytes.len() - 8]);
        let used = arena.used();
        assert!(AudioSection::decode(&arena, &mut reader).is_err());
        assert_eq!(arena.used(), used);
    }
}
