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
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use super::error::DecodeError;

/// A fully decoded sample file.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved samples scaled to [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Sample rate of the decoded data.
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Returns the number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// Decodes an entire audio stream (WAV, FLAC, and anything else symphonia supports).
///
/// The extension, if known, is used as a hint for format probing.
pub fn decode(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
) -> Result<DecodedAudio, DecodeError> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();
    let probed = get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .map_err(|e| DecodeError::Unsupported(format!("unable to probe format: {}", e)))?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::Unsupported("No audio track found".to_string()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let sample_rate = params
        .sample_rate
        .ok_or_else(|| DecodeError::Unsupported("Sample rate not specified".to_string()))?;

    let decoder_opts: DecoderOptions = Default::default();
    let mut decoder = get_codecs().make(&params, &decoder_opts)?;

    // A channel count of 0 means the container did not say; the first decoded
    // buffer decides in that case.
    let mut channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let expected_frames = params.n_frames;
    let capacity = expected_frames.unwrap_or(0) as usize * channels.max(1) as usize;
    let mut samples = Vec::with_capacity(capacity);

    loop {
        let next = read_and_decode_next_packet_for_track(
            format_reader.as_mut(),
            decoder.as_mut(),
            track_id,
        );
        let (chunk, chunk_channels) = match next {
            Ok(Some(decoded)) => decoded,
            Ok(None) => break,
            // Some readers report the end of the stream as a decode error. That is
            // only the end if every frame the container announced has arrived.
            Err(DecodeError::AudioError(SymphoniaError::DecodeError(_)))
                if frames_reached(expected_frames, samples.len(), channels) =>
            {
                break
            }
            Err(e) => return Err(e),
        };
        let chunk_channels = chunk_channels as u16;
        if channels == 0 {
            channels = chunk_channels;
        } else if chunk_channels != channels {
            return Err(DecodeError::Unsupported(format!(
                "channel count changed from {} to {} mid-stream",
                channels, chunk_channels
            )));
        }
        samples.extend_from_slice(&chunk);
    }

    if channels == 0 {
        return Err(DecodeError::Unsupported("Channels not specified".to_string()));
    }

    if let Some(expected) = expected_frames {
        let decoded = (samples.len() / channels as usize) as u64;
        if decoded < expected {
            return Err(DecodeError::Truncated { expected, decoded });
        }
    }

    Ok(DecodedAudio {
        samples,
        channels,
        sample_rate,
    })
}

/// Returns true if the container announced a frame count and all of it was decoded.
fn frames_reached(expected_frames: Option<u64>, samples: usize, channels: u16) -> bool {
    match expected_frames {
        Some(expected) if channels > 0 => (samples / channels as usize) as u64 >= expected,
        _ => false,
    }
}

/// Reads the next packet.
/// Returns:
/// - `Ok(Some(packet))` if a packet was successfully read
/// - `Ok(None)` if EOF was reached
/// - `Err(...)` if an error occurred that should be returned
///
/// ResetRequired is propagated so the caller can reset the decoder.
fn read_next_packet(format_reader: &mut dyn FormatReader) -> Result<Option<Packet>, DecodeError> {
    match format_reader.next_packet() {
        Ok(packet) => Ok(Some(packet)),
        Err(SymphoniaError::ResetRequired) => {
            Err(DecodeError::AudioError(SymphoniaError::ResetRequired))
        }
        Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Ok(None)
        }
        Err(e) => Err(DecodeError::AudioError(e)),
    }
}

/// Reads and decodes the next packet for the given track. Handles ResetRequired by
/// resetting the decoder and retrying. Returns `Ok(Some((samples, channels)))` when
/// a packet was decoded, `Ok(None)` on EOF, or `Err` on other errors.
fn read_and_decode_next_packet_for_track(
    format_reader: &mut dyn FormatReader,
    decoder: &mut dyn Decoder,
    track_id: u32,
) -> Result<Option<(Vec<f32>, usize)>, DecodeError> {
    loop {
        let packet = match read_next_packet(format_reader) {
            Ok(Some(packet)) => packet,
            Ok(None) => return Ok(None),
            Err(DecodeError::AudioError(SymphoniaError::ResetRequired)) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(e),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                decoder.decode(&packet)?
            }
            Err(e) => return Err(DecodeError::AudioError(e)),
        };
        let (samples, channels) = decode_buffer_to_f32(decoded);
        if channels > 0 && !samples.is_empty() {
            return Ok(Some((samples, channels)));
        }
    }
}

/// Converts a decoded AudioBufferRef to interleaved f32 samples and returns the
/// channel count observed in the decoded buffer.
fn decode_buffer_to_f32(decoded: AudioBufferRef) -> (Vec<f32>, usize) {
    match decoded {
        AudioBufferRef::F32(buf) => interleave_planar_samples(&buf, |sample| sample),
        AudioBufferRef::F64(buf) => interleave_planar_samples(&buf, |sample| sample as f32),
        AudioBufferRef::S8(buf) => interleave_planar_samples(&buf, scale_s8),
        AudioBufferRef::S16(buf) => interleave_planar_samples(&buf, scale_s16),
        AudioBufferRef::S24(buf) => {
            interleave_planar_samples(&buf, |sample| scale_s24(sample.inner()))
        }
        AudioBufferRef::S32(buf) => interleave_planar_samples(&buf, scale_s32),
        AudioBufferRef::U8(buf) => interleave_planar_samples(&buf, scale_u8),
        AudioBufferRef::U16(buf) => interleave_planar_samples(&buf, scale_u16),
        AudioBufferRef::U24(buf) => {
            interleave_planar_samples(&buf, |sample| scale_u24(sample.inner()))
        }
        AudioBufferRef::U32(buf) => interleave_planar_samples(&buf, scale_u32),
    }
}

/// Interleaves planar samples from a generic AudioBuffer.
fn interleave_planar_samples<T, F>(buf: &AudioBuffer<T>, convert: F) -> (Vec<f32>, usize)
where
    T: symphonia::core::sample::Sample,
    F: Fn(T) -> f32,
{
    let frames = buf.frames();
    let channels = buf.spec().channels.count();
    let planes = buf.planes();
    let mut samples = Vec::with_capacity(frames * channels);
    for frame_idx in 0..frames {
        for ch_idx in 0..channels {
            samples.push(convert(planes.planes()[ch_idx][frame_idx]));
        }
    }
    (samples, channels)
}

#[inline]
pub(crate) fn scale_s8(sample: i8) -> f32 {
    sample as f32 / (1i64 << 7) as f32
}

#[inline]
pub(crate) fn scale_s16(sample: i16) -> f32 {
    sample as f32 / (1i64 << 15) as f32
}

#[inline]
pub(crate) fn scale_s24(sample: i32) -> f32 {
    sample as f32 / (1i64 << 23) as f32
}

#[inline]
pub(crate) fn scale_s32(sample: i32) -> f32 {
    sample as f32 / (1i64 << 31) as f32
}

#[inline]
pub(crate) fn scale_u8(sample: u8) -> f32 {
    (sample as f32 / u8::MAX as f32) * 2.0 - 1.0
}

#[inline]
pub(crate) fn scale_u16(sample: u16) -> f32 {
    (sample as f32 / u16::MAX as f32) * 2.0 - 1.0
}

#[inline]
pub(crate) fn scale_u24(sample: u32) -> f32 {
    let max = (1u32 << 24) - 1;
    (sample as f32 / max as f32) * 2.0 - 1.0
}

#[inline]
pub(crate) fn scale_u32(sample: u32) -> f32 {
    (sample as f32 / u32::MAX as f32) * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Cursor;

    use super::*;
    use crate::testutil::{wav_bytes, write_wav};

    #[test]
    fn test_decode_float_wav_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let samples = vec![0.0f32, 0.25, -0.25, 0.5, -0.5, 1.0];
        write_wav(&path, 2, &samples, 44100).unwrap();

        let decoded = decode(Box::new(File::open(&path).unwrap()), Some("wav")).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.sample_rate, 44100);
        assert_eq!(decoded.frames(), 3);
        assert_eq!(decoded.samples, samples);
    }

    #[test]
    fn test_decode_from_memory_without_hint() {
        let samples: Vec<f32> = (0..480).map(|i| (i as f32 / 480.0) - 0.5).collect();
        let bytes = wav_bytes(1, &samples, 48000).unwrap();

        let decoded = decode(Box::new(Cursor::new(bytes)), None).unwrap();
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.sample_rate, 48000);
        assert_eq!(decoded.samples, samples);
    }

    #[test]
    fn test_decode_truncated_file_fails() {
        let samples: Vec<f32> = (0..4000).map(|i| (i % 100) as f32 / 100.0).collect();
        let mut bytes = wav_bytes(1, &samples, 44100).unwrap();
        bytes.truncate(bytes.len() / 2);

        let result = decode(Box::new(Cursor::new(bytes)), Some("wav"));
        assert!(
            matches!(
                result,
                Err(DecodeError::Truncated {
                    expected: 4000,
                    ..
                })
            ),
            "{:?}",
            result
        );
    }

    #[test]
    fn test_frames_reached() {
        assert!(frames_reached(Some(100), 200, 2));
        assert!(!frames_reached(Some(100), 198, 2));
        assert!(!frames_reached(None, 200, 2));
        assert!(!frames_reached(Some(0), 0, 0));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let bytes = vec![0x13u8; 256];
        let result = decode(Box::new(Cursor::new(bytes)), Some("wav"));
        assert!(result.is_err());
    }

    #[test]
    fn test_integer_scaling() {
        assert_eq!(scale_s8(i8::MIN), -1.0);
        assert_eq!(scale_s16(i16::MIN), -1.0);
        assert_eq!(scale_s16(0), 0.0);
        assert_eq!(scale_s24(-(1 << 23)), -1.0);
        assert_eq!(scale_s32(i32::MIN), -1.0);
        assert_eq!(scale_u8(0), -1.0);
        assert_eq!(scale_u8(u8::MAX), 1.0);
        assert_eq!(scale_u16(u16::MAX), 1.0);
        assert_eq!(scale_u24((1 << 24) - 1), 1.0);
        assert_eq!(scale_u32(0), -1.0);
    }
}
