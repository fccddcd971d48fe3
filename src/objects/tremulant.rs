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

//! Synthesized tremulant gain waves.
//!
//! A wave tremulant has no sample files. Its attack ramps the modulation in and then
//! loops on one period, its release fades the modulation out.

use std::f32::consts::TAU;
use std::fmt;

use super::section::{AudioSection, LoopPoint, PendingSection};
use super::{CacheObject, LoadError, LoadState};
use crate::arena::SampleArena;
use crate::audio::DecodedAudio;
use crate::cache::{CacheError, RecordReader, RecordWriter};
use crate::files::FileStore;

/// Minimum number of periods over which the release fades out.
pub(crate) const RELEASE_PERIODS: usize = 2;

/// Parameters of a wave tremulant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TremulantParams {
    /// Length of one modulation period.
    pub period_ms: u32,
    /// Modulation depth in percent.
    pub amp_mod_depth: u32,
    /// Speed at which the modulation starts, per second.
    pub start_rate: u32,
    /// Speed at which the modulation stops, per second.
    pub stop_rate: u32,
    pub sample_rate: u32,
}

impl TremulantParams {
    fn validate(&self) -> Result<usize, String> {
        if self.amp_mod_depth > 100 {
            return Err(format!("depth {}% exceeds 100%", self.amp_mod_depth));
        }
        if self.start_rate == 0 || self.stop_rate == 0 {
            return Err("start and stop rates must be positive".to_string());
        }
        let period = self.sample_rate as u64 * self.period_ms as u64 / 1000;
        if period < 2 {
            return Err(format!(
                "period of {}ms is too short at {}Hz",
                self.period_ms, self.sample_rate
            ));
        }
        Ok(period as usize)
    }

    /// Rounds the frames needed for a transition at `rate` up to whole periods.
    fn transition_frames(&self, rate: u32, period: usize, minimum_periods: usize) -> usize {
        let frames = (self.sample_rate as usize).div_ceil(rate as usize);
        frames.div_ceil(period).max(minimum_periods) * period
    }

    fn gain(&self, frame: usize, period: usize, envelope: f32) -> f32 {
        let phase = (frame % period) as f32 / period as f32;
        let depth = self.amp_mod_depth as f32 / 100.0;
        1.0 - depth * envelope * 0.5 * (1.0 - (TAU * phase).cos())
    }

    /// Synthesizes the attack wave and its loop.
    fn attack(&self, period: usize) -> (DecodedAudio, LoopPoint) {
        let ramp = self.transition_frames(self.start_rate, period, 1);
        let samples = (0..ramp + period)
            .map(|frame| {
                let envelope = (frame as f32 / ramp as f32).min(1.0);
                self.gain(frame, period, envelope)
            })
            .collect();
        let lp = LoopPoint {
            start: ramp as u32,
            end: (ramp + period) as u32,
        };
        (self.wave(samples), lp)
    }

    /// Synthesizes the release wave.
    fn release(&self, period: usize) -> DecodedAudio {
        let fade = self.transition_frames(self.stop_rate, period, RELEASE_PERIODS);
        let samples = (0..fade)
            .map(|frame| self.gain(frame, period, 1.0 - frame as f32 / fade as f32))
            .collect();
        self.wave(samples)
    }

    fn wave(&self, samples: Vec<f32>) -> DecodedAudio {
        DecodedAudio {
            samples,
            channels: 1,
            sample_rate: self.sample_rate,
        }
    }
}

/// A tremulant whose gain modulation is synthesized at load time.
pub struct TremulantWave {
    title: String,
    params: TremulantParams,
    attack: Option<AudioSection>,
    release: Option<AudioSection>,
    state: LoadState,
}

impl TremulantWave {
    pub fn new(title: String, params: TremulantParams) -> TremulantWave {
        TremulantWave {
            title,
            params,
            attack: None,
            release: None,
            state: LoadState::default(),
        }
    }

    pub fn params(&self) -> &TremulantParams {
        &self.params
    }

    pub fn attack(&self) -> Option<&AudioSection> {
        self.attack.as_ref()
    }

    pub fn release(&self) -> Option<&AudioSection> {
        self.release.as_ref()
    }

    fn install(&mut self, attack: PendingSection<'_>, release: PendingSection<'_>) {
        self.attack = Some(attack.commit());
        self.release = Some(release.commit());
        self.state.set_ready();
    }
}

impl CacheObject for TremulantWave {
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
        let period = self
            .params
            .validate()
            .map_err(|e| LoadError::Invalid(format!("{}: {}", self.title, e)))?;

        let (wave, lp) = self.params.attack(period);
        let attack = AudioSection::build(arena, &wave, &[lp], false)?;
        let release = AudioSection::build(arena, &self.params.release(period), &[], false)?;
        self.install(attack, release);
        Ok(())
    }

    fn load_from_cache(
        &mut self,
        arena: &SampleArena,
        record: &mut RecordReader<'_>,
    ) -> Result<(), CacheError> {
        self.state.reset();
        let attack = AudioSection::decode(arena, record)?;
        let release = AudioSection::decode(arena, record)?;
        record.finish()?;
        if attack.channels() != 1 || release.channels() != 1 {
            return Err(CacheError::Malformed(format!(
                "{}: tremulant waves are mono",
                self.title
            )));
        }
        self.install(attack, release);
        Ok(())
    }

    fn save_to_cache(
        &self,
        arena: &SampleArena,
        record: &mut RecordWriter,
    ) -> Result<(), CacheError> {
        match (&self.attack, &self.release) {
            (Some(attack), Some(release)) if self.is_ready() => {
                attack.encode(arena, record)?;
                release.encode(arena, record)
            }
            _ => Err(CacheError::NotReady(self.title.clone())),
        }
    }

    fn fail(&mut self, message: String) {
        self.attack = None;
        self.release = None;
        self.state.fail(message);
    }

    fn reset(&mut self) {
        self.attack = None;
        self.release = None;
        self.state.reset();
    }
}

impl fmt::Debug for TremulantWave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TremulantWave")
            .field("title", &self.title)
            .field("params", &self.params)
            .field("ready", &self.state.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::MemoryStore;

    fn params() -> TremulantParams {
        TremulantParams {
            period_ms: 160,
            amp_mod_depth: 18,
            start_rate: 8,
            stop_rate: 8,
            sample_rate: 8000,
        }
    }

    #[test]
    fn test_synthesized_wave() {
        let arena = SampleArena::unbounded();
        let mut tremulant = TremulantWave::new("Tremulant".to_string(), params());
        tremulant
            .load_from_file(&arena, &MemoryStore::new())
            .unwrap();
        assert!(tremulant.is_ready());

        let period = 8000 * 160 / 1000;
        let attack = tremulant.attack().unwrap();
        let lp = attack.loops()[0];
        assert_eq!(lp.len(), period);
        assert_eq!(lp.start as usize % period, 0);
        assert_eq!(attack.channels(), 1);

        // The loop starts at full depth and the wave never leaves [1 - depth, 1].
        let samples = attack.samples(&arena).unwrap();
        assert!((samples[lp.start as usize] - 1.0).abs() < 1e-6);
        let trough = samples[lp.start as usize + period / 2];
        assert!((trough - 0.82).abs() < 1e-3);
        assert!(samples.iter().all(|s| *s >= 0.819 && *s <= 1.0));

        let release = tremulant.release().unwrap();
        assert!(release.frames() >= RELEASE_PERIODS * period);
        assert!(release.loops().is_empty());
    }

    #[test]
    fn test_invalid_parameters() {
        let arena = SampleArena::unbounded();
        let mut bad = params();
        bad.period_ms = 0;
        let mut tremulant = TremulantWave::new("Broken".to_string(), bad);
        assert!(matches!(
            tremulant.load_from_file(&arena, &MemoryStore::new()),
            Err(LoadError::Invalid(_))
        ));

        bad = params();
        bad.amp_mod_depth = 150;
        let mut tremulant = TremulantWave::new("Broken".to_string(), bad);
        assert!(tremulant
            .load_from_file(&arena, &MemoryStore::new())
            .is_err());
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_cache_record() {
        let arena = SampleArena::unbounded();
        let mut tremulant = TremulantWave::new("Tremulant".to_string(), params());
        tremulant
            .load_from_file(&arena, &MemoryStore::new())
            .unwrap();
        let mut record = RecordWriter::new();
        tremulant.save_to_cache(&arena, &mut record).unwrap();

        let mut restored = TremulantWave::new("Tremulant".to_string(), params());
        restored
            .load_from_cache(&arena, &mut RecordReader::new(record.as_bytes()))
            .unwrap();
        assert_eq!(
            restored.attack().unwrap().samples(&arena),
            tremulant.attack().unwrap().samples(&arena)
        );
        assert_eq!(
            restored.release().unwrap().samples(&arena),
            tremulant.release().unwrap().samples(&arena)
        );

        restored.fail("gone".to_string());
        assert!(matches!(
            restored.save_to_cache(&arena, &mut RecordWriter::new()),
            Err(CacheError::NotReady(_))
        ));
        assert_eq!(restored.load_error(), Some("gone"));
    }
}
