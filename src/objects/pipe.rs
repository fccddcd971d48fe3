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
use std::fmt;

use tracing::debug;

use super::section::{AudioSection, LoopPoint, PendingSection};
use super::{CacheObject, LoadError, LoadState};
use crate::arena::SampleArena;
use crate::audio;
use crate::cache::{CacheError, RecordReader, RecordWriter};
use crate::files::{self, FileStore};

/// A sample file referenced by a pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFile {
    /// Name of the file relative to the sample set.
    pub file: String,
    /// Loops within the file. Releases have none.
    pub loops: Vec<LoopPoint>,
}

/// The samples of one pipe: its attacks and releases.
pub struct PipeSample {
    title: String,
    attack_files: Vec<SampleFile>,
    release_files: Vec<SampleFile>,
    attacks: Vec<AudioSection>,
    releases: Vec<AudioSection>,
    state: LoadState,
}

impl PipeSample {
    /// Creates an unloaded pipe.
    pub fn new(
        title: String,
        attack_files: Vec<SampleFile>,
        release_files: Vec<SampleFile>,
    ) -> PipeSample {
        PipeSample {
            title,
            attack_files,
            release_files,
            attacks: Vec::new(),
            releases: Vec::new(),
            state: LoadState::default(),
        }
    }

    /// Returns the resident attack sections.
    pub fn attacks(&self) -> &[AudioSection] {
        &self.attacks
    }

    /// Returns the resident release sections.
    pub fn releases(&self) -> &[AudioSection] {
        &self.releases
    }

    fn load_section<'a>(
        arena: &'a SampleArena,
        store: &dyn FileStore,
        sample: &SampleFile,
        release: bool,
    ) -> Result<PendingSection<'a>, LoadError> {
        let source = store.open(&sample.file).map_err(|e| LoadError::Io {
            file: sample.file.clone(),
            source: e,
        })?;
        let extension = files::extension(&sample.file);
        let decoded =
            audio::decode(source, extension.as_deref()).map_err(|e| LoadError::Decode {
                file: sample.file.clone(),
                source: e,
            })?;
        AudioSection::build(arena, &decoded, &sample.loops, release).map_err(|e| match e {
            LoadError::Invalid(message) => {
                LoadError::Invalid(format!("{}: {}", sample.file, message))
            }
            other => other,
        })
    }

    /// Commits the sections once all of them are known to be good.
    fn install(&mut self, attacks: Vec<PendingSection<'_>>, releases: Vec<PendingSection<'_>>) {
        self.attacks = attacks.into_iter().map(PendingSection::commit).collect();
        self.releases = releases.into_iter().map(PendingSection::commit).collect();
        self.state.set_ready();
    }
}

/// Checks that every section of the pipe has the same channel count.
fn check_channels(title: &str, sections: &[&PendingSection<'_>]) -> Result<(), String> {
    let mut channels = sections.iter().map(|section| section.channels());
    if let Some(first) = channels.next() {
        if let Some(other) = channels.find(|c| *c != first) {
            return Err(format!(
                "{}: sections have mismatched channel counts ({} and {})",
                title, first, other
            ));
        }
    }
    Ok(())
}

impl CacheObject for PipeSample {
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
        store: &dyn FileStore,
    ) -> Result<(), LoadError> {
        self.state.reset();
        if self.attack_files.is_empty() {
            return Err(LoadError::Invalid(format!("{}: no attack samples", self.title)));
        }

        let attacks = self
            .attack_files
            .iter()
            .map(|sample| Self::load_section(arena, store, sample, false))
            .collect::<Result<Vec<_>, _>>()?;
        let releases = self
            .release_files
            .iter()
            .map(|sample| Self::load_section(arena, store, sample, true))
            .collect::<Result<Vec<_>, _>>()?;

        let all: Vec<_> = attacks.iter().chain(releases.iter()).collect();
        check_channels(&self.title, &all).map_err(LoadError::Invalid)?;

        debug!(
            title = self.title.as_str(),
            attacks = attacks.len(),
            releases = releases.len(),
            "Decoded pipe"
        );
        self.install(attacks, releases);
        Ok(())
    }

    fn load_from_cache(
        &mut self,
        arena: &SampleArena,
        record: &mut RecordReader<'_>,
    ) -> Result<(), CacheError> {
        self.state.reset();

        let attack_count = record.read_count(1)?;
        if attack_count != self.attack_files.len() {
            return Err(CacheError::Malformed(format!(
                "{}: cache holds {} attacks, definition has {}",
                self.title,
                attack_count,
                self.attack_files.len()
            )));
        }
        let attacks = (0..attack_count)
            .map(|_| AudioSection::decode(arena, record))
            .collect::<Result<Vec<_>, _>>()?;

        let release_count = record.read_count(1)?;
        if release_count != self.release_files.len() {
            return Err(CacheError::Malformed(format!(
                "{}: cache holds {} releases, definition has {}",
                self.title,
                release_count,
                self.release_files.len()
            )));
        }
        let releases = (0..release_count)
            .map(|_| AudioSection::decode(arena, record))
            .collect::<Result<Vec<_>, _>>()?;
        record.finish()?;

        let all: Vec<_> = attacks.iter().chain(releases.iter()).collect();
        check_channels(&self.title, &all).map_err(CacheError::Malformed)?;

        self.install(attacks, releases);
        Ok(())
    }

    fn save_to_cache(
        &self,
        arena: &SampleArena,
        record: &mut RecordWriter,
    ) -> Result<(), CacheError> {
        if !self.is_ready() {
            return Err(CacheError::NotReady(self.title.clone()));
        }
        record.write_u32(self.attacks.len() as u32);
        for section in &self.attacks {
            section.encode(arena, record)?;
        }
        record.write_u32(self.releases.len() as u32);
        for section in &self.releases {
            section.encode(arena, record)?;
        }
        Ok(())
    }

    fn fail(&mut self, message: String) {
        self.attacks.clear();
        self.releases.clear();
        self.state.fail(message);
    }

    fn reset(&mut self) {
        self.attacks.clear();
        self.releases.clear();
        self.state.reset();
    }
}

impl fmt::Debug for PipeSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeSample")
            .field("title", &self.title)
            .field("attacks", &self.attack_files.len())
            .field("releases", &self.release_files.len())
            .field("ready", &self.state.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;
    use crate::files::{DirectoryStore, MemoryStore};
    use crate::testutil::{wav_bytes, write_wav};

    fn tone(frames: usize, channels: u16) -> Vec<f32> {
        (0..frames * channels as usize)
            .map(|i| ((i as f32) / 20.0).sin() * 0.25)
            .collect()
    }

    fn sample(file: &str, loops: Vec<LoopPoint>) -> SampleFile {
        SampleFile {
            file: file.to_string(),
            loops,
        }
    }

    #[test]
    fn test_load_from_directory() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("pipes"))?;
        write_wav(&dir.path().join("pipes/attack.wav"), 2, &tone(400, 2), 44100)?;
        write_wav(&dir.path().join("pipes/release.wav"), 2, &tone(200, 2), 44100)?;

        let mut pipe = PipeSample::new(
            "Principal 8' C".to_string(),
            vec![sample("pipes\\attack.wav", vec![LoopPoint { start: 100, end: 300 }])],
            vec![sample("pipes/release.wav", vec![])],
        );
        let arena = SampleArena::unbounded();
        pipe.load_from_file(&arena, &DirectoryStore::new(dir.path()))?;

        assert!(pipe.is_ready());
        assert_eq!(pipe.attacks().len(), 1);
        assert_eq!(pipe.releases().len(), 1);
        assert_eq!(pipe.attacks()[0].frames(), 400);
        assert_eq!(pipe.attacks()[0].channels(), 2);
        assert!(pipe.releases()[0].release_align().is_some());
        assert!(pipe.attacks()[0].release_align().is_none());
        assert_eq!(arena.block_count(), 2);
        Ok(())
    }

    #[test]
    fn test_missing_file_returns_reservations() -> Result<(), Box<dyn Error>> {
        let mut store = MemoryStore::new();
        store.insert("attack.wav", wav_bytes(1, &tone(400, 1), 44100)?);

        let mut pipe = PipeSample::new(
            "Flute".to_string(),
            vec![sample("attack.wav", vec![])],
            vec![sample("missing.wav", vec![])],
        );
        let arena = SampleArena::unbounded();
        let result = pipe.load_from_file(&arena, &store);

        assert!(matches!(result, Err(LoadError::Io { .. })));
        assert!(!pipe.is_ready());
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.block_count(), 0);
        Ok(())
    }

    #[test]
    fn test_truncated_file_fails() -> Result<(), Box<dyn Error>> {
        let mut bytes = wav_bytes(1, &tone(4000, 1), 44100)?;
        bytes.truncate(bytes.len() / 2);
        let mut store = MemoryStore::new();
        store.insert("cut.wav", bytes);

        let mut pipe = PipeSample::new(
            "Trumpet".to_string(),
            vec![sample("cut.wav", vec![])],
            vec![],
        );
        let arena = SampleArena::unbounded();
        let result = pipe.load_from_file(&arena, &store);

        assert!(
            matches!(
                result,
                Err(LoadError::Decode {
                    source: audio::DecodeError::Truncated { .. },
                    ..
                })
            ),
            "{:?}",
            result
        );
        assert!(!pipe.is_ready());
        assert_eq!(arena.used(), 0);
        Ok(())
    }

    #[test]
    fn test_mismatched_channels() -> Result<(), Box<dyn Error>> {
        let mut store = MemoryStore::new();
        store.insert("mono.wav", wav_bytes(1, &tone(100, 1), 44100)?);
        store.insert("stereo.wav", wav_bytes(2, &tone(100, 2), 44100)?);

        let mut pipe = PipeSample::new(
            "Mixed".to_string(),
            vec![sample("mono.wav", vec![])],
            vec![sample("stereo.wav", vec![])],
        );
        let arena = SampleArena::unbounded();
        assert!(matches!(
            pipe.load_from_file(&arena, &store),
            Err(LoadError::Invalid(_))
        ));
        assert_eq!(arena.used(), 0);
        Ok(())
    }

    #[test]
    fn test_cache_record() -> Result<(), Box<dyn Error>> {
        let mut store = MemoryStore::new();
        store.insert("a.wav", wav_bytes(1, &tone(300, 1), 48000)?);
        store.insert("r.wav", wav_bytes(1, &tone(150, 1), 48000)?);
        let attacks = vec![sample("a.wav", vec![LoopPoint { start: 0, end: 300 }])];
        let releases = vec![sample("r.wav", vec![])];

        let arena = SampleArena::unbounded();
        let mut pipe = PipeSample::new("Gedackt".to_string(), attacks.clone(), releases.clone());
        pipe.load_from_file(&arena, &store)?;
        let mut record = RecordWriter::new();
        pipe.save_to_cache(&arena, &mut record)?;

        let restored_arena = SampleArena::unbounded();
        let mut restored = PipeSample::new("Gedackt".to_string(), attacks.clone(), releases);
        restored.load_from_cache(&restored_arena, &mut RecordReader::new(record.as_bytes()))?;
        assert!(restored.is_ready());
        assert_eq!(restored.attacks(), pipe.attacks());
        assert_eq!(
            restored.attacks()[0].samples(&restored_arena),
            pipe.attacks()[0].samples(&arena)
        );

        // A definition with a different number of releases cannot use the record.
        let mut changed = PipeSample::new("Gedackt".to_string(), attacks, vec![]);
        assert!(matches!(
            changed.load_from_cache(&restored_arena, &mut RecordReader::new(record.as_bytes())),
            Err(CacheError::Malformed(_))
        ));
        assert!(!changed.is_ready());
        Ok(())
    }

    #[test]
    fn test_save_requires_ready() {
        let pipe = PipeSample::new("Unloaded".to_string(), vec![], vec![]);
        let arena = SampleArena::unbounded();
        assert!(matches!(
            pipe.save_to_cache(&arena, &mut RecordWriter::new()),
            Err(CacheError::NotReady(_))
        ));
    }
}
