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
use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::Deserialize;

use super::error::ConfigError;
use crate::arena::SampleArena;
use crate::loader::LoadOptions;

/// Name of the cache directory created next to a definition by default.
pub const DEFAULT_CACHE_DIR: &str = ".pipecache";

/// A YAML representation of the loader settings.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct LoaderSettings {
    /// Ceiling on resident sample memory. Unbounded if not set.
    memory_limit_mb: Option<u64>,

    /// Number of loader threads in addition to the calling thread.
    #[serde(default = "default_load_concurrency")]
    load_concurrency: usize,

    /// Write a new cache automatically after a complete load.
    #[serde(default = "default_manage_cache")]
    manage_cache: bool,

    /// Compress cache files.
    #[serde(default)]
    compress_cache: bool,

    /// Directory holding cache files. Defaults to a directory next to the definition.
    cache_dir: Option<PathBuf>,

    /// The active preset. Each preset has its own cache.
    #[serde(default)]
    preset: u32,
}

fn default_load_concurrency() -> usize {
    num_cpus::get()
}

fn default_manage_cache() -> bool {
    true
}

impl Default for LoaderSettings {
    fn default() -> Self {
        LoaderSettings {
            memory_limit_mb: None,
            load_concurrency: default_load_concurrency(),
            manage_cache: default_manage_cache(),
            compress_cache: false,
            cache_dir: None,
            preset: 0,
        }
    }
}

impl LoaderSettings {
    /// Parse loader settings from a YAML file.
    pub fn deserialize(path: &Path) -> Result<LoaderSettings, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<LoaderSettings>()?)
    }

    /// Parse loader settings from the given file, or use the defaults.
    pub fn load(path: Option<&Path>) -> Result<LoaderSettings, ConfigError> {
        match path {
            Some(path) => Self::deserialize(path),
            None => Ok(LoaderSettings::default()),
        }
    }

    pub fn memory_limit_mb(&self) -> Option<u64> {
        self.memory_limit_mb
    }

    /// Returns the memory ceiling in bytes.
    pub fn memory_limit_bytes(&self) -> Option<usize> {
        self.memory_limit_mb
            .map(|mb| usize::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX))
    }

    pub fn load_concurrency(&self) -> usize {
        self.load_concurrency
    }

    pub fn manage_cache(&self) -> bool {
        self.manage_cache
    }

    pub fn compress_cache(&self) -> bool {
        self.compress_cache
    }

    pub fn preset(&self) -> u32 {
        self.preset
    }

    /// Overrides the active preset.
    pub fn set_preset(&mut self, preset: u32) {
        self.preset = preset;
    }

    /// Returns the cache directory for a definition stored in `definition_dir`.
    pub fn cache_dir(&self, definition_dir: &Path) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => definition_dir.join(DEFAULT_CACHE_DIR),
        }
    }

    /// Creates the arena for a session.
    pub fn create_arena(&self) -> SampleArena {
        match self.memory_limit_bytes() {
            Some(limit) => SampleArena::new(limit),
            None => SampleArena::unbounded(),
        }
    }

    /// Returns the options for a load.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            load_concurrency: self.load_concurrency,
            manage_cache: self.manage_cache,
            compress_cache: self.compress_cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use config::{Config, File, FileFormat};

    use super::*;

    #[test]
    fn test_defaults() {
        let settings: LoaderSettings = Config::builder()
            .add_source(File::from_str("preset: 0", FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings, LoaderSettings::default());
        assert_eq!(settings.memory_limit_bytes(), None);
        assert_eq!(settings.load_concurrency(), num_cpus::get());
        assert!(settings.manage_cache());
        assert!(!settings.compress_cache());
        assert_eq!(
            settings.cache_dir(Path::new("/organs/test")),
            PathBuf::from("/organs/test/.pipecache")
        );
        assert_eq!(settings.create_arena().limit(), usize::MAX);
    }

    #[test]
    fn test_all_fields() {
        let yaml = r#"
            memory_limit_mb: 512
            load_concurrency: 3
            manage_cache: false
            compress_cache: true
            cache_dir: /var/cache/organs
            preset: 2
        "#;

        let settings: LoaderSettings = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.memory_limit_mb(), Some(512));
        assert_eq!(settings.memory_limit_bytes(), Some(512 * 1024 * 1024));
        assert_eq!(settings.preset(), 2);
        assert_eq!(
            settings.cache_dir(Path::new("/organs/test")),
            PathBuf::from("/var/cache/organs")
        );
        assert_eq!(
            settings.load_options(),
            LoadOptions {
                load_concurrency: 3,
                manage_cache: false,
                compress_cache: true,
            }
        );
        assert_eq!(settings.create_arena().limit(), 512 * 1024 * 1024);
    }

    #[test]
    fn test_deserialize_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pipecache.yaml");
        std::fs::write(&path, "load_concurrency: 0\ncompress_cache: true\n")?;

        let settings = LoaderSettings::load(Some(&path))?;
        assert_eq!(settings.load_concurrency(), 0);
        assert!(settings.compress_cache());

        assert_eq!(LoaderSettings::load(None)?, LoaderSettings::default());
        assert!(LoaderSettings::load(Some(&dir.path().join("missing.yaml"))).is_err());
        Ok(())
    }
}
