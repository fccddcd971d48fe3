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

//! Byte sources for sample files.
//!
//! Sample set definitions name their files relative to the definition. Where the bytes
//! actually come from (a directory on disk, an archive) is hidden behind [`FileStore`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use symphonia::core::io::MediaSource;

/// Opens sample files by the name used in the sample set definition.
pub trait FileStore: Sync {
    /// Opens the named file for reading.
    fn open(&self, name: &str) -> io::Result<Box<dyn MediaSource>>;
}

/// Normalizes a definition file name. Definitions written on Windows use backslashes.
pub fn normalize_name(name: &str) -> String {
    name.replace('\\', "/")
}

/// Returns the lowercase extension of a definition file name, if any.
pub fn extension(name: &str) -> Option<String> {
    Path::new(&normalize_name(name))
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Serves files from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Creates a store rooted at the given directory.
    pub fn new<P: AsRef<Path>>(root: P) -> DirectoryStore {
        DirectoryStore {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolves a definition file name to a path on disk.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let name = normalize_name(name);
        let path = Path::new(&name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl FileStore for DirectoryStore {
    fn open(&self, name: &str) -> io::Result<Box<dyn MediaSource>> {
        let path = self.resolve(name);
        // Include the path in the error so the user sees which file failed.
        let file = File::open(&path)
            .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))?;
        Ok(Box::new(file))
    }
}

/// Serves files from memory. Stands in for archive members.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: HashMap<String, Arc<Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Adds a file to the store.
    pub fn insert(&mut self, name: &str, bytes: Vec<u8>) {
        self.files.insert(normalize_name(name), Arc::new(bytes));
    }
}

/// Read-only view over shared bytes.
struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl FileStore for MemoryStore {
    fn open(&self, name: &str) -> io::Result<Box<dyn MediaSource>> {
        let name = normalize_name(name);
        match self.files.get(&name) {
            Some(bytes) => Ok(Box::new(Cursor::new(SharedBytes(bytes.clone())))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: not found", name),
            )),
        }
    }
}
