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
use std::iter::Enumerate;
use std::slice::IterMut;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::objects::CacheObject;

type Cursor<'a> = Enumerate<IterMut<'a, Box<dyn CacheObject>>>;

/// Hands out the objects of an organ, each exactly once, in distributor order.
///
/// Objects are handed out as exclusive borrows, so a worker owns the object it
/// fetched until it is done with it and no per-object locking is needed.
pub struct ObjectDistributor<'a> {
    cursor: Mutex<Cursor<'a>>,
    total: usize,
    pos: AtomicUsize,
    loaded: AtomicUsize,
    aborted: AtomicBool,
}

impl<'a> ObjectDistributor<'a> {
    /// Creates a distributor over all objects of an organ.
    pub fn new(objects: &'a mut [Box<dyn CacheObject>]) -> ObjectDistributor<'a> {
        ObjectDistributor {
            total: objects.len(),
            cursor: Mutex::new(objects.iter_mut().enumerate()),
            pos: AtomicUsize::new(0),
            loaded: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
        }
    }

    /// Returns the number of objects.
    pub fn n_objects(&self) -> usize {
        self.total
    }

    /// Returns the next object and its index, or None once all objects were handed
    /// out or the distributor was aborted.
    pub fn fetch_next(&self) -> Option<(usize, &'a mut Box<dyn CacheObject>)> {
        if self.is_aborted() {
            return None;
        }
        let mut cursor = self.cursor.lock();
        let next = cursor.next();
        if next.is_some() {
            self.pos.fetch_add(1, Ordering::AcqRel);
        }
        next
    }

    /// Returns the number of objects handed out so far.
    pub fn pos(&self) -> usize {
        self.pos.load(Ordering::Acquire)
    }

    /// Records that an object finished loading successfully.
    pub fn record_loaded(&self) {
        self.loaded.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the number of objects loaded successfully.
    pub fn loaded(&self) -> usize {
        self.loaded.load(Ordering::Acquire)
    }

    /// Returns true once every object has been loaded.
    pub fn is_complete(&self) -> bool {
        self.loaded() == self.total
    }

    /// Stops handing out objects. Objects already fetched are unaffected.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ObjectDistributor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDistributor")
            .field("total", &self.total)
            .field("pos", &self.pos())
            .field("loaded", &self.loaded())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
