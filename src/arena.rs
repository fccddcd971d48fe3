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

//! Bounded sample memory shared by all loader threads.
//!
//! Every block of sample data that an organ keeps resident is allocated here. The
//! arena enforces a byte ceiling fixed for the session, owns every block it hands
//! out, and releases all of them at once when the organ is unloaded.

use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

/// Error returned when the arena cannot grant a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("out of memory: {requested} bytes requested, {used} of {limit} bytes in use")]
    OutOfMemory {
        requested: usize,
        used: usize,
        limit: usize,
    },
}

/// Handle to a block owned by a [`SampleArena`].
///
/// Handles are tied to the arena generation they were issued in and stop resolving
/// once the arena is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    index: usize,
    generation: u64,
}

impl BlockId {
    /// Returns the position of the block within the arena.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// A thread-safe, bounded allocator for sample data.
pub struct SampleArena {
    /// Maximum number of bytes that may be granted in this session.
    limit: usize,
    /// Bytes currently reserved or committed.
    used: AtomicUsize,
    /// Committed blocks. The arena is their only owner.
    blocks: RwLock<Vec<Arc<[f32]>>>,
    /// Bumped by every release.
    generation: u64,
}

impl SampleArena {
    /// Creates an arena that grants at most `limit` bytes.
    pub fn new(limit: usize) -> SampleArena {
        SampleArena {
            limit,
            used: AtomicUsize::new(0),
            blocks: RwLock::new(Vec::new()),
            generation: 0,
        }
    }

    /// Creates an arena without a practical ceiling.
    pub fn unbounded() -> SampleArena {
        SampleArena::new(usize::MAX)
    }

    /// Reserves room for `samples` f32 values and returns a zeroed buffer to fill.
    ///
    /// The reservation is granted atomically: concurrent callers can never push the
    /// tracked usage past the ceiling. If the buffer is dropped without being
    /// committed, its bytes are returned to the arena.
    pub fn allocate(&self, samples: usize) -> Result<ArenaBuffer<'_>, ArenaError> {
        let requested = samples.saturating_mul(size_of::<f32>());
        self.reserve(requested)?;

        Ok(ArenaBuffer {
            arena: self,
            data: Some(vec![0.0; samples]),
            bytes: requested,
        })
    }

    fn reserve(&self, requested: usize) -> Result<(), ArenaError> {
        let limit = self.limit;
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(requested).filter(|total| *total <= limit)
            })
            .map(|_| ())
            .map_err(|used| ArenaError::OutOfMemory {
                requested,
                used,
                limit,
            })
    }

    fn unreserve(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Returns the data of a committed block, or None if the block has been released.
    pub fn block(&self, id: BlockId) -> Option<Arc<[f32]>> {
        if id.generation != self.generation {
            return None;
        }
        self.blocks.read().get(id.index).cloned()
    }

    /// Returns the number of bytes currently granted.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Returns the configured ceiling in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the number of committed blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    /// Releases every block at once. Handles issued before this call no longer resolve.
    pub fn release_all(&mut self) {
        let blocks = std::mem::take(self.blocks.get_mut());
        debug!(
            blocks = blocks.len(),
            bytes = self.used(),
            "Releasing sample arena"
        );
        self.used.store(0, Ordering::Release);
        self.generation += 1;
    }
}

impl std::fmt::Debug for SampleArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleArena")
            .field("limit", &self.limit)
            .field("used", &self.used())
            .field("blocks", &self.block_count())
            .finish()
    }
}

/// A reserved but not yet committed allocation.
pub struct ArenaBuffer<'a> {
    arena: &'a SampleArena,
    data: Option<Vec<f32>>,
    bytes: usize,
}

impl ArenaBuffer<'_> {
    /// Returns the buffer contents for filling.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        self.data.as_deref_mut().unwrap_or_default()
    }

    /// Returns the buffer contents.
    pub fn as_slice(&self) -> &[f32] {
        self.data.as_deref().unwrap_or_default()
    }

    /// Returns the number of samples in the buffer.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Returns true if the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hands the buffer over to the arena and returns its handle.
    pub fn commit(mut self) -> BlockId {
        let data: Arc<[f32]> = self.data.take().unwrap_or_default().into();
        let mut blocks = self.arena.blocks.write();
        blocks.push(data);
        BlockId {
            index: blocks.len() - 1,
            generation: self.arena.generation,
        }
    }
}

impl Drop for ArenaBuffer<'_> {
    fn drop(&mut self) {
        if self.data.is_some() {
            self.arena.unreserve(self.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rand::Rng;

    use super::*;

    #[test]
    fn test_allocate_and_commit() {
        let arena = SampleArena::new(1024);
        let mut buffer = arena.allocate(16).expect("allocation should fit");
        buffer.as_mut_slice()[3] = 0.5;
        assert_eq!(arena.used(), 64);

        let id = buffer.commit();
        assert_eq!(arena.used(), 64);
        assert_eq!(arena.block_count(), 1);

        let block = arena.block(id).expect("block should exist");
        assert_eq!(block.len(), 16);
        assert_eq!(block[3], 0.5);
    }

    #[test]
    fn test_allocation_crossing_ceiling_fails() {
        let arena = SampleArena::new(100);
        let first = arena.allocate(20).unwrap().commit();
        assert_eq!(arena.used(), 80);

        // 80 + 24 > 100
        match arena.allocate(6) {
            Err(ArenaError::OutOfMemory {
                requested,
                used,
                limit,
            }) => {
                assert_eq!(requested, 24);
                assert_eq!(used, 80);
                assert_eq!(limit, 100);
            }
            Ok(_) => panic!("allocation past the ceiling must fail"),
        }
        assert_eq!(arena.used(), 80);

        // Exactly reaching the ceiling is fine.
        arena.allocate(5).unwrap().commit();
        assert_eq!(arena.used(), 100);
        assert!(arena.block(first).is_some());
    }

    #[test]
    fn test_dropped_reservation_is_returned() {
        let arena = SampleArena::new(400);
        {
            let _buffer = arena.allocate(100).unwrap();
            assert_eq!(arena.used(), 400);
            assert!(arena.allocate(1).is_err());
        }
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.block_count(), 0);
        assert!(arena.allocate(100).is_ok());
    }

    #[test]
    fn test_release_all() {
        let mut arena = SampleArena::unbounded();
        let id = arena.allocate(8).unwrap().commit();
        arena.allocate(8).unwrap().commit();
        assert_eq!(arena.block_count(), 2);

        arena.release_all();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.block_count(), 0);
        assert!(arena.block(id).is_none());
    }

    #[test]
    fn test_released_handle_does_not_resolve_to_new_block() {
        let mut arena = SampleArena::unbounded();
        let mut buffer = arena.allocate(4).unwrap();
        buffer.as_mut_slice().fill(1.0);
        let stale = buffer.commit();

        arena.release_all();
        let mut buffer = arena.allocate(4).unwrap();
        buffer.as_mut_slice().fill(9.0);
        let fresh = buffer.commit();

        assert_eq!(stale.index(), fresh.index());
        assert!(arena.block(stale).is_none());
        assert_eq!(&arena.block(fresh).unwrap()[..], &[9.0; 4]);
    }

    #[test]
    fn test_concurrent_allocations_never_exceed_ceiling() {
        let limit = 64 * 1024;
        let arena = SampleArena::new(limit);

        let granted: usize = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        let mut rng = rand::thread_rng();
                        let mut granted = 0;
                        for _ in 0..200 {
                            let samples = rng.gen_range(1..256);
                            if let Ok(buffer) = arena.allocate(samples) {
                                granted += samples * size_of::<f32>();
                                buffer.commit();
                            }
                            assert!(arena.used() <= limit);
                        }
                        granted
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert!(granted <= limit);
        assert_eq!(granted, arena.used());
    }
}
