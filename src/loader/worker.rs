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

//! Direct loading on a pool of loader threads plus the calling thread.
//!
//! Workers only share the distributor and the arena. Everything they report goes to
//! the calling thread over a channel, and only the calling thread talks to the
//! progress reporter.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::{Receiver, Sender};
use rayon::ThreadPoolBuilder;
use tracing::{error, info, warn};

use super::progress::LoadProgress;
use super::LoadFailure;
use crate::arena::SampleArena;
use crate::distributor::ObjectDistributor;
use crate::files::FileStore;
use crate::objects::CacheObject;

/// What a worker reports after each object.
enum WorkerEvent {
    Loaded {
        title: String,
    },
    Failed {
        failure: LoadFailure,
        out_of_memory: bool,
    },
}

/// Result of the direct load phase.
#[derive(Debug, Default)]
pub(super) struct DirectLoad {
    pub failures: Vec<LoadFailure>,
    pub out_of_memory: bool,
    pub cancelled: bool,
}

/// Loads every object the distributor still holds, starting with `first` if given.
pub(super) fn direct_load<'a>(
    distributor: &ObjectDistributor<'a>,
    first: Option<(usize, &'a mut Box<dyn CacheObject>)>,
    arena: &SampleArena,
    files: &dyn FileStore,
    concurrency: usize,
    progress: &mut dyn LoadProgress,
) -> DirectLoad {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut driver = Driver {
        distributor,
        rx,
        result: DirectLoad::default(),
    };

    // A pool of zero threads would mean "one per CPU" to rayon.
    let pool = if concurrency == 0 {
        None
    } else {
        match ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("pipecache-loader-{i}"))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(err = %e, "Unable to start loader threads, loading on the calling thread");
                None
            }
        }
    };

    match pool {
        Some(pool) => pool.in_place_scope(|scope| {
            for _ in 0..concurrency {
                let tx = tx.clone();
                scope.spawn(move |_| run_worker(distributor, arena, files, &tx));
            }
            driver.run(first, arena, files, progress, tx);
        }),
        None => driver.run(first, arena, files, progress, tx),
    }

    let mut result = driver.result;
    result.failures.sort_by_key(|failure| failure.index);
    result
}

/// Loop run by each pooled worker.
fn run_worker(
    distributor: &ObjectDistributor<'_>,
    arena: &SampleArena,
    files: &dyn FileStore,
    tx: &Sender<WorkerEvent>,
) {
    while let Some((index, object)) = distributor.fetch_next() {
        let event = load_object(distributor, index, object, arena, files);
        if tx.send(event).is_err() {
            break;
        }
    }
}

/// Loads one object. Errors and panics are recorded on the object, never propagated.
fn load_object(
    distributor: &ObjectDistributor<'_>,
    index: usize,
    object: &mut Box<dyn CacheObject>,
    arena: &SampleArena,
    files: &dyn FileStore,
) -> WorkerEvent {
    let result = panic::catch_unwind(AssertUnwindSafe(|| object.load_from_file(arena, files)));
    let title = object.load_title().to_string();
    let (message, out_of_memory) = match result {
        Ok(Ok(())) => {
            distributor.record_loaded();
            return WorkerEvent::Loaded { title };
        }
        Ok(Err(e)) => (e.to_string(), e.is_out_of_memory()),
        Err(payload) => (
            format!("panicked while loading: {}", panic_message(payload.as_ref())),
            false,
        ),
    };

    if out_of_memory {
        distributor.abort();
    }
    error!(object = title.as_str(), err = message.as_str(), "Unable to load object");
    object.fail(message.clone());
    WorkerEvent::Failed {
        failure: LoadFailure {
            index,
            title,
            message,
        },
        out_of_memory,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// The calling thread: a worker that also reports progress and polls for cancellation.
struct Driver<'d, 'a> {
    distributor: &'d ObjectDistributor<'a>,
    rx: Receiver<WorkerEvent>,
    result: DirectLoad,
}

impl<'a> Driver<'_, 'a> {
    fn run(
        &mut self,
        first: Option<(usize, &'a mut Box<dyn CacheObject>)>,
        arena: &SampleArena,
        files: &dyn FileStore,
        progress: &mut dyn LoadProgress,
        tx: Sender<WorkerEvent>,
    ) {
        if let Some((index, object)) = first {
            let event = load_object(self.distributor, index, object, arena, files);
            self.handle(event, progress);
        }

        while let Some((index, object)) = self.distributor.fetch_next() {
            let event = load_object(self.distributor, index, object, arena, files);
            self.handle(event, progress);
            while let Ok(event) = self.rx.try_recv() {
                self.handle(event, progress);
            }
        }

        // Wait for the pooled workers to finish their last objects.
        drop(tx);
        while let Ok(event) = self.rx.recv() {
            self.handle(event, progress);
        }
    }

    fn handle(&mut self, event: WorkerEvent, progress: &mut dyn LoadProgress) {
        let title = match event {
            WorkerEvent::Loaded { title } => title,
            WorkerEvent::Failed {
                failure,
                out_of_memory,
            } => {
                self.result.out_of_memory |= out_of_memory;
                let title = failure.title.clone();
                self.result.failures.push(failure);
                title
            }
        };

        if self.result.cancelled {
            return;
        }
        let total = self.distributor.n_objects();
        if !progress.update(self.distributor.pos(), total, &title) {
            info!(pos = self.distributor.pos(), total, "Load cancelled");
            self.result.cancelled = true;
            self.distributor.abort();
        }
    }
}
