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

/// What the loader is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    ReadingCache,
    LoadingSamples,
    WritingCache,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadPhase::ReadingCache => "Reading sample cache",
            LoadPhase::LoadingSamples => "Loading samples",
            LoadPhase::WritingCache => "Writing sample cache",
        })
    }
}

/// Receives progress from the thread driving a load.
///
/// Only the driving thread ever calls into the reporter, so implementations need not
/// be thread safe.
pub trait LoadProgress {
    /// Called when a phase starts.
    fn setup(&mut self, total: usize, phase: LoadPhase);

    /// Called after each object. Returning false cancels the load.
    fn update(&mut self, pos: usize, total: usize, title: &str) -> bool;
}

/// A reporter that ignores progress and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl LoadProgress for NoProgress {
    fn setup(&mut self, _total: usize, _phase: LoadPhase) {}

    fn update(&mut self, _pos: usize, _total: usize, _title: &str) -> bool {
        true
    }
}
