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

//! Sample loading for pipe organ sample sets.
//!
//! Objects are loaded concurrently into a bounded [`arena::SampleArena`], either by
//! decoding their sample files or from a binary cache written after a previous
//! complete load.

pub mod arena;
pub mod audio;
pub mod cache;
pub mod config;
pub mod distributor;
pub mod files;
pub mod loader;
pub mod objects;
pub mod organ;
pub mod util;

#[cfg(test)]
mod testutil;
