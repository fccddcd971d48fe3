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
use config::{Config, File, FileFormat};
use serde::Deserialize;

use super::error::ConfigError;
use crate::objects::{
    CacheObject, LoopPoint, PipeSample, SampleFile, TremulantParams, TremulantWave,
};

/// A YAML representation of a sample set: the ranks of an organ and its wave
/// tremulants.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct SampleSet {
    /// The name of the organ.
    name: String,

    #[serde(default)]
    ranks: Vec<Rank>,

    #[serde(default)]
    tremulants: Vec<Tremulant>,
}

/// A rank of pipes.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Rank {
    name: String,
    pipes: Vec<Pipe>,
}

/// A single pipe.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Pipe {
    /// Display name, e.g. the note. Defaults to the pipe's position in the rank.
    name: Option<String>,
    attacks: Vec<Attack>,
    #[serde(default)]
    releases: Vec<Release>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Attack {
    file: String,
    #[serde(default)]
    loops: Vec<LoopPoint>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Release {
    file: String,
}

/// A synthesized wave tremulant.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Tremulant {
    name: String,
    period_ms: u32,
    amp_mod_depth: u32,
    #[serde(default = "default_rate")]
    start_rate: u32,
    #[serde(default = "default_rate")]
    stop_rate: u32,
    #[serde(default = "default_sample_rate")]
    sample_rate: u32,
}

fn default_rate() -> u32 {
    10
}

fn default_sample_rate() -> u32 {
    44100
}

impl SampleSet {
    /// Parses a sample set from the text of a YAML definition.
    pub fn parse(text: &str) -> Result<SampleSet, ConfigError> {
        let set = Config::builder()
            .add_source(File::from_str(text, FileFormat::Yaml))
            .build()?
            .try_deserialize::<SampleSet>()?;
        set.validate()?;
        Ok(set)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for rank in &self.ranks {
            for (i, pipe) in rank.pipes.iter().enumerate() {
                if pipe.attacks.is_empty() {
                    return Err(ConfigError::Definition(format!(
                        "pipe {} of rank {} has no attacks",
                        i + 1,
                        rank.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ranks(&self) -> &[Rank] {
        &self.ranks
    }

    pub fn tremulants(&self) -> &[Tremulant] {
        &self.tremulants
    }

    /// Builds the loadable objects of the organ.
    ///
    /// The order is part of the cache format: ranks in file order, the pipes of each
    /// rank in order, then the tremulants in file order.
    pub fn objects(&self) -> Vec<Box<dyn CacheObject>> {
        let pipes = self.ranks.iter().flat_map(|rank| {
            rank.pipes.iter().enumerate().map(move |(i, pipe)| {
                let title = match &pipe.name {
                    Some(name) => format!("{} {}", rank.name, name),
                    None => format!("{} {}", rank.name, i + 1),
                };
                Box::new(pipe.to_sample(title)) as Box<dyn CacheObject>
            })
        });
        let tremulants = self.tremulants.iter().map(|tremulant| {
            Box::new(TremulantWave::new(
                tremulant.name.clone(),
                tremulant.params(),
            )) as Box<dyn CacheObject>
        });
        pipes.chain(tremulants).collect()
    }
}

impl Rank {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipes(&self) -> &[Pipe] {
        &self.pipes
    }
}

impl Pipe {
    fn to_sample(&self, title: String) -> PipeSample {
        let attacks = self
            .attacks
            .iter()
            .map(|attack| SampleFile {
                file: attack.file.clone(),
                loops: attack.loops.clone(),
            })
            .collect();
        let releases = self
            .releases
            .iter()
            .map(|release| SampleFile {
                file: release.file.clone(),
                loops: Vec::new(),
            })
            .collect();
        PipeSample::new(title, attacks, releases)
    }
}

impl Tremulant {
    fn params(&self) -> TremulantParams {
        TremulantParams {
            period_ms: self.period_ms,
            amp_mod_depth: self.amp_mod_depth,
            start_rate: self.start_rate,
            stop_rate: self.stop_rate,
            sample_rate: self.sample_rate,
        }
    }
}
