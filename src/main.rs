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
use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::{crate_version, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use pipecache::config::LoaderSettings;
use pipecache::loader::{LoadOutcome, LoadPhase, LoadProgress};
use pipecache::organ::Organ;
use pipecache::util::{duration_minutes_seconds, filename_display, megabytes};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Loads pipe organ sample sets and manages their sample caches."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct OrganArgs {
    /// The path to the organ definition.
    definition: PathBuf,
    /// The path to the loader settings.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// The preset to use. Overrides the settings file.
    #[arg(short, long)]
    preset: Option<u32>,
}

impl OrganArgs {
    fn settings(&self) -> Result<LoaderSettings, Box<dyn Error>> {
        let mut settings = LoaderSettings::load(self.config.as_deref())?;
        if let Some(preset) = self.preset {
            settings.set_preset(preset);
        }
        Ok(settings)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Loads an organ, from its cache where possible.
    Load {
        #[command(flatten)]
        organ: OrganArgs,
    },
    /// Loads an organ and writes a fresh cache for it.
    UpdateCache {
        #[command(flatten)]
        organ: OrganArgs,
    },
    /// Deletes the cache of an organ.
    DeleteCache {
        #[command(flatten)]
        organ: OrganArgs,
    },
    /// Shows an organ's objects and the state of its cache.
    Info {
        #[command(flatten)]
        organ: OrganArgs,
    },
}

/// Displays load progress on the terminal.
struct BarProgress {
    bar: ProgressBar,
    phase: LoadPhase,
}

impl BarProgress {
    fn new() -> Result<BarProgress, Box<dyn Error>> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("##-"),
        );
        Ok(BarProgress {
            bar,
            phase: LoadPhase::LoadingSamples,
        })
    }
}

impl LoadProgress for BarProgress {
    fn setup(&mut self, total: usize, phase: LoadPhase) {
        self.phase = phase;
        self.bar.reset();
        self.bar.set_length(total as u64);
        self.bar.set_message(phase.to_string());
    }

    fn update(&mut self, pos: usize, _total: usize, title: &str) -> bool {
        self.bar.set_position(pos as u64);
        self.bar.set_message(format!("{}: {}", self.phase, title));
        true
    }
}

impl Drop for BarProgress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

fn load(args: &OrganArgs, write_cache: bool) -> Result<(), Box<dyn Error>> {
    let settings = args.settings()?;
    let mut organ = Organ::from_definition(&args.definition)?;
    let arena = settings.create_arena();

    let start = Instant::now();
    let report = {
        let mut progress = BarProgress::new()?;
        let report = organ.load(&arena, &settings, &mut progress);
        if write_cache && report.cacheable && !report.cache_written {
            let records = organ.update_cache(&arena, &settings, &mut progress)?;
            println!("Wrote {} cache records.", records);
        }
        report
    };

    println!(
        "{}: loaded {} of {} objects in {} ({} resident, cache {:?})",
        organ.name(),
        report.loaded,
        report.total,
        duration_minutes_seconds(start.elapsed()),
        megabytes(arena.used()),
        report.cache_usage,
    );
    for line in report.summary() {
        println!("{}", line);
    }
    for failure in report.failures.iter() {
        println!("- {}: {}", failure.title, failure.message);
    }

    match report.outcome {
        LoadOutcome::Complete => Ok(()),
        outcome => Err(format!(
            "load of {} ended with {:?}",
            filename_display(&args.definition),
            outcome
        )
        .into()),
    }
}

fn delete_cache(args: &OrganArgs) -> Result<(), Box<dyn Error>> {
    let settings = args.settings()?;
    let organ = Organ::from_definition(&args.definition)?;
    let path = organ.cache_path(&settings);
    if organ.delete_cache(&settings)? {
        println!("Deleted {}.", path.display());
    } else {
        println!("No cache at {}.", path.display());
    }
    Ok(())
}

fn info(args: &OrganArgs) -> Result<(), Box<dyn Error>> {
    let settings = args.settings()?;
    let organ = Organ::from_definition(&args.definition)?;

    println!("{} ({})", organ.name(), organ.definition_path().display());
    println!("Definition hash: {}", organ.content_hash().to_hex());
    println!("Objects (count: {}):", organ.objects().len());
    for object in organ.objects() {
        println!("- {}", object.load_title());
    }
    println!(
        "Cache: {} ({})",
        organ.cache_path(&settings).display(),
        organ.cache_status(&settings)
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Load { organ } => load(&organ, false)?,
        Commands::UpdateCache { organ } => load(&organ, true)?,
        Commands::DeleteCache { organ } => delete_cache(&organ)?,
        Commands::Info { organ } => info(&organ)?,
    }

    Ok(())
}
