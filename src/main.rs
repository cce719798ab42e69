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
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use keyzone::config::{self, SamplerConfig};
use keyzone::render;
use keyzone::sampler::Sampler;
use keyzone::util::{note_display, seconds_display};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A key-mapped sample player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Renders a MIDI file through the sampler into a WAV file.
    Render {
        /// The path to the sampler config.
        config_path: String,
        /// The MIDI file to play.
        midi_path: String,
        /// The WAV file to write.
        output_path: String,
        /// Seconds to keep rendering after the last MIDI event.
        #[arg(short, long, default_value_t = 2.0)]
        tail: f64,
    },
    /// Lists and verifies the sounds in a sampler config.
    Sounds {
        /// The path to the sampler config.
        config_path: String,
    },
    /// Lists the sounds each note plays.
    NoteNames {
        /// The path to the sampler config.
        config_path: String,
    },
}

/// Loads a config and builds its sampler. Media paths are relative to the config file.
fn load_sampler(config_path: &str) -> Result<(SamplerConfig, Sampler), Box<dyn Error>> {
    let path = PathBuf::from(config_path);
    let config = config::load(&path)?;
    let base_path = path.parent().unwrap_or(Path::new("."));
    let sampler = Sampler::from_config(&config, base_path)?;
    Ok((config, sampler))
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            config_path,
            midi_path,
            output_path,
            tail,
        } => {
            let (config, sampler) = load_sampler(&config_path)?;
            let summary = render::render_file(
                &sampler,
                Path::new(&midi_path),
                Path::new(&output_path),
                config.block_size(),
                Duration::from_secs_f64(tail.max(0.0)),
            )?;

            println!(
                "Rendered {} events to {} ({}, peak {:.3}).",
                summary.events,
                output_path,
                seconds_display(summary.frames as f64 / config.sample_rate() as f64),
                summary.peak
            );
        }
        Commands::Sounds { config_path } => {
            let (_, sampler) = load_sampler(&config_path)?;

            if sampler.num_sounds() == 0 {
                println!("No sounds found in {}.", config_path);
                return Ok(());
            }

            let library = sampler.library();
            println!("Sounds (count: {}):", sampler.num_sounds());
            for index in 0..sampler.num_sounds() {
                let missing = library.get(index).map_or(true, |s| !s.is_playable());
                println!(
                    "- {} ({}{}): key {}, notes {} to {}, start {}, length {}, gain {:.1} dB, pan {:.2}{}",
                    sampler.sound_name(index),
                    sampler.sound_media(index),
                    if missing { ", missing" } else { "" },
                    note_display(sampler.key_note(index)),
                    note_display(sampler.min_key(index)),
                    note_display(sampler.max_key(index)),
                    seconds_display(sampler.sound_start_time(index)),
                    seconds_display(sampler.sound_length(index)),
                    sampler.sound_gain_db(index),
                    sampler.sound_pan(index),
                    if sampler.is_sound_open_ended(index) {
                        ", open ended"
                    } else {
                        ""
                    },
                );
            }
        }
        Commands::NoteNames { config_path } => {
            let (_, sampler) = load_sampler(&config_path)?;

            for note in 0..128u8 {
                let name = sampler.note_name(note);
                if !name.is_empty() {
                    println!("{:>4} {}", note_display(note as i32), name);
                }
            }
        }
    }

    Ok(())
}
