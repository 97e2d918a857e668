// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
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

use clap::{crate_version, Parser, Subcommand};
use ticksync::config::{self, init_player_and_controller};
use ticksync::midi;
use ticksync::soundbank::Soundbank;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A MIDI player that keeps note playback locked to a fixed host tick."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loads and lists the tracks the player config selects.
    Tracks {
        /// The path to the player config.
        player_path: String,
    },
    /// Lists the available MIDI output devices.
    MidiDevices {},
    /// Reports which patches a SoundFont provides.
    Soundfont {
        /// The path to the SoundFont file.
        path: String,
    },
    /// Start will start the player with the keyboard controller.
    Start {
        /// The path to the player config.
        player_path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Tracks { player_path } => {
            let player_config = config::Player::deserialize(&PathBuf::from(&player_path))?;
            let tracks = config::load_tracks(&player_config)?;
            if tracks.is_empty() {
                println!(
                    "No tracks found in {}.",
                    player_config.midi_folder().display()
                );
                return Ok(());
            }
            print!("{}", config::playlist(&player_config, tracks));
        }
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;
            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }
            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Soundfont { path } => {
            let soundbank = Soundbank::load(Some(&PathBuf::from(path)));
            println!("{}", soundbank.status());
            println!("Patches: {}", soundbank.index().len());
        }
        Commands::Start { player_path } => {
            init_player_and_controller(&PathBuf::from(player_path))
                .await?
                .join()
                .await?;
        }
    }
    Ok(())
}
