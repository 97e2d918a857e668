// Copyright (C) 2024 Michael Wilson <mike@mdwn.dev>
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
use std::path::Path;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::channels::ChannelState;
use crate::dispatch::TimerDispatcher;
use crate::playlist::Playlist;
use crate::scheduler::TickScheduler;
use crate::soundbank::Soundbank;
use crate::tracks::{self, Track};

mod error;
mod player;

pub use error::ConfigError;
pub use player::Player;

/// Loads the tracks named by the configuration. A missing or empty folder is not an
/// error: it leaves the playlist empty and the player idle.
pub fn load_tracks(config: &Player) -> Result<Vec<Track>, ConfigError> {
    let folder = config.midi_folder();
    if !folder.is_dir() {
        warn!(folder = ?folder, "MIDI folder does not exist, nothing will play.");
        return Ok(Vec::new());
    }

    let tracks = match tracks::get_all_tracks(
        &folder,
        &config.track_filter(),
        &config.load_settings()?,
    ) {
        Ok(tracks) => tracks,
        Err(e) => {
            warn!(folder = ?folder, err = %e, "Unable to read MIDI folder, nothing will play.");
            Vec::new()
        }
    };
    if tracks.is_empty() {
        warn!(folder = ?folder, "No tracks found, nothing will play.");
    }
    Ok(tracks)
}

/// Builds the playlist, positioned at the configured starting track when it exists.
pub fn playlist(config: &Player, tracks: Vec<Track>) -> Playlist {
    let mut playlist = Playlist::new(tracks, config.shuffle());
    if let Some(number) = config.starting_track() {
        if !playlist.start_at(number) {
            warn!(
                starting_track = number,
                "Starting track not found, starting at the first track."
            );
        }
    }
    playlist
}

/// Initializes the player from the given config file. Must be called from within a
/// tokio runtime, which runs the delayed note commands.
pub fn init_player(player_path: &Path) -> Result<Arc<crate::player::Player>, Box<dyn Error>> {
    let config = Player::deserialize(player_path)?;
    let device = crate::midi::get_device(config.midi_device())?;
    let soundbank = Soundbank::load(config.soundfont().as_deref());
    let tracks = load_tracks(&config)?;
    let divisor = config.divisor()?;

    let scheduler = TickScheduler::new(
        playlist(&config, tracks),
        ChannelState::new(device.clone(), soundbank.index().clone()),
        device.clone(),
        Box::new(TimerDispatcher::new(device, Handle::current())),
        config.scheduler_settings()?,
        soundbank.status(),
        divisor,
    );
    info!(
        tracks = scheduler.playlist().len(),
        enabled = config.enabled(),
        "Player initialized."
    );

    Ok(Arc::new(crate::player::Player::new(scheduler)))
}

/// Initializes the player and starts its tick loop. Nothing runs when playback is
/// disabled or no track was loaded.
pub async fn start_player(
    player_path: &Path,
) -> Result<Arc<crate::player::Player>, Box<dyn Error>> {
    let player = init_player(player_path)?;
    player.start().await?;
    Ok(player)
}

/// Initializes the player and controller from the given config file and returns the
/// controller. The player starts playing right away. The controller owns the player and
/// runs until its input closes.
pub async fn init_player_and_controller(
    player_path: &Path,
) -> Result<crate::controller::Controller, Box<dyn Error>> {
    let player = start_player(player_path).await?;
    let controller = crate::controller::Controller::new(
        player.clone(),
        Arc::new(crate::controller::keyboard::Driver::new()),
    )?;
    Ok(controller)
}
