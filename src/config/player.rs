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
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, File};
use duration_string::DurationString;
use serde::Deserialize;

use crate::{
    midi::CHANNEL_COUNT,
    scheduler::{Settings, Volumes, MAX_CHANNEL_VOLUME, MAX_GLOBAL_VOLUME},
    tracks::{quantize::Divisor, LoadSettings, TrackFilter},
};

use super::error::ConfigError;

const DEFAULT_BPM: u32 = 100;
const DEFAULT_TICK_DURATION: Duration = Duration::from_millis(600);
const DEFAULT_VOLUME: u8 = 100;
const DEFAULT_CHANNEL_VOLUME: u16 = 100;

fn default_enabled() -> bool {
    true
}

fn default_bpm() -> u32 {
    DEFAULT_BPM
}

fn default_quantize_divisor() -> u32 {
    u32::from(Divisor::DEFAULT.get())
}

fn default_volume() -> u8 {
    DEFAULT_VOLUME
}

/// The configuration for the player.
#[derive(Deserialize, Clone, Debug)]
pub struct Player {
    /// When false the player never dispatches anything.
    #[serde(default = "default_enabled")]
    enabled: bool,

    /// The MIDI output device. Names starting with "mock" select a recording device.
    midi_device: String,

    /// The folder the MIDI tracks are loaded from.
    midi_folder: String,

    /// An optional SoundFont used to tell which patches exist.
    soundfont: Option<String>,

    /// The tempo every file is played at.
    #[serde(default = "default_bpm")]
    bpm: u32,

    /// The host tick period, e.g. "600ms".
    tick_duration: Option<String>,

    #[serde(default = "default_quantize_divisor")]
    quantize_divisor: u32,

    /// Global volume in percent.
    #[serde(default = "default_volume")]
    volume: u8,

    /// Volume in percent keyed by zero based output channel.
    #[serde(default)]
    channel_volumes: HashMap<String, u16>,

    #[serde(default)]
    shuffle: bool,

    /// Skip melodic notes whose instrument has no known patch.
    #[serde(default)]
    supported_instruments_only: bool,

    /// The track number to start at.
    starting_track: Option<u32>,

    #[serde(default)]
    track_whitelist: Vec<u32>,

    #[serde(default)]
    track_blacklist: Vec<u32>,
}

impl Player {
    /// Parses and validates a player configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Player, ConfigError> {
        let player = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Player>()?;
        player.validate()?;
        Ok(player)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bpm == 0 {
            return Err(ConfigError::invalid("bpm", "must be greater than zero"));
        }
        self.tick_duration()?;
        self.divisor()?;
        self.volumes()?;
        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the MIDI device name.
    pub fn midi_device(&self) -> &str {
        &self.midi_device
    }

    /// Returns the folder the tracks live in.
    pub fn midi_folder(&self) -> PathBuf {
        PathBuf::from(&self.midi_folder)
    }

    /// Returns the SoundFont path, if one was configured.
    pub fn soundfont(&self) -> Option<PathBuf> {
        self.soundfont.as_ref().map(PathBuf::from)
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    /// Returns the host tick period.
    pub fn tick_duration(&self) -> Result<Duration, ConfigError> {
        let duration = match &self.tick_duration {
            Some(tick_duration) => DurationString::from_string(tick_duration.clone())
                .map_err(|e| ConfigError::invalid("tick_duration", e))?
                .into(),
            None => DEFAULT_TICK_DURATION,
        };
        if duration.is_zero() {
            return Err(ConfigError::invalid(
                "tick_duration",
                "must be greater than zero",
            ));
        }
        Ok(duration)
    }

    /// Returns the quantization grid.
    pub fn divisor(&self) -> Result<Divisor, ConfigError> {
        Divisor::new(self.quantize_divisor).map_err(|e| ConfigError::invalid("quantize_divisor", e))
    }

    /// Returns the global and per channel volumes.
    pub fn volumes(&self) -> Result<Volumes, ConfigError> {
        if self.volume > MAX_GLOBAL_VOLUME {
            return Err(ConfigError::invalid(
                "volume",
                format!("{} is above {}", self.volume, MAX_GLOBAL_VOLUME),
            ));
        }

        let mut channels = [DEFAULT_CHANNEL_VOLUME; CHANNEL_COUNT as usize];
        for (channel, volume) in self.channel_volumes.iter() {
            let index = channel
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|index| *index < CHANNEL_COUNT)
                .ok_or_else(|| {
                    ConfigError::invalid(
                        "channel_volumes",
                        format!("{} is not a channel between 0 and 15", channel),
                    )
                })?;
            if *volume > MAX_CHANNEL_VOLUME {
                return Err(ConfigError::invalid(
                    "channel_volumes",
                    format!(
                        "channel {} volume {} is above {}",
                        index, volume, MAX_CHANNEL_VOLUME
                    ),
                ));
            }
            channels[usize::from(index)] = *volume;
        }

        Ok(Volumes::new(self.volume, channels))
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn starting_track(&self) -> Option<u32> {
        self.starting_track
    }

    /// Returns the filter applied to track numbers.
    pub fn track_filter(&self) -> TrackFilter {
        TrackFilter::new(self.track_whitelist.clone(), self.track_blacklist.clone())
    }

    /// Returns the settings used to turn files into notes.
    pub fn load_settings(&self) -> Result<LoadSettings, ConfigError> {
        Ok(LoadSettings {
            bpm: self.bpm,
            tick_duration: self.tick_duration()?,
            divisor: self.divisor()?,
        })
    }

    /// Returns the settings the scheduler reads on every tick.
    pub fn scheduler_settings(&self) -> Result<Settings, ConfigError> {
        Ok(Settings {
            enabled: self.enabled,
            tick_duration: self.tick_duration()?,
            volumes: self.volumes()?,
            supported_only: self.supported_instruments_only,
        })
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs, path::PathBuf, time::Duration};

    use crate::tracks::quantize::Divisor;

    use super::{ConfigError, Player};

    fn write_config(dir: &tempfile::TempDir, yaml: &str) -> Result<PathBuf, Box<dyn Error>> {
        let path = dir.path().join("player.yaml");
        fs::write(&path, yaml)?;
        Ok(path)
    }

    #[test]
    fn test_defaults() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = write_config(&dir, "midi_device: mock-device\nmidi_folder: /tmp/tracks\n")?;
        let player = Player::deserialize(&path)?;

        assert!(player.enabled());
        assert_eq!("mock-device", player.midi_device());
        assert_eq!(PathBuf::from("/tmp/tracks"), player.midi_folder());
        assert_eq!(None, player.soundfont());
        assert_eq!(100, player.bpm());
        assert_eq!(Duration::from_millis(600), player.tick_duration()?);
        assert_eq!(Divisor::DEFAULT, player.divisor()?);
        assert!(!player.shuffle());
        assert_eq!(None, player.starting_track());

        let volumes = player.volumes()?;
        assert_eq!(100, volumes.global());
        assert!((0..16).all(|channel| volumes.channel(channel) == 100));

        let settings = player.scheduler_settings()?;
        assert!(settings.enabled);
        assert!(!settings.supported_only);
        assert!(player.track_filter().allows(None));
        Ok(())
    }

    #[test]
    fn test_full_config() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = write_config(
            &dir,
            r#"
enabled: false
midi_device: mock-device
midi_folder: tracks
soundfont: bank.sf2
bpm: 120
tick_duration: 300ms
quantize_divisor: 16
volume: 75
channel_volumes:
  "0": 150
  "9": 50
shuffle: true
supported_instruments_only: true
starting_track: 3
track_whitelist: [1, 3]
track_blacklist: [2]
"#,
        )?;
        let player = Player::deserialize(&path)?;

        assert!(!player.enabled());
        assert_eq!(Some(PathBuf::from("bank.sf2")), player.soundfont());
        assert_eq!(Duration::from_millis(300), player.tick_duration()?);
        assert_eq!(Divisor::new(16)?, player.divisor()?);
        assert!(player.shuffle());
        assert_eq!(Some(3), player.starting_track());

        let volumes = player.volumes()?;
        assert_eq!(75, volumes.global());
        assert_eq!(150, volumes.channel(0));
        assert_eq!(50, volumes.channel(9));
        assert_eq!(100, volumes.channel(1));

        let load = player.load_settings()?;
        assert_eq!(120, load.bpm);

        let filter = player.track_filter();
        assert!(filter.allows(Some(1)));
        assert!(!filter.allows(Some(2)));
        assert!(!filter.allows(Some(4)));
        assert!(player.scheduler_settings()?.supported_only);
        Ok(())
    }

    #[test]
    fn test_invalid_values() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let base = "midi_device: mock-device\nmidi_folder: tracks\n";
        for (extra, field) in [
            ("quantize_divisor: 0", "quantize_divisor"),
            ("quantize_divisor: 512", "quantize_divisor"),
            ("volume: 101", "volume"),
            ("channel_volumes:\n  \"3\": 201", "channel_volumes"),
            ("channel_volumes:\n  \"16\": 100", "channel_volumes"),
            ("bpm: 0", "bpm"),
            ("tick_duration: 0ms", "tick_duration"),
            ("tick_duration: soon", "tick_duration"),
        ] {
            let path = write_config(&dir, &format!("{}{}\n", base, extra))?;
            match Player::deserialize(&path) {
                Err(ConfigError::Invalid { field: got, .. }) => assert_eq!(field, got),
                Err(e) => panic!("unexpected error for {}: {}", extra, e),
                Ok(_) => panic!("expected {} to be rejected", extra),
            }
        }
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let result = Player::deserialize(&PathBuf::from("/nonexistent/player.yaml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
