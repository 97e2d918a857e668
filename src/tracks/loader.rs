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

//! Converts standard MIDI files into notes positioned in host ticks.
//!
//! The file's own tempo map is ignored. The file resolution (ticks per quarter note) is
//! combined with the configured BPM and host tick duration to get the number of file
//! ticks per host tick, and every event is placed by dividing its absolute file tick by
//! that ratio.

use std::collections::HashMap;
use std::time::Duration;

use midly::{Format, MidiMessage, Smf, Timing, TrackEventKind};
use tracing::debug;

use super::quantize::Divisor;
use super::Note;
use crate::midi::{CHANNEL_COUNT, PERCUSSION_CHANNEL};
use crate::patches::{self, Patch};

const MICROS_PER_MINUTE: f64 = 60_000_000.0;

/// Errors that prevent a MIDI file from becoming a track.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unable to read MIDI file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed MIDI file: {0}")]
    Parse(#[from] midly::Error),

    #[error("SMPTE timecode timing is not supported")]
    UnsupportedTiming,

    #[error("sequential (format 2) MIDI files are not supported")]
    UnsupportedFormat,

    #[error("invalid timebase: {0}")]
    Timebase(String),
}

/// The settings that determine where notes land in host ticks.
#[derive(Clone, Copy, Debug)]
pub struct LoadSettings {
    /// Beats per minute used in place of the file's tempo.
    pub bpm: u32,
    /// The duration of a single host tick.
    pub tick_duration: Duration,
    /// The initial quantization grid.
    pub divisor: Divisor,
}

/// Converts file ticks into host ticks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Timebase {
    file_ticks_per_host_tick: f64,
}

impl Timebase {
    /// Creates a timebase for a file with the given resolution.
    pub fn new(
        ticks_per_beat: u16,
        bpm: u32,
        tick_duration: Duration,
    ) -> Result<Timebase, LoadError> {
        if ticks_per_beat == 0 {
            return Err(LoadError::Timebase("file resolution is zero".to_string()));
        }
        if bpm == 0 {
            return Err(LoadError::Timebase("BPM is zero".to_string()));
        }
        if tick_duration.is_zero() {
            return Err(LoadError::Timebase("tick duration is zero".to_string()));
        }

        let micros_per_beat = MICROS_PER_MINUTE / f64::from(bpm);
        let micros_per_host_tick = tick_duration.as_secs_f64() * 1_000_000.0;
        Ok(Timebase {
            file_ticks_per_host_tick: f64::from(ticks_per_beat) * micros_per_host_tick
                / micros_per_beat,
        })
    }

    /// The number of file ticks that make up one host tick.
    pub fn file_ticks_per_host_tick(&self) -> f64 {
        self.file_ticks_per_host_tick
    }

    /// Converts an absolute file tick into a host tick position.
    pub fn to_host_ticks(&self, file_tick: u64) -> f64 {
        file_tick as f64 / self.file_ticks_per_host_tick
    }
}

/// A note that has been started but not yet released.
struct Pending {
    onset: f64,
    velocity: u8,
    instrument: u8,
    patch: Patch,
}

/// Parses the MIDI file contents into notes ordered by onset.
pub fn load_notes(buf: &[u8], settings: &LoadSettings) -> Result<Vec<Note>, LoadError> {
    let smf = Smf::parse(buf)?;

    if smf.header.format == Format::Sequential {
        return Err(LoadError::UnsupportedFormat);
    }
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(ticks_per_beat) => ticks_per_beat.as_int(),
        Timing::Timecode(_, _) => return Err(LoadError::UnsupportedTiming),
    };
    let timebase = Timebase::new(ticks_per_beat, settings.bpm, settings.tick_duration)?;

    // Merge the channel events of every track by absolute tick. The sort is stable, so
    // events at the same tick keep their track order.
    let mut events: Vec<(u64, usize, u8, MidiMessage)> = Vec::new();
    for (track_number, track) in smf.tracks.iter().enumerate() {
        let mut tick: u64 = 0;
        for event in track.iter() {
            tick += u64::from(event.delta.as_int());
            if let TrackEventKind::Midi { channel, message } = event.kind {
                events.push((tick, track_number, channel.as_int(), message));
            }
        }
    }
    events.sort_by_key(|(tick, track_number, _, _)| (*tick, *track_number));

    let mut programs = [0u8; CHANNEL_COUNT as usize];
    let mut pending: HashMap<(u8, u8), Pending> = HashMap::new();
    let mut notes: Vec<Note> = Vec::new();

    let close = |key: u8, channel: u8, started: Pending, release: f64| {
        Note::new(
            key,
            started.velocity,
            channel,
            started.instrument,
            started.patch,
            started.onset,
            release,
            settings.divisor,
        )
    };

    for (tick, _, channel, message) in events {
        let position = timebase.to_host_ticks(tick);
        match message {
            MidiMessage::ProgramChange { program } => {
                programs[usize::from(channel)] = program.as_int();
            }
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                let instrument = programs[usize::from(channel)];
                // The percussion channel's program selects a kit rather than an instrument.
                let patch = if channel == PERCUSSION_CHANNEL {
                    Patch::new(0, instrument)
                } else {
                    patches::map(instrument)
                };

                let started = Pending {
                    onset: position,
                    velocity: vel.as_int(),
                    instrument,
                    patch,
                };
                // A retrigger replaces the sounding note, which is never closed.
                pending.insert((channel, key.as_int()), started);
            }
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                if let Some(started) = pending.remove(&(channel, key.as_int())) {
                    notes.push(close(key.as_int(), channel, started, position));
                }
            }
            _ => {}
        }
    }

    if !pending.is_empty() {
        debug!(
            unreleased = pending.len(),
            "Dropping notes that were never released."
        );
    }

    notes.sort_by(|a, b| a.onset().total_cmp(&b.onset()));
    Ok(notes)
}
