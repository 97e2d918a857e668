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

//! MIDI file fixtures for tests.

use std::{error::Error, fs, path::Path};

use midly::{
    num::{u15, u28, u4, u7},
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
};

/// A channel event in a generated file.
#[derive(Clone, Copy, Debug)]
pub enum Event {
    /// Channel, key, velocity.
    NoteOn(u8, u8, u8),
    /// Channel, key.
    NoteOff(u8, u8),
    /// Channel, program.
    ProgramChange(u8, u8),
}

impl Event {
    fn kind(self) -> TrackEventKind<'static> {
        let (channel, message) = match self {
            Event::NoteOn(channel, key, vel) => (
                channel,
                MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(vel),
                },
            ),
            Event::NoteOff(channel, key) => (
                channel,
                MidiMessage::NoteOff {
                    key: u7::new(key),
                    vel: u7::new(0),
                },
            ),
            Event::ProgramChange(channel, program) => (
                channel,
                MidiMessage::ProgramChange {
                    program: u7::new(program),
                },
            ),
        };
        TrackEventKind::Midi {
            channel: u4::new(channel),
            message,
        }
    }
}

/// Builds a metrical MIDI file. Each track is a list of (delta, event) pairs.
pub fn midi_file(
    ticks_per_beat: u16,
    tracks: Vec<Vec<(u32, Event)>>,
) -> Result<Vec<u8>, Box<dyn Error>> {
    let format = if tracks.len() == 1 {
        Format::SingleTrack
    } else {
        Format::Parallel
    };
    let mut smf = Smf::new(Header::new(
        format,
        Timing::Metrical(u15::new(ticks_per_beat)),
    ));

    for events in tracks {
        let mut track: Vec<TrackEvent<'static>> = events
            .into_iter()
            .map(|(delta, event)| TrackEvent {
                delta: u28::new(delta),
                kind: event.kind(),
            })
            .collect();
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf.tracks.push(track);
    }

    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    Ok(buf)
}

/// Writes a track file with one note per listed tick, each one tick long, at 100 BPM
/// with 96 ticks per beat.
pub fn write_track_file(folder: &Path, name: &str, notes: &[u8]) -> Result<(), Box<dyn Error>> {
    let mut events = Vec::new();
    for key in notes {
        events.push((0, Event::NoteOn(0, *key, 100)));
        events.push((96, Event::NoteOff(0, *key)));
    }
    fs::write(folder.join(name), midi_file(96, vec![events])?)?;
    Ok(())
}
