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
use std::{error::Error, fmt, sync::Arc};

use midly::{
    live::LiveEvent,
    num::{u4, u7},
    MidiMessage,
};

mod midir;
mod mock;

/// The number of MIDI channels on a device.
pub const CHANNEL_COUNT: u8 = 16;

/// The channel reserved for drum kits.
pub const PERCUSSION_CHANNEL: u8 = 9;

const BANK_SELECT_MSB: u8 = 0;
const BANK_SELECT_LSB: u8 = 32;
const RESET_ALL_CONTROLLERS: u8 = 121;
const ALL_NOTES_OFF: u8 = 123;

/// A sound engine reachable over MIDI. Implementers only need to emit raw events; the
/// per-channel operations are expressed in terms of emit.
pub trait Device: fmt::Display + std::marker::Send + std::marker::Sync {
    /// Returns the name of the device.
    fn name(&self) -> String;

    /// Emits an event.
    fn emit(&self, event: LiveEvent<'static>) -> Result<(), Box<dyn Error>>;

    /// Sends the most significant 7 bits of the bank.
    fn set_bank_msb(&self, channel: u8, value: u8) -> Result<(), Box<dyn Error>> {
        self.emit(controller(channel, BANK_SELECT_MSB, value))
    }

    /// Sends the least significant 7 bits of the bank.
    fn set_bank_lsb(&self, channel: u8, value: u8) -> Result<(), Box<dyn Error>> {
        self.emit(controller(channel, BANK_SELECT_LSB, value))
    }

    /// Selects the program within the current bank.
    fn set_program(&self, channel: u8, program: u8) -> Result<(), Box<dyn Error>> {
        self.emit(midi_event(
            channel,
            MidiMessage::ProgramChange {
                program: u7::new(program & 0x7F),
            },
        ))
    }

    /// Starts a note.
    fn note_on(&self, channel: u8, key: u8, velocity: u8) -> Result<(), Box<dyn Error>> {
        self.emit(midi_event(
            channel,
            MidiMessage::NoteOn {
                key: u7::new(key & 0x7F),
                vel: u7::new(velocity & 0x7F),
            },
        ))
    }

    /// Stops a note.
    fn note_off(&self, channel: u8, key: u8) -> Result<(), Box<dyn Error>> {
        self.emit(midi_event(
            channel,
            MidiMessage::NoteOff {
                key: u7::new(key & 0x7F),
                vel: u7::new(0),
            },
        ))
    }

    /// Stops every sounding note on the channel.
    fn all_notes_off(&self, channel: u8) -> Result<(), Box<dyn Error>> {
        self.emit(controller(channel, ALL_NOTES_OFF, 0))
    }

    /// Resets the controllers on the channel.
    fn reset_controllers(&self, channel: u8) -> Result<(), Box<dyn Error>> {
        self.emit(controller(channel, RESET_ALL_CONTROLLERS, 0))
    }

    /// Stops every sounding note on every channel.
    fn silence_all(&self) -> Result<(), Box<dyn Error>> {
        (0..CHANNEL_COUNT).try_for_each(|channel| self.all_notes_off(channel))
    }
}

fn midi_event(channel: u8, message: MidiMessage) -> LiveEvent<'static> {
    LiveEvent::Midi {
        channel: u4::new(channel & 0x0F),
        message,
    }
}

fn controller(channel: u8, controller: u8, value: u8) -> LiveEvent<'static> {
    midi_event(
        channel,
        MidiMessage::Controller {
            controller: u7::new(controller),
            value: u7::new(value & 0x7F),
        },
    )
}

/// Lists devices known to midir.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    midir::list()
}

/// Gets a device with the given name.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    };

    Ok(Arc::new(midir::get(name)?))
}
