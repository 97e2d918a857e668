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
use std::{error::Error, fmt};

use midir::{MidiOutput, MidiOutputConnection, MidiOutputPort};
use midly::live::LiveEvent;
use parking_lot::Mutex;
use tracing::{debug, info, span, Level};

/// A MIDI output device reached through midir. The connection is opened on first use
/// and kept for the lifetime of the device, since notes are emitted continuously.
pub struct Device {
    name: String,
    output_port: MidiOutputPort,
    connection: Mutex<Option<MidiOutputConnection>>,
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn emit(&self, event: LiveEvent<'static>) -> Result<(), Box<dyn Error>> {
        let mut connection = self.connection.lock();
        if connection.is_none() {
            let span = span!(Level::INFO, "connect (midir)");
            let _enter = span.enter();

            let output = MidiOutput::new("ticksync output")?;
            *connection = Some(output.connect(&self.output_port, "ticksync player")?);
            info!(device = self.name, "Connected to MIDI output.");
        }

        debug!(
            device = self.name,
            event = format!("{:?}", event),
            "Emitting event."
        );

        // Choosing 8 here because no channel message is longer than that.
        let mut buf: Vec<u8> = Vec::with_capacity(8);
        event.write(&mut buf)?;
        if let Some(connection) = connection.as_mut() {
            connection.send(&buf)?;
        }

        Ok(())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Output)", self.name)
    }
}

/// Lists midir devices and produces the Device trait.
pub fn list() -> Result<Vec<Box<dyn super::Device>>, Box<dyn Error>> {
    Ok(list_midir_devices()?
        .into_iter()
        .map(|device| {
            let device: Box<dyn super::Device> = Box::new(device);
            device
        })
        .collect())
}

/// Lists midir output devices.
fn list_midir_devices() -> Result<Vec<Device>, Box<dyn Error>> {
    let output = MidiOutput::new("ticksync output listing")?;

    let mut devices = output
        .ports()
        .into_iter()
        .map(|port| -> Result<Device, Box<dyn Error>> {
            Ok(Device {
                name: output.port_name(&port)?,
                output_port: port,
                connection: Mutex::new(None),
            })
        })
        .collect::<Result<Vec<Device>, Box<dyn Error>>>()?;
    devices.sort_by_key(|device| device.name.clone());
    Ok(devices)
}

/// Gets the given midir device.
pub fn get(name: &str) -> Result<Device, Box<dyn Error>> {
    let mut matches = list_midir_devices()?
        .into_iter()
        .filter(|device| device.name.contains(name))
        .collect::<Vec<Device>>();

    if matches.is_empty() {
        return Err(format!("no device found with name {}", name).into());
    }
    if matches.len() > 1 {
        return Err(format!(
            "found too many devices that match ({}), use a less ambiguous device name",
            matches
                .iter()
                .map(|device| device.name.clone())
                .collect::<Vec<String>>()
                .join(", ")
        )
        .into());
    }

    // We've verified that there's only one element in the vector, so this should be safe.
    Ok(matches.swap_remove(0))
}
