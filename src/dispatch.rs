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

//! Delayed delivery of note commands to a device.

use std::{error::Error, fmt, sync::Arc, time::Duration};

use tokio::{runtime::Handle, task::JoinSet};
use tracing::{debug, error};

use crate::midi;
use crate::playsync::Generation;

/// A note command sent to the device after a delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8 },
}

impl Command {
    /// Sends the command to the device.
    pub fn send(&self, device: &dyn midi::Device) -> Result<(), Box<dyn Error>> {
        match *self {
            Command::NoteOn {
                channel,
                key,
                velocity,
            } => device.note_on(channel, key, velocity),
            Command::NoteOff { channel, key } => device.note_off(channel, key),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::NoteOn {
                channel,
                key,
                velocity,
            } => write!(f, "note on {}/{} ({})", channel, key, velocity),
            Command::NoteOff { channel, key } => write!(f, "note off {}/{}", channel, key),
        }
    }
}

/// Runs commands after a delay. Everything scheduled can be cancelled at once.
pub trait Dispatcher: Send {
    /// Runs the command once the delay has passed.
    fn schedule(&mut self, delay: Duration, command: Command);

    /// Cancels every command that has not run yet. No cancelled command may reach the
    /// device after this returns.
    fn cancel_all(&mut self);
}

/// A dispatcher that runs each command as a timer task on a tokio runtime.
pub struct TimerDispatcher {
    device: Arc<dyn midi::Device>,
    generation: Generation,
    tasks: JoinSet<()>,
    runtime: Handle,
}

impl TimerDispatcher {
    /// Creates a dispatcher that spawns its timers on the given runtime.
    pub fn new(device: Arc<dyn midi::Device>, runtime: Handle) -> TimerDispatcher {
        TimerDispatcher {
            device,
            generation: Generation::new(),
            tasks: JoinSet::new(),
            runtime,
        }
    }

    /// The number of timers that have not been reaped yet.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    fn reap(&mut self) {
        while self.tasks.try_join_next().is_some() {}
    }
}

impl Dispatcher for TimerDispatcher {
    fn schedule(&mut self, delay: Duration, command: Command) {
        self.reap();

        let token = self.generation.token();
        let device = self.device.clone();
        self.tasks.spawn_on(
            async move {
                tokio::time::sleep(delay).await;
                token.run_if_current(|| {
                    if let Err(e) = command.send(device.as_ref()) {
                        error!(
                            device = device.name(),
                            %command,
                            err = e.as_ref(),
                            "Error sending note command."
                        );
                    }
                });
            },
            &self.runtime,
        );
    }

    fn cancel_all(&mut self) {
        // Timers that already woke up hold a stale token after this.
        let generation = self.generation.advance();
        self.tasks.abort_all();
        debug!(generation, "Cancelled pending note commands.");
    }
}
