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

//! Output channel allocation and patch selection.
//!
//! Melodic instruments are handed out channels round-robin, skipping the percussion
//! channel. Bank and program messages are cached per channel so that a patch is only
//! sent when it actually changes.

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::midi::{self, CHANNEL_COUNT, PERCUSSION_CHANNEL};
use crate::patches::{Patch, MELODIC_BANK};
use crate::soundbank::PatchIndex;

/// Channels available to melodic instruments, in allocation order.
const MELODIC_CHANNELS: [u8; 15] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 11, 12, 13, 14, 15];

/// The channel used when every melodic channel is taken.
pub const FALLBACK_CHANNEL: u8 = 0;

/// Banks tried, in order, when looking for a drum kit.
const KIT_BANKS: [u16; 3] = [128, 1, 0];

/// The resolution state of the drum kit on the percussion channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KitState {
    /// No kit has been selected since the last reset.
    Unresolved,
    /// A kit present in the soundbank was selected.
    Resolved(Patch),
    /// Nothing matched, so only a program change was sent and the bank is unknown.
    ProgramOnly(u8),
}

impl KitState {
    /// Returns true once kit resolution has run.
    pub fn is_locked(&self) -> bool {
        !matches!(self, KitState::Unresolved)
    }
}

/// Per channel state for a single output device.
pub struct ChannelState {
    /// The device that receives patch and reset messages.
    device: Arc<dyn midi::Device>,
    /// The patches provided by the loaded soundbank.
    index: PatchIndex,
    /// Instrument id to assigned channel.
    assignments: HashMap<u8, u8>,
    /// The instrument assigned to each channel.
    owners: [Option<u8>; CHANNEL_COUNT as usize],
    /// Position in MELODIC_CHANNELS where the next search starts.
    cursor: usize,
    /// The last patch sent to each channel.
    patches: [Option<Patch>; CHANNEL_COUNT as usize],
    /// The drum kit on the percussion channel.
    kit: KitState,
}

impl ChannelState {
    /// Creates a new channel state. No messages are sent until the first reset.
    pub fn new(device: Arc<dyn midi::Device>, index: PatchIndex) -> ChannelState {
        ChannelState {
            device,
            index,
            assignments: HashMap::new(),
            owners: [None; CHANNEL_COUNT as usize],
            cursor: 0,
            patches: [None; CHANNEL_COUNT as usize],
            kit: KitState::Unresolved,
        }
    }

    /// Returns the channel for the instrument, assigning a free melodic channel and
    /// applying the patch if the instrument has not been seen since the last reset.
    pub fn resolve_channel(&mut self, instrument: u8, patch: Patch) -> u8 {
        if let Some(channel) = self.assignments.get(&instrument) {
            return *channel;
        }

        let start = self.cursor;
        let free = (0..MELODIC_CHANNELS.len())
            .map(|offset| (start + offset) % MELODIC_CHANNELS.len())
            .find(|slot| self.owners[usize::from(MELODIC_CHANNELS[*slot])].is_none());

        match free {
            Some(slot) => {
                let channel = MELODIC_CHANNELS[slot];
                self.assignments.insert(instrument, channel);
                self.owners[usize::from(channel)] = Some(instrument);
                self.cursor = (slot + 1) % MELODIC_CHANNELS.len();
                debug!(instrument, channel, "Assigned channel to instrument.");
                self.apply_patch(channel, patch);
                channel
            }
            None => {
                warn!(
                    instrument,
                    channel = FALLBACK_CHANNEL,
                    "No free channel, sharing the fallback channel."
                );
                self.apply_patch(FALLBACK_CHANNEL, patch);
                FALLBACK_CHANNEL
            }
        }
    }

    /// Selects the patch on the channel. If the soundbank lacks the patch but has the
    /// same program in the general bank, the general bank is used instead. Nothing is
    /// sent if the channel already has the patch.
    pub fn apply_patch(&mut self, channel: u8, patch: Patch) {
        let general = Patch::new(MELODIC_BANK, patch.program);
        let patch = if !self.index.provides(patch) && self.index.provides(general) {
            debug!(channel, %patch, "Patch unavailable, using the general bank.");
            general
        } else {
            patch
        };

        self.select(channel, patch);
    }

    /// Picks a drum kit for the percussion channel. Runs at most once per reset.
    pub fn resolve_percussion_kit(&mut self, desired_program: u8) {
        if self.kit.is_locked() {
            return;
        }

        let desired_program = desired_program & 0x7F;
        let candidate = KIT_BANKS
            .iter()
            .flat_map(|bank| {
                [desired_program, 0]
                    .into_iter()
                    .map(move |program| Patch::new(*bank, program))
            })
            .find(|patch| self.index.provides(*patch));

        match candidate {
            Some(patch) => {
                self.select(PERCUSSION_CHANNEL, patch);
                self.kit = KitState::Resolved(patch);
                debug!(%patch, requested = desired_program, "Percussion kit set.");
            }
            None => {
                // No kit in the soundbank: send the program alone, bank untouched.
                self.send(|device| device.set_program(PERCUSSION_CHANNEL, desired_program));
                self.patches[usize::from(PERCUSSION_CHANNEL)] = None;
                self.kit = KitState::ProgramOnly(desired_program);
                debug!(
                    program = desired_program,
                    "Percussion kit fallback, bank not set."
                );
            }
        }
    }

    /// Forgets all assignments, cached patches and the drum kit, and resets every
    /// channel on the device.
    pub fn reset(&mut self) {
        self.assignments.clear();
        self.owners = [None; CHANNEL_COUNT as usize];
        self.cursor = 0;
        self.patches = [None; CHANNEL_COUNT as usize];
        self.kit = KitState::Unresolved;

        for channel in 0..CHANNEL_COUNT {
            self.send(|device| {
                device.all_notes_off(channel)?;
                device.reset_controllers(channel)
            });
        }
    }

    /// Returns the channel assigned to the instrument, if any.
    pub fn channel_for(&self, instrument: u8) -> Option<u8> {
        self.assignments.get(&instrument).copied()
    }

    /// Returns the last patch sent to the channel.
    pub fn patch(&self, channel: u8) -> Option<Patch> {
        self.patches.get(usize::from(channel)).copied().flatten()
    }

    /// Returns the drum kit state.
    pub fn kit(&self) -> KitState {
        self.kit
    }

    /// Sends bank MSB, bank LSB and program, unless the channel already has the patch.
    fn select(&mut self, channel: u8, patch: Patch) {
        let cached = &mut self.patches[usize::from(channel % CHANNEL_COUNT)];
        if *cached == Some(patch) {
            return;
        }
        *cached = Some(patch);

        self.send(|device| {
            device.set_bank_msb(channel, patch.bank_msb())?;
            device.set_bank_lsb(channel, patch.bank_lsb())?;
            device.set_program(channel, patch.program)
        });
    }

    /// Runs the operation against the device. Failures are logged and otherwise ignored.
    fn send<F>(&self, operation: F)
    where
        F: FnOnce(&dyn midi::Device) -> Result<(), Box<dyn Error>>,
    {
        if let Err(e) = operation(self.device.as_ref()) {
            error!(
                device = self.device.name(),
                err = e.as_ref(),
                "Error sending to MIDI device."
            );
        }
    }
}
