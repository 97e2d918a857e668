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

//! Maps source instrument ids onto synthesizer patches.
//!
//! The mapping is the identity on programs with a small override table that routes
//! some instrument ids to alternate banks. The alternate banks only categorize the
//! instrument; the reserved MIDI percussion channel is handled separately.

use std::fmt;

/// The general bank that every program falls back to.
pub const MELODIC_BANK: u16 = 0;

/// The bank used for percussion-flavored instruments.
pub const PERCUSSION_BANK: u16 = 1;

/// The bank used for vocal-flavored instruments.
pub const VOCAL_BANK: u16 = 2;

/// The number of instrument ids known to the mapper.
pub const INSTRUMENT_COUNT: u8 = 128;

/// A synthesizer patch: a 14 bit bank plus a program within that bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Patch {
    /// The bank, sent as two 7 bit controller values.
    pub bank: u16,
    /// The program within the bank.
    pub program: u8,
}

impl Patch {
    /// Creates a new patch.
    pub const fn new(bank: u16, program: u8) -> Patch {
        Patch { bank, program }
    }

    /// The most significant 7 bits of the bank.
    pub fn bank_msb(&self) -> u8 {
        ((self.bank >> 7) & 0x7F) as u8
    }

    /// The least significant 7 bits of the bank.
    pub fn bank_lsb(&self) -> u8 {
        (self.bank & 0x7F) as u8
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", self.bank, self.program)
    }
}

/// Returns the bank for the given instrument id.
pub fn map_bank(instrument: u8) -> u16 {
    match instrument {
        0..=3 => VOCAL_BANK,
        8 | 16 | 24 | 25 | 40 | 48 | 50 | 56 | 127 => PERCUSSION_BANK,
        _ => MELODIC_BANK,
    }
}

/// Returns the program for the given instrument id. Unknown ids map to program 0.
pub fn map_program(instrument: u8) -> u8 {
    if is_supported(instrument) {
        instrument
    } else {
        0
    }
}

/// Returns true if the instrument id belongs to the supported instrument set.
pub fn is_supported(instrument: u8) -> bool {
    instrument < INSTRUMENT_COUNT
}

/// Maps the instrument id to its full patch.
pub fn map(instrument: u8) -> Patch {
    Patch::new(map_bank(instrument), map_program(instrument))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_identity_mapping() {
        assert_eq!(Patch::new(MELODIC_BANK, 42), map(42));
        assert_eq!(Patch::new(MELODIC_BANK, 126), map(126));
        assert!(is_supported(42));
    }

    #[test]
    fn test_override_banks() {
        for instrument in [0, 1, 2, 3] {
            assert_eq!(VOCAL_BANK, map_bank(instrument));
            assert_eq!(instrument, map_program(instrument));
        }
        for instrument in [8, 16, 24, 25, 40, 48, 50, 56, 127] {
            assert_eq!(PERCUSSION_BANK, map_bank(instrument));
            assert_eq!(instrument, map_program(instrument));
        }
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(Patch::new(MELODIC_BANK, 0), map(128));
        assert_eq!(Patch::new(MELODIC_BANK, 0), map(255));
        assert!(!is_supported(128));
    }

    #[test]
    fn test_bank_split() {
        let patch = Patch::new(128, 0);
        assert_eq!(1, patch.bank_msb());
        assert_eq!(0, patch.bank_lsb());

        let patch = Patch::new(0x3FFF, 0);
        assert_eq!(0x7F, patch.bank_msb());
        assert_eq!(0x7F, patch.bank_lsb());

        let patch = Patch::new(2, 0);
        assert_eq!(0, patch.bank_msb());
        assert_eq!(2, patch.bank_lsb());
    }
}
