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
use std::fmt;

use super::Note;

/// Tolerance used when snapping, so values that are on a grid line up to floating
/// point error are not pushed to the neighbouring line.
const SNAP_EPSILON: f64 = 1e-9;

/// The quantization divisor is out of range.
#[derive(Debug, thiserror::Error)]
#[error(
    "quantization divisor must be between {min} and {max}, got {0}",
    min = Divisor::MIN,
    max = Divisor::MAX
)]
pub struct DivisorError(pub u32);

/// The number of equal sub-divisions of a host tick used as the quantization grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Divisor(u16);

impl Divisor {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 256;
    pub const DEFAULT: Divisor = Divisor(64);

    /// Creates a divisor, rejecting values outside of 1 to 256.
    pub fn new(divisor: u32) -> Result<Divisor, DivisorError> {
        match u16::try_from(divisor) {
            Ok(value) if (Self::MIN..=Self::MAX).contains(&value) => Ok(Divisor(value)),
            _ => Err(DivisorError(divisor)),
        }
    }

    /// The divisor value.
    pub fn get(&self) -> u16 {
        self.0
    }

    /// The grid step in host ticks.
    pub fn step(&self) -> f64 {
        1.0 / f64::from(self.0)
    }

    /// Snaps the position to the closest grid line at or below it.
    pub fn floor(&self, position: f64) -> f64 {
        let divisor = f64::from(self.0);
        ((position * divisor + SNAP_EPSILON).floor() / divisor).max(0.0)
    }

    /// Snaps the position to the closest grid line at or above it.
    pub fn ceil(&self, position: f64) -> f64 {
        let divisor = f64::from(self.0);
        ((position * divisor - SNAP_EPSILON).ceil() / divisor).max(0.0)
    }
}

impl Default for Divisor {
    fn default() -> Self {
        Divisor::DEFAULT
    }
}

impl fmt::Display for Divisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "1/{}", self.0)
    }
}

/// Snaps the boundaries of every note to the grid of the given divisor. Starts are
/// floored and ends are ceiled, and a note always keeps at least one grid step.
///
/// The grid is applied to the unquantized onset and release, not to the current
/// boundaries, so moving from a coarse grid to a finer one restores the precision the
/// coarse grid dropped.
pub fn requantize(notes: &mut [Note], divisor: Divisor) {
    notes.iter_mut().for_each(|note| note.quantize(divisor));
}

/// Returns the quantized (start, end) for the raw onset and release.
pub(super) fn snap(onset: f64, release: f64, divisor: Divisor) -> (f64, f64) {
    let start = divisor.floor(onset);
    let end = divisor.ceil(release);
    if end > start {
        (start, end)
    } else {
        (start, start + divisor.step())
    }
}

#[cfg(test)]
mod test {
    use crate::patches::Patch;
    use crate::tracks::Note;

    use super::*;

    fn note(onset: f64, release: f64) -> Note {
        Note::new(60, 100, 0, 0, Patch::new(0, 0), onset, release, Divisor::DEFAULT)
    }

    #[test]
    fn test_divisor_range() {
        assert!(Divisor::new(0).is_err());
        assert!(Divisor::new(257).is_err());
        assert!(Divisor::new(70000).is_err());
        assert_eq!(1, Divisor::new(1).expect("valid").get());
        assert_eq!(256, Divisor::new(256).expect("valid").get());
        assert_eq!(64, Divisor::default().get());
    }

    #[test]
    fn test_floor_and_ceil() -> Result<(), DivisorError> {
        let quarter = Divisor::new(4)?;
        assert_eq!(0.25, quarter.floor(0.3));
        assert_eq!(0.5, quarter.ceil(0.3));
        assert_eq!(0.5, quarter.floor(0.5));
        assert_eq!(0.5, quarter.ceil(0.5));

        let whole = Divisor::new(1)?;
        assert_eq!(0.0, whole.floor(0.5));
        assert_eq!(1.0, whole.ceil(0.5));

        // Values a hair off a grid line stay on it.
        let tenth = Divisor::new(10)?;
        assert_eq!(0.3, tenth.floor(0.1 + 0.2));
        assert_eq!(0.3, tenth.ceil(0.1 + 0.2));
        Ok(())
    }

    #[test]
    fn test_requantize_is_idempotent() -> Result<(), DivisorError> {
        let mut notes = vec![note(0.13, 0.61), note(2.49, 2.5), note(7.0, 9.333)];
        let divisor = Divisor::new(3)?;

        requantize(&mut notes, divisor);
        let once: Vec<(f64, f64)> = notes.iter().map(|n| (n.start(), n.end())).collect();
        requantize(&mut notes, divisor);
        let twice: Vec<(f64, f64)> = notes.iter().map(|n| (n.start(), n.end())).collect();

        assert_eq!(once, twice);
        Ok(())
    }

    #[test]
    fn test_finer_grid_restores_precision() -> Result<(), DivisorError> {
        let raw = vec![note(0.13, 0.61), note(2.49, 2.8), note(7.3, 9.333)];
        let fine = Divisor::new(8)?;

        let mut direct = raw.clone();
        requantize(&mut direct, fine);

        let mut coarse_then_fine = raw;
        requantize(&mut coarse_then_fine, Divisor::new(1)?);
        requantize(&mut coarse_then_fine, fine);

        let bounds = |notes: &[Note]| -> Vec<(f64, f64)> {
            notes.iter().map(|n| (n.start(), n.end())).collect()
        };
        assert_eq!(bounds(&direct), bounds(&coarse_then_fine));
        Ok(())
    }

    #[test]
    fn test_boundaries_stay_ordered() -> Result<(), DivisorError> {
        let mut notes = vec![
            note(0.0, 0.001),
            note(0.5, 0.5),
            note(3.99, 4.01),
            note(10.2, 10.21),
        ];

        for divisor in [1, 2, 3, 7, 64, 256, 1, 5] {
            requantize(&mut notes, Divisor::new(divisor)?);
            for note in notes.iter() {
                assert!(note.start() >= 0.0);
                assert!(note.start() < note.end(), "{} < {}", note.start(), note.end());
            }
        }
        Ok(())
    }

    #[test]
    fn test_zero_length_note_gets_one_step() -> Result<(), DivisorError> {
        let divisor = Divisor::new(4)?;
        assert_eq!((0.5, 0.75), snap(0.5, 0.5, divisor));
        assert_eq!((0.25, 0.5), snap(0.3, 0.4, divisor));
        Ok(())
    }
}
