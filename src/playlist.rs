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
use core::fmt;

use rand::Rng;
use tracing::{info, span, Level, Span};

use crate::tracks::{quantize::Divisor, Track};

/// The direction to move through the playlist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Forward,
    Back,
}

/// Playlist is the ordered set of loaded tracks for use by a player.
pub struct Playlist {
    /// The tracks that this playlist will play.
    tracks: Vec<Track>,
    /// The current position of the playlist.
    position: usize,
    /// Whether next and previous pick a random track.
    shuffle: bool,
    /// The logging span.
    span: Span,
}

impl fmt::Display for Playlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Playlist ({} tracks):", self.tracks.len())?;
        for track in self.tracks.iter() {
            writeln!(
                f,
                "  - {} (Notes: {}, Length: {:.2} ticks)",
                track.name(),
                track.notes().len(),
                track.max_end()
            )?;
        }

        Ok(())
    }
}

impl Playlist {
    /// Creates a new playlist positioned at the first track.
    pub fn new(tracks: Vec<Track>, shuffle: bool) -> Playlist {
        Playlist {
            tracks,
            position: 0,
            shuffle,
            span: span!(Level::INFO, "playlist"),
        }
    }

    /// Moves to the track with the given number. Returns false and stays put if no
    /// track has that number.
    pub fn start_at(&mut self, number: u32) -> bool {
        match self
            .tracks
            .iter()
            .position(|track| track.number() == Some(number))
        {
            Some(position) => {
                self.position = position;
                true
            }
            None => false,
        }
    }

    /// Returns the track at the current position, if there are any tracks.
    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.position)
    }

    /// The current position.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    /// Move to the next track, wrapping at the end. In shuffle mode a random track other
    /// than the current one is picked.
    pub fn next(&mut self) -> Option<&Track> {
        self.step(Step::Forward, &mut rand::thread_rng())
    }

    /// Move to the previous track, wrapping at the start. In shuffle mode a random track
    /// other than the current one is picked.
    pub fn prev(&mut self) -> Option<&Track> {
        self.step(Step::Back, &mut rand::thread_rng())
    }

    /// Moves to the given position. Out of range positions are ignored.
    pub fn select(&mut self, position: usize) -> Option<&Track> {
        if position < self.tracks.len() {
            self.position = position;
            self.log_position("Moving to selected playlist position.");
        }
        self.current()
    }

    /// Snaps the notes of every track to the new grid.
    pub fn requantize(&mut self, divisor: Divisor) {
        self.tracks
            .iter_mut()
            .for_each(|track| track.requantize(divisor));
    }

    fn step<R: Rng>(&mut self, step: Step, rng: &mut R) -> Option<&Track> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }

        self.position = if self.shuffle && len > 1 {
            // Pick from every other position with equal weight.
            let candidate = rng.gen_range(0..len - 1);
            if candidate >= self.position {
                candidate + 1
            } else {
                candidate
            }
        } else {
            match step {
                Step::Forward => (self.position + 1) % len,
                Step::Back => (self.position + len - 1) % len,
            }
        };

        self.log_position(match step {
            Step::Forward => "Moving to next playlist position.",
            Step::Back => "Moving to previous playlist position.",
        });
        self.current()
    }

    fn log_position(&self, message: &str) {
        let _enter = self.span.enter();
        info!(
            position = self.position,
            track = self.current().map(|track| track.name()).unwrap_or_default(),
            "{}",
            message
        );
    }
}
