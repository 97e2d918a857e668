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
use std::{
    cmp::Ordering,
    fmt, fs,
    path::{Path, PathBuf},
};

use rayon::prelude::*;
use tracing::{debug, info, span, warn, Level};

use crate::midi::PERCUSSION_CHANNEL;
use crate::patches::Patch;

mod loader;
pub mod quantize;

pub use loader::{LoadError, LoadSettings, Timebase};
use quantize::Divisor;

/// The extension of track files, compared without case.
const TRACK_EXTENSION: &str = "mid";

/// Separates the track number from the rest of the file name.
const NUMBER_SEPARATOR: &str = " - ";

/// A single note positioned in host ticks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Note {
    key: u8,
    velocity: u8,
    /// The channel the note was written on in the source file.
    channel: u8,
    /// The source instrument id, or the kit selector for percussion notes.
    instrument: u8,
    patch: Patch,
    /// Unquantized boundaries.
    onset: f64,
    release: f64,
    /// Boundaries snapped to the current grid.
    start: f64,
    end: f64,
}

impl Note {
    /// Creates a note and quantizes it with the given divisor.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: u8,
        velocity: u8,
        channel: u8,
        instrument: u8,
        patch: Patch,
        onset: f64,
        release: f64,
        divisor: Divisor,
    ) -> Note {
        let onset = onset.max(0.0);
        let release = release.max(onset);
        let (start, end) = quantize::snap(onset, release, divisor);
        Note {
            key,
            velocity,
            channel,
            instrument,
            patch,
            onset,
            release,
            start,
            end,
        }
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn instrument(&self) -> u8 {
        self.instrument
    }

    pub fn patch(&self) -> Patch {
        self.patch
    }

    pub fn onset(&self) -> f64 {
        self.onset
    }

    pub fn release(&self) -> f64 {
        self.release
    }

    /// The quantized start in host ticks.
    pub fn start(&self) -> f64 {
        self.start
    }

    /// The quantized end in host ticks. Always greater than the start.
    pub fn end(&self) -> f64 {
        self.end
    }

    /// Returns true if the note was written on the percussion channel.
    pub fn is_percussion(&self) -> bool {
        self.channel == PERCUSSION_CHANNEL
    }

    /// Re-derives the quantized boundaries from the raw ones.
    pub(crate) fn quantize(&mut self, divisor: Divisor) {
        (self.start, self.end) = quantize::snap(self.onset, self.release, divisor);
    }
}

/// A loaded MIDI file.
#[derive(Clone, Debug)]
pub struct Track {
    /// The name of the track.
    name: String,
    /// The number parsed from the file name, if any.
    number: Option<u32>,
    /// The notes, ordered by start.
    notes: Vec<Note>,
    /// The latest note end.
    max_end: f64,
}

impl Track {
    /// Loads the track from the MIDI file.
    pub fn load(path: &Path, settings: &LoadSettings) -> Result<Track, LoadError> {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let buf = fs::read(path)?;
        let notes = loader::load_notes(&buf, settings)?;
        Ok(Track::from_notes(name.as_str(), notes))
    }

    /// Creates a track from notes. The number is parsed from the name.
    pub fn from_notes(name: &str, mut notes: Vec<Note>) -> Track {
        notes.sort_by(|a, b| a.start.total_cmp(&b.start));
        let mut track = Track {
            name: name.to_string(),
            number: parse_track_number(name),
            notes,
            max_end: 0.0,
        };
        track.update_max_end();
        track
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> Option<u32> {
        self.number
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// The latest end of any note, or 0 for an empty track.
    pub fn max_end(&self) -> f64 {
        self.max_end
    }

    /// Returns the notes whose start lies in [from, to).
    pub fn notes_starting_in(&self, from: f64, to: f64) -> &[Note] {
        let first = self.notes.partition_point(|note| note.start < from);
        let last = self.notes.partition_point(|note| note.start < to);
        &self.notes[first..last.max(first)]
    }

    /// The number of notes that have not finished by the given position.
    pub fn notes_remaining(&self, position: f64) -> usize {
        self.notes.iter().filter(|note| note.end > position).count()
    }

    /// Snaps every note to the new grid.
    pub fn requantize(&mut self, divisor: Divisor) {
        quantize::requantize(&mut self.notes, divisor);
        // Starts can move relative to each other, so keep the order.
        self.notes.sort_by(|a, b| a.start.total_cmp(&b.start));
        self.update_max_end();
    }

    fn update_max_end(&mut self) {
        self.max_end = self.notes.iter().map(|note| note.end).fold(0.0, f64::max);
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Name: {}\n  Number: {}\n  Notes: {}\n  Length: {:.2} ticks",
            self.name,
            self.number
                .map(|number| number.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            self.notes.len(),
            self.max_end,
        )
    }
}

/// Decides which track numbers are loaded.
#[derive(Clone, Debug, Default)]
pub struct TrackFilter {
    whitelist: Vec<u32>,
    blacklist: Vec<u32>,
}

impl TrackFilter {
    pub fn new(whitelist: Vec<u32>, blacklist: Vec<u32>) -> TrackFilter {
        TrackFilter {
            whitelist,
            blacklist,
        }
    }

    /// Returns true if a track with the number may be loaded. A non-empty whitelist
    /// excludes tracks without a number.
    pub fn allows(&self, number: Option<u32>) -> bool {
        match number {
            Some(number) => {
                (self.whitelist.is_empty() || self.whitelist.contains(&number))
                    && !self.blacklist.contains(&number)
            }
            None => self.whitelist.is_empty(),
        }
    }
}

/// Parses the number in front of the first " - " in the name.
pub fn parse_track_number(name: &str) -> Option<u32> {
    let (number, _) = name.split_once(NUMBER_SEPARATOR)?;
    number.trim().parse::<u32>().ok()
}

/// Numbered tracks come first in numeric order, then unnumbered ones. Ties go by name.
fn track_order(a: (Option<u32>, &str), b: (Option<u32>, &str)) -> Ordering {
    match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.1.cmp(&b.1)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.1.cmp(&b.1),
    }
}

/// Lists the MIDI files in the folder that pass the filter, in playlist order.
pub fn list_track_files(folder: &Path, filter: &TrackFilter) -> std::io::Result<Vec<PathBuf>> {
    let mut candidates: Vec<(Option<u32>, String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_midi = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(TRACK_EXTENSION));
        if !is_midi {
            continue;
        }

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let number = parse_track_number(&name);
        if !filter.allows(number) {
            debug!(file = ?path, "Track excluded by filter.");
            continue;
        }
        candidates.push((number, name, path));
    }

    candidates.sort_by(|a, b| track_order((a.0, &a.1), (b.0, &b.1)));
    Ok(candidates.into_iter().map(|(_, _, path)| path).collect())
}

/// Loads every MIDI file in the folder that passes the filter. Files that fail to load
/// are logged and skipped.
pub fn get_all_tracks(
    folder: &Path,
    filter: &TrackFilter,
    settings: &LoadSettings,
) -> std::io::Result<Vec<Track>> {
    let span = span!(Level::INFO, "load tracks");
    let _enter = span.enter();

    let files = list_track_files(folder, filter)?;
    debug!(folder = ?folder, files = files.len(), "Loading tracks.");

    let tracks: Vec<Track> = files
        .par_iter()
        .map(|path| match Track::load(path, settings) {
            Ok(track) => Some(track),
            Err(e) => {
                warn!(file = ?path, err = %e, "Skipping track that failed to load.");
                None
            }
        })
        .collect::<Vec<Option<Track>>>()
        .into_iter()
        .flatten()
        .collect();

    for track in tracks.iter() {
        info!(
            track = track.name(),
            notes = track.notes().len(),
            "Loaded track."
        );
    }
    Ok(tracks)
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs, time::Duration};

    use crate::patches::Patch;
    use crate::testutil::{self, Event};

    use super::*;

    fn note(onset: f64, release: f64) -> Note {
        Note::new(60, 100, 0, 0, Patch::new(0, 0), onset, release, Divisor::DEFAULT)
    }

    fn settings() -> LoadSettings {
        LoadSettings {
            bpm: 100,
            tick_duration: Duration::from_millis(600),
            divisor: Divisor::DEFAULT,
        }
    }

    fn write_track(folder: &Path, name: &str) -> Result<(), Box<dyn Error>> {
        let buf = testutil::midi_file(
            96,
            vec![vec![
                (0, Event::NoteOn(0, 60, 100)),
                (96, Event::NoteOff(0, 60)),
            ]],
        )?;
        fs::write(folder.join(name), buf)?;
        Ok(())
    }

    #[test]
    fn test_parse_track_number() {
        assert_eq!(Some(12), parse_track_number("12 - Harmony"));
        assert_eq!(Some(7), parse_track_number("007 - Sea Shanty - Remix"));
        assert_eq!(None, parse_track_number("Harmony"));
        assert_eq!(None, parse_track_number("x1 - Harmony"));
        assert_eq!(None, parse_track_number("12-Harmony"));
    }

    #[test]
    fn test_filter() {
        let open = TrackFilter::default();
        assert!(open.allows(Some(1)));
        assert!(open.allows(None));

        let whitelist = TrackFilter::new(vec![1, 2], vec![]);
        assert!(whitelist.allows(Some(2)));
        assert!(!whitelist.allows(Some(3)));
        assert!(!whitelist.allows(None));

        let blacklist = TrackFilter::new(vec![], vec![3]);
        assert!(blacklist.allows(Some(2)));
        assert!(!blacklist.allows(Some(3)));
        assert!(blacklist.allows(None));

        let both = TrackFilter::new(vec![1, 2], vec![2]);
        assert!(both.allows(Some(1)));
        assert!(!both.allows(Some(2)));
    }

    #[test]
    fn test_notes_starting_in() {
        let track = Track::from_notes(
            "1 - Test",
            vec![note(2.5, 3.0), note(0.0, 1.0), note(1.0, 2.0), note(0.5, 0.75)],
        );

        assert_eq!(Some(1), track.number());
        let starts: Vec<f64> = track
            .notes_starting_in(0.0, 1.0)
            .iter()
            .map(|note| note.start())
            .collect();
        assert_eq!(vec![0.0, 0.5], starts);
        assert_eq!(1, track.notes_starting_in(1.0, 2.0).len());
        assert!(track.notes_starting_in(2.0, 2.5).is_empty());
        assert_eq!(1, track.notes_starting_in(2.0, 3.0).len());
        assert!(track.notes_starting_in(3.0, 4.0).is_empty());

        assert_eq!(3.0, track.max_end());
        assert_eq!(4, track.notes_remaining(0.0));
        assert_eq!(2, track.notes_remaining(1.0));
        assert_eq!(0, track.notes_remaining(3.0));
    }

    #[test]
    fn test_requantize_track() -> Result<(), Box<dyn Error>> {
        let mut track = Track::from_notes("Test", vec![note(0.3, 0.6)]);
        assert_eq!(None, track.number());

        track.requantize(Divisor::new(1)?);
        assert_eq!((0.0, 1.0), (track.notes()[0].start(), track.notes()[0].end()));
        assert_eq!(1.0, track.max_end());

        track.requantize(Divisor::new(4)?);
        assert_eq!((0.25, 0.75), (track.notes()[0].start(), track.notes()[0].end()));
        assert_eq!(0.75, track.max_end());
        Ok(())
    }

    #[test]
    fn test_empty_track() {
        let track = Track::from_notes("Empty", vec![]);
        assert_eq!(0.0, track.max_end());
        assert!(track.notes_starting_in(0.0, 1.0).is_empty());
    }

    #[test]
    fn test_get_all_tracks() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        write_track(dir.path(), "10 - Ten.mid")?;
        write_track(dir.path(), "2 - Two.MID")?;
        write_track(dir.path(), "Loose.mid")?;
        write_track(dir.path(), "3 - Ignored.txt")?;
        fs::write(dir.path().join("4 - Broken.mid"), b"not a midi file")?;
        fs::create_dir(dir.path().join("5 - Directory.mid"))?;

        let tracks = get_all_tracks(dir.path(), &TrackFilter::default(), &settings())?;
        let names: Vec<&str> = tracks.iter().map(|track| track.name()).collect();
        assert_eq!(vec!["2 - Two", "10 - Ten", "Loose"], names);
        assert_eq!(1, tracks[0].notes().len());

        let tracks = get_all_tracks(
            dir.path(),
            &TrackFilter::new(vec![10, 4], vec![]),
            &settings(),
        )?;
        let names: Vec<&str> = tracks.iter().map(|track| track.name()).collect();
        assert_eq!(vec!["10 - Ten"], names);

        let tracks = get_all_tracks(
            dir.path(),
            &TrackFilter::new(vec![], vec![2]),
            &settings(),
        )?;
        let names: Vec<&str> = tracks.iter().map(|track| track.name()).collect();
        assert_eq!(vec!["10 - Ten", "Loose"], names);
        Ok(())
    }

    #[test]
    fn test_missing_folder() {
        assert!(get_all_tracks(
            Path::new("/nonexistent/ticksync/tracks"),
            &TrackFilter::default(),
            &settings()
        )
        .is_err());
    }
}
