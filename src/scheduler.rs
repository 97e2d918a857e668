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

//! The per tick note dispatcher.
//!
//! Every host tick the scheduler picks the notes of the current track that start within
//! the tick, resolves their channels and patches, and hands timed note on and note off
//! commands to a dispatcher. Track changes cancel everything still pending before the
//! device is silenced, so nothing from the old track can sound afterwards.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing::{debug, error, info, span, Level, Span};

use crate::{
    channels::ChannelState,
    dispatch::{Command, Dispatcher},
    midi::{self, CHANNEL_COUNT, PERCUSSION_CHANNEL},
    patches,
    playlist::Playlist,
    tracks::quantize::Divisor,
};

/// The highest global volume, in percent.
pub const MAX_GLOBAL_VOLUME: u8 = 100;

/// The highest channel volume, in percent.
pub const MAX_CHANNEL_VOLUME: u16 = 200;

const MAX_VELOCITY: f64 = 127.0;

/// Requests from outside the tick loop. Each request is consumed by the next tick.
#[derive(Debug, Default)]
pub struct Signals {
    next: AtomicBool,
    prev: AtomicBool,
}

impl Signals {
    /// Asks for the next track.
    pub fn request_next(&self) {
        self.next.store(true, Ordering::SeqCst);
    }

    /// Asks for the previous track.
    pub fn request_prev(&self) {
        self.prev.store(true, Ordering::SeqCst);
    }

    fn take_next(&self) -> bool {
        self.next.swap(false, Ordering::SeqCst)
    }

    fn take_prev(&self) -> bool {
        self.prev.swap(false, Ordering::SeqCst)
    }
}

/// Volume scaling applied to note velocities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Volumes {
    /// Percent, 0 to 100.
    global: u8,
    /// Percent per output channel, 0 to 200.
    channels: [u16; CHANNEL_COUNT as usize],
}

impl Volumes {
    /// Creates volumes, clamping every value into range.
    pub fn new(global: u8, channels: [u16; CHANNEL_COUNT as usize]) -> Volumes {
        Volumes {
            global: global.min(MAX_GLOBAL_VOLUME),
            channels: channels.map(|volume| volume.min(MAX_CHANNEL_VOLUME)),
        }
    }

    pub fn global(&self) -> u8 {
        self.global
    }

    /// The volume of the output channel.
    pub fn channel(&self, channel: u8) -> u16 {
        self.channels[usize::from(channel % CHANNEL_COUNT)]
    }

    /// Scales the velocity by the channel and global volumes.
    pub fn velocity(&self, base: u8, channel: u8) -> u8 {
        let scaled = f64::from(base) * (f64::from(self.channel(channel)) / 100.0)
            * (f64::from(self.global) / 100.0);
        scaled.clamp(0.0, MAX_VELOCITY).round() as u8
    }
}

impl Default for Volumes {
    fn default() -> Self {
        Volumes::new(100, [100; CHANNEL_COUNT as usize])
    }
}

/// Settings the scheduler reads on every tick.
#[derive(Clone, Debug)]
pub struct Settings {
    /// When false, ticks do nothing.
    pub enabled: bool,
    /// The duration of a single host tick.
    pub tick_duration: Duration,
    pub volumes: Volumes,
    /// Only play melodic notes whose instrument the patch mapper supports.
    pub supported_only: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            enabled: true,
            tick_duration: Duration::from_millis(600),
            volumes: Volumes::default(),
            supported_only: false,
        }
    }
}

/// The scheduler state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// There is no track to play.
    Idle,
    /// The current track advances on every tick.
    Playing,
}

/// How to pick the next track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackChange {
    Next,
    Prev,
    /// A zero based playlist position.
    Index(usize),
}

/// A snapshot of the scheduler for display.
#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    pub state: State,
    pub track: Option<String>,
    /// One based position in the playlist.
    pub position: usize,
    pub count: usize,
    pub notes_remaining: usize,
    pub tick: f64,
    pub soundbank: String,
    pub divisor: Divisor,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.track {
            Some(track) => writeln!(f, "Track: {} ({}/{})", track, self.position, self.count)?,
            None => writeln!(f, "Track: none")?,
        }
        writeln!(f, "Notes remaining: {}", self.notes_remaining)?;
        writeln!(f, "Tick: {:.0}", self.tick)?;
        writeln!(f, "SoundFont: {}", self.soundbank)?;
        write!(f, "Quantization: {}", self.divisor)
    }
}

/// Dispatches the notes of the current track in step with the host tick.
pub struct TickScheduler {
    playlist: Playlist,
    channels: ChannelState,
    /// Used to silence everything on track changes.
    device: Arc<dyn midi::Device>,
    dispatcher: Box<dyn Dispatcher>,
    signals: Arc<Signals>,
    settings: Settings,
    soundbank_status: String,
    divisor: Divisor,
    /// The current host tick of the track.
    position: f64,
    /// The logging span.
    span: Span,
}

impl TickScheduler {
    /// Creates a new scheduler at the start of the playlist's current track.
    pub fn new(
        playlist: Playlist,
        channels: ChannelState,
        device: Arc<dyn midi::Device>,
        dispatcher: Box<dyn Dispatcher>,
        settings: Settings,
        soundbank_status: &str,
        divisor: Divisor,
    ) -> TickScheduler {
        TickScheduler {
            playlist,
            channels,
            device,
            dispatcher,
            signals: Arc::new(Signals::default()),
            settings,
            soundbank_status: soundbank_status.to_string(),
            divisor,
            position: 0.0,
            span: span!(Level::INFO, "scheduler"),
        }
    }

    /// The signals consumed by the tick loop.
    pub fn signals(&self) -> Arc<Signals> {
        self.signals.clone()
    }

    pub fn state(&self) -> State {
        if self.playlist.is_empty() {
            State::Idle
        } else {
            State::Playing
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn channels(&self) -> &ChannelState {
        &self.channels
    }

    /// The current host tick of the track.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Resets the device channels before playback begins.
    pub fn start(&mut self) {
        let _enter = self.span.enter();
        self.channels.reset();
        info!(
            track = self.playlist.current().map(|track| track.name()),
            tick = self.position,
            "Starting playback."
        );
    }

    /// Handles a single host tick.
    pub fn on_tick(&mut self) {
        if !self.settings.enabled {
            return;
        }
        let Some(track) = self.playlist.current() else {
            return;
        };

        let position = self.position;
        let tick_duration = self.settings.tick_duration;
        for note in track.notes_starting_in(position, position + 1.0) {
            if self.settings.supported_only
                && !note.is_percussion()
                && !patches::is_supported(note.instrument())
            {
                continue;
            }

            let channel = if note.is_percussion() {
                self.channels.resolve_percussion_kit(note.instrument());
                PERCUSSION_CHANNEL
            } else {
                self.channels
                    .resolve_channel(note.instrument(), note.patch())
            };

            let velocity = self.settings.volumes.velocity(note.velocity(), channel);
            let key = note.key();
            self.dispatcher.schedule(
                offset(tick_duration, note.start() - position),
                Command::NoteOn {
                    channel,
                    key,
                    velocity,
                },
            );
            self.dispatcher.schedule(
                offset(tick_duration, note.end() - position),
                Command::NoteOff { channel, key },
            );
        }

        self.position += 1.0;

        // A track that ends on the same tick as a pending signal changes twice. The end
        // of a track is the latest note end, not a length declared by the file.
        let finished = self.position > track.max_end();
        if finished && self.playlist.len() > 1 {
            debug!(
                track = track.name(),
                tick = self.position,
                "Track finished."
            );
            self.change_track(TrackChange::Next);
        }

        if self.signals.take_next() {
            self.change_track(TrackChange::Next);
        }
        if self.signals.take_prev() {
            self.change_track(TrackChange::Prev);
        }
    }

    /// Cancels pending notes, silences and resets the device, then moves the playlist.
    /// Playback restarts at tick 0 of the new track.
    pub fn change_track(&mut self, change: TrackChange) {
        let span = self.span.clone();
        let _enter = span.enter();

        self.silence();
        match change {
            TrackChange::Next => self.playlist.next(),
            TrackChange::Prev => self.playlist.prev(),
            TrackChange::Index(position) => self.playlist.select(position),
        };
        self.position = 0.0;

        info!(
            position = self.playlist.position(),
            track = self.playlist.current().map(|track| track.name()),
            "Changed track."
        );
    }

    /// Snaps every track to a new grid. Commands already scheduled are left alone.
    pub fn requantize(&mut self, divisor: Divisor) {
        let _enter = self.span.enter();
        self.playlist.requantize(divisor);
        self.divisor = divisor;
        info!(%divisor, "Requantized tracks.");
    }

    /// Cancels pending notes and silences the device. The position is kept.
    pub fn stop(&mut self) {
        let span = self.span.clone();
        let _enter = span.enter();
        self.silence();
        info!(tick = self.position, "Stopped playback.");
    }

    /// Returns a snapshot for display.
    pub fn status(&self) -> Status {
        let track = self.playlist.current();
        Status {
            state: self.state(),
            track: track.map(|track| track.name().to_string()),
            position: if track.is_some() {
                self.playlist.position() + 1
            } else {
                0
            },
            count: self.playlist.len(),
            notes_remaining: track
                .map(|track| track.notes_remaining(self.position))
                .unwrap_or(0),
            tick: self.position,
            soundbank: self.soundbank_status.clone(),
            divisor: self.divisor,
        }
    }

    fn silence(&mut self) {
        self.dispatcher.cancel_all();
        if let Err(e) = self.device.silence_all() {
            error!(
                device = self.device.name(),
                err = e.as_ref(),
                "Error silencing MIDI device."
            );
        }
        self.channels.reset();
    }
}

/// The delay for a boundary the given number of ticks after the current position.
/// Boundaries in the past are sent immediately.
fn offset(tick_duration: Duration, ticks: f64) -> Duration {
    let micros = ticks.max(0.0) * tick_duration.as_micros() as f64;
    Duration::from_micros(micros.round() as u64)
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use midly::{
        live::LiveEvent,
        num::{u4, u7},
        MidiMessage,
    };

    use crate::{
        channels::{ChannelState, KitState},
        dispatch::{test::RecordingDispatcher, Command},
        midi,
        patches::Patch,
        playlist::Playlist,
        soundbank::PatchIndex,
        tracks::{quantize::Divisor, Note, Track},
    };

    use super::*;

    fn note(key: u8, channel: u8, instrument: u8, onset: f64, release: f64) -> Note {
        Note::new(
            key,
            100,
            channel,
            instrument,
            Patch::new(0, instrument),
            onset,
            release,
            Divisor::DEFAULT,
        )
    }

    fn scheduler(
        tracks: Vec<Track>,
        settings: Settings,
    ) -> (TickScheduler, RecordingDispatcher, midi::test::Device) {
        let device = midi::test::Device::get("mock-scheduler");
        let dispatcher = RecordingDispatcher::default();
        let scheduler = TickScheduler::new(
            Playlist::new(tracks, false),
            ChannelState::new(Arc::new(device.clone()), PatchIndex::default()),
            Arc::new(device.clone()),
            Box::new(dispatcher.clone()),
            settings,
            "No custom SoundFont specified, using default GM bank",
            Divisor::DEFAULT,
        );
        (scheduler, dispatcher, device)
    }

    fn is_note_on(event: &LiveEvent<'static>) -> bool {
        matches!(
            event,
            LiveEvent::Midi {
                message: MidiMessage::NoteOn { .. },
                ..
            }
        )
    }

    #[test]
    fn test_volume_scaling() {
        let mut channels = [100; 16];
        channels[3] = 150;
        let volumes = Volumes::new(50, channels);
        assert_eq!(75, volumes.velocity(100, 3));
        assert_eq!(50, volumes.velocity(100, 0));

        // Values are clamped on the way in and out.
        let loud = Volumes::new(250, [200; 16]);
        assert_eq!(100, loud.global());
        assert_eq!(127, loud.velocity(100, 0));
        assert_eq!(0, Volumes::new(0, [100; 16]).velocity(127, 0));

        channels[4] = 999;
        assert_eq!(200, Volumes::new(100, channels).channel(4));
    }

    #[test]
    fn test_idle_without_tracks() {
        let (mut scheduler, dispatcher, device) = scheduler(vec![], Settings::default());
        assert_eq!(State::Idle, scheduler.state());
        scheduler.on_tick();
        assert_eq!(0.0, scheduler.position());
        assert!(dispatcher.take().is_empty());
        assert!(device.emitted().is_empty());
        assert_eq!(None, scheduler.status().track);
    }

    #[test]
    fn test_disabled_does_nothing() {
        let settings = Settings {
            enabled: false,
            ..Settings::default()
        };
        let track = Track::from_notes("1 - One", vec![note(60, 0, 40, 0.0, 1.0)]);
        let (mut scheduler, dispatcher, _) = scheduler(vec![track], settings);
        scheduler.on_tick();
        assert_eq!(0.0, scheduler.position());
        assert!(dispatcher.take().is_empty());
    }

    #[test]
    fn test_notes_are_scheduled_within_the_tick() {
        let track = Track::from_notes(
            "1 - One",
            vec![
                note(60, 0, 40, 0.25, 1.5),
                note(62, 0, 41, 1.0, 2.0),
                note(64, 0, 40, 0.0, 0.5),
            ],
        );
        let (mut scheduler, dispatcher, _) = scheduler(vec![track], Settings::default());
        assert_eq!(State::Playing, scheduler.state());

        scheduler.on_tick();
        assert_eq!(1.0, scheduler.position());
        assert_eq!(
            vec![
                (
                    Duration::ZERO,
                    Command::NoteOn {
                        channel: 0,
                        key: 64,
                        velocity: 100
                    }
                ),
                (
                    Duration::from_millis(300),
                    Command::NoteOff { channel: 0, key: 64 }
                ),
                (
                    Duration::from_millis(150),
                    Command::NoteOn {
                        channel: 0,
                        key: 60,
                        velocity: 100
                    }
                ),
                (
                    Duration::from_millis(900),
                    Command::NoteOff { channel: 0, key: 60 }
                ),
            ],
            dispatcher.take()
        );

        // The second instrument gets the next channel.
        scheduler.on_tick();
        assert_eq!(
            vec![
                (
                    Duration::ZERO,
                    Command::NoteOn {
                        channel: 1,
                        key: 62,
                        velocity: 100
                    }
                ),
                (
                    Duration::from_millis(600),
                    Command::NoteOff { channel: 1, key: 62 }
                ),
            ],
            dispatcher.take()
        );
    }

    #[test]
    fn test_percussion_uses_reserved_channel() {
        let track = Track::from_notes(
            "1 - Drums",
            vec![note(36, 9, 25, 0.0, 0.5), note(38, 9, 25, 0.5, 1.0)],
        );
        let (mut scheduler, dispatcher, device) = scheduler(vec![track], Settings::default());
        scheduler.on_tick();

        let scheduled = dispatcher.take();
        assert_eq!(4, scheduled.len());
        assert!(scheduled.iter().all(|(_, command)| match command {
            Command::NoteOn { channel, .. } | Command::NoteOff { channel, .. } =>
                *channel == PERCUSSION_CHANNEL,
        }));

        // The empty soundbank provides everything, so the first kit candidate wins and
        // is only selected once.
        assert_eq!(
            KitState::Resolved(Patch::new(128, 25)),
            scheduler.channels().kit()
        );
        assert_eq!(3, device.emitted().len());
    }

    #[test]
    fn test_channel_volume_uses_output_channel() {
        let mut channels = [100; 16];
        channels[0] = 150;
        let settings = Settings {
            volumes: Volumes::new(50, channels),
            ..Settings::default()
        };
        // Written on channel 5 but assigned output channel 0.
        let track = Track::from_notes("1 - One", vec![note(60, 5, 40, 0.0, 1.0)]);
        let (mut scheduler, dispatcher, _) = scheduler(vec![track], settings);
        scheduler.on_tick();
        assert_eq!(
            (
                Duration::ZERO,
                Command::NoteOn {
                    channel: 0,
                    key: 60,
                    velocity: 75
                }
            ),
            dispatcher.take()[0]
        );
    }

    #[test]
    fn test_auto_advance() {
        let one = Track::from_notes("1 - One", vec![note(60, 0, 40, 0.0, 1.0)]);
        let two = Track::from_notes("2 - Two", vec![note(62, 0, 40, 0.0, 2.0)]);
        let (mut scheduler, dispatcher, _) = scheduler(vec![one, two], Settings::default());

        scheduler.on_tick();
        assert_eq!(Some("1 - One".to_string()), scheduler.status().track);
        assert_eq!(1.0, scheduler.position());

        scheduler.on_tick();
        assert_eq!(Some("2 - Two".to_string()), scheduler.status().track);
        assert_eq!(0.0, scheduler.position());
        assert_eq!(1, dispatcher.cancels());
    }

    #[test]
    fn test_single_track_does_not_advance() {
        let one = Track::from_notes("1 - One", vec![note(60, 0, 40, 0.0, 1.0)]);
        let (mut scheduler, dispatcher, _) = scheduler(vec![one], Settings::default());
        for _ in 0..5 {
            scheduler.on_tick();
        }
        assert_eq!(5.0, scheduler.position());
        assert_eq!(0, dispatcher.cancels());
    }

    #[test]
    fn test_signals_are_consumed_once() {
        let tracks = vec![
            Track::from_notes("1 - One", vec![note(60, 0, 40, 0.0, 10.0)]),
            Track::from_notes("2 - Two", vec![note(60, 0, 40, 0.0, 10.0)]),
            Track::from_notes("3 - Three", vec![note(60, 0, 40, 0.0, 10.0)]),
        ];
        let (mut scheduler, dispatcher, _) = scheduler(tracks, Settings::default());
        let signals = scheduler.signals();

        signals.request_prev();
        scheduler.on_tick();
        assert_eq!(Some("3 - Three".to_string()), scheduler.status().track);
        assert_eq!(1, dispatcher.cancels());

        scheduler.on_tick();
        assert_eq!(Some("3 - Three".to_string()), scheduler.status().track);

        signals.request_next();
        signals.request_next();
        scheduler.on_tick();
        assert_eq!(Some("1 - One".to_string()), scheduler.status().track);
        assert_eq!(2, dispatcher.cancels());
    }

    #[test]
    fn test_track_end_and_signal_on_the_same_tick() {
        let tracks = vec![
            Track::from_notes("1 - One", vec![note(60, 0, 40, 0.0, 1.0)]),
            Track::from_notes("2 - Two", vec![note(60, 0, 40, 0.0, 10.0)]),
            Track::from_notes("3 - Three", vec![note(60, 0, 40, 0.0, 10.0)]),
        ];
        let (mut scheduler, dispatcher, _) = scheduler(tracks, Settings::default());
        scheduler.on_tick();

        // The end of the first track and the skip both move forward.
        scheduler.signals().request_next();
        scheduler.on_tick();
        assert_eq!(Some("3 - Three".to_string()), scheduler.status().track);
        assert_eq!(2, dispatcher.cancels());
    }

    #[test]
    fn test_change_track_resets_everything() {
        let tracks = vec![
            Track::from_notes("1 - One", vec![note(60, 0, 40, 0.0, 10.0)]),
            Track::from_notes("2 - Two", vec![]),
            Track::from_notes("3 - Three", vec![]),
        ];
        let (mut scheduler, dispatcher, device) = scheduler(tracks, Settings::default());
        scheduler.on_tick();
        scheduler.on_tick();
        assert_eq!(Some(0), scheduler.channels().channel_for(40));

        scheduler.change_track(TrackChange::Index(2));
        assert_eq!(0.0, scheduler.position());
        assert_eq!(None, scheduler.channels().channel_for(40));
        assert!(dispatcher.take().is_empty());

        // Silence on every channel, then the channel reset.
        let emitted = device.emitted();
        assert!(!emitted.iter().any(is_note_on));
        assert!(emitted.contains(&LiveEvent::Midi {
            channel: u4::new(15),
            message: MidiMessage::Controller {
                controller: u7::new(123),
                value: u7::new(0),
            },
        }));

        // Wraps from the last track to the first.
        scheduler.change_track(TrackChange::Next);
        assert_eq!(0, scheduler.playlist().position());
    }

    #[test]
    fn test_requantize_and_status() -> Result<(), Box<dyn std::error::Error>> {
        let track = Track::from_notes(
            "7 - Seven",
            vec![note(60, 0, 40, 0.3, 0.6), note(62, 0, 40, 2.0, 3.0)],
        );
        let (mut scheduler, _, _) = scheduler(vec![track], Settings::default());

        scheduler.requantize(Divisor::new(1)?);
        scheduler.on_tick();

        let status = scheduler.status();
        assert_eq!(
            Status {
                state: State::Playing,
                track: Some("7 - Seven".to_string()),
                position: 1,
                count: 1,
                notes_remaining: 1,
                tick: 1.0,
                soundbank: "No custom SoundFont specified, using default GM bank".to_string(),
                divisor: Divisor::new(1)?,
            },
            status
        );
        assert!(status.to_string().contains("Quantization: 1/1"));
        assert_eq!(
            (0.0, 1.0),
            (
                scheduler.playlist().current().map(|t| t.notes()[0].start()).unwrap_or(-1.0),
                scheduler.playlist().current().map(|t| t.notes()[0].end()).unwrap_or(-1.0)
            )
        );
        Ok(())
    }

    #[test]
    fn test_stop_silences() {
        let track = Track::from_notes("1 - One", vec![note(60, 0, 40, 0.0, 1.0)]);
        let (mut scheduler, dispatcher, device) = scheduler(vec![track], Settings::default());
        scheduler.on_tick();
        device.reset_emitted();

        scheduler.stop();
        assert_eq!(1, dispatcher.cancels());
        assert_eq!(1.0, scheduler.position());
        // Silence (16) plus the channel reset (32).
        assert_eq!(48, device.emitted().len());
    }
}
