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
use std::{error::Error, sync::Arc, time::Duration};

use parking_lot::Mutex as SyncMutex;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{info, span, Level, Span};

use crate::{
    playsync::CancelHandle,
    scheduler::{Signals, State, Status, TickScheduler, TrackChange},
    tracks::quantize::Divisor,
};

struct PlayHandles {
    join: JoinHandle<()>,
    cancel: CancelHandle,
}

/// Drives the tick scheduler from a fixed period timer.
pub struct Player {
    /// The scheduler. The lock keeps ticks and track changes from overlapping.
    scheduler: Arc<SyncMutex<TickScheduler>>,
    /// Requests consumed by the next tick.
    signals: Arc<Signals>,
    /// The period of the tick timer.
    tick_duration: Duration,
    /// Keeps track of the tick loop. There should only be one task on here at a time.
    join: Arc<Mutex<Option<PlayHandles>>>,
    /// The logging span.
    span: Span,
}

impl Player {
    /// Creates a new player. Nothing runs until start is called.
    pub fn new(scheduler: TickScheduler) -> Player {
        let signals = scheduler.signals();
        let tick_duration = scheduler.settings().tick_duration;
        Player {
            scheduler: Arc::new(SyncMutex::new(scheduler)),
            signals,
            tick_duration,
            join: Arc::new(Mutex::new(None)),
            span: span!(Level::INFO, "player"),
        }
    }

    /// Starts the tick loop. Does nothing if it is already running, if playback is
    /// disabled, or if there are no tracks.
    pub async fn start(&self) -> Result<(), Box<dyn Error>> {
        let mut join = self.join.lock().await;
        let _enter = self.span.enter();
        if join.is_some() {
            info!("Player is already running.");
            return Ok(());
        }

        {
            let mut scheduler = self.scheduler.lock();
            if !scheduler.settings().enabled {
                info!("Playback is disabled, not starting.");
                return Ok(());
            }
            if scheduler.state() == State::Idle {
                info!("No tracks loaded, not starting.");
                return Ok(());
            }
            scheduler.start();
        }

        let cancel_handle = CancelHandle::new();
        let join_handle = {
            let scheduler = self.scheduler.clone();
            let cancel_handle = cancel_handle.clone();
            tokio::spawn(Player::tick_loop(
                scheduler,
                self.tick_duration,
                cancel_handle,
            ))
        };
        *join = Some(PlayHandles {
            join: join_handle,
            cancel: cancel_handle,
        });
        info!(tick_duration = ?self.tick_duration, "Started tick loop.");

        Ok(())
    }

    /// Calls the scheduler once per tick until cancelled.
    async fn tick_loop(
        scheduler: Arc<SyncMutex<TickScheduler>>,
        tick_duration: Duration,
        cancel_handle: CancelHandle,
    ) {
        let mut interval = time::interval(tick_duration);
        // A late tick shifts the schedule rather than bursting to catch up, so the
        // tick counter keeps one increment per period.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel_handle.cancelled() => break,
                _ = interval.tick() => {
                    if cancel_handle.is_cancelled() {
                        break;
                    }
                    scheduler.lock().on_tick();
                }
            }
        }
    }

    /// Returns true if the tick loop is running.
    pub async fn is_running(&self) -> bool {
        self.join.lock().await.is_some()
    }

    /// Stops the tick loop, cancels pending notes and silences the device.
    pub async fn stop(&self) -> Result<(), Box<dyn Error>> {
        let mut join = self.join.lock().await;

        let handles = match join.take() {
            Some(handles) => handles,
            None => {
                info!("Player is not active, nothing to stop.");
                return Ok(());
            }
        };

        handles.cancel.cancel();
        handles.join.await?;
        self.scheduler.lock().stop();
        info!("Stopped tick loop.");
        Ok(())
    }

    /// Goes to the next track. While running the change happens on the next tick.
    pub async fn next(&self) -> Result<(), Box<dyn Error>> {
        self.change(TrackChange::Next).await
    }

    /// Goes to the previous track. While running the change happens on the next tick.
    pub async fn prev(&self) -> Result<(), Box<dyn Error>> {
        self.change(TrackChange::Prev).await
    }

    async fn change(&self, change: TrackChange) -> Result<(), Box<dyn Error>> {
        let join = self.join.lock().await;
        if join.is_some() {
            match change {
                TrackChange::Next => self.signals.request_next(),
                TrackChange::Prev => self.signals.request_prev(),
                TrackChange::Index(_) => self.scheduler.lock().change_track(change),
            }
        } else {
            self.scheduler.lock().change_track(change);
        }
        Ok(())
    }

    /// Snaps every track to a new grid.
    pub fn requantize(&self, divisor: Divisor) {
        self.scheduler.lock().requantize(divisor);
    }

    /// Returns a snapshot of the scheduler.
    pub fn status(&self) -> Status {
        self.scheduler.lock().status()
    }

    /// Returns the scheduler.
    pub fn scheduler(&self) -> Arc<SyncMutex<TickScheduler>> {
        self.scheduler.clone()
    }
}
