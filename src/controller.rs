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
use std::error::Error;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{error, info, span, Level};

use crate::player::Player;
use crate::tracks::quantize::Divisor;

pub mod keyboard;

/// Controller events that will trigger behavior in the player.
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    /// Starts the tick loop.
    Start,

    /// Stops the tick loop and silences the device.
    Stop,

    /// Moves to the next track.
    Next,

    /// Moves to the previous track.
    Prev,

    /// Prints the player status.
    Status,

    /// Snaps every track to a grid with the given divisor.
    Quantize(u32),
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Controls a player.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new(player: Arc<Player>, driver: Arc<dyn Driver>) -> Result<Controller, Box<dyn Error>> {
        Ok(Controller {
            handle: tokio::spawn(async move { Controller::trigger_events(player, driver).await }),
        })
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Triggers player events by watching the driver and getting events from it.
    async fn trigger_events(player: Arc<Player>, driver: Arc<dyn Driver>) {
        let span = span!(Level::INFO, "controller");

        let (events_tx, mut events_rx) = mpsc::channel(1);
        let join_handle = driver.monitor_events(events_tx);

        span.in_scope(|| {
            info!(
                first_track = player.status().track.as_deref(),
                "Controller started."
            )
        });

        while let Some(event) = events_rx.recv().await {
            span.in_scope(|| info!(event = format!("{:?}", event), "Received event."));

            if let Err(e) = Controller::handle(&player, event).await {
                span.in_scope(|| error!("Error talking to player: {}", e));
            }
        }

        span.in_scope(|| info!("Controller closing."));
        if let Err(e) = player.stop().await {
            error!("Error stopping player: {}", e);
        }
        match join_handle.await {
            Err(e) => error!("Error waiting for event monitor to stop: {}", e),
            Ok(Err(e)) => error!("Event monitor failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    async fn handle(player: &Player, event: Event) -> Result<(), Box<dyn Error>> {
        match event {
            Event::Start => player.start().await,
            Event::Stop => player.stop().await,
            Event::Next => player.next().await,
            Event::Prev => player.prev().await,
            Event::Status => {
                println!("{}", player.status());
                Ok(())
            }
            Event::Quantize(divisor) => {
                player.requantize(Divisor::new(divisor)?);
                Ok(())
            }
        }
    }
}
