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
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A cancel handle is passed to the tick driver. It's the driver's responsibility
/// to respect a cancel request.
#[derive(Clone, Default)]
pub struct CancelHandle {
    /// Set to true if the underlying operation should be cancelled.
    cancelled: Arc<AtomicBool>,
    /// Wakes anything waiting for cancellation.
    notify: Arc<Notify>,
}

impl CancelHandle {
    /// Creates a new cancel handle.
    pub fn new() -> CancelHandle {
        CancelHandle::default()
    }

    /// Returns true if the operation has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Waits until the handle is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // The notification must be registered before the check, otherwise a cancel
            // between the two would be missed.
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Cancel the operation.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }
}

/// A counter that invalidates every outstanding token when advanced. Tokens run their
/// work under the same gate that advancing takes, so once advance returns no work from
/// an older generation is running or will run.
#[derive(Clone, Default)]
pub struct Generation {
    current: Arc<AtomicU64>,
    gate: Arc<Mutex<()>>,
}

impl Generation {
    pub fn new() -> Generation {
        Generation::default()
    }

    /// Returns a token bound to the current generation.
    pub fn token(&self) -> Token {
        Token {
            generation: self.current(),
            source: self.clone(),
        }
    }

    /// The current generation.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Invalidates every token handed out so far and returns the new generation.
    pub fn advance(&self) -> u64 {
        let _gate = self.gate.lock();
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Work scheduled against a single generation.
#[derive(Clone)]
pub struct Token {
    generation: u64,
    source: Generation,
}

impl Token {
    /// Returns true if the generation has not moved on since the token was made.
    pub fn is_current(&self) -> bool {
        self.source.current() == self.generation
    }

    /// Runs the work if the token is still current. Returns whether it ran.
    pub fn run_if_current<F>(&self, work: F) -> bool
    where
        F: FnOnce(),
    {
        let _gate = self.source.gate.lock();
        if !self.is_current() {
            return false;
        }
        work();
        true
    }
}
