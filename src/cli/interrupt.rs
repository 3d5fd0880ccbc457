//-
// Copyright (c) 2026, the s-nail-lock authors
//
// This file is part of s-nail-lock.
//
// s-nail-lock is free software: you can  redistribute it and/or modify it
// under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// s-nail-lock is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY;  without even the implied warranty of  MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// s-nail-lock. If not, see <http://www.gnu.org/licenses/>.

//! Releasing the mailbox lock when the driver is told to terminate.
//!
//! The thread removing the `.lock` file lives in this process, so a default
//! signal disposition would kill it along with us and leave a stale lock
//! behind.

use std::io;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{error, info};
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use signal_hook::low_level;

use crate::locks::Dotlock;

/// Signals after which the lock is released and the process terminates.
pub const RELEASE_SIGNALS: [i32; 4] = [SIGHUP, SIGINT, SIGQUIT, SIGTERM];

/// The lock, shared between the main thread and the signal thread. Whichever
/// gets to it first releases it.
pub type SharedLock = Arc<Mutex<Option<Dotlock>>>;

/// Start catching `RELEASE_SIGNALS`.
///
/// Signals arriving from here on are queued until `release_on_signal()`
/// starts handling them.
pub fn catch_signals() -> io::Result<Signals> {
    Signals::new(&RELEASE_SIGNALS)
}

pub fn release_on_signal(
    mut signals: Signals,
    lock: SharedLock,
) -> io::Result<()> {
    thread::Builder::new()
        .name("signal-handler".to_owned())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!("Received signal {}, releasing lock", signal);
                release(&lock);
                // Terminate the way the signal would have
                let _ = low_level::emulate_default_handler(signal);
                std::process::exit(128 + signal);
            }
        })
        .map(|_| ())
}

/// Release the lock if nobody has yet.
///
/// The mutex stays held until the release is complete, so a concurrent
/// caller returns only once the `.lock` file is gone.
pub fn release(lock: &SharedLock) {
    let mut guard = lock.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(lock) = guard.take() {
        if let Err(e) = lock.release() {
            error!("Releasing lock: {}", e);
        }
    }
}
