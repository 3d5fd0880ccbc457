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

//! The caller's side of mailbox locking.
//!
//! `dotlock()` first takes the advisory lock on the caller's descriptor, then
//! starts a worker to create the `.lock` file and follows its progress over a
//! pipe. The returned handle keeps the worker parked until the lock is
//! released, either explicitly or by dropping it.

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use log::{debug, error, info, warn};

use super::file_lock::{file_lock, FileLockMode, FileLockStatus};
use super::state::{DotlockState, FailureKind};
use super::worker::{self, WorkerContext};
use crate::support::error::Error;
use crate::support::file_ops::{cloexec_pipe, ReadUninterruptibly};
use crate::support::lock_config::LockConfig;
use crate::support::progress::Progress;
use crate::support::safe_name::is_safe_component;
use crate::support::token;

/// The outcome of a successful `dotlock()` call.
#[derive(Debug)]
#[must_use]
pub enum Dotlock {
    /// Only the advisory lock protects the mailbox, either because dotlocking
    /// is disabled or because its failure was deemed harmless.
    AdvisoryOnly,
    /// Both the advisory lock and the `.lock` file are held.
    Held(DotlockHandle),
}

impl Dotlock {
    pub fn is_held(&self) -> bool {
        match *self {
            Dotlock::Held(_) => true,
            Dotlock::AdvisoryOnly => false,
        }
    }

    /// Remove the `.lock` file, if there is one.
    ///
    /// The advisory lock belongs to the caller's descriptor and is not
    /// touched.
    pub fn release(self) -> Result<(), Error> {
        match self {
            Dotlock::Held(handle) => handle.release(),
            Dotlock::AdvisoryOnly => Ok(()),
        }
    }
}

/// Ownership of a `.lock` file created by a worker.
///
/// Dropping the handle releases the lock just like `release()` does.
#[derive(Debug)]
pub struct DotlockHandle {
    mailbox: PathBuf,
    states: Option<fs::File>,
    release: Option<fs::File>,
    worker: Option<JoinHandle<()>>,
}

impl DotlockHandle {
    /// Remove the `.lock` file and wait for the worker to finish.
    pub fn release(mut self) -> Result<(), Error> {
        self.shut_down()
    }

    fn next_state(&mut self) -> DotlockState {
        let mut byte = [0u8; 1];
        let read = self
            .states
            .as_mut()
            .map(|states| states.read_uninterruptibly(&mut byte));

        match read {
            Some(Ok(1)) => DotlockState::from_byte(byte[0])
                .unwrap_or_else(|| DotlockState::abandoned(FailureKind::Dunno)),
            _ => DotlockState::abandoned(FailureKind::Dunno),
        }
    }

    fn shut_down(&mut self) -> Result<(), Error> {
        // Closing our end of the release pipe is the release signal
        self.release.take();
        self.states.take();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                return Err(Error::Dotlock(FailureKind::Dunno));
            }
            debug!("Released dotlock on {}", self.mailbox.display());
        }

        Ok(())
    }
}

impl Drop for DotlockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shut_down() {
            warn!("Releasing dotlock on {}: {}", self.mailbox.display(), e);
        }
    }
}

/// Lock the mailbox at `path`, which the caller has open as `file`.
///
/// `mode` selects the kind of advisory lock; `FileLockMode::RETRY` is always
/// added. The `.lock` file is exclusive whatever `mode` says, and is retried
/// according to `config.dotlock`.
///
/// On success the caller holds the advisory lock on `file`, plus the
/// `.lock` file unless `Dotlock::AdvisoryOnly` is returned.
///
/// Unless the helper was needed, the `.lock` file is removed by a thread of
/// this process, which dies with it. Programs that can be terminated by a
/// signal while holding the lock must catch the signal and release first.
pub fn dotlock(
    path: &Path,
    file: &fs::File,
    mode: FileLockMode,
    config: &LockConfig,
) -> Result<Dotlock, Error> {
    if !path
        .file_name()
        .map_or(false, |name| is_safe_component(name.as_bytes()))
    {
        return Err(Error::UnsafeName);
    }

    let mut progress = Progress::new(!config.quiet);

    let mut file_mode = mode | FileLockMode::RETRY;
    if !config.quiet {
        file_mode |= FileLockMode::LOG;
    }
    match file_lock(
        file.as_raw_fd(),
        file_mode,
        &config.file_lock,
        &mut progress,
    ) {
        FileLockStatus::Locked => (),
        FileLockStatus::Undefined => {
            debug!("{}: advisory locking not supported", path.display())
        }
        FileLockStatus::Busy => {
            if !config.quiet {
                error!("{}: advisory lock unavailable", path.display());
            }
            return Err(Error::FileLockBusy);
        }
    }

    if config.dotlock_disable {
        return Ok(Dotlock::AdvisoryOnly);
    }

    let (states, worker_stdout) = cloexec_pipe()?;
    let (worker_stdin, release) = cloexec_pipe()?;
    let ctx = WorkerContext {
        mailbox: path.to_owned(),
        mailbox_file: file.try_clone()?,
        exclusive: mode.contains(FileLockMode::EXCLUSIVE),
        hostname: token::host_name().to_owned(),
        random_string: OsString::from(token::random_string(
            token::RANDOM_STRING_LEN,
        )),
        retry: true,
        helper: config.helper.clone(),
        policy: config.dotlock,
        excl_policy: config.dotlock_excl,
    };
    let worker = worker::spawn(ctx, worker_stdin, worker_stdout)?;
    let mut handle = DotlockHandle {
        mailbox: path.to_owned(),
        states: Some(states),
        release: Some(release),
        worker: Some(worker),
    };

    if config.verbose {
        progress
            .begin(format_args!("Creating dotlock for {} ", path.display()));
    }

    loop {
        match handle.next_state() {
            DotlockState::Held => {
                progress.finish(true);
                debug!("Holding dotlock on {}", path.display());
                return Ok(Dotlock::Held(handle));
            }

            DotlockState::Ping => progress.dot(),

            DotlockState::Failed {
                kind: FailureKind::NoExec,
                abandon: false,
            } => {
                if !config.quiet {
                    warn!(
                        "{}: {}: {}; trying without it",
                        path.display(),
                        config.helper.display(),
                        FailureKind::NoExec
                    );
                }
            }

            DotlockState::Failed { kind, .. } => {
                progress.finish(false);
                // Joins the worker, which has already given up
                drop(handle);
                return downgrade(path, kind, config);
            }
        }
    }
}

fn downgrade(
    path: &Path,
    kind: FailureKind,
    config: &LockConfig,
) -> Result<Dotlock, Error> {
    if FailureKind::ReadOnlyFs == kind {
        if !config.quiet {
            info!("{}: {}; using advisory lock only", path.display(), kind);
        }
        return Ok(Dotlock::AdvisoryOnly);
    }

    if !config.quiet {
        error!("{}: {}", path.display(), kind);
    }

    if config.dotlock_ignore_error && kind.downgradable() {
        if !config.quiet {
            warn!(
                "{}: dotlock_ignore_error set, using advisory lock only",
                path.display()
            );
        }
        Ok(Dotlock::AdvisoryOnly)
    } else {
        Err(Error::Dotlock(kind))
    }
}
