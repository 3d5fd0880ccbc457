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

//! `s-nail-dotlock`, the privilege-separated `.lock` file creator.
//!
//! This is installed setuid or setgid to whoever owns the mail spool, and is
//! only ever started by the lock worker when the caller cannot create the
//! `.lock` file itself. It speaks the same one-byte protocol on standard
//! output as the worker does, and likewise removes the lock file once
//! standard input becomes readable or reaches EOF.

pub mod args;

use std::env;
use std::fs;
use std::io::Write;
use std::os::unix::io::{FromRawFd, RawFd};

use nix::fcntl::OFlag;
use nix::libc;
use nix::sys::signal::Signal;
use nix::sys::stat::Mode;
use nix::unistd::{self, AccessFlags, Gid, Uid, UnlinkatFlags};

use self::args::{parse_args, HelperArgs, PROGRAM_NAME};
use crate::locks::create::{self, DotlockRequest};
use crate::locks::state::{DotlockState, FailureKind};
use crate::support::file_ops::ReadUninterruptibly;
use crate::support::lock_config::{DEFAULT_DOTLOCK, DEFAULT_DOTLOCK_EXCL};
use crate::support::signals::SignalHold;
use crate::support::stat_snapshot::StatSnapshot;
use crate::support::sysexits::*;
use crate::support::unix_privileges;

const STDIN: RawFd = 0;
const STDOUT: RawFd = 1;
const STDERR: RawFd = 2;

pub fn main() {
    let argv = env::args_os().collect::<Vec<_>>();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(exit) => {
            eprintln!(
                "{} is a helper program of s-nail-lock and is not meant to \
                 be run directly",
                PROGRAM_NAME
            );
            exit.exit()
        }
    };

    // Nothing past this point may talk to the user
    if silence_stderr().is_err() {
        EX_OSERR.exit();
    }

    if !is_fifo(STDIN) || !is_fifo(STDOUT) {
        EX_USAGE.exit();
    }

    // Safety: the caller handed us these two pipes, and nothing else in this
    // process uses them
    let (mut stdin, mut stdout) = unsafe {
        (fs::File::from_raw_fd(STDIN), fs::File::from_raw_fd(STDOUT))
    };

    // Held until exit, including the wait for release
    let _hold = SignalHold::all_but(&[Signal::SIGCONT]).ok();
    let state = lock(&args, &mut stdout);
    let written = stdout.write_all(&[state.to_byte()]);
    drop(stdout);

    if DotlockState::Held != state {
        EX_FAILURE.exit();
    }

    if written.is_ok() {
        let mut buf = [0u8; 1];
        let _ = stdin.read_uninterruptibly(&mut buf);
    }

    let _ = unistd::unlinkat(
        None,
        args.lock_name.as_os_str(),
        UnlinkatFlags::NoRemoveDir,
    );
    std::process::exit(0);
}

/// Everything between validated arguments and a result to report.
fn lock(args: &HelperArgs, stdout: &mut fs::File) -> DotlockState {
    let access = if args.exclusive {
        AccessFlags::R_OK | AccessFlags::W_OK
    } else {
        AccessFlags::R_OK
    };
    // access() checks against the real IDs, i.e. the invoking user
    if unistd::access(args.mailbox.as_os_str(), access).is_err() {
        return DotlockState::abandoned(FailureKind::NoPermission);
    }

    let owner = match nix::sys::stat::stat(args.mailbox.as_os_str()) {
        Ok(ref st) => StatSnapshot::from(st),
        Err(_) => return DotlockState::abandoned(FailureKind::NoPermission),
    };

    unix_privileges::deny_tracing();
    if unix_privileges::drop_privileges().is_err() {
        return DotlockState::abandoned(FailureKind::PrivFailed);
    }

    let req = DotlockRequest {
        dir: libc::AT_FDCWD,
        file_name: &args.mailbox,
        lock_name: &args.lock_name,
        hostname: &args.hostname,
        random_string: &args.random_string,
        retry: args.retry,
        owner: Some((Uid::from_raw(owner.uid), Gid::from_raw(owner.gid))),
        paranoid: true,
    };
    create::create(&req, &DEFAULT_DOTLOCK, &DEFAULT_DOTLOCK_EXCL, stdout)
}

fn is_fifo(fd: RawFd) -> bool {
    StatSnapshot::of_fd(fd).map_or(false, |st| st.is_fifo())
}

/// Point standard error at `/dev/null`.
///
/// Simply closing it would let the next file we open become descriptor 2,
/// and anything written there later would end up in that file.
fn silence_stderr() -> nix::Result<()> {
    let null = nix::fcntl::open(
        "/dev/null",
        OFlag::O_WRONLY | OFlag::O_CLOEXEC,
        Mode::empty(),
    )?;
    if STDERR == null {
        return Ok(());
    }

    let result = unistd::dup2(null, STDERR).map(|_| ());
    let _ = unistd::close(null);
    result
}
