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

//! Advisory locks held through a file descriptor.

use std::os::unix::io::RawFd;
use std::thread;

use bitflags::bitflags;
use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, FlockArg};
use nix::libc;

use crate::support::lock_config::RetryPolicy;
use crate::support::progress::Progress;

bitflags! {
    pub struct FileLockMode: u8 {
        /// Use `flock()` rather than `fcntl()` range locks.
        const FLOCK = 1 << 0;
        /// Take an exclusive (write) lock. Without this, a shared (read) lock
        /// is taken.
        const EXCLUSIVE = 1 << 1;
        /// Retry on contention, according to the `RetryPolicy` given.
        const RETRY = 1 << 2;
        /// Print a `.` for each retry.
        const LOG = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileLockStatus {
    Locked,
    /// Someone else holds a conflicting lock.
    Busy,
    /// The descriptor cannot be locked at all. This is not contention, and
    /// retrying will not help.
    Undefined,
}

/// Place a non-blocking advisory lock on the whole of `fd`.
pub fn file_lock(
    fd: RawFd,
    mode: FileLockMode,
    policy: &RetryPolicy,
    progress: &mut Progress,
) -> FileLockStatus {
    let attempts = if mode.contains(FileLockMode::RETRY) {
        policy.attempts()
    } else {
        1
    };

    for attempt in 1..=attempts {
        match try_lock(fd, mode) {
            Ok(()) => {
                progress.finish(true);
                return FileLockStatus::Locked;
            }
            Err(Errno::EBADF)
            | Err(Errno::EINVAL)
            | Err(Errno::ENOLCK)
            | Err(Errno::EOPNOTSUPP) => {
                progress.finish(false);
                return FileLockStatus::Undefined;
            }
            Err(_) => (),
        }

        if attempt < attempts {
            if mode.contains(FileLockMode::LOG) {
                progress.dot();
            }
            thread::sleep(policy.delay());
        }
    }

    progress.finish(false);
    FileLockStatus::Busy
}

fn try_lock(fd: RawFd, mode: FileLockMode) -> nix::Result<()> {
    let exclusive = mode.contains(FileLockMode::EXCLUSIVE);

    if mode.contains(FileLockMode::FLOCK) {
        return fcntl::flock(
            fd,
            if exclusive {
                FlockArg::LockExclusiveNonblock
            } else {
                FlockArg::LockSharedNonblock
            },
        );
    }

    // Safety: flock is plain old data; zero means "from the start, whole
    // file", and l_pid must be zero for OFD locks
    let mut range: libc::flock = unsafe { std::mem::zeroed() };
    let l_type = if exclusive {
        libc::F_WRLCK
    } else {
        libc::F_RDLCK
    };
    range.l_type = l_type as _;
    range.l_whence = libc::SEEK_SET as _;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let arg = FcntlArg::F_OFD_SETLK(&range);
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let arg = FcntlArg::F_SETLK(&range);

    fcntl::fcntl(fd, arg).map(|_| ())
}
