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

//! The lock worker: finds the real mailbox, checks that it is still the file
//! the caller opened, creates the `.lock` file (itself or through the
//! privilege-separated helper), and removes it again once told to.
//!
//! The worker talks to the manager only through its two pipe ends: "stdout"
//! carries `DotlockState` bytes to the manager, and "stdin" becoming readable
//! (normally EOF, because the manager closed its end) means release.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{self, Write};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};

use nix::fcntl;
use nix::libc;
use nix::unistd::{self, PathconfVar, UnlinkatFlags};

use super::create::{self, lock_name_for, DotlockRequest};
use super::state::{DotlockState, FailureKind};
use crate::ps_dotlock::args::{HelperArgs, HOST_NAME_MAX, PROGRAM_NAME};
use crate::support::file_ops::{open_dir_at, ReadUninterruptibly};
use crate::support::lock_config::RetryPolicy;
use crate::support::safe_name::sanitize_host_name;
use crate::support::signals;
use crate::support::stat_snapshot::StatSnapshot;
use crate::support::unix_privileges;

/// Symbolic links followed before giving up, as with `ELOOP`.
const MAX_SYMLINK_HOPS: usize = 40;
/// Used when the file system will not tell us its limit.
const DEFAULT_NAME_MAX: usize = 255;

/// Everything the worker needs, fixed before it starts.
#[derive(Debug)]
pub struct WorkerContext {
    pub mailbox: PathBuf,
    /// A duplicate of the caller's descriptor on `mailbox`.
    pub mailbox_file: fs::File,
    pub exclusive: bool,
    pub hostname: OsString,
    pub random_string: OsString,
    pub retry: bool,
    pub helper: PathBuf,
    pub policy: RetryPolicy,
    pub excl_policy: RetryPolicy,
}

/// The mailbox after resolving symbolic links.
struct Target {
    dir: fs::File,
    name: OsString,
    stat: StatSnapshot,
}

pub fn spawn(
    ctx: WorkerContext,
    stdin: fs::File,
    stdout: fs::File,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("dotlock".to_owned())
        .spawn(move || run(ctx, stdin, stdout))
}

fn run(ctx: WorkerContext, mut stdin: fs::File, mut stdout: fs::File) {
    let (target, lock_name, hostname) = match prepare(&ctx) {
        Ok(prepared) => prepared,
        Err(state) => {
            let _ = stdout.write_all(&[state.to_byte()]);
            return;
        }
    };

    if unix_privileges::needs_privilege(target.dir.as_raw_fd(), &target.stat)
    {
        let helper =
            spawn_helper(&ctx, &target, &lock_name, &hostname, &stdin, &stdout);
        match helper {
            Ok(mut child) => {
                // The helper now owns the protocol; our copies of the pipe
                // ends must go, or the manager would never see EOF
                drop(stdin);
                drop(stdout);
                let _ = child.wait();
                return;
            }
            // Not fatal: try with our own permissions instead
            Err(_) => {
                let no_exec = DotlockState::failed(FailureKind::NoExec);
                if stdout.write_all(&[no_exec.to_byte()]).is_err() {
                    return;
                }
            }
        }
    }

    let req = DotlockRequest {
        dir: target.dir.as_raw_fd(),
        file_name: &target.name,
        lock_name: &lock_name,
        hostname: &hostname,
        random_string: &ctx.random_string,
        retry: ctx.retry,
        owner: None,
        paranoid: false,
    };
    let state =
        create::create(&req, &ctx.policy, &ctx.excl_policy, &mut stdout);
    let written = stdout.write_all(&[state.to_byte()]);
    drop(stdout);

    if DotlockState::Held == state {
        if written.is_ok() {
            let mut buf = [0u8; 1];
            let _ = stdin.read_uninterruptibly(&mut buf);
        }

        let _ = unistd::unlinkat(
            Some(target.dir.as_raw_fd()),
            lock_name.as_os_str(),
            UnlinkatFlags::NoRemoveDir,
        );
    }
}

fn prepare(
    ctx: &WorkerContext,
) -> Result<(Target, OsString, OsString), DotlockState> {
    let target = locate(&ctx.mailbox, ctx.mailbox_file.as_raw_fd())?;
    let lock_name = lock_name_for(&target.name);

    let dir = target.dir.as_raw_fd();
    let name_max = unistd::fpathconf(dir, PathconfVar::NAME_MAX)
        .ok()
        .flatten()
        .map_or(DEFAULT_NAME_MAX, |n| n as usize);
    if lock_name.len() > name_max {
        return Err(DotlockState::abandoned(FailureKind::NameTooLong));
    }

    // Shorten the host name so that the unique name still fits
    let room = name_max
        .saturating_sub(lock_name.len())
        .saturating_sub(ctx.random_string.len())
        .min(HOST_NAME_MAX);
    let hostname = OsString::from_vec(sanitize_host_name(
        ctx.hostname.as_bytes(),
        room,
    ));

    Ok((target, lock_name, hostname))
}

/// Find the file `mailbox` really is, one step at a time.
///
/// Every symbolic link is resolved by hand relative to the directory it was
/// found in, and the final entry is compared against what the caller has
/// open, so that swapping a link or the file midway is detected rather than
/// followed.
fn locate(mailbox: &Path, opened: RawFd) -> Result<Target, DotlockState> {
    let mut path = mailbox.to_owned();
    let mut base: Option<fs::File> = None;

    for _ in 0..MAX_SYMLINK_HOPS {
        let name = match path.file_name() {
            Some(name) => name.to_owned(),
            None => return Err(DotlockState::abandoned(FailureKind::Fishy)),
        };

        let relative_to =
            base.as_ref().map_or(libc::AT_FDCWD, |d| d.as_raw_fd());
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let dir = open_dir_at(relative_to, parent)
            .map_err(|_| DotlockState::abandoned(FailureKind::CantChdir))?;

        let stat = StatSnapshot::of_entry(dir.as_raw_fd(), name.as_os_str())
            .map_err(|_| DotlockState::abandoned(FailureKind::Fishy))?;

        if stat.is_symlink() {
            let link = fcntl::readlinkat(dir.as_raw_fd(), name.as_os_str())
                .map_err(|_| DotlockState::abandoned(FailureKind::Fishy))?;
            path = PathBuf::from(link);
            base = Some(dir);
            continue;
        }

        let opened = StatSnapshot::of_fd(opened)
            .map_err(|_| DotlockState::abandoned(FailureKind::Dunno))?;
        check_identity(&opened, &stat)?;

        return Ok(Target { dir, name, stat });
    }

    Err(DotlockState::abandoned(FailureKind::Fishy))
}

/// Verify that the file found by name is the one the caller has open.
pub fn check_identity(
    opened: &StatSnapshot,
    found: &StatSnapshot,
) -> Result<(), DotlockState> {
    if found.is_regular() && opened.same_identity(found) {
        Ok(())
    } else {
        Err(DotlockState::abandoned(FailureKind::Fishy))
    }
}

fn spawn_helper(
    ctx: &WorkerContext,
    target: &Target,
    lock_name: &OsStr,
    hostname: &OsStr,
    stdin: &fs::File,
    stdout: &fs::File,
) -> io::Result<Child> {
    let args = HelperArgs {
        exclusive: ctx.exclusive,
        mailbox: target.name.clone(),
        lock_name: lock_name.to_owned(),
        hostname: hostname.to_owned(),
        random_string: ctx.random_string.clone(),
        retry: ctx.retry,
    };
    let dir = target.dir.as_raw_fd();

    let mut cmd = Command::new(&ctx.helper);
    cmd.arg0(PROGRAM_NAME)
        .args(args.to_args())
        .env_clear()
        .stdin(Stdio::from(stdin.try_clone()?))
        .stdout(Stdio::from(stdout.try_clone()?))
        .stderr(Stdio::null());
    // Safety: fchdir() and sigaction() are async-signal-safe
    unsafe {
        cmd.pre_exec(move || {
            unistd::fchdir(dir)?;
            signals::ignore_termination_signals()?;
            Ok(())
        });
    }

    cmd.spawn()
}
