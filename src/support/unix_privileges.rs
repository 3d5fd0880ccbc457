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

use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::libc;
use nix::fcntl::AtFlags;
use nix::unistd::{
    self, getegid, geteuid, getgid, getuid, setgid, setuid, AccessFlags,
};

use super::stat_snapshot::StatSnapshot;

/// Determine whether the `.lock` file for `mailbox`, which lives in the
/// directory `dir`, must be created by the privilege-separated helper.
///
/// This is the case when we cannot write to the directory, or when the
/// mailbox belongs to somebody else (the usual state of affairs for a system
/// spool owned by group `mail`), in which case the lock file should belong to
/// the mailbox owner as well.
pub fn needs_privilege(dir: RawFd, mailbox: &StatSnapshot) -> bool {
    let writable = unistd::faccessat(
        Some(dir),
        ".",
        AccessFlags::W_OK,
        unsafe { AtFlags::from_bits_unchecked(libc::AT_EACCESS) },
    )
    .is_ok();

    !writable
        || mailbox.uid != getuid().as_raw()
        || mailbox.gid != getgid().as_raw()
}

/// Irreversibly make the effective user and group the real ones as well.
///
/// After this, nothing can regain whatever the real IDs were when the
/// program started. Fails if the change did not actually take.
pub fn drop_privileges() -> nix::Result<()> {
    let (euid, egid) = (geteuid(), getegid());
    setuid(euid)?;
    setgid(egid)?;

    if getuid() != euid
        || geteuid() != euid
        || getgid() != egid
        || getegid() != egid
    {
        return Err(Errno::EPERM);
    }

    Ok(())
}

/// Keep debuggers and core dumps away from a process which may be running
/// with elevated privileges.
///
/// This is best effort; platforms without a suitable facility are left
/// alone.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn deny_tracing() {
    // Safety: PR_SET_DUMPABLE takes a single integer argument
    unsafe {
        libc::prctl(libc::PR_SET_DUMPABLE, 0 as libc::c_ulong);
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn deny_tracing() {
    // Safety: PT_DENY_ATTACH ignores every other argument
    unsafe {
        libc::ptrace(libc::PT_DENY_ATTACH, 0, std::ptr::null_mut(), 0);
    }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
pub fn deny_tracing() {}
