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

//! Creation of `.lock` files.
//!
//! `O_EXCL` is not trustworthy on every file system (NFS being the classic
//! offender), so the lock is not created directly. Instead a file with a name
//! unique to this attempt is created and hard-linked to the lock name. `link()`
//! is atomic everywhere; if afterwards the unique file has exactly two links,
//! the lock file is ours. The unique file is always removed again.
//!
//! This code runs both in the caller's worker and in the setuid helper, and
//! must not assume anything about the privileges it has.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{FromRawFd, RawFd};
use std::thread;

use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::signal::Signal;
use nix::sys::stat::Mode;
use nix::unistd::{self, Gid, LinkatFlags, Uid, UnlinkatFlags};

use super::state::{DotlockState, FailureKind};
use crate::support::lock_config::RetryPolicy;
use crate::support::signals::SignalHold;
use crate::support::stat_snapshot::StatSnapshot;

pub const LOCK_SUFFIX: &str = ".lock";

/// Everything needed to create one `.lock` file.
#[derive(Clone, Debug)]
pub struct DotlockRequest<'a> {
    /// Directory containing the mailbox; all names are relative to it.
    pub dir: RawFd,
    /// The mailbox, as a name within `dir`.
    pub file_name: &'a OsStr,
    /// Must be `file_name` plus `.lock`.
    pub lock_name: &'a OsStr,
    pub hostname: &'a OsStr,
    pub random_string: &'a OsStr,
    /// If false, give up after the first failed attempt.
    pub retry: bool,
    /// Give the lock file this ownership.
    pub owner: Option<(Uid, Gid)>,
    /// Refuse requests whose unique name could be confused with the lock
    /// name. Set when running with privileges on behalf of someone else.
    pub paranoid: bool,
}

pub fn lock_name_for(file_name: &OsStr) -> OsString {
    let mut lock_name = file_name.to_owned();
    lock_name.push(LOCK_SUFFIX);
    lock_name
}

impl DotlockRequest<'_> {
    /// The name of the file unique to this request which is linked to the
    /// lock name.
    pub fn unique_name(&self) -> OsString {
        let mut name = self.lock_name.to_owned();
        name.push(self.random_string);
        name.push(self.hostname);
        name
    }
}

/// Create the `.lock` file, retrying according to `policy` while the failure
/// is one that may go away.
///
/// Between attempts a `Ping` is written to `pings`. If that fails, whoever
/// was waiting for us has gone away and the attempt is abandoned.
pub fn create(
    req: &DotlockRequest<'_>,
    policy: &RetryPolicy,
    excl_policy: &RetryPolicy,
    pings: &mut dyn Write,
) -> DotlockState {
    let attempts = if req.retry { policy.attempts() } else { 1 };
    let mut attempt = 1;

    loop {
        let state = {
            let _hold = SignalHold::all_but(&[Signal::SIGCONT]).ok();
            create_excl(req, excl_policy)
        };

        match state {
            DotlockState::Failed { abandon: false, .. }
                if attempt < attempts =>
            {
                attempt += 1
            }
            state => return state,
        }

        if pings
            .write_all(&[DotlockState::Ping.to_byte()])
            .and_then(|()| pings.flush())
            .is_err()
        {
            return DotlockState::abandoned(FailureKind::Dunno);
        }

        thread::sleep(policy.delay());
    }
}

/// Make a single attempt at creating the `.lock` file.
pub fn create_excl(
    req: &DotlockRequest<'_>,
    excl_policy: &RetryPolicy,
) -> DotlockState {
    let unique = req.unique_name();

    if lock_name_for(req.file_name).as_os_str() != req.lock_name {
        return DotlockState::abandoned(FailureKind::Fishy);
    }
    if req.paranoid && unique.as_bytes() == req.lock_name.as_bytes() {
        return DotlockState::abandoned(FailureKind::Fishy);
    }

    let mut tries = 1;
    let fd = loop {
        match fcntl::openat(
            req.dir,
            unique.as_os_str(),
            OFlag::O_WRONLY
                | OFlag::O_CREAT
                | OFlag::O_EXCL
                | OFlag::O_SYNC
                | OFlag::O_CLOEXEC,
            Mode::from_bits_truncate(0o644),
        ) {
            Ok(fd) => break fd,
            Err(Errno::EINTR) => continue,
            Err(Errno::EEXIST) => {
                if tries >= excl_policy.attempts() {
                    return DotlockState::failed(FailureKind::AlreadyExists);
                }
                tries += 1;
                thread::sleep(excl_policy.delay());
            }
            Err(Errno::EROFS) => {
                return DotlockState::abandoned(FailureKind::ReadOnlyFs)
            }
            Err(Errno::ENAMETOOLONG) => {
                return DotlockState::abandoned(FailureKind::NameTooLong)
            }
            Err(_) => {
                return DotlockState::abandoned(FailureKind::NoPermission)
            }
        }
    };
    // Safety: the descriptor was just created and is owned by nothing else
    let file = unsafe { fs::File::from_raw_fd(fd) };

    let chowned = match req.owner {
        Some((uid, gid)) => unistd::fchown(fd, Some(uid), Some(gid)),
        None => Ok(()),
    };
    drop(file);

    let state = match chowned {
        Ok(()) => link_unique(req, &unique),
        Err(_) => DotlockState::abandoned(FailureKind::NoPermission),
    };

    let _ = unistd::unlinkat(
        Some(req.dir),
        unique.as_os_str(),
        UnlinkatFlags::NoRemoveDir,
    );
    state
}

fn link_unique(req: &DotlockRequest<'_>, unique: &OsStr) -> DotlockState {
    if let Err(e) = unistd::linkat(
        Some(req.dir),
        unique,
        Some(req.dir),
        req.lock_name,
        LinkatFlags::NoSymlinkFollow,
    ) {
        return classify(e);
    }

    // Look at the unique name, not the lock name: anybody could be touching
    // the latter
    match StatSnapshot::of_entry(req.dir, unique) {
        Ok(st) if st.nlink <= 2 => DotlockState::Held,
        Ok(_) => DotlockState::failed(FailureKind::AlreadyExists),
        Err(e) => classify(e),
    }
}

fn classify(e: Errno) -> DotlockState {
    if Errno::EEXIST == e {
        DotlockState::failed(FailureKind::AlreadyExists)
    } else {
        DotlockState::abandoned(FailureKind::NoPermission)
    }
}

#[cfg(test)]
mod test {
    use std::io;
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::AsRawFd;
    use std::time::{Duration, Instant};

    use rayon::prelude::*;
    use tempfile::TempDir;

    use super::*;

    const NO_WAIT: RetryPolicy = RetryPolicy::new(1, 0);

    struct Setup {
        root: TempDir,
        dir: fs::File,
        lock_name: OsString,
    }

    impl Setup {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            fs::write(root.path().join("t.mbox"), b"").unwrap();
            let dir = fs::File::open(root.path()).unwrap();
            Setup {
                root,
                dir,
                lock_name: lock_name_for(OsStr::new("t.mbox")),
            }
        }

        fn request<'a>(&'a self, random: &'a str) -> DotlockRequest<'a> {
            DotlockRequest {
                dir: self.dir.as_raw_fd(),
                file_name: OsStr::new("t.mbox"),
                lock_name: &self.lock_name,
                hostname: OsStr::new("host.example"),
                random_string: OsStr::new(random),
                retry: false,
                owner: None,
                paranoid: false,
            }
        }

        fn entries(&self) -> Vec<String> {
            let mut names = fs::read_dir(self.root.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().into_string().unwrap())
                .collect::<Vec<_>>();
            names.sort();
            names
        }

        fn lock_metadata(&self) -> io::Result<fs::Metadata> {
            fs::symlink_metadata(self.root.path().join("t.mbox.lock"))
        }
    }

    struct BrokenPipe;
    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from_raw_os_error(nix::libc::EPIPE))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn lock_fresh_mailbox() {
        let setup = Setup::new();
        let mut pings = Vec::new();
        assert_eq!(
            DotlockState::Held,
            create(&setup.request("r1"), &NO_WAIT, &NO_WAIT, &mut pings)
        );
        assert!(pings.is_empty());

        let md = setup.lock_metadata().unwrap();
        assert!(md.is_file());
        assert_eq!(1, md.nlink());
        assert_eq!(0, md.len());
        assert_eq!(vec!["t.mbox", "t.mbox.lock"], setup.entries());
    }

    #[test]
    fn existing_lock_without_retry() {
        let setup = Setup::new();
        fs::write(setup.root.path().join("t.mbox.lock"), b"").unwrap();

        let mut pings = Vec::new();
        assert_eq!(
            DotlockState::failed(FailureKind::AlreadyExists),
            create(&setup.request("r1"), &NO_WAIT, &NO_WAIT, &mut pings)
        );
        assert!(pings.is_empty());
        assert_eq!(vec!["t.mbox", "t.mbox.lock"], setup.entries());
    }

    #[test]
    fn retry_is_bounded() {
        let setup = Setup::new();
        fs::write(setup.root.path().join("t.mbox.lock"), b"").unwrap();

        let mut req = setup.request("r1");
        req.retry = true;
        let mut pings = Vec::new();
        let start = Instant::now();
        let state =
            create(&req, &RetryPolicy::new(4, 50), &NO_WAIT, &mut pings);
        let elapsed = start.elapsed();

        assert_eq!(DotlockState::failed(FailureKind::AlreadyExists), state);
        assert_eq!(vec![DotlockState::Ping.to_byte(); 3], pings);
        assert!(elapsed >= Duration::from_millis(150), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "{:?}", elapsed);
        assert_eq!(vec!["t.mbox", "t.mbox.lock"], setup.entries());
    }

    #[test]
    fn retry_succeeds_once_lock_removed() {
        let setup = Setup::new();
        let lock_path = setup.root.path().join("t.mbox.lock");
        fs::write(&lock_path, b"").unwrap();

        let mut req = setup.request("r1");
        req.retry = true;

        // Remove the lock once the first ping arrives
        struct RemoveOnPing(std::path::PathBuf);
        impl Write for RemoveOnPing {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                let _ = fs::remove_file(&self.0);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        assert_eq!(
            DotlockState::Held,
            create(
                &req,
                &RetryPolicy::new(3, 10),
                &NO_WAIT,
                &mut RemoveOnPing(lock_path)
            )
        );
        assert_eq!(vec!["t.mbox", "t.mbox.lock"], setup.entries());
    }

    #[test]
    fn vanished_reader_abandons() {
        let setup = Setup::new();
        fs::write(setup.root.path().join("t.mbox.lock"), b"").unwrap();

        let mut req = setup.request("r1");
        req.retry = true;
        assert_eq!(
            DotlockState::abandoned(FailureKind::Dunno),
            create(&req, &RetryPolicy::new(5, 0), &NO_WAIT, &mut BrokenPipe)
        );
    }

    #[test]
    fn second_locker_is_refused() {
        let setup = Setup::new();
        assert_eq!(
            DotlockState::Held,
            create_excl(&setup.request("first"), &NO_WAIT)
        );
        assert_eq!(
            DotlockState::failed(FailureKind::AlreadyExists),
            create_excl(&setup.request("second"), &NO_WAIT)
        );
        assert_eq!(vec!["t.mbox", "t.mbox.lock"], setup.entries());
    }

    #[test]
    fn concurrent_lockers_exclude_each_other() {
        let setup = Setup::new();
        let tokens = (0..32).map(|i| format!("tok{}", i)).collect::<Vec<_>>();

        let winners = tokens
            .par_iter()
            .map(|token| create_excl(&setup.request(token), &NO_WAIT))
            .inspect(|state| {
                assert!(
                    DotlockState::Held == *state
                        || DotlockState::failed(FailureKind::AlreadyExists)
                            == *state,
                    "unexpected {:?}",
                    state
                )
            })
            .filter(|state| DotlockState::Held == *state)
            .count();

        assert_eq!(1, winners);
        assert_eq!(vec!["t.mbox", "t.mbox.lock"], setup.entries());
    }

    #[test]
    fn unique_name_colliding_with_lock_name_is_fishy() {
        let setup = Setup::new();
        let mut req = setup.request("");
        req.hostname = OsStr::new("");
        req.paranoid = true;
        assert_eq!(
            DotlockState::abandoned(FailureKind::Fishy),
            create_excl(&req, &NO_WAIT)
        );
        assert_eq!(vec!["t.mbox"], setup.entries());
    }

    #[test]
    fn lock_name_must_match_mailbox() {
        let setup = Setup::new();
        let mut req = setup.request("r1");
        req.lock_name = OsStr::new("passwd");
        assert_eq!(
            DotlockState::abandoned(FailureKind::Fishy),
            create_excl(&req, &NO_WAIT)
        );
        assert_eq!(vec!["t.mbox"], setup.entries());
    }

    #[test]
    fn overlong_unique_name() {
        let setup = Setup::new();
        let host = "h".repeat(300);
        let mut req = setup.request("r1");
        req.hostname = OsStr::new(&host);
        assert_eq!(
            DotlockState::abandoned(FailureKind::NameTooLong),
            create_excl(&req, &NO_WAIT)
        );
        assert_eq!(vec!["t.mbox"], setup.entries());
    }

    #[test]
    fn foreign_unique_file_is_left_alone() {
        let setup = Setup::new();
        let req = setup.request("r1");
        fs::write(setup.root.path().join(req.unique_name()), b"x").unwrap();

        assert_eq!(
            DotlockState::failed(FailureKind::AlreadyExists),
            create_excl(&req, &RetryPolicy::new(2, 1))
        );
        assert!(setup.lock_metadata().is_err());
        assert_eq!(2, setup.entries().len());
    }

    #[test]
    fn lock_file_takes_requested_owner() {
        let setup = Setup::new();
        let md = fs::metadata(setup.root.path().join("t.mbox")).unwrap();
        let mut req = setup.request("r1");
        req.owner = Some((Uid::from_raw(md.uid()), Gid::from_raw(md.gid())));

        assert_eq!(DotlockState::Held, create_excl(&req, &NO_WAIT));
        let lock_md = setup.lock_metadata().unwrap();
        assert_eq!(md.uid(), lock_md.uid());
        assert_eq!(md.gid(), lock_md.gid());
    }
}
