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

//! A condensed, platform-independent copy of `struct stat`.

use std::os::unix::io::RawFd;

use nix::fcntl::AtFlags;
use nix::libc;
use nix::sys::stat::FileStat;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatSnapshot {
    pub dev: u64,
    pub ino: u64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub nlink: u64,
    pub size: i64,
    pub mtime: i64,
}

// The field widths of `struct stat` vary between platforms
#[allow(clippy::unnecessary_cast)]
impl From<&FileStat> for StatSnapshot {
    fn from(st: &FileStat) -> Self {
        StatSnapshot {
            dev: st.st_dev as u64,
            ino: st.st_ino as u64,
            uid: st.st_uid as u32,
            gid: st.st_gid as u32,
            mode: st.st_mode as u32,
            nlink: st.st_nlink as u64,
            size: st.st_size as i64,
            mtime: st.st_mtime as i64,
        }
    }
}

impl StatSnapshot {
    pub fn of_fd(fd: RawFd) -> nix::Result<Self> {
        nix::sys::stat::fstat(fd).map(|st| StatSnapshot::from(&st))
    }

    /// `lstat()` the entry `name` within the directory `dir`.
    pub fn of_entry<P: ?Sized + nix::NixPath>(
        dir: RawFd,
        name: &P,
    ) -> nix::Result<Self> {
        nix::sys::stat::fstatat(dir, name, AtFlags::AT_SYMLINK_NOFOLLOW)
            .map(|st| StatSnapshot::from(&st))
    }

    #[allow(clippy::unnecessary_cast)]
    fn file_type(&self) -> u32 {
        self.mode & (libc::S_IFMT as u32)
    }

    #[allow(clippy::unnecessary_cast)]
    pub fn is_symlink(&self) -> bool {
        self.file_type() == libc::S_IFLNK as u32
    }

    #[allow(clippy::unnecessary_cast)]
    pub fn is_regular(&self) -> bool {
        self.file_type() == libc::S_IFREG as u32
    }

    #[allow(clippy::unnecessary_cast)]
    pub fn is_fifo(&self) -> bool {
        self.file_type() == libc::S_IFIFO as u32
    }

    /// Whether `self` and `other` describe the same file with the same
    /// ownership and permissions.
    ///
    /// Size and times are ignored, since the file may legitimately be
    /// written to between the two observations.
    pub fn same_identity(&self, other: &StatSnapshot) -> bool {
        self.dev == other.dev
            && self.ino == other.ino
            && self.uid == other.uid
            && self.gid == other.gid
            && self.mode == other.mode
    }
}
