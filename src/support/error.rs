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

use std::io;

use nix::errno::Errno;
use thiserror::Error;

use crate::locks::state::FailureKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Advisory lock on mailbox unavailable")]
    FileLockBusy,
    #[error("{0}")]
    Dotlock(FailureKind),
    #[error("Unsafe mailbox or lock file name")]
    UnsafeName,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// The `errno` value equivalent to this error, for callers which need to
    /// report failures numerically.
    pub fn errno(&self) -> Option<Errno> {
        match *self {
            Error::FileLockBusy => Some(Errno::EAGAIN),
            Error::Dotlock(kind) => Some(kind.errno()),
            Error::UnsafeName => Some(Errno::EINVAL),
            Error::Io(ref e) => e.raw_os_error().map(Errno::from_i32),
            Error::Nix(errno) => Some(errno),
            Error::Config(_) => None,
        }
    }
}
