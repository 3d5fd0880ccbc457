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

//! Values the lock protocol needs to make names unique across processes and
//! machines.

use std::ffi::{OsStr, OsString};

use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};

/// Length of the random part of the temporary `.lock` file name.
pub const RANDOM_STRING_LEN: usize = 16;

lazy_static! {
    /// Resolved once, in the caller's process, so that no name service lookup
    /// ever happens inside a lock worker.
    static ref HOST_NAME: OsString = nix::unistd::gethostname()
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| OsString::from("localhost"));
}

pub fn host_name() -> &'static OsStr {
    &HOST_NAME
}

/// Generate a printable random token of `len` characters.
///
/// The result never contains a path separator.
pub fn random_string(len: usize) -> String {
    OsRng.sample_iter(&Alphanumeric).take(len).collect()
}
