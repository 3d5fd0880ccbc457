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

//! The argument vector passed from the lock worker to `s-nail-dotlock`.
//!
//! The shape is fixed and is checked exactly, since the helper may be running
//! with privileges the invoking user does not have:
//!
//! ```text
//! s-nail-dotlock {r,w}dotlock mailbox MBOX name MBOX.lock
//!     hostname HOST randstr RANDOM retry [non-empty to retry]
//! ```

use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use crate::locks::create::lock_name_for;
use crate::support::safe_name::{is_safe_component, sanitize_host_name};
use crate::support::sysexits::*;

pub const PROGRAM_NAME: &str = "s-nail-dotlock";
pub const ARG_COUNT: usize = 12;
/// Host names are cut to this many bytes.
pub const HOST_NAME_MAX: usize = 64;

const READ_LOCK: &str = "rdotlock";
const WRITE_LOCK: &str = "wdotlock";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelperArgs {
    pub exclusive: bool,
    pub mailbox: OsString,
    pub lock_name: OsString,
    pub hostname: OsString,
    pub random_string: OsString,
    pub retry: bool,
}

impl HelperArgs {
    /// Produce the arguments following `argv[0]`.
    pub fn to_args(&self) -> Vec<OsString> {
        vec![
            OsString::from(if self.exclusive { WRITE_LOCK } else { READ_LOCK }),
            "mailbox".into(),
            self.mailbox.clone(),
            "name".into(),
            self.lock_name.clone(),
            "hostname".into(),
            self.hostname.clone(),
            "randstr".into(),
            self.random_string.clone(),
            "retry".into(),
            OsString::from(if self.retry { "1" } else { "" }),
        ]
    }
}

/// Validate a complete argument vector, including `argv[0]`.
///
/// This makes no system calls, so a rejected invocation cannot have touched
/// the file system.
pub fn parse_args(argv: &[OsString]) -> Result<HelperArgs, Sysexit> {
    if ARG_COUNT != argv.len() || argv[0] != *PROGRAM_NAME {
        return Err(EX_USAGE);
    }

    let exclusive = match argv[1].to_str() {
        Some(READ_LOCK) => false,
        Some(WRITE_LOCK) => true,
        _ => return Err(EX_USAGE),
    };

    for &(ix, tag) in &[
        (2, "mailbox"),
        (4, "name"),
        (6, "hostname"),
        (8, "randstr"),
        (10, "retry"),
    ] {
        if argv[ix] != *tag {
            return Err(EX_USAGE);
        }
    }

    let mailbox = &argv[3];
    let lock_name = &argv[5];
    let random_string = &argv[9];
    if !is_safe_component(mailbox.as_bytes())
        || !is_safe_component(lock_name.as_bytes())
        || !is_safe_component(random_string.as_bytes())
        || lock_name_for(mailbox) != *lock_name
    {
        return Err(EX_USAGE);
    }

    Ok(HelperArgs {
        exclusive,
        mailbox: mailbox.clone(),
        lock_name: lock_name.clone(),
        hostname: OsString::from_vec(sanitize_host_name(
            argv[7].as_bytes(),
            HOST_NAME_MAX,
        )),
        random_string: random_string.clone(),
        retry: !argv[11].is_empty(),
    })
}
