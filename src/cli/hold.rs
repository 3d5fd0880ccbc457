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

use std::ffi::OsString;
use std::io;
use std::process::Command;

use log::error;

use crate::support::sysexits::*;

/// Exit status of a command the shell could not find.
const NOT_FOUND: Sysexit = Sysexit(127);
/// Exit status of a command the shell could not execute.
const NOT_EXECUTABLE: Sysexit = Sysexit(126);

/// Keep the lock for as long as the user wants it.
///
/// With a command, run it and return its exit status, shell style. Without
/// one, wait for standard input to reach end of file.
pub fn hold(command: &[OsString]) -> Sysexit {
    match command.split_first() {
        Some((program, args)) => run(program, args),
        None => wait_for_eof(&mut io::stdin().lock()),
    }
}

fn run(program: &OsString, args: &[OsString]) -> Sysexit {
    match Command::new(program).args(args).status() {
        Ok(status) => status_to_sysexit(status),
        Err(e) => {
            error!("{}: {}", program.to_string_lossy(), e);
            match e.kind() {
                io::ErrorKind::NotFound => NOT_FOUND,
                io::ErrorKind::PermissionDenied => NOT_EXECUTABLE,
                _ => EX_OSERR,
            }
        }
    }
}

fn status_to_sysexit(status: std::process::ExitStatus) -> Sysexit {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => Sysexit(code),
        (None, Some(signal)) => Sysexit(128 + signal),
        (None, None) => EX_SOFTWARE,
    }
}

fn wait_for_eof(input: &mut impl io::Read) -> Sysexit {
    match io::copy(input, &mut io::sink()) {
        Ok(_) => EX_OK,
        Err(e) => {
            error!("Reading standard input: {}", e);
            EX_IOERR
        }
    }
}
