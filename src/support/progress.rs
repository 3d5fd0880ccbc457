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

use std::fmt;
use std::io::{self, Write};

/// Progress reporting on standard error: an optional leading message, a `.`
/// per retry, and a closing "ok" or "failed" if anything was printed at all.
#[derive(Debug)]
pub struct Progress {
    enabled: bool,
    printed: bool,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Progress {
            enabled,
            printed: false,
        }
    }

    pub fn begin(&mut self, what: fmt::Arguments<'_>) {
        self.emit(what);
    }

    pub fn dot(&mut self) {
        self.emit(format_args!("."));
    }

    pub fn finish(&mut self, ok: bool) {
        if self.printed {
            self.printed = false;
            if self.enabled {
                let _ = writeln!(
                    io::stderr(),
                    " {}",
                    if ok { "ok" } else { "failed" }
                );
            }
        }
    }

    fn emit(&mut self, what: fmt::Arguments<'_>) {
        if self.enabled {
            let mut stderr = io::stderr();
            let _ = stderr.write_fmt(what).and_then(|()| stderr.flush());
            self.printed = true;
        }
    }
}
