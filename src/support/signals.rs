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

//! Scoped control over signal delivery.

use nix::sys::signal::{self, SigHandler, SigSet, SigmaskHow, Signal};

/// Blocks a set of signals on the current thread until dropped, at which
/// point the previous mask is restored.
///
/// Nothing in the `.lock` file protocol may be interrupted half way, or a
/// temporary file could be left behind.
#[must_use]
pub struct SignalHold {
    old: SigSet,
}

impl SignalHold {
    /// Block every signal except those in `keep`.
    ///
    /// `SIGKILL` and `SIGSTOP` cannot be blocked and are silently left alone
    /// by the kernel.
    pub fn all_but(keep: &[Signal]) -> nix::Result<Self> {
        let mut block = SigSet::all();
        for &sig in keep {
            block.remove(sig);
        }

        let mut old = SigSet::empty();
        signal::pthread_sigmask(
            SigmaskHow::SIG_BLOCK,
            Some(&block),
            Some(&mut old),
        )?;
        Ok(SignalHold { old })
    }
}

impl Drop for SignalHold {
    fn drop(&mut self) {
        let _ = signal::pthread_sigmask(
            SigmaskHow::SIG_SETMASK,
            Some(&self.old),
            None,
        );
    }
}

/// The signals a lock holder must survive: the user hitting ^C at the
/// terminal must not leave the mailbox unlocked while the mail reader is
/// still working on it.
pub const TERMINATION_SIGNALS: [Signal; 4] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
];

/// Set every signal in `TERMINATION_SIGNALS` to be ignored.
///
/// This only calls `sigaction()` and is therefore safe to use between
/// `fork()` and `exec()`. Ignored dispositions survive `exec()`.
pub fn ignore_termination_signals() -> nix::Result<()> {
    for &sig in &TERMINATION_SIGNALS {
        // Safety: SigIgn installs no handler code
        unsafe { signal::signal(sig, SigHandler::SigIgn) }?;
    }
    Ok(())
}
