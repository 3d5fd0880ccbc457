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

//! The status values exchanged over the control pipe.
//!
//! Every message is exactly one byte. The low bits select the state; bit 7
//! marks a failure the sender has given up on ("abandon"), meaning no further
//! attempt will be made. `Ping` is not a failure and is only ever sent on its
//! own, between attempts.

use std::fmt;

use nix::errno::Errno;

/// Why a `.lock` file could not be created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    CantChdir,
    NameTooLong,
    ReadOnlyFs,
    NoPermission,
    NoExec,
    PrivFailed,
    AlreadyExists,
    Fishy,
    Dunno,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DotlockState {
    /// The `.lock` file exists and belongs to us.
    Held,
    /// Still trying; wait for another message.
    Ping,
    Failed { kind: FailureKind, abandon: bool },
}

const ABANDON_BIT: u8 = 0x80;
const PING: u8 = 0x40;

impl FailureKind {
    fn code(self) -> u8 {
        match self {
            FailureKind::CantChdir => 1,
            FailureKind::NameTooLong => 2,
            FailureKind::ReadOnlyFs => 3,
            FailureKind::NoPermission => 4,
            FailureKind::NoExec => 5,
            FailureKind::PrivFailed => 6,
            FailureKind::AlreadyExists => 7,
            FailureKind::Fishy => 8,
            FailureKind::Dunno => 9,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => FailureKind::CantChdir,
            2 => FailureKind::NameTooLong,
            3 => FailureKind::ReadOnlyFs,
            4 => FailureKind::NoPermission,
            5 => FailureKind::NoExec,
            6 => FailureKind::PrivFailed,
            7 => FailureKind::AlreadyExists,
            8 => FailureKind::Fishy,
            9 => FailureKind::Dunno,
            _ => return None,
        })
    }

    /// The `errno` reported to programmatic callers for this failure.
    pub fn errno(self) -> Errno {
        match self {
            FailureKind::CantChdir => Errno::EACCES,
            FailureKind::NameTooLong => Errno::ENAMETOOLONG,
            FailureKind::ReadOnlyFs => Errno::EROFS,
            FailureKind::NoPermission => Errno::EACCES,
            FailureKind::NoExec => Errno::ENOENT,
            FailureKind::PrivFailed => Errno::EPERM,
            FailureKind::AlreadyExists => Errno::EEXIST,
            FailureKind::Fishy => Errno::EAGAIN,
            FailureKind::Dunno => Errno::EIO,
        }
    }

    /// Whether configuration may turn this failure into "proceed with the
    /// advisory lock only".
    ///
    /// Suspected tampering and a helper that cannot shed its privileges are
    /// never acceptable.
    pub fn downgradable(self) -> bool {
        match self {
            FailureKind::Fishy | FailureKind::PrivFailed => false,
            _ => true,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            FailureKind::CantChdir => {
                "Cannot change directory, please check permissions"
            }
            FailureKind::NameTooLong => {
                "Resulting dotlock filename would be too long"
            }
            FailureKind::ReadOnlyFs => {
                "Read-only filesystem, not creating lock file"
            }
            FailureKind::NoPermission => {
                "Cannot create a dotlock file, please check permissions \
                 (or set dotlock_disable)"
            }
            FailureKind::NoExec => {
                "Cannot find privilege-separated dotlock program"
            }
            FailureKind::PrivFailed => {
                "Privilege-separated dotlock program cannot change privileges"
            }
            FailureKind::AlreadyExists => {
                "It seems there is a stale dotlock file? \
                 Please remove the lock file manually, then retry"
            }
            FailureKind::Fishy => {
                "Fishy! Is someone trying to \"steal\" foreign access rights? \
                 Please check the mailbox file etc. manually, then retry"
            }
            FailureKind::Dunno => {
                "Unspecified dotlock file control process error \
                 (like a broken I/O pipe)"
            }
        })
    }
}

impl DotlockState {
    pub fn failed(kind: FailureKind) -> Self {
        DotlockState::Failed {
            kind,
            abandon: false,
        }
    }

    pub fn abandoned(kind: FailureKind) -> Self {
        DotlockState::Failed {
            kind,
            abandon: true,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            DotlockState::Held => 0,
            DotlockState::Ping => PING,
            DotlockState::Failed { kind, abandon } => {
                kind.code() | if abandon { ABANDON_BIT } else { 0 }
            }
        }
    }

    /// Decode a byte received from the control pipe.
    ///
    /// Returns `None` for values no sender produces, including `Held` and
    /// `Ping` with the abandon bit.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(DotlockState::Held),
            PING => Some(DotlockState::Ping),
            _ => FailureKind::from_code(byte & !ABANDON_BIT).map(|kind| {
                DotlockState::Failed {
                    kind,
                    abandon: 0 != byte & ABANDON_BIT,
                }
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wire_values() {
        assert_eq!(0, DotlockState::Held.to_byte());
        assert_eq!(0x40, DotlockState::Ping.to_byte());
        assert_eq!(
            7,
            DotlockState::failed(FailureKind::AlreadyExists).to_byte()
        );
        assert_eq!(
            0x88,
            DotlockState::abandoned(FailureKind::Fishy).to_byte()
        );
        assert_eq!(
            Some(DotlockState::abandoned(FailureKind::ReadOnlyFs)),
            DotlockState::from_byte(0x83)
        );
        assert_eq!(
            Some(DotlockState::failed(FailureKind::NoExec)),
            DotlockState::from_byte(5)
        );
    }

    #[test]
    fn every_state_survives_the_pipe() {
        let kinds = [
            FailureKind::CantChdir,
            FailureKind::NameTooLong,
            FailureKind::ReadOnlyFs,
            FailureKind::NoPermission,
            FailureKind::NoExec,
            FailureKind::PrivFailed,
            FailureKind::AlreadyExists,
            FailureKind::Fishy,
            FailureKind::Dunno,
        ];
        for &kind in &kinds {
            for &abandon in &[false, true] {
                let state = DotlockState::Failed { kind, abandon };
                assert_eq!(
                    Some(state),
                    DotlockState::from_byte(state.to_byte())
                );
            }
        }
    }

    #[test]
    fn nonsense_bytes_rejected() {
        assert_eq!(None, DotlockState::from_byte(0x80));
        assert_eq!(None, DotlockState::from_byte(0xC0));
        assert_eq!(None, DotlockState::from_byte(10));
        assert_eq!(None, DotlockState::from_byte(0x8A));
        assert_eq!(None, DotlockState::from_byte(0xFF));
    }

    #[test]
    fn never_downgrade_security_failures() {
        assert!(!FailureKind::Fishy.downgradable());
        assert!(!FailureKind::PrivFailed.downgradable());
        assert!(FailureKind::AlreadyExists.downgradable());
        assert!(FailureKind::ReadOnlyFs.downgradable());
    }
}
