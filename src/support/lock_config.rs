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

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::Error;

/// Where the privilege-separated helper is installed unless configured
/// otherwise. Packagers can override this at build time.
pub const DEFAULT_HELPER: &str = match option_env!("S_NAIL_DOTLOCK_PATH") {
    Some(path) => path,
    None => "/usr/libexec/s-nail-dotlock",
};

/// Configuration for mailbox locking.
///
/// This is stored in a file named `s-nail-lock.toml`, typically under `/etc`
/// or `/usr/local/etc`. Every key is optional.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LockConfig {
    /// If true, only the advisory (`fcntl`/`flock`) lock is taken and no
    /// `.lock` file is ever created.
    pub dotlock_disable: bool,

    /// If true, a failure to create the `.lock` file is reported but the
    /// mailbox is still used under the advisory lock alone.
    ///
    /// Failures which suggest someone is tampering with the mailbox, or that
    /// the helper cannot give up its privileges, are never ignored.
    pub dotlock_ignore_error: bool,

    /// Path to the `s-nail-dotlock` program, used when the `.lock` file must
    /// be created with privileges the caller does not have.
    pub helper: PathBuf,

    /// Echo the name of the file being locked before starting.
    pub verbose: bool,

    /// Suppress progress output and diagnostics on standard error.
    pub quiet: bool,

    /// Attempts at the advisory lock.
    pub file_lock: RetryPolicy,

    /// Attempts at creating the `.lock` file. A "still trying" notification
    /// is sent to the caller between attempts.
    pub dotlock: RetryPolicy,

    /// Attempts at exclusively creating the unique temporary file within a
    /// single `.lock` file attempt.
    pub dotlock_excl: RetryPolicy,
}

/// A bounded number of attempts with a fixed delay between them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryPolicy {
    pub tries: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(tries: u32, delay_ms: u64) -> Self {
        RetryPolicy { tries, delay_ms }
    }

    /// The number of attempts to make, which is always at least one.
    pub fn attempts(&self) -> u32 {
        self.tries.max(1)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

pub const DEFAULT_FILE_LOCK: RetryPolicy = RetryPolicy::new(10, 200);
pub const DEFAULT_DOTLOCK: RetryPolicy = RetryPolicy::new(5, 1000);
pub const DEFAULT_DOTLOCK_EXCL: RetryPolicy = RetryPolicy::new(5, 100);

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            dotlock_disable: false,
            dotlock_ignore_error: false,
            helper: DEFAULT_HELPER.into(),
            verbose: false,
            quiet: false,
            file_lock: DEFAULT_FILE_LOCK,
            dotlock: DEFAULT_DOTLOCK,
            dotlock_excl: DEFAULT_DOTLOCK_EXCL,
        }
    }
}

impl LockConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path)?;
        Ok(toml::from_slice(&data)?)
    }

    /// Locate the system-wide configuration file, if there is one.
    pub fn find_system_file() -> Option<PathBuf> {
        ["/etc/s-nail-lock.toml", "/usr/local/etc/s-nail-lock.toml"]
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: LockConfig = toml::from_str("").unwrap();
        assert!(!config.dotlock_disable);
        assert_eq!(DEFAULT_DOTLOCK, config.dotlock);
        assert_eq!(Path::new(DEFAULT_HELPER), config.helper);
    }

    #[test]
    fn partial_config() {
        let config: LockConfig = toml::from_str(
            r#"
dotlock_ignore_error = true
helper = "/opt/mail/bin/s-nail-dotlock"

[dotlock]
tries = 3
delay_ms = 250
"#,
        )
        .unwrap();
        assert!(config.dotlock_ignore_error);
        assert_eq!(Path::new("/opt/mail/bin/s-nail-dotlock"), config.helper);
        assert_eq!(RetryPolicy::new(3, 250), config.dotlock);
        assert_eq!(DEFAULT_DOTLOCK_EXCL, config.dotlock_excl);
        assert_eq!(Duration::from_millis(250), config.dotlock.delay());
    }

    #[test]
    fn incomplete_policy_rejected() {
        let partial = "[dotlock]\ntries = 3\n";
        assert!(toml::from_str::<LockConfig>(partial).is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("s-nail-lock.toml");
        fs::write(&path, "quiet = true\n").unwrap();
        assert!(LockConfig::load(&path).unwrap().quiet);

        fs::write(&path, "quiet = 42\n").unwrap();
        assert!(matches!(LockConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn zero_tries_still_attempts_once() {
        assert_eq!(1, RetryPolicy::new(0, 10).attempts());
    }
}
