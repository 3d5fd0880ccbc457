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
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::error;
use structopt::StructOpt;

use super::hold;
use super::interrupt::{self, SharedLock};
use crate::locks::{dotlock, FailureKind, FileLockMode};
use crate::support::error::Error;
use crate::support::lock_config::LockConfig;
use crate::support::sysexits::*;

/// Lock a mailbox the way S-nail does, then run a command or wait.
///
/// An advisory lock is placed on MAILBOX and `MAILBOX.lock` is created next
/// to it, using the s-nail-dotlock helper if the directory is not writable.
/// If COMMAND is given, it is run while the locks are held and its exit
/// status is passed on. Otherwise, the locks are held until standard input
/// reaches end of file.
#[derive(StructOpt, Debug)]
#[structopt(
    max_term_width = 80,
    setting = clap::AppSettings::TrailingVarArg
)]
struct Options {
    /// Read configuration from this file
    /// [default: /etc/s-nail-lock.toml or /usr/local/etc/s-nail-lock.toml]
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Take a shared advisory lock instead of an exclusive one. The mailbox
    /// is then opened read-only. The `.lock` file is exclusive either way.
    #[structopt(short, long)]
    shared: bool,

    /// Use flock() instead of fcntl() for the advisory lock.
    #[structopt(long)]
    flock: bool,

    /// Say what is being locked.
    #[structopt(short, long)]
    verbose: bool,

    /// Print nothing but fatal errors.
    #[structopt(short, long)]
    quiet: bool,

    /// Make only one attempt at each lock.
    #[structopt(long)]
    no_retry: bool,

    /// The mailbox file to lock.
    #[structopt(parse(from_os_str))]
    mailbox: PathBuf,

    /// The command to run while the mailbox is locked.
    #[structopt(parse(from_os_str))]
    command: Vec<OsString>,
}

impl Options {
    fn file_lock_mode(&self) -> FileLockMode {
        let mut mode = FileLockMode::empty();
        if !self.shared {
            mode |= FileLockMode::EXCLUSIVE;
        }
        if self.flock {
            mode |= FileLockMode::FLOCK;
        }
        mode
    }

    fn apply_to(&self, config: &mut LockConfig) {
        config.verbose |= self.verbose;
        config.quiet |= self.quiet;
        if self.no_retry {
            config.file_lock.tries = 1;
            config.dotlock.tries = 1;
        }
    }
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let options = Options::from_clap(&match Options::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    let config_path =
        options.config.clone().or_else(LockConfig::find_system_file);
    let mut config = match config_path {
        None => LockConfig::default(),
        Some(ref path) => match LockConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Error in config file at '{}': {}",
                    path.display(),
                    e
                );
                EX_CONFIG.exit()
            }
        },
    };
    options.apply_to(&mut config);

    init_logging(config_path.as_ref().and_then(|p| p.parent()));

    // Caught from before the lock exists, so no signal can slip in between
    let signals = match interrupt::catch_signals() {
        Ok(signals) => signals,
        Err(e) => {
            error!("Unable to catch signals: {}", e);
            EX_OSERR.exit()
        }
    };

    let file = match fs::OpenOptions::new()
        .read(true)
        .write(!options.shared)
        .open(&options.mailbox)
    {
        Ok(file) => file,
        Err(e) => {
            if !config.quiet {
                error!("{}: {}", options.mailbox.display(), e);
            }
            EX_NOINPUT.exit()
        }
    };

    let lock = match dotlock(
        &options.mailbox,
        &file,
        options.file_lock_mode(),
        &config,
    ) {
        Ok(lock) => lock,
        Err(e) => {
            // Lock failures have already been reported
            if !config.quiet
                && !matches!(e, Error::Dotlock(..) | Error::FileLockBusy)
            {
                error!("{}: {}", options.mailbox.display(), e);
            }
            exit_status(&e).exit()
        }
    };

    let lock: SharedLock = Arc::new(Mutex::new(Some(lock)));
    if let Err(e) = interrupt::release_on_signal(signals, Arc::clone(&lock)) {
        error!("Unable to start signal handler: {}", e);
        interrupt::release(&lock);
        EX_OSERR.exit();
    }

    let status = hold::hold(&options.command);

    interrupt::release(&lock);
    drop(file);

    status.exit()
}

fn exit_status(e: &Error) -> Sysexit {
    match *e {
        Error::FileLockBusy => EX_TEMPFAIL,
        Error::Dotlock(kind) => match kind {
            FailureKind::AlreadyExists => EX_TEMPFAIL,
            FailureKind::CantChdir
            | FailureKind::NoPermission
            | FailureKind::PrivFailed => EX_NOPERM,
            FailureKind::NameTooLong | FailureKind::ReadOnlyFs => {
                EX_CANTCREAT
            }
            FailureKind::NoExec | FailureKind::Fishy => EX_UNAVAILABLE,
            FailureKind::Dunno => EX_SOFTWARE,
        },
        Error::UnsafeName => EX_USAGE,
        Error::Io(_) | Error::Nix(_) => EX_OSERR,
        Error::Config(_) => EX_CONFIG,
    }
}

fn init_logging(config_dir: Option<&Path>) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
        return;
    }

    let log_config_file = config_dir.map(|dir| dir.join("logging.toml"));
    if let Some(log_config_file) = log_config_file.filter(|f| f.is_file()) {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            eprintln!("{}: {}", log_config_file.display(), e);
            EX_CONFIG.exit();
        }
        return;
    }

    let formatter = syslog::Formatter3164 {
        facility: syslog::Facility::LOG_MAIL,
        hostname: None,
        process: env!("CARGO_PKG_NAME").to_owned(),
        pid: nix::unistd::getpid().as_raw(),
    };

    // Without syslog there is nowhere left to log to; carry on silently
    if let Ok(logger) = syslog::unix(formatter) {
        let _ = log::set_boxed_logger(Box::new(syslog::BasicLogger::new(
            logger,
        )))
        .map(|_| log::set_max_level(log::LevelFilter::Info));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        Options::from_iter_safe(
            std::iter::once("s-nail-lock").chain(args.iter().copied()),
        )
        .unwrap()
    }

    #[test]
    fn parse_defaults() {
        let options = parse(&["/var/mail/alice"]);
        assert_eq!(PathBuf::from("/var/mail/alice"), options.mailbox);
        assert!(options.command.is_empty());
        assert_eq!(FileLockMode::EXCLUSIVE, options.file_lock_mode());

        let mut config = LockConfig::default();
        options.apply_to(&mut config);
        assert!(!config.quiet);
        assert_eq!(10, config.file_lock.tries);
    }

    #[test]
    fn parse_command_with_its_own_flags() {
        let options = parse(&[
            "-s", "--flock", "-q", "mbox", "grep", "-q", "--count", "From",
        ]);
        assert!(options.shared);
        assert!(options.quiet);
        assert!(!options.verbose);
        assert_eq!(PathBuf::from("mbox"), options.mailbox);
        assert_eq!(
            vec!["grep", "-q", "--count", "From"],
            options
                .command
                .iter()
                .map(|s| s.to_str().unwrap())
                .collect::<Vec<_>>()
        );
        assert_eq!(FileLockMode::FLOCK, options.file_lock_mode());
    }

    #[test]
    fn no_retry_limits_attempts() {
        let options = parse(&["--no-retry", "-v", "mbox"]);
        let mut config = LockConfig::default();
        options.apply_to(&mut config);
        assert!(config.verbose);
        assert_eq!(1, config.file_lock.tries);
        assert_eq!(1, config.dotlock.tries);
        // Only concerns contention on the unique name
        assert_eq!(5, config.dotlock_excl.tries);
    }

    #[test]
    fn missing_mailbox_is_usage_error() {
        assert!(Options::from_iter_safe(&["s-nail-lock", "-s"]).is_err());
    }

    #[test]
    fn exit_statuses() {
        assert_eq!(EX_TEMPFAIL, exit_status(&Error::FileLockBusy));
        assert_eq!(
            EX_TEMPFAIL,
            exit_status(&Error::Dotlock(FailureKind::AlreadyExists))
        );
        assert_eq!(
            EX_NOPERM,
            exit_status(&Error::Dotlock(FailureKind::PrivFailed))
        );
        assert_eq!(
            EX_UNAVAILABLE,
            exit_status(&Error::Dotlock(FailureKind::Fishy))
        );
        assert_eq!(EX_USAGE, exit_status(&Error::UnsafeName));
        assert_eq!(
            EX_OSERR,
            exit_status(&Error::Nix(nix::errno::Errno::EMFILE))
        );
    }
}
