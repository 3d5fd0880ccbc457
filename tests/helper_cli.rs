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

//! Drives the real `s-nail-dotlock` executable over its two pipes.

use std::ffi::OsString;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

const HELPER: &str = env!("CARGO_BIN_EXE_s-nail-dotlock");

fn args(mailbox: &str, lock_name: &str) -> Vec<OsString> {
    [
        "wdotlock",
        "mailbox",
        mailbox,
        "name",
        lock_name,
        "hostname",
        "test.example.org",
        "randstr",
        "Zq3RkW9bT1xVnY0c",
        "retry",
        "",
    ]
    .iter()
    .map(OsString::from)
    .collect()
}

fn helper(dir: &Path, args: &[OsString]) -> Command {
    let mut cmd = Command::new(HELPER);
    cmd.arg0("s-nail-dotlock")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    cmd
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}

#[test]
fn lock_then_release_on_eof() {
    let dir = tempfile::TempDir::new().unwrap();
    fs::write(dir.path().join("alice"), b"").unwrap();

    let mut child = helper(dir.path(), &args("alice", "alice.lock"))
        .spawn()
        .unwrap();
    let mut stdout = child.stdout.take().unwrap();

    let mut state = [0xFFu8; 1];
    stdout.read_exact(&mut state).unwrap();
    assert_eq!(0, state[0]);

    let md = fs::symlink_metadata(dir.path().join("alice.lock")).unwrap();
    assert!(md.file_type().is_file());
    assert_eq!(1, md.nlink());
    assert_eq!(vec!["alice", "alice.lock"], entries(dir.path()));

    // Closing the pipe is the release signal
    drop(child.stdin.take());
    assert!(child.wait().unwrap().success());
    assert_eq!(vec!["alice"], entries(dir.path()));
}

#[test]
fn release_by_writing() {
    let dir = tempfile::TempDir::new().unwrap();
    fs::write(dir.path().join("bob"), b"").unwrap();

    let mut child =
        helper(dir.path(), &args("bob", "bob.lock")).spawn().unwrap();
    let mut stdout = child.stdout.take().unwrap();
    let mut stdin = child.stdin.take().unwrap();

    let mut state = [0xFFu8; 1];
    stdout.read_exact(&mut state).unwrap();
    assert_eq!(0, state[0]);

    stdin.write_all(b"x").unwrap();
    assert!(child.wait().unwrap().success());
    assert!(!dir.path().join("bob.lock").exists());
}

#[test]
fn existing_lock_reported() {
    let dir = tempfile::TempDir::new().unwrap();
    fs::write(dir.path().join("carol"), b"").unwrap();
    fs::write(dir.path().join("carol.lock"), b"").unwrap();

    let mut child = helper(dir.path(), &args("carol", "carol.lock"))
        .spawn()
        .unwrap();
    let mut stdout = child.stdout.take().unwrap();

    let mut states = Vec::new();
    stdout.read_to_end(&mut states).unwrap();
    // AlreadyExists, not abandoned, and no retry was requested
    assert_eq!(vec![7u8], states);
    assert_eq!(Some(1), child.wait().unwrap().code());
    assert_eq!(vec!["carol", "carol.lock"], entries(dir.path()));
}

#[test]
fn unreadable_mailbox_refused() {
    let dir = tempfile::TempDir::new().unwrap();

    let mut child = helper(dir.path(), &args("nobody", "nobody.lock"))
        .spawn()
        .unwrap();
    let mut stdout = child.stdout.take().unwrap();

    let mut states = Vec::new();
    stdout.read_to_end(&mut states).unwrap();
    // NoPermission | abandon
    assert_eq!(vec![0x84u8], states);
    assert!(!child.wait().unwrap().success());
    assert!(entries(dir.path()).is_empty());
}

#[test]
fn bad_arguments_touch_nothing() {
    let dir = tempfile::TempDir::new().unwrap();
    fs::write(dir.path().join("alice"), b"").unwrap();

    let cases = vec![
        args("alice", "bob.lock"),
        args("../alice", "../alice.lock"),
        args("alice", "alice.lock")[..10].to_vec(),
        {
            let mut a = args("alice", "alice.lock");
            a[3] = "nom".into();
            a
        },
    ];

    for case in cases {
        let status = helper(dir.path(), &case)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .unwrap();
        assert_eq!(Some(64), status.code(), "{:?}", case);
    }

    let status = Command::new(HELPER)
        .args(&args("alice", "alice.lock"))
        .current_dir(dir.path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    // argv[0] is not the program name
    assert_eq!(Some(64), status.code());

    assert_eq!(vec!["alice"], entries(dir.path()));
}

#[test]
fn requires_pipes() {
    let dir = tempfile::TempDir::new().unwrap();
    fs::write(dir.path().join("alice"), b"").unwrap();

    let status = helper(dir.path(), &args("alice", "alice.lock"))
        .stdin(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(Some(64), status.code());
    assert_eq!(vec!["alice"], entries(dir.path()));
}
