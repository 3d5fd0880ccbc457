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

//! Miscellaneous functions for working with files and descriptors.

use std::fs;
use std::io::{self, Read};
use std::os::unix::io::{FromRawFd, RawFd};
use std::path::Path;

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

pub trait ReadUninterruptibly: Read {
    fn read_uninterruptibly(&mut self, dst: &mut [u8]) -> io::Result<usize>;
}

impl<R: Read> ReadUninterruptibly for R {
    /// Read bytes into `dst` until `dst` is full or EOF is reached.
    ///
    /// `Interrupted` errors are ignored and retried. Other errors are
    /// propagated.
    fn read_uninterruptibly(
        &mut self,
        mut dst: &mut [u8],
    ) -> io::Result<usize> {
        let mut total = 0;
        while !dst.is_empty() {
            match self.read(dst) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    dst = &mut dst[n..];
                }
                Err(e) if io::ErrorKind::Interrupted == e.kind() => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(total)
    }
}

/// Open the directory `path` relative to the directory descriptor `dir`.
///
/// Absolute paths ignore `dir`, as with any `*at` call.
pub fn open_dir_at(dir: RawFd, path: &Path) -> nix::Result<fs::File> {
    let fd = nix::fcntl::openat(
        dir,
        path,
        OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
        Mode::empty(),
    )?;
    // Safety: the descriptor was just opened and is owned by nothing else
    Ok(unsafe { fs::File::from_raw_fd(fd) })
}

/// Create a pipe whose ends are both close-on-exec, returning the (read,
/// write) ends.
pub fn cloexec_pipe() -> nix::Result<(fs::File, fs::File)> {
    let (rd, wr) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;
    // Safety: both descriptors were just created and are owned by nothing else
    Ok(unsafe { (fs::File::from_raw_fd(rd), fs::File::from_raw_fd(wr)) })
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::os::unix::io::AsRawFd;

    use nix::errno::Errno;

    use super::*;

    #[test]
    fn read_until_eof() {
        let (mut rd, mut wr) = cloexec_pipe().unwrap();
        wr.write_all(b"ab").unwrap();
        drop(wr);

        let mut buf = [0u8; 4];
        assert_eq!(2, rd.read_uninterruptibly(&mut buf).unwrap());
        assert_eq!(b"ab", &buf[..2]);
        assert_eq!(0, rd.read_uninterruptibly(&mut buf).unwrap());
    }

    #[test]
    fn pipe_is_cloexec() {
        let (rd, wr) = cloexec_pipe().unwrap();
        for fd in &[rd.as_raw_fd(), wr.as_raw_fd()] {
            let flags =
                nix::fcntl::fcntl(*fd, nix::fcntl::FcntlArg::F_GETFD).unwrap();
            assert_ne!(0, flags & nix::libc::FD_CLOEXEC);
        }
    }

    #[test]
    fn open_relative_dir() {
        let root = tempfile::TempDir::new().unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();
        fs::write(root.path().join("sub/file"), b"").unwrap();

        let top = open_dir_at(nix::libc::AT_FDCWD, root.path()).unwrap();
        let sub = open_dir_at(top.as_raw_fd(), Path::new("sub")).unwrap();
        assert!(nix::sys::stat::fstatat(
            sub.as_raw_fd(),
            "file",
            nix::fcntl::AtFlags::empty()
        )
        .is_ok());

        assert_eq!(
            Err(Errno::ENOTDIR),
            open_dir_at(sub.as_raw_fd(), Path::new("file")).map(|_| ())
        );
    }
}
