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

/// Determine whether `name` may be used as a single path component.
///
/// The privilege-separated helper only ever operates on names within its
/// current directory, so anything which could walk elsewhere is refused. NUL
/// cannot occur in arguments, but is refused anyway since it would silently
/// truncate the name at the system call boundary.
pub fn is_safe_component(name: &[u8]) -> bool {
    !name.is_empty()
        && name != b"."
        && name != b".."
        && !name.iter().any(|&b| b'/' == b || 0 == b)
}

/// Make a host name usable as part of a file name.
///
/// Path separators become `_` and the result is cut to at most `max` bytes.
/// Host names are not chosen by an attacker in any sane deployment, so this
/// repairs rather than rejects.
pub fn sanitize_host_name(host: &[u8], max: usize) -> Vec<u8> {
    host.iter()
        .take(max)
        .map(|&b| if b'/' == b || 0 == b { b'_' } else { b })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_is_safe_component() {
        assert!(is_safe_component(b"mbox"));
        assert!(is_safe_component(b"mbox.lock"));
        assert!(is_safe_component(b".mbox"));
        assert!(is_safe_component("Entwürfe".as_bytes()));
        assert!(!is_safe_component(b""));
        assert!(!is_safe_component(b"."));
        assert!(!is_safe_component(b".."));
        assert!(!is_safe_component(b"foo/bar"));
        assert!(!is_safe_component(b"/foo"));
        assert!(!is_safe_component(b"foo/"));
        assert!(!is_safe_component(b"foo\0"));
    }

    #[test]
    fn test_sanitize_host_name() {
        assert_eq!(
            b"mail.example".to_vec(),
            sanitize_host_name(b"mail.example", 64)
        );
        assert_eq!(b"a_b_c".to_vec(), sanitize_host_name(b"a/b/c", 64));
        assert_eq!(b"abc".to_vec(), sanitize_host_name(b"abcdef", 3));
        assert!(sanitize_host_name(b"", 64).is_empty());
    }
}
