//! Owned credential envelope: user + password, zeroed on drop, never logged.
//!
//! Grounded on `original_source/src/utils/impl/file_printer.cpp`'s secret
//! handling philosophy (content is written, never echoed to logs) and on
//! `spec.md` §3's "Mount target" invariant.

use std::fmt;

/// A password that is wiped on drop and whose `Debug`/`Display` never reveal
/// its contents.
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Secret(bytes)
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        for byte in self.0.iter_mut() {
            // SAFETY: plain zeroing; volatile write prevents the optimizer
            // from eliding it as a dead store right before deallocation.
            unsafe { std::ptr::write_volatile(byte, 0) };
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// `user` + `password` pair delivered over the credentials FD (`spec.md` §6).
#[derive(Debug)]
pub struct Credentials {
    pub user: String,
    pub password: Secret,
}

impl Credentials {
    /// Parses the `user\0password\0` wire format the request surface reads
    /// off the caller-supplied credentials FD. Requires exactly two NUL
    /// terminators and nothing past the second one.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let zeros: Vec<usize> = buf
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| (b == 0).then_some(i))
            .collect();

        let [first, second] = zeros[..] else {
            return None;
        };
        if second != buf.len() - 1 {
            return None;
        }

        Some(Credentials {
            user: String::from_utf8_lossy(&buf[..first]).into_owned(),
            password: Secret::new(buf[first + 1..second].to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_pair() {
        let creds = Credentials::parse(b"alice\0hunter2\0").unwrap();
        assert_eq!(creds.user, "alice");
        assert_eq!(creds.password.expose(), b"hunter2");
    }

    #[test]
    fn rejects_missing_second_terminator() {
        assert!(Credentials::parse(b"alice\0hunter2").is_none());
    }

    #[test]
    fn rejects_missing_any_terminator() {
        assert!(Credentials::parse(b"alice").is_none());
    }

    #[test]
    fn rejects_trailing_data_after_second_terminator() {
        assert!(Credentials::parse(b"alice\0hunter2\0garbage").is_none());
    }

    #[test]
    fn rejects_a_third_terminator() {
        assert!(Credentials::parse(b"alice\0hunter2\0\0").is_none());
    }

    #[test]
    fn empty_password_is_well_formed() {
        let creds = Credentials::parse(b"alice\0\0").unwrap();
        assert_eq!(creds.user, "alice");
        assert_eq!(creds.password.expose(), b"");
    }
}
