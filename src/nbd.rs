//! Handle onto a kernel `/dev/nbdN` device.
//!
//! Grounded on `TomCrypto-vblk/src/nbd.rs`'s ioctl wrapper macro; trimmed to
//! the two ioctls the lifecycle controller actually needs (`NBD_DISCONNECT`,
//! `NBD_CLEAR_SOCK`) since this crate never speaks the NBD wire protocol
//! itself (see `spec.md` §1 and §4.1). The teacher's `Request`/`Reply` wire
//! structs and the server-side ioctls (`set_sock`, `do_it`, ...) have no
//! counterpart here: `nbd-client`/`nbdkit` own the protocol.

use std::fmt;
use std::fs::OpenOptions;

use nix::{errno::Errno, libc::ioctl, request_code_none};

use crate::error::MediaError;

macro_rules! nbd_ioctl {
    ($name:ident, $code:literal) => {
        unsafe fn $name(fd: std::os::unix::io::RawFd) -> nix::Result<()> {
            Errno::result(ioctl(fd, request_code_none!(0xab, $code))).map(drop)
        }
    };
}

nbd_ioctl!(nbd_disconnect, 8);
nbd_ioctl!(nbd_clear_sock, 4);

const VALID_COUNT: u8 = 16;

/// A validated `nbd0`..`nbd15` device identifier.
///
/// Constructing one from any other string yields [`NbdDevice::Invalid`];
/// `is_ready` and `disconnect` on an invalid handle always fail, matching
/// `spec.md` §8 property 3.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NbdDevice {
    Valid { name: String, index: u8 },
    Invalid,
}

impl NbdDevice {
    pub fn parse(name: &str) -> Self {
        if let Some(suffix) = name.strip_prefix("nbd") {
            if let Ok(index) = suffix.parse::<u8>() {
                if index < VALID_COUNT {
                    return NbdDevice::Valid {
                        name: name.to_string(),
                        index,
                    };
                }
            }
        }
        NbdDevice::Invalid
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, NbdDevice::Valid { .. })
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            NbdDevice::Valid { name, .. } => Some(name),
            NbdDevice::Invalid => None,
        }
    }

    pub fn device_path(&self) -> Option<String> {
        self.name().map(|n| format!("/dev/{n}"))
    }

    pub fn sysfs_size_path(&self) -> Option<String> {
        self.name().map(|n| format!("/sys/class/block/{n}/size"))
    }

    pub fn sysfs_uevent_path(&self) -> Option<String> {
        self.name().map(|n| format!("/sys/class/block/{n}/uevent"))
    }

    /// Opens `/dev/<name>` read-only; success means the kernel considers the
    /// device ready to be used.
    pub fn is_ready(&self) -> bool {
        let Some(path) = self.device_path() else {
            return false;
        };
        OpenOptions::new().read(true).open(path).is_ok()
    }

    /// Issues `NBD_DISCONNECT` then `NBD_CLEAR_SOCK`, in that order.
    ///
    /// Returns success as long as the device file opened, even if either
    /// ioctl failed — the kernel retries disconnects on its own.
    pub fn disconnect(&self) -> Result<(), MediaError> {
        let path = self
            .device_path()
            .ok_or_else(|| MediaError::InvalidArgument("not a valid nbd device".into()))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| MediaError::InvalidArgument(format!("open {path}: {e}")))?;

        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        unsafe {
            if let Err(e) = nbd_disconnect(fd) {
                log::warn!("NBD_DISCONNECT on {path} failed (kernel will retry): {e}");
            }
            if let Err(e) = nbd_clear_sock(fd) {
                log::warn!("NBD_CLEAR_SOCK on {path} failed: {e}");
            }
        }
        Ok(())
    }
}

impl fmt::Display for NbdDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(n) => write!(f, "{n}"),
            None => write!(f, "<invalid nbd device>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_range() {
        assert!(NbdDevice::parse("nbd0").is_valid());
        assert!(NbdDevice::parse("nbd15").is_valid());
    }

    #[test]
    fn rejects_out_of_range_and_garbage() {
        assert!(!NbdDevice::parse("nbd16").is_valid());
        assert!(!NbdDevice::parse("nbd").is_valid());
        assert!(!NbdDevice::parse("sda0").is_valid());
        assert!(!NbdDevice::parse("nbd-1").is_valid());
    }

    #[test]
    fn invalid_handle_is_never_ready_and_cannot_disconnect() {
        let dev = NbdDevice::parse("not-a-device");
        assert!(!dev.is_ready());
        assert!(dev.disconnect().is_err());
    }
}
