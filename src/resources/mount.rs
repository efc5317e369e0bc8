//! Scoped SMB backend mount (`spec.md` §4.2's `Mount`, §3's `MountTarget`).
//!
//! Grounded on `original_source/src/resources.hpp`'s `Mount` (a `Directory`
//! plus a mount) and `original_source/src/utils/impl/mounter.cpp` (the raw
//! `mount(2)`/`umount(2)` pair). The SMB/HTTPS backend-selection mechanics
//! themselves are out of scope (`spec.md` §1); only the CIFS case performs
//! an actual kernel mount — HTTPS activation never calls into this module,
//! it only uses [`super::credentials::Credentials`] to materialize a secret
//! file for `nbdkit`'s curl plugin.

use nix::mount::{mount, umount2, MntFlags, MsFlags};

use crate::error::MediaError;
use crate::resources::credentials::Credentials;
use crate::resources::directory::Directory;

/// An SMB/CIFS share mounted into a scoped scratch directory. Unmounted (and
/// the directory removed) on drop; unmount failure is logged, not
/// propagated (`spec.md` §7).
#[derive(Debug)]
pub struct MountBackend {
    directory: Directory,
}

impl MountBackend {
    /// Mounts `unc` (e.g. `//host/share/image.iso`'s containing share) onto
    /// a freshly created scratch directory.
    pub fn mount_cifs(
        unc: &str,
        credentials: &Credentials,
        rw: bool,
    ) -> Result<Self, MediaError> {
        let directory = Directory::create("virtmedia-mnt-")
            .map_err(|e| MediaError::ConnectionRefused(format!("scratch dir: {e}")))?;

        let options = format!(
            "username={},password={},vers=3.0",
            credentials.user,
            String::from_utf8_lossy(credentials.password.expose()),
        );
        let flags = if rw { MsFlags::empty() } else { MsFlags::MS_RDONLY };

        mount(
            Some(unc),
            directory.path(),
            Some("cifs"),
            flags,
            Some(options.as_str()),
        )
        .map_err(|e| MediaError::ConnectionRefused(format!("cifs mount of {unc} failed: {e}")))?;

        log::info!("mounted {unc} on {}", directory.path().display());
        Ok(MountBackend { directory })
    }

    pub fn path(&self) -> &std::path::Path {
        self.directory.path()
    }
}

impl Drop for MountBackend {
    fn drop(&mut self) {
        if let Err(e) = umount2(self.directory.path(), MntFlags::MNT_DETACH) {
            log::warn!(
                "failed to unmount {}: {e} (left detached)",
                self.directory.path().display()
            );
        }
    }
}
