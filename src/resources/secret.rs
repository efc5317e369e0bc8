//! Temp credential file for HTTPS activation: mode 0600, zeroed then
//! unlinked on drop.
//!
//! Grounded on `original_source/src/utils/impl/file_printer.cpp` (the
//! original writes content to a file it then tracks for cleanup) and on
//! `ssahani-guestkit`'s `tempfile` usage.

use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;

use tempfile::NamedTempFile;

use crate::resources::credentials::Credentials;

/// A `nbdkit curl` password file: written once at construction, zeroed in
/// place before the temp file is unlinked on drop. Never logged.
#[derive(Debug)]
pub struct SecretFile {
    file: NamedTempFile,
    len: u64,
}

impl SecretFile {
    pub fn write_credentials(credentials: &Credentials) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("virtmedia-secret-")
            .permissions(std::fs::Permissions::from_mode(0o600))
            .tempfile()?;

        file.write_all(credentials.user.as_bytes())?;
        file.write_all(b"\n")?;
        file.write_all(credentials.password.expose())?;
        file.write_all(b"\n")?;
        file.flush()?;
        let len = file.as_file().metadata()?.len();

        log::debug!("wrote secret file {}", file.path().display());
        Ok(SecretFile { file, len })
    }

    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }
}

impl Drop for SecretFile {
    fn drop(&mut self) {
        let zeroes = vec![0u8; self.len as usize];
        if let Err(e) = self
            .file
            .as_file_mut()
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&zeroes))
            .and_then(|_| self.file.flush())
        {
            log::warn!(
                "failed to zero secret file {}: {e}",
                self.file.path().display()
            );
        }
        log::debug!("removing secret file {}", self.file.path().display());
        // NamedTempFile::drop unlinks the path.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::credentials::Secret;

    #[test]
    fn writes_mode_0600_and_zeroes_on_drop() {
        use std::os::unix::fs::PermissionsExt;

        let creds = Credentials {
            user: "alice".into(),
            password: Secret::new(b"hunter2".to_vec()),
        };
        let secret = SecretFile::write_credentials(&creds).unwrap();
        let path = secret.path().to_path_buf();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);

        drop(secret);
        assert!(!path.exists());
    }
}
