//! A uniquely named scratch directory, removed on drop.
//!
//! Grounded on `original_source/src/resources.hpp`'s `Directory`, realized
//! with `tempfile` rather than hand-rolled `mkdtemp` calls, matching
//! `ssahani-guestkit`'s use of `tempfile` throughout its disk-image tooling.

use std::io;
use std::path::Path;

use tempfile::TempDir;

/// A temporary directory under the system temp path. Removed recursively on
/// drop; the removal error (if any) is logged, never propagated — matching
/// `spec.md` §7's "all destructors are infallible from the caller's
/// perspective".
#[derive(Debug)]
pub struct Directory {
    inner: TempDir,
}

impl Directory {
    pub fn create(prefix: &str) -> io::Result<Self> {
        let inner = tempfile::Builder::new().prefix(prefix).tempdir()?;
        log::debug!("created scratch directory {}", inner.path().display());
        Ok(Directory { inner })
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }
}

impl Drop for Directory {
    fn drop(&mut self) {
        log::debug!("removing scratch directory {}", self.inner.path().display());
        // TempDir's own Drop already removes the directory and logs nothing;
        // this impl exists purely for the debug trace above.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_removes_directory() {
        let dir = Directory::create("virtmedia-test-").unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.exists());
        drop(dir);
        assert!(!path.exists());
    }
}
