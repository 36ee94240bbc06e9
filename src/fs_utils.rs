//! Filesystem utility functions
//!
//! Every write that a reader might observe goes through [`atomic_write`]: the
//! bytes land in a sibling temporary file which is flushed and then renamed
//! over the destination, so readers see either the old or the new content.

use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::error::{Error, IoContext, Result};

/// Permission bits for every file the store creates
pub const OWNER_ONLY: u32 = 0o600;

/// Attempts made by [`copy_verified`] before a transient error surfaces
pub const MAX_COPY_ATTEMPTS: u32 = 3;

/// Create a directory (and parents) readable only by the owner
pub fn create_private_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).at(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700)).at(path)?;
    }
    Ok(())
}

/// Sibling temp path for `path`; unique per process so two runs never share one
pub fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
}

/// Write `bytes` to `path` atomically, creating the file with `mode`
///
/// # Errors
/// Returns `Error::Io` if the temp file cannot be written or renamed. The temp
/// file is removed on failure and `path` is left untouched.
pub fn atomic_write(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).at(parent)?;
    }

    let temp = temp_path_for(path);
    let result = write_temp(&temp, bytes, mode).and_then(|()| fs::rename(&temp, path).at(path));
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// Like [`atomic_write`] but keeps the permission bits of an existing file
pub fn atomic_replace(path: &Path, bytes: &[u8]) -> Result<()> {
    atomic_write(path, bytes, existing_mode(path).unwrap_or(OWNER_ONLY))
}

fn write_temp(temp: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    let mut file = options.open(temp).at(temp)?;

    // The mode passed to open() is filtered through the umask; pin it exactly
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(mode)).at(temp)?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    file.write_all(bytes).at(temp)?;
    file.sync_all().at(temp)
}

#[cfg(unix)]
fn existing_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn existing_mode(_path: &Path) -> Option<u32> {
    None
}

/// Read a file, mapping "does not exist" to `None`
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Hex-encoded SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Atomically write `bytes` to `dst` and read them back to confirm the copy
///
/// Transient I/O errors are retried up to [`MAX_COPY_ATTEMPTS`] times. Returns
/// the checksum of the verified copy.
pub fn copy_verified(bytes: &[u8], dst: &Path) -> Result<String> {
    let expected = sha256_hex(bytes);
    retry_transient(dst, || write_and_verify(bytes, dst, &expected))?;
    Ok(expected)
}

/// Run `op` until it succeeds, fails for good, or runs out of attempts
fn retry_transient(dst: &Path, mut op: impl FnMut() -> Result<()>) -> Result<()> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < MAX_COPY_ATTEMPTS => {
                tracing::debug!(path = %dst.display(), attempt, error = %e, "retrying backup copy");
                thread::sleep(Duration::from_millis(25 * u64::from(attempt)));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn write_and_verify(bytes: &[u8], dst: &Path, expected: &str) -> Result<()> {
    atomic_write(dst, bytes, OWNER_ONLY)?;
    let written = fs::read(dst).at(dst)?;
    if written.len() != bytes.len() || sha256_hex(&written) != expected {
        return Err(Error::io(
            dst,
            io::Error::new(io::ErrorKind::InvalidData, "copy does not match its source"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_and_replaces() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/file.json");

        atomic_write(&path, b"one", OWNER_ONLY).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"one");

        atomic_write(&path, b"two", OWNER_ONLY).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");

        // no temp file left behind
        assert!(!temp_path_for(&path).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("secret.json");

        atomic_write(&path, b"{}", OWNER_ONLY).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_replace_keeps_mode() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        fs::write(&path, b"{}").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        atomic_replace(&path, b"{\"a\":1}").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn test_atomic_write_failure_leaves_target() {
        let temp = TempDir::new().unwrap();
        // a directory in the way makes the rename fail
        let path = temp.path().join("blocked");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("inner"), b"x").unwrap();

        assert!(atomic_write(&path, b"data", OWNER_ONLY).is_err());
        assert!(path.is_dir());
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_read_optional_and_remove() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f");
        assert!(read_optional(&path).unwrap().is_none());
        fs::write(&path, b"abc").unwrap();
        assert_eq!(read_optional(&path).unwrap().unwrap(), b"abc");
        remove_if_exists(&path).unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_copy_verified_returns_checksum() {
        let temp = TempDir::new().unwrap();
        let dst = temp.path().join("backup.bak");
        let sum = copy_verified(b"payload", &dst).unwrap();
        assert_eq!(sum, sha256_hex(b"payload"));
        assert_eq!(fs::read(&dst).unwrap(), b"payload");
    }

    fn flaky(dst: &Path, failures: u32, kind: io::ErrorKind) -> (Result<()>, u32) {
        let mut calls = 0;
        let result = retry_transient(dst, || {
            calls += 1;
            if calls <= failures {
                return Err(Error::io(dst, io::Error::new(kind, "busy")));
            }
            atomic_write(dst, b"payload", OWNER_ONLY)
        });
        (result, calls)
    }

    #[test]
    fn test_transient_error_is_retried() {
        let temp = TempDir::new().unwrap();
        let dst = temp.path().join("backup.bak");

        let (result, calls) = flaky(&dst, 1, io::ErrorKind::Interrupted);
        assert!(result.is_ok());
        assert_eq!(calls, 2);
        assert_eq!(fs::read(&dst).unwrap(), b"payload");
    }

    #[test]
    fn test_persistent_transient_error_surfaces() {
        let temp = TempDir::new().unwrap();
        let dst = temp.path().join("backup.bak");

        let (result, calls) = flaky(&dst, u32::MAX, io::ErrorKind::TimedOut);
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls, MAX_COPY_ATTEMPTS);
        assert!(!dst.exists());
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let temp = TempDir::new().unwrap();
        let dst = temp.path().join("backup.bak");

        let (result, calls) = flaky(&dst, 1, io::ErrorKind::PermissionDenied);
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
