//! Typed errors for the ccswap core.
//!
//! Store, switch, empty-mode and archive operations return [`Error`] so the
//! CLI (or any other front end) can match on the failure kind and word its
//! own message. The core never formats user-facing output itself.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used throughout the core modules.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The named profile (or template) does not exist.
    #[error("profile '{0}' does not exist")]
    NotFound(String),

    /// A profile name failed validation.
    #[error("invalid profile name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// The destination name of a create/copy/rename is taken.
    #[error("profile '{0}' already exists")]
    AlreadyExists(String),

    /// Deleting the active profile without asking for delete-current.
    #[error("profile '{0}' is the active profile")]
    InUse(String),

    /// `use --previous` with nothing recorded.
    #[error("no previously active profile recorded")]
    NoPreviousProfile,

    /// Disk-level failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Profile, pointer or config content is not the JSON we expect.
    #[error("invalid content in {path}: {reason}")]
    InvalidContent { path: PathBuf, reason: String },

    /// The archive is encrypted and no password was supplied.
    #[error("archive is encrypted; a password is required")]
    PasswordRequired,

    /// AEAD authentication failed: wrong password or a tampered payload.
    #[error("archive could not be decrypted (wrong password or corrupted data)")]
    DecryptionFailed,

    /// The archive is structurally invalid or of an unknown version.
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// On-disk state disagrees with itself (e.g. orphaned empty-mode marker).
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    /// A template placeholder had no answer.
    #[error("template field '{0}' has no value")]
    MissingTemplateField(String),
}

impl Error {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn invalid_content(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::InvalidContent {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// True for I/O errors worth retrying once more.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Attach a path to a raw `io::Result`, like `anyhow::Context` does for the CLI.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
