//! Profile names and the on-disk profile store.
//!
//! Profiles are stored one file per profile as `<store>/<name>.json`. The
//! store keeps no in-memory cache: every call goes back to disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::str::FromStr;

use crate::error::{Error, IoContext, Result};
use crate::fs_utils::{OWNER_ONLY, atomic_write, read_optional};
use crate::paths::Paths;
use crate::pointer::CurrentPointer;

/// Names that collide with files or directories the store keeps for itself
pub const RESERVED_NAMES: &[&str] = &["templates", "backups", "current", "config", "empty-mode"];

pub const MAX_NAME_LEN: usize = 64;

/// A validated profile name: `[A-Za-z0-9_-]+`, at most 64 chars, not reserved
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProfileName(String);

impl ProfileName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_profile_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Validate profile name
///
/// Only allows alphanumeric characters, underscores, and hyphens, so a name
/// can never traverse out of the store directory.
pub fn validate_profile_name(name: &str) -> Result<()> {
    let invalid = |reason| {
        Err(Error::InvalidName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("name cannot be empty");
    }

    if name.chars().count() > MAX_NAME_LEN {
        return invalid("name cannot be longer than 64 characters");
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return invalid("only alphanumeric characters, hyphens (-) and underscores (_) are allowed");
    }

    if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return invalid("name is reserved for internal use");
    }

    Ok(())
}

impl TryFrom<String> for ProfileName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ProfileName> for String {
    fn from(name: ProfileName) -> Self {
        name.0
    }
}

impl FromStr for ProfileName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for ProfileName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ProfileName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Listing entry for a stored profile
#[derive(Debug, Clone)]
pub struct ProfileInfo {
    pub name: ProfileName,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// A profile with its raw content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: ProfileName,
    /// Byte-exact JSON document, applied verbatim to the active config
    pub content: Vec<u8>,
    pub modified: DateTime<Utc>,
}

impl Profile {
    pub fn json(&self) -> Result<serde_json::Value> {
        serde_json::from_slice(&self.content)
            .map_err(|e| Error::invalid_content(format!("{}.json", self.name), e))
    }
}

/// Reads and writes individual profile files
#[derive(Debug, Clone)]
pub struct ProfileStore {
    paths: Paths,
}

impl ProfileStore {
    pub fn new(paths: &Paths) -> Self {
        Self {
            paths: paths.clone(),
        }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// List available profiles, sorted by name; a missing store is empty
    pub fn list(&self) -> Result<Vec<ProfileInfo>> {
        let dir = &self.paths.store_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(dir, e)),
        };

        let mut profiles = Vec::new();
        for entry in entries {
            let entry = entry.at(dir)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| ProfileName::new(s).ok())
            else {
                continue;
            };
            let metadata = entry.metadata().at(&path)?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().at(&path)?;
            profiles.push(ProfileInfo {
                name,
                size: metadata.len(),
                modified: modified.into(),
            });
        }
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    /// Names of all stored profiles
    pub fn names(&self) -> Result<Vec<ProfileName>> {
        Ok(self.list()?.into_iter().map(|p| p.name).collect())
    }

    /// Whether `<store>/<name>.json` is present
    pub fn exists(&self, name: &ProfileName) -> bool {
        self.paths.profile_file(name.as_str()).is_file()
    }

    pub fn read(&self, name: &ProfileName) -> Result<Profile> {
        let path = self.paths.profile_file(name.as_str());
        let content =
            read_optional(&path)?.ok_or_else(|| Error::NotFound(name.to_string()))?;
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .at(&path)?
            .into();
        Ok(Profile {
            name: name.clone(),
            content,
            modified,
        })
    }

    /// Create or overwrite a profile
    ///
    /// Content must be a JSON document. The file is written owner-only through
    /// a temp file and rename, so no reader ever sees a partial profile.
    pub fn write(&self, name: &ProfileName, content: &[u8]) -> Result<()> {
        let path = self.paths.profile_file(name.as_str());
        validate_json(&path, content)?;
        self.paths.ensure_dirs()?;
        atomic_write(&path, content, OWNER_ONLY)?;
        tracing::debug!(profile = %name, bytes = content.len(), "profile written");
        Ok(())
    }

    /// Write a new profile, refusing to clobber an existing one
    pub fn create(&self, name: &ProfileName, content: &[u8]) -> Result<()> {
        if self.exists(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        self.write(name, content)
    }

    /// Remove a profile; the active profile cannot be removed
    pub fn remove(&self, name: &ProfileName) -> Result<()> {
        if !self.exists(name) {
            return Err(Error::NotFound(name.to_string()));
        }

        let mut pointer = CurrentPointer::read(&self.paths.pointer_file)?;
        if pointer.current.as_ref() == Some(name) {
            return Err(Error::InUse(name.to_string()));
        }

        let path = self.paths.profile_file(name.as_str());
        fs::remove_file(&path).at(&path)?;

        if pointer.previous.as_ref() == Some(name) {
            pointer.previous = None;
            pointer.write(&self.paths.pointer_file)?;
        }
        tracing::debug!(profile = %name, "profile removed");
        Ok(())
    }

    /// Rename a profile, carrying the current/previous pointer along with it
    pub fn rename(&self, old_name: &ProfileName, new_name: &ProfileName) -> Result<()> {
        if !self.exists(old_name) {
            return Err(Error::NotFound(old_name.to_string()));
        }
        if self.exists(new_name) {
            return Err(Error::AlreadyExists(new_name.to_string()));
        }

        let old_path = self.paths.profile_file(old_name.as_str());
        let new_path = self.paths.profile_file(new_name.as_str());
        fs::rename(&old_path, &new_path).at(&new_path)?;

        let mut pointer = CurrentPointer::read(&self.paths.pointer_file)?;
        if pointer.rename(old_name, new_name) {
            pointer.write(&self.paths.pointer_file)?;
        }
        Ok(())
    }

    /// Copy a profile under a new name
    pub fn copy(&self, src: &ProfileName, dst: &ProfileName) -> Result<()> {
        let profile = self.read(src)?;
        if self.exists(dst) {
            return Err(Error::AlreadyExists(dst.to_string()));
        }
        self.write(dst, &profile.content)
    }
}

/// Reject content that is not a JSON document
pub fn validate_json(path: &std::path::Path, content: &[u8]) -> Result<()> {
    serde_json::from_slice::<serde_json::Value>(content)
        .map(|_| ())
        .map_err(|e| Error::invalid_content(path, e))
}
