use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, IoContext, Result};
use crate::fs_utils::{OWNER_ONLY, atomic_write};
use crate::profiles::ProfileName;

/// Which profile is active, stored in ~/.ccswap/current.json
///
/// If `current` is set, a profile with that name exists. `previous` is the
/// last *distinct* profile that was active and backs `use --previous`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CurrentPointer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<ProfileName>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<ProfileName>,

    /// When the pointer was last updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CurrentPointer {
    /// Read the pointer, returning default if the file doesn't exist
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).at(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&content).map_err(|e| Error::invalid_content(path, e))
    }

    /// Write the pointer atomically: temp file, then rename
    pub fn write(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self).map_err(|e| Error::invalid_content(path, e))?;
        atomic_write(path, &content, OWNER_ONLY)
    }

    /// Record that `name` became active
    pub fn advance(&mut self, name: &ProfileName) {
        if self.current.as_ref() != Some(name) {
            if let Some(prior) = self.current.take() {
                self.previous = Some(prior);
            }
            self.current = Some(name.clone());
        }
        self.updated_at = Some(Utc::now());
    }

    /// Follow a profile rename; returns true if anything changed
    pub fn rename(&mut self, old_name: &ProfileName, new_name: &ProfileName) -> bool {
        let mut changed = false;
        for slot in [&mut self.current, &mut self.previous] {
            if slot.as_ref() == Some(old_name) {
                *slot = Some(new_name.clone());
                changed = true;
            }
        }
        if changed {
            self.updated_at = Some(Utc::now());
        }
        changed
    }
}
