//! Optional user settings stored in `~/.ccswap/config.json`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::archive::KdfParams;
use crate::error::{Error, IoContext, Result};
use crate::import::ConflictPolicy;

/// Default number of switch backups kept in `backups/`
pub const DEFAULT_MAX_BACKUPS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relocates the active configuration file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_config: Option<PathBuf>,

    /// How many switch backups to keep
    pub max_backups: usize,

    /// Policy used by `import` when none is given on the command line
    pub conflict_policy: ConflictPolicy,

    /// Key-derivation cost for encrypted exports
    pub kdf: KdfParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            active_config: None,
            max_backups: DEFAULT_MAX_BACKUPS,
            conflict_policy: ConflictPolicy::default(),
            kdf: KdfParams::default(),
        }
    }
}

impl Config {
    /// Read config from file, returning defaults if it doesn't exist
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).at(path)?;
        serde_json::from_str(&content).map_err(|e| Error::invalid_content(path, e))
    }
}
