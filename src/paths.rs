use anyhow::{Context, Result};
use directories::BaseDirs;
use std::path::PathBuf;

use crate::config::Config;

/// Overrides the store directory (default `~/.ccswap`)
pub const HOME_ENV: &str = "CCSWAP_HOME";
/// Overrides the active configuration file (default `~/.claude/settings.json`)
pub const ACTIVE_CONFIG_ENV: &str = "CCSWAP_ACTIVE_CONFIG";

/// All computed paths used by ccswap
#[derive(Debug, Clone)]
pub struct Paths {
    /// ~/.ccswap (one `<name>.json` per profile lives directly in here)
    pub store_dir: PathBuf,
    /// ~/.ccswap/backups
    pub backups_dir: PathBuf,
    /// ~/.ccswap/templates
    pub templates_dir: PathBuf,
    /// ~/.ccswap/current.json
    pub pointer_file: PathBuf,
    /// ~/.ccswap/empty-mode.json
    pub empty_state_file: PathBuf,
    /// ~/.ccswap/empty-mode.bak
    pub empty_backup_file: PathBuf,
    /// ~/.ccswap/config.json
    pub config_file: PathBuf,
    /// The file the host tool reads, e.g. ~/.claude/settings.json
    pub active_config: PathBuf,
}

impl Paths {
    pub fn new() -> Result<Self> {
        let base_dirs = BaseDirs::new().context("Failed to determine home directory")?;
        let home = base_dirs.home_dir();

        let store_dir = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".ccswap"));
        let default_active = std::env::var_os(ACTIVE_CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".claude").join("settings.json"));

        let mut paths = Self::with_store(store_dir, default_active);

        // config.json may relocate the active config; the env var still wins
        if std::env::var_os(ACTIVE_CONFIG_ENV).is_none() {
            let config = Config::read(&paths.config_file)?;
            if let Some(active) = config.active_config {
                paths.active_config = active;
            }
        }

        Ok(paths)
    }

    /// Lay out a store rooted at `store_dir` managing `active_config`
    pub fn with_store(store_dir: PathBuf, active_config: PathBuf) -> Self {
        Self {
            backups_dir: store_dir.join("backups"),
            templates_dir: store_dir.join("templates"),
            pointer_file: store_dir.join("current.json"),
            empty_state_file: store_dir.join("empty-mode.json"),
            empty_backup_file: store_dir.join("empty-mode.bak"),
            config_file: store_dir.join("config.json"),
            store_dir,
            active_config,
        }
    }

    /// Get the path to a specific profile's file
    pub fn profile_file(&self, name: &str) -> PathBuf {
        self.store_dir.join(format!("{}.json", name))
    }

    /// Get the path to a template file
    pub fn template_file(&self, name: &str) -> PathBuf {
        self.templates_dir.join(format!("{}.json", name))
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> crate::Result<()> {
        crate::fs_utils::create_private_dir(&self.store_dir)?;
        crate::fs_utils::create_private_dir(&self.backups_dir)?;
        Ok(())
    }
}
