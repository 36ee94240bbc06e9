//! Profile switching logic.
//!
//! This module implements the core mechanism of `ccswap`: making the active
//! configuration file equal to one profile's content. A switch runs as:
//!
//! 1. read the target profile (fails `NotFound`)
//! 2. copy the current active config verbatim into `backups/`
//! 3. write the profile to a sibling temp file and rename it over the active
//!    config (the single commit point)
//! 4. advance and persist the current pointer
//!
//! A failure in 3 or 4 re-applies the step-2 backup (itself an atomic rename)
//! and leaves the pointer untouched.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, IoContext, Result};
use crate::fs_utils::{atomic_replace, copy_verified, read_optional, remove_if_exists};
use crate::paths::Paths;
use crate::pointer::CurrentPointer;
use crate::profiles::{ProfileName, ProfileStore};

/// Represents the status of the active configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveStatus {
    Missing,
    RegularFile,
    Symlink { target: PathBuf },
    BrokenSymlink { target: PathBuf },
}

impl ActiveStatus {
    pub fn detect(path: &Path) -> Self {
        // symlink_metadata does not follow the link
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let target = fs::read_link(path).unwrap_or_else(|_| PathBuf::from("?"));
                if path.exists() {
                    Self::Symlink { target }
                } else {
                    Self::BrokenSymlink { target }
                }
            }
            Ok(_) => Self::RegularFile,
            Err(_) => Self::Missing,
        }
    }
}

/// Protocol steps a switch passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchStep {
    Backup,
    Commit,
    Pointer,
}

/// A verified copy of the active config taken before a mutation
#[derive(Debug, Clone)]
pub struct ActiveBackup {
    pub path: PathBuf,
    pub checksum: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SwitchOutcome {
    pub profile: ProfileName,
    /// The profile that was active before the switch, if any
    pub previous: Option<ProfileName>,
    pub backup: Option<PathBuf>,
}

/// Performs the active-configuration swap with backup, commit and rollback
#[derive(Debug, Clone)]
pub struct SwitchEngine {
    store: ProfileStore,
    max_backups: usize,
    #[cfg(test)]
    fail_at: Option<SwitchStep>,
}

impl SwitchEngine {
    /// Build an engine using the backup limit from `config.json`
    pub fn new(paths: &Paths) -> Result<Self> {
        let config = Config::read(&paths.config_file)?;
        Ok(Self::with_max_backups(paths, config.max_backups))
    }

    pub fn with_max_backups(paths: &Paths, max_backups: usize) -> Self {
        Self {
            store: ProfileStore::new(paths),
            max_backups: max_backups.max(1),
            #[cfg(test)]
            fail_at: None,
        }
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn paths(&self) -> &Paths {
        self.store.paths()
    }

    /// Make the active config equal to profile `name`
    pub fn switch_to(&self, name: &ProfileName) -> Result<SwitchOutcome> {
        let paths = self.paths();
        if paths.empty_state_file.exists() {
            return Err(Error::InconsistentState(
                "empty mode is active; restore before switching directly".to_string(),
            ));
        }

        let profile = self.store.read(name)?;
        let mut pointer = CurrentPointer::read(&paths.pointer_file)?;
        let previous = pointer.current.clone();

        let backup = self.backup_active()?;

        let result = self
            .commit_active(&profile.content)
            .and_then(|()| {
                pointer.advance(name);
                self.checkpoint(SwitchStep::Pointer)?;
                pointer.write(&paths.pointer_file)
            });

        if let Err(e) = result {
            return Err(self.rollback(backup.as_ref(), e));
        }

        tracing::debug!(profile = %name, previous = ?previous, "switched profile");
        Ok(SwitchOutcome {
            profile: name.clone(),
            previous,
            backup: backup.map(|b| b.path),
        })
    }

    /// Switch back to the previously active profile
    pub fn switch_previous(&self) -> Result<SwitchOutcome> {
        let pointer = CurrentPointer::read(&self.paths().pointer_file)?;
        let previous = pointer.previous.ok_or(Error::NoPreviousProfile)?;
        self.switch_to(&previous)
    }

    /// Re-apply the current profile to the active config
    ///
    /// Returns `None` when no profile is active. The pointer is not changed.
    pub fn refresh(&self) -> Result<Option<ProfileName>> {
        let pointer = CurrentPointer::read(&self.paths().pointer_file)?;
        let Some(name) = pointer.current else {
            return Ok(None);
        };

        let profile = self.store.read(&name)?;
        let active = read_optional(&self.paths().active_config)?;
        if active.as_deref() == Some(profile.content.as_slice()) {
            return Ok(Some(name));
        }

        let backup = self.backup_active()?;
        if let Err(e) = self.commit_active(&profile.content) {
            return Err(self.rollback(backup.as_ref(), e));
        }
        tracing::debug!(profile = %name, "refreshed active config");
        Ok(Some(name))
    }

    /// Step 2: copy the active config (if any) into the backups directory
    pub fn backup_active(&self) -> Result<Option<ActiveBackup>> {
        let paths = self.paths();
        let Some(bytes) = read_optional(&paths.active_config)? else {
            return Ok(None);
        };

        self.checkpoint(SwitchStep::Backup)?;
        paths.ensure_dirs()?;
        let path = paths.backups_dir.join(backup_file_name(paths, &bytes));
        let checksum = copy_verified(&bytes, &path)?;

        if let Err(e) = rotate_backups(paths, self.max_backups) {
            // rotation is housekeeping; the verified backup is what matters
            tracing::warn!(error = %e, "failed to rotate old backups");
        }

        Ok(Some(ActiveBackup {
            path,
            checksum,
            bytes,
        }))
    }

    /// Step 3: atomically replace the active config with `content`
    pub fn commit_active(&self, content: &[u8]) -> Result<()> {
        self.checkpoint(SwitchStep::Commit)?;
        atomic_replace(&self.paths().active_config, content)
    }

    /// Put the active config back the way `backup` found it
    fn rollback(&self, backup: Option<&ActiveBackup>, cause: Error) -> Error {
        let active = &self.paths().active_config;
        tracing::warn!(error = %cause, "switch failed, rolling back active config");

        let restored = match backup {
            Some(b) => atomic_replace(active, &b.bytes),
            None => remove_if_exists(active),
        };

        match restored {
            Ok(()) => cause,
            Err(rollback_err) => Error::InconsistentState(format!(
                "{}; rollback also failed: {}{}",
                cause,
                rollback_err,
                backup
                    .map(|b| format!(" (backup kept at {})", b.path.display()))
                    .unwrap_or_default()
            )),
        }
    }

    #[cfg(test)]
    pub(crate) fn fail_at(mut self, step: SwitchStep) -> Self {
        self.fail_at = Some(step);
        self
    }

    #[cfg(test)]
    fn checkpoint(&self, step: SwitchStep) -> Result<()> {
        if self.fail_at == Some(step) {
            return Err(Error::io(
                &self.paths().active_config,
                std::io::Error::other(format!("injected failure at {:?}", step)),
            ));
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[inline]
    fn checkpoint(&self, _step: SwitchStep) -> Result<()> {
        Ok(())
    }
}

fn backup_prefix(paths: &Paths) -> String {
    paths
        .active_config
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "active".to_string())
}

/// e.g. `settings.json.20240115_103045123.1a2b3c4d.bak`
fn backup_file_name(paths: &Paths, bytes: &[u8]) -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
    let digest = crate::fs_utils::sha256_hex(bytes);
    format!("{}.{}.{}.bak", backup_prefix(paths), timestamp, &digest[..8])
}

/// A file in the backups directory
#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub id: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// List switch backups, most recent first
pub fn list_backups(paths: &Paths) -> Result<Vec<BackupInfo>> {
    let dir = &paths.backups_dir;
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(dir, e)),
    };

    let prefix = backup_prefix(paths);
    let mut backups: Vec<BackupInfo> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let id = e.file_name().to_str()?.to_string();
            if !(id.starts_with(&prefix) && id.ends_with(".bak")) {
                return None;
            }
            let metadata = e.metadata().ok()?;
            Some(BackupInfo {
                id,
                path: e.path(),
                size: metadata.len(),
                modified: metadata.modified().ok()?.into(),
            })
        })
        .collect();

    // timestamps are embedded in the id, so name order is age order
    backups.sort_by(|a, b| b.id.cmp(&a.id));
    Ok(backups)
}

/// Remove all but the newest `keep` backups; returns how many were removed
pub fn rotate_backups(paths: &Paths, keep: usize) -> Result<usize> {
    let backups = list_backups(paths)?;
    let mut removed = 0;
    for old in backups.iter().skip(keep) {
        fs::remove_file(&old.path).at(&old.path)?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{name, setup_test_paths};
    use tempfile::TempDir;

    fn setup(temp_dir: &TempDir) -> (Paths, SwitchEngine) {
        let paths = setup_test_paths(temp_dir);
        let engine = SwitchEngine::with_max_backups(&paths, 10);
        engine.store().write(&name("work"), br#"{"env":"work"}"#).unwrap();
        engine.store().write(&name("home"), br#"{"env":"home"}"#).unwrap();
        (paths, engine)
    }

    #[test]
    fn test_active_status_detect() {
        let temp_dir = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp_dir);

        assert_eq!(ActiveStatus::detect(&paths.active_config), ActiveStatus::Missing);

        fs::create_dir_all(paths.active_config.parent().unwrap()).unwrap();
        fs::write(&paths.active_config, "{}").unwrap();
        assert_eq!(
            ActiveStatus::detect(&paths.active_config),
            ActiveStatus::RegularFile
        );

        #[cfg(unix)]
        {
            fs::remove_file(&paths.active_config).unwrap();
            let target = temp_dir.path().join("gone.json");
            std::os::unix::fs::symlink(&target, &paths.active_config).unwrap();
            assert!(matches!(
                ActiveStatus::detect(&paths.active_config),
                ActiveStatus::BrokenSymlink { .. }
            ));
        }
    }

    #[test]
    fn test_switch_applies_profile_and_pointer() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, engine) = setup(&temp_dir);

        let outcome = engine.switch_to(&name("work")).unwrap();
        assert!(outcome.previous.is_none());
        assert!(outcome.backup.is_none());
        assert_eq!(fs::read(&paths.active_config).unwrap(), br#"{"env":"work"}"#);

        let outcome = engine.switch_to(&name("home")).unwrap();
        assert_eq!(outcome.previous, Some(name("work")));
        assert!(outcome.backup.unwrap().exists());

        let pointer = CurrentPointer::read(&paths.pointer_file).unwrap();
        assert_eq!(pointer.current, Some(name("home")));
        assert_eq!(pointer.previous, Some(name("work")));
    }

    #[test]
    fn test_switch_missing_profile() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, engine) = setup(&temp_dir);
        assert!(matches!(
            engine.switch_to(&name("nonexistent")),
            Err(Error::NotFound(_))
        ));
        assert!(!paths.active_config.exists());
    }

    #[test]
    fn test_switch_previous() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, engine) = setup(&temp_dir);

        assert!(matches!(
            engine.switch_previous(),
            Err(Error::NoPreviousProfile)
        ));

        engine.switch_to(&name("work")).unwrap();
        engine.switch_to(&name("home")).unwrap();
        engine.switch_previous().unwrap();
        assert_eq!(fs::read(&paths.active_config).unwrap(), br#"{"env":"work"}"#);
    }

    #[test]
    fn test_failure_at_every_step_leaves_active_config_unchanged() {
        for step in [SwitchStep::Backup, SwitchStep::Commit, SwitchStep::Pointer] {
            let temp_dir = TempDir::new().unwrap();
            let (paths, engine) = setup(&temp_dir);
            engine.switch_to(&name("work")).unwrap();
            // hand edit so the active config is not just a profile copy
            fs::write(&paths.active_config, b"{\"env\":\"hand-edited\"}").unwrap();
            let before_active = fs::read(&paths.active_config).unwrap();
            let before_pointer = CurrentPointer::read(&paths.pointer_file).unwrap();

            let failing = engine.clone().fail_at(step);
            assert!(failing.switch_to(&name("home")).is_err(), "{:?}", step);

            assert_eq!(fs::read(&paths.active_config).unwrap(), before_active, "{:?}", step);
            assert_eq!(
                CurrentPointer::read(&paths.pointer_file).unwrap(),
                before_pointer,
                "{:?}",
                step
            );
        }
    }

    #[test]
    fn test_failure_without_prior_active_config_removes_it_again() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, engine) = setup(&temp_dir);

        let failing = engine.fail_at(SwitchStep::Pointer);
        assert!(failing.switch_to(&name("work")).is_err());
        assert!(!paths.active_config.exists());
        assert!(CurrentPointer::read(&paths.pointer_file).unwrap().current.is_none());
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, engine) = setup(&temp_dir);

        assert_eq!(engine.refresh().unwrap(), None);

        engine.switch_to(&name("work")).unwrap();
        engine
            .store()
            .write(&name("work"), br#"{"env":"work","v":2}"#)
            .unwrap();

        assert_eq!(engine.refresh().unwrap(), Some(name("work")));
        let once = fs::read(&paths.active_config).unwrap();
        engine.refresh().unwrap();
        let twice = fs::read(&paths.active_config).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, br#"{"env":"work","v":2}"#);
    }

    #[test]
    fn test_refresh_failure_rolls_back() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, engine) = setup(&temp_dir);
        engine.switch_to(&name("work")).unwrap();
        fs::write(&paths.active_config, b"{\"manual\":true}").unwrap();

        let failing = engine.fail_at(SwitchStep::Commit);
        assert!(failing.refresh().is_err());
        assert_eq!(fs::read(&paths.active_config).unwrap(), b"{\"manual\":true}");
    }

    #[test]
    fn test_backups_are_rotated() {
        let temp_dir = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp_dir);
        let engine = SwitchEngine::with_max_backups(&paths, 2);
        engine.store().write(&name("a"), b"{\"n\":1}").unwrap();
        engine.store().write(&name("b"), b"{\"n\":2}").unwrap();

        for _ in 0..3 {
            engine.switch_to(&name("a")).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
            engine.switch_to(&name("b")).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        assert_eq!(list_backups(&paths).unwrap().len(), 2);
        assert_eq!(rotate_backups(&paths, 1).unwrap(), 1);
    }

    #[test]
    fn test_switch_refused_in_empty_mode() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, engine) = setup(&temp_dir);
        fs::write(&paths.empty_state_file, "{}").unwrap();
        assert!(matches!(
            engine.switch_to(&name("work")),
            Err(Error::InconsistentState(_))
        ));
    }
}
