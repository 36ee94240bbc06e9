//! Empty mode: temporarily run the host tool with no active configuration.
//!
//! Entering empty mode captures the active config into `empty-mode.bak`,
//! records an [`EmptyModeState`] marker, and only then removes the active
//! config. Restoring reverses that. The on-disk invariant is:
//!
//! marker present ⇒ active config absent and `empty-mode.bak` holds a
//! byte-exact, checksum-verified copy of what it contained.
//!
//! [`EmptyModeController::repair`] runs before mutating commands and cleans up
//! after an entry or restore that was interrupted half way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, IoContext, Result};
use crate::fs_utils::{
    OWNER_ONLY, atomic_replace, atomic_write, copy_verified, read_optional, remove_if_exists,
    sha256_hex,
};
use crate::paths::Paths;
use crate::pointer::CurrentPointer;
use crate::profiles::ProfileName;
use crate::switch::{SwitchEngine, SwitchOutcome};

/// Marker persisted in `empty-mode.json` while empty mode is active
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmptyModeState {
    pub active: bool,
    /// Whether an active config existed when empty mode was entered
    pub had_active_config: bool,
    /// Size and SHA-256 of `empty-mode.bak`
    pub saved_size: u64,
    pub saved_checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_current: Option<ProfileName>,
    pub entered_at: DateTime<Utc>,
}

impl EmptyModeState {
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let Some(bytes) = read_optional(path)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::InconsistentState(format!("unreadable empty-mode marker: {}", e)))
    }

    fn write(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self).map_err(|e| Error::invalid_content(path, e))?;
        atomic_write(path, &content, OWNER_ONLY)
    }

    /// Check `bytes` against the recorded size and checksum
    fn matches(&self, bytes: &[u8]) -> bool {
        bytes.len() as u64 == self.saved_size && sha256_hex(bytes) == self.saved_checksum
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Normal,
    Empty(EmptyModeState),
}

/// What [`EmptyModeController::repair`] had to fix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    /// A backup file was left behind without a marker
    RemovedOrphanBackup,
    /// Marker present while the active config still exists
    AbortedPartialEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// The profile that was current when empty mode was entered
    pub prior: Option<ProfileName>,
    /// The profile the pointer now names (None if `prior` was deleted meanwhile)
    pub current: Option<ProfileName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyStep {
    Capture,
    Marker,
    Remove,
    Pointer,
}

/// Normal/Empty state machine layered on the switch engine
#[derive(Debug, Clone)]
pub struct EmptyModeController {
    engine: SwitchEngine,
    #[cfg(test)]
    fail_at: Option<EmptyStep>,
}

impl EmptyModeController {
    pub fn new(engine: SwitchEngine) -> Self {
        Self {
            engine,
            #[cfg(test)]
            fail_at: None,
        }
    }

    pub fn engine(&self) -> &SwitchEngine {
        &self.engine
    }

    fn paths(&self) -> &Paths {
        self.engine.paths()
    }

    pub fn mode(&self) -> Result<Mode> {
        Ok(match EmptyModeState::read(&self.paths().empty_state_file)? {
            Some(state) => Mode::Empty(state),
            None => Mode::Normal,
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(matches!(self.mode()?, Mode::Empty(_)))
    }

    /// Normal → Empty
    ///
    /// Already being empty is not an error; the existing state is returned.
    pub fn enter_empty(&self) -> Result<EmptyModeState> {
        if let Mode::Empty(state) = self.mode()? {
            return Ok(state);
        }

        let paths = self.paths();
        paths.ensure_dirs()?;
        let saved = read_optional(&paths.active_config)?;
        let had_active_config = saved.is_some();
        let saved = saved.unwrap_or_default();
        let mut pointer = CurrentPointer::read(&paths.pointer_file)?;

        // capture: verified byte-exact copy before anything is removed
        let checksum = self
            .checkpoint(EmptyStep::Capture)
            .and_then(|()| copy_verified(&saved, &paths.empty_backup_file));
        let checksum = match checksum {
            Ok(c) => c,
            Err(e) => {
                let _ = remove_if_exists(&paths.empty_backup_file);
                return Err(e);
            }
        };

        let state = EmptyModeState {
            active: true,
            had_active_config,
            saved_size: saved.len() as u64,
            saved_checksum: checksum,
            prior_current: pointer.current.clone(),
            entered_at: Utc::now(),
        };

        let result = self
            .checkpoint(EmptyStep::Marker)
            .and_then(|()| state.write(&paths.empty_state_file))
            .and_then(|()| self.checkpoint(EmptyStep::Remove))
            .and_then(|()| remove_if_exists(&paths.active_config))
            .and_then(|()| {
                self.checkpoint(EmptyStep::Pointer)?;
                pointer.current = None;
                pointer.updated_at = Some(Utc::now());
                pointer.write(&paths.pointer_file)
            });

        if let Err(e) = result {
            tracing::warn!(error = %e, "entering empty mode failed, rolling back");
            return Err(self.abort_entry(&state, &saved, e));
        }

        tracing::debug!(prior = ?state.prior_current, "entered empty mode");
        Ok(state)
    }

    /// Undo a failed entry: active config back, marker and backup gone
    fn abort_entry(&self, state: &EmptyModeState, saved: &[u8], cause: Error) -> Error {
        let paths = self.paths();
        let mut rollback = Ok(());
        if state.had_active_config && !paths.active_config.exists() {
            rollback = atomic_write(&paths.active_config, saved, OWNER_ONLY);
        }
        // the marker must never outlive its backup, so it goes first
        let rollback = rollback
            .and_then(|()| remove_if_exists(&paths.empty_state_file))
            .and_then(|()| remove_if_exists(&paths.empty_backup_file));

        match rollback {
            Ok(()) => cause,
            Err(r) => Error::InconsistentState(format!("{}; rollback also failed: {}", cause, r)),
        }
    }

    /// Empty → Normal
    ///
    /// Returns `None` if empty mode was not active.
    pub fn restore(&self) -> Result<Option<RestoreOutcome>> {
        let paths = self.paths();
        let Some(state) = EmptyModeState::read(&paths.empty_state_file)? else {
            return Ok(None);
        };

        let saved = read_optional(&paths.empty_backup_file)?.unwrap_or_default();
        if !state.matches(&saved) {
            return Err(Error::InconsistentState(format!(
                "empty-mode backup {} does not match its recorded checksum",
                paths.empty_backup_file.display()
            )));
        }

        if state.had_active_config {
            atomic_replace(&paths.active_config, &saved)?;
        }

        let current = state
            .prior_current
            .clone()
            .filter(|name| self.engine.store().exists(name));

        let result = CurrentPointer::read(&paths.pointer_file).and_then(|mut pointer| {
            pointer.current = current.clone();
            pointer.updated_at = Some(Utc::now());
            pointer.write(&paths.pointer_file)
        });
        if let Err(e) = result {
            // keep the invariant: marker present ⇒ active config absent
            if state.had_active_config {
                let _ = remove_if_exists(&paths.active_config);
            }
            return Err(e);
        }

        remove_if_exists(&paths.empty_state_file)?;
        remove_if_exists(&paths.empty_backup_file)?;

        tracing::debug!(current = ?current, "restored from empty mode");
        Ok(Some(RestoreOutcome {
            prior: state.prior_current,
            current,
        }))
    }

    /// Switch to `name`, leaving empty mode first if necessary
    pub fn switch_to(&self, name: &ProfileName) -> Result<SwitchOutcome> {
        if !self.engine.store().exists(name) {
            return Err(Error::NotFound(name.to_string()));
        }
        self.restore()?;
        self.engine.switch_to(name)
    }

    /// Switch to the previous profile, leaving empty mode first if necessary
    pub fn switch_previous(&self) -> Result<SwitchOutcome> {
        let pointer = CurrentPointer::read(&self.paths().pointer_file)?;
        let previous = pointer.previous.ok_or(Error::NoPreviousProfile)?;
        self.switch_to(&previous)
    }

    /// Re-apply the current profile; in empty mode there is nothing to apply
    pub fn refresh(&self) -> Result<Option<ProfileName>> {
        if self.is_empty()? {
            return Ok(None);
        }
        self.engine.refresh()
    }

    /// Keep the saved prior profile name in step with a rename
    pub fn rename_prior(&self, old_name: &ProfileName, new_name: &ProfileName) -> Result<()> {
        let path = &self.paths().empty_state_file;
        if let Some(mut state) = EmptyModeState::read(path)?
            && state.prior_current.as_ref() == Some(old_name)
        {
            state.prior_current = Some(new_name.clone());
            state.write(path)?;
        }
        Ok(())
    }

    /// What [`repair`](Self::repair) would do, without changing anything
    ///
    /// # Errors
    /// `InconsistentState` when empty mode is active but its backup is
    /// missing or corrupt, or when an active config other than the saved
    /// one has appeared. Neither can be fixed without losing data.
    pub fn diagnose(&self) -> Result<Option<RepairAction>> {
        let paths = self.paths();
        let Some(state) = EmptyModeState::read(&paths.empty_state_file)? else {
            return Ok(paths
                .empty_backup_file
                .exists()
                .then_some(RepairAction::RemovedOrphanBackup));
        };
        if let Some(active) = read_optional(&paths.active_config)? {
            // an interrupted entry leaves the captured bytes in place
            if state.had_active_config && state.matches(&active) {
                return Ok(Some(RepairAction::AbortedPartialEntry));
            }
            return Err(Error::InconsistentState(format!(
                "{} was written while empty mode is active; 'restore' puts the saved config back over it",
                paths.active_config.display()
            )));
        }
        match read_optional(&paths.empty_backup_file)? {
            Some(bytes) if state.matches(&bytes) => Ok(None),
            _ => Err(Error::InconsistentState(format!(
                "empty mode is active but its backup {} is missing or corrupt",
                paths.empty_backup_file.display()
            ))),
        }
    }

    /// Detect and fix a half-finished empty-mode transition
    pub fn repair(&self) -> Result<Option<RepairAction>> {
        let paths = self.paths();
        let action = self.diagnose()?;
        match action {
            None => {}
            Some(RepairAction::RemovedOrphanBackup) => {
                tracing::warn!("removing empty-mode backup without a marker");
                remove_if_exists(&paths.empty_backup_file)?;
            }
            Some(RepairAction::AbortedPartialEntry) => {
                tracing::warn!("empty-mode marker found next to an active config, aborting partial entry");
                let prior = EmptyModeState::read(&paths.empty_state_file)?
                    .and_then(|state| state.prior_current);
                remove_if_exists(&paths.empty_state_file)?;
                remove_if_exists(&paths.empty_backup_file)?;

                let mut pointer = CurrentPointer::read(&paths.pointer_file)?;
                if pointer.current.is_none()
                    && let Some(prior) = prior.filter(|name| self.engine.store().exists(name))
                {
                    pointer.current = Some(prior);
                    pointer.write(&paths.pointer_file)?;
                }
            }
        }
        Ok(action)
    }

    #[cfg(test)]
    pub(crate) fn fail_at(mut self, step: EmptyStep) -> Self {
        self.fail_at = Some(step);
        self
    }

    #[cfg(test)]
    fn checkpoint(&self, step: EmptyStep) -> Result<()> {
        if self.fail_at == Some(step) {
            return Err(Error::io(
                &self.paths().empty_state_file,
                std::io::Error::other(format!("injected failure at {:?}", step)),
            ));
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[inline]
    fn checkpoint(&self, _step: EmptyStep) -> Result<()> {
        Ok(())
    }
}

/// Size of the saved config, for display
pub fn saved_size(paths: &Paths) -> Result<Option<u64>> {
    match fs::metadata(&paths.empty_backup_file) {
        Ok(m) => Ok(Some(m.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).at(&paths.empty_backup_file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{name, setup_test_paths};
    use tempfile::TempDir;

    fn setup(temp_dir: &TempDir) -> (Paths, EmptyModeController) {
        let paths = setup_test_paths(temp_dir);
        let engine = SwitchEngine::with_max_backups(&paths, 10);
        engine.store().write(&name("work"), br#"{"env":"work"}"#).unwrap();
        engine.store().write(&name("home"), br#"{"env":"home"}"#).unwrap();
        (paths, EmptyModeController::new(engine))
    }

    #[test]
    fn test_enter_and_restore_is_inverse() {
        for profile in ["work", "home"] {
            let temp_dir = TempDir::new().unwrap();
            let (paths, ctl) = setup(&temp_dir);

            ctl.switch_to(&name(profile)).unwrap();
            let before = fs::read(&paths.active_config).unwrap();

            let state = ctl.enter_empty().unwrap();
            assert!(state.active);
            assert_eq!(state.prior_current, Some(name(profile)));
            assert!(!paths.active_config.exists());
            assert!(ctl.is_empty().unwrap());
            assert!(CurrentPointer::read(&paths.pointer_file).unwrap().current.is_none());

            let outcome = ctl.restore().unwrap().unwrap();
            assert_eq!(outcome.current, Some(name(profile)));
            assert_eq!(fs::read(&paths.active_config).unwrap(), before);
            assert_eq!(
                CurrentPointer::read(&paths.pointer_file).unwrap().current,
                Some(name(profile))
            );
            assert!(!paths.empty_state_file.exists());
            assert!(!paths.empty_backup_file.exists());
        }
    }

    #[test]
    fn test_enter_empty_without_active_config() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, ctl) = setup(&temp_dir);

        let state = ctl.enter_empty().unwrap();
        assert!(!state.had_active_config);
        assert_eq!(state.saved_size, 0);

        ctl.restore().unwrap();
        assert!(!paths.active_config.exists());
    }

    #[test]
    fn test_enter_empty_twice_reports_state() {
        let temp_dir = TempDir::new().unwrap();
        let (_paths, ctl) = setup(&temp_dir);
        ctl.switch_to(&name("work")).unwrap();
        let first = ctl.enter_empty().unwrap();
        let second = ctl.enter_empty().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_restore_when_not_empty() {
        let temp_dir = TempDir::new().unwrap();
        let (_paths, ctl) = setup(&temp_dir);
        assert!(ctl.restore().unwrap().is_none());
    }

    #[test]
    fn test_switch_from_empty_consumes_state() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, ctl) = setup(&temp_dir);
        ctl.switch_to(&name("work")).unwrap();
        ctl.enter_empty().unwrap();

        ctl.switch_to(&name("home")).unwrap();
        assert_eq!(fs::read(&paths.active_config).unwrap(), br#"{"env":"home"}"#);
        assert!(!paths.empty_state_file.exists());
        assert!(!paths.empty_backup_file.exists());

        let pointer = CurrentPointer::read(&paths.pointer_file).unwrap();
        assert_eq!(pointer.current, Some(name("home")));
        assert_eq!(pointer.previous, Some(name("work")));
    }

    #[test]
    fn test_switch_from_empty_to_missing_profile_stays_empty() {
        let temp_dir = TempDir::new().unwrap();
        let (_paths, ctl) = setup(&temp_dir);
        ctl.switch_to(&name("work")).unwrap();
        ctl.enter_empty().unwrap();

        assert!(matches!(
            ctl.switch_to(&name("ghost")),
            Err(Error::NotFound(_))
        ));
        assert!(ctl.is_empty().unwrap());
    }

    #[test]
    fn test_refresh_in_empty_mode_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, ctl) = setup(&temp_dir);
        ctl.switch_to(&name("work")).unwrap();
        ctl.enter_empty().unwrap();
        assert_eq!(ctl.refresh().unwrap(), None);
        assert!(!paths.active_config.exists());
    }

    #[test]
    fn test_failed_entry_rolls_back_at_every_step() {
        for step in [
            EmptyStep::Capture,
            EmptyStep::Marker,
            EmptyStep::Remove,
            EmptyStep::Pointer,
        ] {
            let temp_dir = TempDir::new().unwrap();
            let (paths, ctl) = setup(&temp_dir);
            ctl.switch_to(&name("work")).unwrap();
            let before = fs::read(&paths.active_config).unwrap();

            let failing = ctl.clone().fail_at(step);
            assert!(failing.enter_empty().is_err(), "{:?}", step);

            assert_eq!(fs::read(&paths.active_config).unwrap(), before, "{:?}", step);
            assert!(!paths.empty_state_file.exists(), "{:?}", step);
            assert!(!paths.empty_backup_file.exists(), "{:?}", step);
            assert_eq!(
                CurrentPointer::read(&paths.pointer_file).unwrap().current,
                Some(name("work"))
            );
        }
    }

    #[test]
    fn test_repair_aborts_partial_entry() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, ctl) = setup(&temp_dir);
        ctl.switch_to(&name("work")).unwrap();
        let before = fs::read(&paths.active_config).unwrap();

        // simulate a crash after the marker was written but before removal
        ctl.enter_empty().unwrap();
        fs::write(&paths.active_config, &before).unwrap();

        assert_eq!(ctl.repair().unwrap(), Some(RepairAction::AbortedPartialEntry));
        assert!(!paths.empty_state_file.exists());
        assert!(!paths.empty_backup_file.exists());
        assert_eq!(fs::read(&paths.active_config).unwrap(), before);
        assert_eq!(
            CurrentPointer::read(&paths.pointer_file).unwrap().current,
            Some(name("work"))
        );
        assert_eq!(ctl.repair().unwrap(), None);
    }

    #[test]
    fn test_repair_keeps_backup_when_active_config_reappears() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, ctl) = setup(&temp_dir);
        ctl.switch_to(&name("work")).unwrap();
        ctl.enter_empty().unwrap();
        // the host tool writes a fresh default while empty
        fs::write(&paths.active_config, b"{}").unwrap();

        assert!(matches!(ctl.diagnose(), Err(Error::InconsistentState(_))));
        assert!(matches!(ctl.repair(), Err(Error::InconsistentState(_))));
        assert!(paths.empty_state_file.exists());
        assert!(paths.empty_backup_file.exists());

        let outcome = ctl.restore().unwrap().unwrap();
        assert_eq!(outcome.current, Some(name("work")));
        assert_eq!(fs::read(&paths.active_config).unwrap(), br#"{"env":"work"}"#);
        assert_eq!(ctl.repair().unwrap(), None);
    }

    #[test]
    fn test_repair_removes_orphan_backup() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, ctl) = setup(&temp_dir);
        fs::write(&paths.empty_backup_file, b"{}").unwrap();
        assert_eq!(ctl.diagnose().unwrap(), Some(RepairAction::RemovedOrphanBackup));
        assert!(paths.empty_backup_file.exists());
        assert_eq!(ctl.repair().unwrap(), Some(RepairAction::RemovedOrphanBackup));
        assert!(!paths.empty_backup_file.exists());
    }

    #[test]
    fn test_repair_reports_corrupt_backup() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, ctl) = setup(&temp_dir);
        ctl.switch_to(&name("work")).unwrap();
        ctl.enter_empty().unwrap();
        fs::write(&paths.empty_backup_file, b"tampered").unwrap();

        assert!(matches!(ctl.repair(), Err(Error::InconsistentState(_))));
        assert!(matches!(ctl.restore(), Err(Error::InconsistentState(_))));
        // nothing was thrown away
        assert!(paths.empty_state_file.exists());
    }

    #[test]
    fn test_restore_after_prior_profile_deleted() {
        let temp_dir = TempDir::new().unwrap();
        let (paths, ctl) = setup(&temp_dir);
        ctl.switch_to(&name("work")).unwrap();
        ctl.enter_empty().unwrap();
        ctl.engine().store().remove(&name("work")).unwrap();

        let outcome = ctl.restore().unwrap().unwrap();
        assert_eq!(outcome.prior, Some(name("work")));
        assert_eq!(outcome.current, None);
        assert_eq!(fs::read(&paths.active_config).unwrap(), br#"{"env":"work"}"#);
    }
}
