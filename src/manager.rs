//! One entry point composing the store, switch engine, empty mode and archive
//! codec. The CLI and the web front end both drive ccswap through
//! [`ProfileManager`]; neither touches the modules underneath directly.

use std::collections::BTreeMap;
use std::path::Path;

use crate::archive::{Archive, ArchiveCodec, ArchiveEntry};
use crate::config::Config;
use crate::empty::{EmptyModeController, EmptyModeState, Mode, RepairAction, RestoreOutcome};
use crate::error::{Error, IoContext, Result};
use crate::fs_utils::{OWNER_ONLY, atomic_write, read_optional};
use crate::import::{ConflictPolicy, ImportReport, import_entries};
use crate::paths::Paths;
use crate::pointer::CurrentPointer;
use crate::profiles::{ProfileInfo, ProfileName, ProfileStore};
use crate::switch::{ActiveStatus, SwitchEngine, SwitchOutcome};
use crate::template::{fill_template, load_template};

/// Snapshot of where things stand, for `current`/`doctor`
#[derive(Debug, Clone)]
pub struct Status {
    pub mode: Mode,
    pub pointer: CurrentPointer,
    pub active: ActiveStatus,
    /// Whether the active config still equals the current profile's content
    pub in_sync: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// The profile was active, so empty mode was entered before deleting it
    pub entered_empty: bool,
}

#[derive(Debug, Clone)]
pub struct ProfileManager {
    controller: EmptyModeController,
    config: Config,
}

impl ProfileManager {
    /// Open the store described by `paths`, reading `config.json`
    pub fn open(paths: &Paths) -> Result<Self> {
        let config = Config::read(&paths.config_file)?;
        Ok(Self::with_config(paths, config))
    }

    pub fn with_config(paths: &Paths, config: Config) -> Self {
        let engine = SwitchEngine::with_max_backups(paths, config.max_backups);
        Self {
            controller: EmptyModeController::new(engine),
            config,
        }
    }

    pub fn paths(&self) -> &Paths {
        self.controller.engine().paths()
    }

    pub fn store(&self) -> &ProfileStore {
        self.controller.engine().store()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> &EmptyModeController {
        &self.controller
    }

    /// Fix half-finished empty-mode transitions left by an earlier run
    pub fn repair(&self) -> Result<Option<RepairAction>> {
        self.controller.repair()
    }

    pub fn status(&self) -> Result<Status> {
        let paths = self.paths();
        let pointer = CurrentPointer::read(&paths.pointer_file)?;
        let in_sync = match &pointer.current {
            Some(name) if self.store().exists(name) => {
                let profile = self.store().read(name)?;
                let active = read_optional(&paths.active_config)?;
                Some(active.as_deref() == Some(profile.content.as_slice()))
            }
            _ => None,
        };
        Ok(Status {
            mode: self.controller.mode()?,
            active: ActiveStatus::detect(&paths.active_config),
            pointer,
            in_sync,
        })
    }

    pub fn list(&self) -> Result<Vec<ProfileInfo>> {
        self.store().list()
    }

    pub fn create(&self, name: &ProfileName, content: &[u8]) -> Result<()> {
        self.store().create(name, content)
    }

    /// Capture the active config as a new profile
    pub fn create_from_active(&self, name: &ProfileName) -> Result<()> {
        let active = &self.paths().active_config;
        let content = read_optional(active)?.ok_or_else(|| {
            Error::io(active, std::io::Error::from(std::io::ErrorKind::NotFound))
        })?;
        self.store().create(name, &content)
    }

    pub fn create_from_file(&self, name: &ProfileName, source: &Path) -> Result<()> {
        let content = std::fs::read(source).at(source)?;
        self.store().create(name, &content)
    }

    /// Fill template `template` with `answers` and store the result as `name`
    pub fn create_from_template(
        &self,
        name: &ProfileName,
        template: &str,
        answers: &BTreeMap<String, String>,
    ) -> Result<()> {
        let template = load_template(self.paths(), template)?;
        let filled = fill_template(&template, answers)?;
        let content = serde_json::to_vec_pretty(&filled)
            .map_err(|e| Error::invalid_content(self.paths().profile_file(name.as_str()), e))?;
        self.store().create(name, &content)
    }

    /// Replace a profile's content, re-applying it if it is the current one
    pub fn save(&self, name: &ProfileName, content: &[u8]) -> Result<()> {
        if !self.store().exists(name) {
            return Err(Error::NotFound(name.to_string()));
        }
        self.store().write(name, content)?;
        self.refresh_if_current(name)
    }

    fn refresh_if_current(&self, name: &ProfileName) -> Result<()> {
        let pointer = CurrentPointer::read(&self.paths().pointer_file)?;
        if pointer.current.as_ref() == Some(name) {
            self.controller.refresh()?;
        }
        Ok(())
    }

    pub fn use_profile(&self, name: &ProfileName) -> Result<SwitchOutcome> {
        self.controller.switch_to(name)
    }

    pub fn use_previous(&self) -> Result<SwitchOutcome> {
        self.controller.switch_previous()
    }

    pub fn refresh(&self) -> Result<Option<ProfileName>> {
        self.controller.refresh()
    }

    pub fn enter_empty(&self) -> Result<EmptyModeState> {
        self.controller.enter_empty()
    }

    pub fn restore(&self) -> Result<Option<RestoreOutcome>> {
        self.controller.restore()
    }

    /// Delete a profile
    ///
    /// The current profile is only deleted with `delete_current`, in which case
    /// empty mode is entered first so the active config can still be restored.
    pub fn remove(&self, name: &ProfileName, delete_current: bool) -> Result<RemoveOutcome> {
        let pointer = CurrentPointer::read(&self.paths().pointer_file)?;
        let is_current = pointer.current.as_ref() == Some(name);

        if is_current && !delete_current {
            return Err(Error::InUse(name.to_string()));
        }
        if is_current && !self.store().exists(name) {
            return Err(Error::NotFound(name.to_string()));
        }
        if is_current {
            self.controller.enter_empty()?;
        }
        self.store().remove(name)?;
        Ok(RemoveOutcome {
            entered_empty: is_current,
        })
    }

    pub fn rename(&self, old_name: &ProfileName, new_name: &ProfileName) -> Result<()> {
        self.store().rename(old_name, new_name)?;
        self.controller.rename_prior(old_name, new_name)
    }

    pub fn copy(&self, src: &ProfileName, dst: &ProfileName) -> Result<()> {
        self.store().copy(src, dst)
    }

    fn codec(&self) -> ArchiveCodec {
        ArchiveCodec::new(self.config.kdf)
    }

    /// Encode the named profiles (all of them when `names` is empty)
    pub fn export(&self, names: &[ProfileName], password: Option<&str>) -> Result<Vec<u8>> {
        let names = if names.is_empty() {
            self.store().names()?
        } else {
            names.to_vec()
        };
        let entries = names
            .iter()
            .map(|n| self.store().read(n).map(ArchiveEntry::from))
            .collect::<Result<Vec<_>>>()?;
        self.codec().export(&entries, password)
    }

    /// Export to a file; returns the number of profiles written
    pub fn export_to(
        &self,
        path: &Path,
        names: &[ProfileName],
        password: Option<&str>,
    ) -> Result<usize> {
        let count = if names.is_empty() {
            self.store().names()?.len()
        } else {
            names.len()
        };
        let bytes = self.export(names, password)?;
        atomic_write(path, &bytes, OWNER_ONLY)?;
        Ok(count)
    }

    pub fn decode(&self, bytes: &[u8], password: Option<&str>) -> Result<Archive> {
        self.codec().import(bytes, password)
    }

    /// Decode an archive and reconcile it into the store
    ///
    /// If the current profile is overwritten, the active config is refreshed.
    /// A failed refresh is recorded in the report rather than returned, so
    /// the written and failed sets are never lost.
    pub fn import(
        &self,
        bytes: &[u8],
        password: Option<&str>,
        policy: ConflictPolicy,
        dry_run: bool,
    ) -> Result<ImportReport> {
        let archive = self.decode(bytes, password)?;
        let mut report = import_entries(self.store(), archive.entries, policy, dry_run)?;

        let refreshed = CurrentPointer::read(&self.paths().pointer_file).and_then(|pointer| {
            match pointer.current {
                Some(current) if report.written.contains(&current) => {
                    self.controller.refresh().map(drop)
                }
                _ => Ok(()),
            }
        });
        if let Err(e) = refreshed {
            tracing::warn!(error = %e, "refresh after import failed");
            report.refresh_error = Some(e);
        }
        Ok(report)
    }
}
