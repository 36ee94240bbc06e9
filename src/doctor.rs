//! Diagnostics for `ccswap doctor`.
//!
//! Checks are read-only. Each produces a [`Check`] holding findings at a
//! severity; rendering is separate so the checks can be tested without a
//! terminal. Findings that [`EmptyModeController::repair`] would fix are
//! reported as warnings, since any mutating command fixes them on startup.
//!
//! [`EmptyModeController::repair`]: crate::empty::EmptyModeController::repair

use anstyle::AnsiColor;
use std::fs;

use crate::empty::{Mode, RepairAction};
use crate::manager::ProfileManager;
use crate::pointer::CurrentPointer;
use crate::profiles::{ProfileName, validate_json};
use crate::switch::{ActiveStatus, list_backups};
use crate::ui::{Level, Ui, format_bytes};

#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Level,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Check {
    pub title: &'static str,
    pub findings: Vec<Finding>,
}

impl Check {
    fn new(title: &'static str) -> Self {
        Self {
            title,
            findings: Vec::new(),
        }
    }

    fn push(&mut self, severity: Level, message: impl Into<String>) {
        self.findings.push(Finding {
            severity,
            message: message.into(),
        });
    }

    pub fn worst(&self) -> Level {
        self.findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Level::Ok)
    }
}

/// Run every check against the store
pub fn diagnose(manager: &ProfileManager) -> Vec<Check> {
    vec![
        check_store(manager),
        check_active_config(manager),
        check_pointer(manager),
        check_empty_mode(manager),
        check_profiles(manager),
    ]
}

fn check_store(manager: &ProfileManager) -> Check {
    let paths = manager.paths();
    let mut check = Check::new("Store");

    if !paths.store_dir.is_dir() {
        check.push(
            Level::Warn,
            format!(
                "Store directory missing: {} (created on first write)",
                paths.store_dir.display()
            ),
        );
        return check;
    }
    check.push(
        Level::Ok,
        format!("Store directory: {}", paths.store_dir.display()),
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = fs::metadata(&paths.store_dir)
            && meta.permissions().mode() & 0o077 != 0
        {
            check.push(
                Level::Warn,
                format!(
                    "Store directory is readable by others (mode {:o})",
                    meta.permissions().mode() & 0o777
                ),
            );
        }
    }

    match list_backups(paths) {
        Ok(backups) => {
            let total: u64 = backups.iter().map(|b| b.size).sum();
            check.push(
                Level::Info,
                format!(
                    "{} switch backup(s), {} (keeping {})",
                    backups.len(),
                    format_bytes(total),
                    manager.config().max_backups
                ),
            );
        }
        Err(e) => check.push(Level::Error, format!("Cannot list backups: {}", e)),
    }
    check
}

fn check_active_config(manager: &ProfileManager) -> Check {
    let active = &manager.paths().active_config;
    let mut check = Check::new("Active config");

    match ActiveStatus::detect(active) {
        ActiveStatus::Missing => {
            check.push(Level::Info, format!("{} does not exist", active.display()))
        }
        ActiveStatus::RegularFile => {
            check.push(Level::Ok, format!("{} is a regular file", active.display()));
            match fs::read(active) {
                Ok(bytes) => {
                    if let Err(e) = validate_json(active, &bytes) {
                        check.push(Level::Warn, e.to_string());
                    }
                }
                Err(e) => check.push(Level::Error, format!("Cannot read it: {}", e)),
            }
        }
        ActiveStatus::Symlink { target } => check.push(
            Level::Warn,
            format!(
                "{} is a symlink to {}; switching replaces the link with a file",
                active.display(),
                target.display()
            ),
        ),
        ActiveStatus::BrokenSymlink { target } => check.push(
            Level::Error,
            format!(
                "{} is a broken symlink to {}",
                active.display(),
                target.display()
            ),
        ),
    }
    check
}

fn check_pointer(manager: &ProfileManager) -> Check {
    let paths = manager.paths();
    let mut check = Check::new("Current pointer");

    let pointer = match CurrentPointer::read(&paths.pointer_file) {
        Ok(pointer) => pointer,
        Err(e) => {
            check.push(Level::Error, format!("Unreadable: {}", e));
            return check;
        }
    };

    match &pointer.current {
        None => check.push(Level::Info, "No current profile"),
        Some(name) if !manager.store().exists(name) => check.push(
            Level::Error,
            format!("Current profile '{}' no longer exists", name),
        ),
        Some(name) => {
            check.push(Level::Ok, format!("Current profile: {}", name));
            match manager.status().map(|s| s.in_sync) {
                Ok(Some(false)) => check.push(
                    Level::Warn,
                    format!(
                        "Active config differs from '{}' (edited by hand? run 'ccswap refresh')",
                        name
                    ),
                ),
                Ok(_) => {}
                Err(e) => check.push(Level::Error, e.to_string()),
            }
        }
    }

    if let Some(previous) = &pointer.previous
        && !manager.store().exists(previous)
    {
        check.push(
            Level::Warn,
            format!("Previous profile '{}' no longer exists", previous),
        );
    }
    check
}

fn check_empty_mode(manager: &ProfileManager) -> Check {
    let controller = manager.controller();
    let mut check = Check::new("Empty mode");

    match controller.mode() {
        Ok(Mode::Normal) => check.push(Level::Ok, "Not active"),
        Ok(Mode::Empty(state)) => check.push(
            Level::Info,
            format!(
                "Active since {}{}",
                state.entered_at.format("%Y-%m-%d %H:%M:%S"),
                state
                    .prior_current
                    .map(|p| format!(" (was '{}')", p))
                    .unwrap_or_default()
            ),
        ),
        Err(e) => {
            check.push(Level::Error, e.to_string());
            return check;
        }
    }

    match controller.diagnose() {
        Ok(None) => {}
        Ok(Some(RepairAction::RemovedOrphanBackup)) => check.push(
            Level::Warn,
            "Leftover empty-mode backup without a marker (removed on next command)",
        ),
        Ok(Some(RepairAction::AbortedPartialEntry)) => check.push(
            Level::Warn,
            "Interrupted empty-mode entry (rolled back on next command)",
        ),
        Err(e) => check.push(Level::Error, e.to_string()),
    }
    check
}

fn check_profiles(manager: &ProfileManager) -> Check {
    let dir = &manager.paths().store_dir;
    let mut check = Check::new("Profiles");

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            check.push(Level::Info, "No profiles");
            return check;
        }
    };

    let mut valid = 0;
    let mut files: Vec<_> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    files.sort();
    for path in files {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if path == manager.paths().pointer_file
            || path == manager.paths().config_file
            || path == manager.paths().empty_state_file
        {
            continue;
        }
        if let Err(e) = ProfileName::new(stem) {
            check.push(Level::Warn, format!("Ignored file {}: {}", path.display(), e));
            continue;
        }
        match fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| validate_json(&path, &bytes).map_err(|e| e.to_string()))
        {
            Ok(()) => valid += 1,
            Err(e) => check.push(Level::Error, format!("{}: {}", stem, e)),
        }
    }

    if valid == 0 && check.findings.is_empty() {
        check.push(Level::Info, "No profiles");
    } else {
        check.push(Level::Ok, format!("{} valid profile(s)", valid));
    }
    check
}

/// Print the checks; returns false if any reported an error
pub fn render(checks: &[Check], ui: &Ui) -> bool {
    ui.section("ccswap doctor");
    ui.newline();

    for check in checks {
        ui.println(ui.bold(format!("Checking {}...", check.title)));
        for finding in &check.findings {
            let icon = ui.icon(finding.severity);
            ui.println(format!("  {} {}", icon, finding.message));
        }
        if check.worst() == Level::Error {
            ui.println(ui.colored("  Issues detected!", AnsiColor::Red));
        }
        ui.newline();
    }

    checks.iter().all(|c| c.worst() < Level::Error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_utils::{name, setup_test_paths};
    use tempfile::TempDir;

    fn find<'a>(checks: &'a [Check], title: &str) -> &'a Check {
        checks.iter().find(|c| c.title == title).unwrap()
    }

    #[test]
    fn test_fresh_install_has_no_errors() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ProfileManager::with_config(&setup_test_paths(&temp_dir), Config::default());
        let checks = diagnose(&manager);
        assert!(checks.iter().all(|c| c.worst() < Level::Error));
    }

    #[test]
    fn test_reports_invalid_profile_file() {
        let temp_dir = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp_dir);
        let manager = ProfileManager::with_config(&paths, Config::default());
        manager.create(&name("good"), b"{}").unwrap();
        fs::write(paths.profile_file("bad"), b"not json").unwrap();

        let checks = diagnose(&manager);
        let profiles = find(&checks, "Profiles");
        assert_eq!(profiles.worst(), Level::Error);
        assert!(profiles.findings.iter().any(|f| f.message.starts_with("bad:")));
    }

    #[test]
    fn test_reports_drift_and_interrupted_entry() {
        let temp_dir = TempDir::new().unwrap();
        let paths = setup_test_paths(&temp_dir);
        let manager = ProfileManager::with_config(&paths, Config::default());
        manager.create(&name("work"), br#"{"a":1}"#).unwrap();
        manager.use_profile(&name("work")).unwrap();
        fs::write(&paths.active_config, br#"{"a":2}"#).unwrap();

        let checks = diagnose(&manager);
        assert_eq!(find(&checks, "Current pointer").worst(), Level::Warn);

        manager.enter_empty().unwrap();
        // the captured bytes back in place: an interrupted entry
        fs::write(&paths.active_config, br#"{"a":2}"#).unwrap();
        let checks = diagnose(&manager);
        assert_eq!(find(&checks, "Empty mode").worst(), Level::Warn);
        // diagnosing changed nothing
        assert!(paths.empty_state_file.exists());

        // anything else is left for the user to restore
        fs::write(&paths.active_config, b"{}").unwrap();
        let checks = diagnose(&manager);
        assert_eq!(find(&checks, "Empty mode").worst(), Level::Error);
        assert!(paths.empty_backup_file.exists());
    }
}
