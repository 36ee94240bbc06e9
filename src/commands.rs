//! Handler functions for each CLI subcommand.
//!
//! Handlers are thin: they parse names, call into [`ProfileManager`], and
//! render the outcome through [`Ui`]. Core errors are turned into `anyhow`
//! errors with a `Hint:` line where there is something useful to suggest.

use anstyle::AnsiColor;
use anyhow::{Context, Result, anyhow, bail};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::archive::read_header;
use crate::doctor;
use crate::empty::{Mode, saved_size};
use crate::error::Error;
use crate::fs_utils::{OWNER_ONLY, atomic_write, remove_if_exists, temp_path_for};
use crate::import::{ConflictPolicy, ImportReport, PlanAction};
use crate::manager::ProfileManager;
use crate::profiles::ProfileName;
use crate::switch::{ActiveStatus, list_backups, rotate_backups};
use crate::template::{list_templates, load_template, template_fields};
use crate::ui::{Level, Ui, format_bytes};

/// Archive password for non-interactive use
pub const PASSWORD_ENV: &str = "CCSWAP_PASSWORD";

/// Attach a `Hint:` line to core errors that have an obvious next step
fn explain(e: Error) -> anyhow::Error {
    let hint = match &e {
        Error::NotFound(_) => "Use 'ccswap list' to see available profiles.",
        Error::AlreadyExists(_) => "Choose a different name or remove the existing profile first.",
        Error::InUse(_) => {
            "Switch to another profile first, or pass --current to delete it and enter empty mode."
        }
        Error::NoPreviousProfile => "Switch profiles at least once with 'ccswap use <name>'.",
        Error::InvalidName { .. } => {
            "Names may contain letters, digits, '-' and '_' (at most 64 characters)."
        }
        Error::PasswordRequired => "Set CCSWAP_PASSWORD or run interactively to be prompted.",
        Error::DecryptionFailed => "Check the password; the archive may also be damaged.",
        Error::InconsistentState(_) => "Run 'ccswap doctor' for details.",
        Error::MissingTemplateField(_) => "Pass the value with --set <field>=<value>.",
        _ => return e.into(),
    };
    anyhow!("{}\nHint: {}", e, hint)
}

trait Hinted<T> {
    fn hinted(self) -> Result<T>;
}

impl<T> Hinted<T> for crate::Result<T> {
    fn hinted(self) -> Result<T> {
        self.map_err(explain)
    }
}

fn parse_name(name: &str) -> Result<ProfileName> {
    ProfileName::new(name).hinted()
}

/// Fix interrupted transitions before a mutating command runs
pub fn repair(manager: &ProfileManager, ui: &Ui) -> Result<()> {
    if let Some(action) = manager.repair().hinted()? {
        ui.warn(format!("Repaired interrupted empty-mode state: {:?}", action));
    }
    Ok(())
}

/// List all available profiles
pub fn list(manager: &ProfileManager, ui: &Ui) -> Result<()> {
    let profiles = manager.list().hinted()?;

    if profiles.is_empty() {
        ui.warn("No profiles found.");
        ui.newline();
        ui.println("Create one with:");
        ui.println(format!("  {} new <name> --from-current", ui.bold("ccswap")));
        return Ok(());
    }

    let pointer = manager.status().hinted()?.pointer;

    let mut table = ui.simple_table();
    table.set_header(vec![
        ui.header_cell(""),
        ui.header_cell("Profile"),
        ui.header_cell("Size"),
        ui.header_cell("Modified"),
        ui.header_cell("Status"),
    ]);

    for profile in &profiles {
        let is_current = pointer.current.as_ref() == Some(&profile.name);
        let status_cell = if is_current {
            ui.colored_cell("current", AnsiColor::Green)
        } else if pointer.previous.as_ref() == Some(&profile.name) {
            ui.colored_cell("previous", AnsiColor::BrightBlack)
        } else {
            ui.cell("-")
        };
        table.add_row(vec![
            ui.cell(if is_current { ui.icon(Level::Ok) } else { " " }),
            ui.cell(profile.name.as_str()),
            ui.cell(format_bytes(profile.size)),
            ui.cell(profile.modified.format("%Y-%m-%d %H:%M").to_string()),
            status_cell,
        ]);
    }

    ui.section("Profiles");
    ui.println(table.to_string());
    Ok(())
}

/// Show the current profile, mode and active config status
pub fn current(manager: &ProfileManager, ui: &Ui) -> Result<()> {
    let status = manager.status().hinted()?;

    ui.section("Current Profile");
    ui.newline();

    let mut table = ui.simple_table();
    match &status.pointer.current {
        Some(name) => table.add_row(vec![ui.cell("Current profile:"), ui.header_cell(name.as_str())]),
        None => table.add_row(vec![ui.cell("Current profile:"), ui.cell("(none)")]),
    };
    if let Some(previous) = &status.pointer.previous {
        table.add_row(vec![ui.cell("Previous profile:"), ui.cell(previous.as_str())]);
    }
    if let Some(updated) = &status.pointer.updated_at {
        table.add_row(vec![
            ui.cell("Last switched:"),
            ui.cell(updated.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    let mode_cell = match &status.mode {
        Mode::Normal => ui.cell("normal"),
        Mode::Empty(state) => ui.colored_cell(
            format!(
                "empty (since {}, {} saved)",
                state.entered_at.format("%Y-%m-%d %H:%M"),
                format_bytes(saved_size(manager.paths()).hinted()?.unwrap_or(0))
            ),
            AnsiColor::Yellow,
        ),
    };
    table.add_row(vec![ui.cell("Mode:"), mode_cell]);

    let active = &manager.paths().active_config;
    let active_cell = match &status.active {
        ActiveStatus::Missing => ui.colored_cell("missing", AnsiColor::Yellow),
        ActiveStatus::RegularFile => ui.cell("regular file"),
        ActiveStatus::Symlink { target } => ui.cell(format!("symlink → {}", target.display())),
        ActiveStatus::BrokenSymlink { target } => ui.colored_cell(
            format!("broken symlink → {}", target.display()),
            AnsiColor::Red,
        ),
    };
    table.add_row(vec![ui.cell("Active config:"), ui.cell(active.display().to_string())]);
    table.add_row(vec![ui.cell(""), active_cell]);

    if let Some(in_sync) = status.in_sync {
        let sync_cell = if in_sync {
            ui.colored_cell("yes", AnsiColor::Green)
        } else {
            ui.colored_cell("no (run 'ccswap refresh' to re-apply)", AnsiColor::Yellow)
        };
        table.add_row(vec![ui.cell("In sync:"), sync_cell]);
    }

    ui.println(table.to_string());
    Ok(())
}

/// Print a profile's JSON
pub fn show(manager: &ProfileManager, name: &str, ui: &Ui) -> Result<()> {
    let name = parse_name(name)?;
    let profile = manager.store().read(&name).hinted()?;
    let json = profile.json().hinted()?;

    ui.section(format!("Profile: {}", name));
    ui.println(ui.dim(format!(
        "{} · modified {}",
        format_bytes(profile.content.len() as u64),
        profile.modified.format("%Y-%m-%d %H:%M:%S")
    )));
    ui.newline();
    ui.println(serde_json::to_string_pretty(&json).context("Failed to format profile")?);
    Ok(())
}

/// Where a new profile's content comes from
#[derive(Debug, Clone)]
pub enum NewSource {
    Current,
    File(PathBuf),
    Template {
        name: String,
        answers: BTreeMap<String, String>,
    },
}

/// Parse `key=value` pairs from `--set`
pub fn parse_answers(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .ok_or_else(|| {
                    anyhow!(
                        "Invalid --set value: '{}'\nHint: Use --set <field>=<value>.",
                        pair
                    )
                })
        })
        .collect()
}

/// Create a new profile
pub fn new(manager: &ProfileManager, name: &str, source: NewSource, ui: &Ui) -> Result<()> {
    let name = parse_name(name)?;

    match source {
        NewSource::Current => manager.create_from_active(&name).hinted().with_context(|| {
            format!(
                "Failed to capture {}",
                manager.paths().active_config.display()
            )
        })?,
        NewSource::File(path) => manager.create_from_file(&name, &path).hinted()?,
        NewSource::Template {
            name: template,
            mut answers,
        } => {
            let fields = template_fields(&load_template(manager.paths(), &template).hinted()?);
            for field in fields {
                if answers.contains_key(&field) {
                    continue;
                }
                if !ui.interactive {
                    return Err(explain(Error::MissingTemplateField(field)));
                }
                let answer = ui.ask(&format!("{}:", field))?;
                answers.insert(field, answer);
            }
            manager
                .create_from_template(&name, &template, &answers)
                .hinted()?
        }
    }

    ui.ok(format!("Created profile '{}'", name));
    ui.newline();
    ui.println("To activate it:");
    ui.println(format!("  ccswap use {}", name));
    Ok(())
}

/// List templates in the store
pub fn templates(manager: &ProfileManager, ui: &Ui) -> Result<()> {
    let names = list_templates(manager.paths()).hinted()?;
    if names.is_empty() {
        ui.warn("No templates found.");
        ui.println(format!(
            "Templates are JSON files in {}",
            manager.paths().templates_dir.display()
        ));
        return Ok(());
    }

    let mut table = ui.simple_table();
    table.set_header(vec![ui.header_cell("Template"), ui.header_cell("Fields")]);
    for name in names {
        let fields = load_template(manager.paths(), &name)
            .map(|t| template_fields(&t).into_iter().collect::<Vec<_>>().join(", "))
            .unwrap_or_else(|e| format!("(invalid: {})", e));
        table.add_row(vec![ui.cell(name), ui.cell(fields)]);
    }
    ui.section("Templates");
    ui.println(table.to_string());
    Ok(())
}

/// Switch to a profile
pub fn use_profile(manager: &ProfileManager, name: &str, ui: &Ui) -> Result<()> {
    let name = parse_name(name)?;
    let outcome = manager.use_profile(&name).hinted()?;
    ui.ok(format!("Active profile: {}", outcome.profile));
    if let Some(backup) = outcome.backup {
        ui.println(ui.dim(format!("Previous config saved to {}", backup.display())));
    }
    Ok(())
}

/// Switch back to the previous profile
pub fn use_previous(manager: &ProfileManager, ui: &Ui) -> Result<()> {
    let outcome = manager.use_previous().hinted()?;
    ui.ok(format!("Active profile: {}", outcome.profile));
    Ok(())
}

/// Re-apply the current profile to the active config
pub fn refresh(manager: &ProfileManager, ui: &Ui) -> Result<()> {
    match manager.refresh().hinted()? {
        Some(name) => ui.ok(format!("Re-applied profile '{}'", name)),
        None if manager.controller().is_empty().hinted()? => {
            ui.info("Empty mode is active; nothing to re-apply.")
        }
        None => ui.warn("No current profile to re-apply."),
    }
    Ok(())
}

/// Owner-only sibling copy of a profile for the editor to work on
fn scratch_copy(profile_file: &Path, content: &[u8]) -> Result<PathBuf> {
    let scratch = temp_path_for(profile_file);
    atomic_write(&scratch, content, OWNER_ONLY).hinted()?;
    Ok(scratch)
}

/// Edit a profile in `$EDITOR`
///
/// The edit happens on a copy; it only replaces the profile once it parses as
/// JSON. If the profile is the current one, the active config is refreshed.
pub fn edit(manager: &ProfileManager, name: &str, ui: &Ui) -> Result<()> {
    let name = parse_name(name)?;
    let profile = manager.store().read(&name).hinted()?;

    let scratch = scratch_copy(&manager.paths().profile_file(name.as_str()), &profile.content)?;

    let edited = open_in_editor(&scratch).and_then(|()| {
        fs::read(&scratch).with_context(|| format!("Failed to read {}", scratch.display()))
    });
    remove_if_exists(&scratch).hinted()?;
    let edited = edited?;

    if edited == profile.content {
        ui.info("No changes.");
        return Ok(());
    }
    manager.save(&name, &edited).hinted()?;
    ui.ok(format!("Saved profile '{}'", name));
    Ok(())
}

fn open_in_editor(path: &Path) -> Result<()> {
    let editor = std::env::var("VISUAL")
        .or_else(|_| std::env::var("EDITOR"))
        .unwrap_or_else(|_| "vi".to_string());

    // $EDITOR may carry arguments, e.g. "code --wait"
    let mut parts = editor.split_whitespace();
    let program = parts.next().unwrap_or("vi");
    let status = Command::new(program)
        .args(parts)
        .arg(path)
        .status()
        .with_context(|| format!("Failed to run editor: {}", editor))?;

    if !status.success() {
        bail!("Editor exited with non-zero status");
    }
    Ok(())
}

/// Remove a profile
pub fn remove(
    manager: &ProfileManager,
    name: &str,
    delete_current: bool,
    force: bool,
    ui: &Ui,
) -> Result<()> {
    let name = parse_name(name)?;
    if !manager.store().exists(&name) {
        return Err(explain(Error::NotFound(name.to_string())));
    }

    if !force {
        let confirm = ui.confirm(
            &format!("Are you sure you want to remove profile '{}'?", name),
            "This permanently deletes the profile file",
        )?;
        if !confirm {
            ui.warn("Removal cancelled.");
            return Ok(());
        }
    }

    let outcome = manager.remove(&name, delete_current).hinted()?;
    ui.ok(format!("Removed profile '{}'", name));
    if outcome.entered_empty {
        ui.info("It was the current profile; empty mode is now active.");
        ui.println("Run 'ccswap restore' to bring back the previous config.");
    }
    Ok(())
}

pub fn rename(manager: &ProfileManager, old_name: &str, new_name: &str, ui: &Ui) -> Result<()> {
    let old_name = parse_name(old_name)?;
    let new_name = parse_name(new_name)?;
    manager.rename(&old_name, &new_name).hinted()?;
    ui.ok(format!("Renamed profile '{}' to '{}'", old_name, new_name));
    Ok(())
}

pub fn copy(manager: &ProfileManager, src: &str, dst: &str, ui: &Ui) -> Result<()> {
    let src = parse_name(src)?;
    let dst = parse_name(dst)?;
    manager.copy(&src, &dst).hinted()?;
    ui.ok(format!("Copied profile '{}' to '{}'", src, dst));
    Ok(())
}

/// Enter empty mode
pub fn empty(manager: &ProfileManager, ui: &Ui) -> Result<()> {
    if manager.controller().is_empty().hinted()? {
        ui.info("Empty mode is already active.");
        return Ok(());
    }
    let state = manager.enter_empty().hinted()?;
    if state.had_active_config {
        ui.ok(format!(
            "Empty mode active; {} saved",
            format_bytes(state.saved_size)
        ));
    } else {
        ui.ok("Empty mode active (there was no active config to save)");
    }
    ui.println("Run 'ccswap restore' to bring it back.");
    Ok(())
}

/// Leave empty mode
pub fn restore(manager: &ProfileManager, ui: &Ui) -> Result<()> {
    match manager.restore().hinted()? {
        None => ui.info("Empty mode is not active; nothing to restore."),
        Some(outcome) => match (&outcome.prior, &outcome.current) {
            (_, Some(current)) => ui.ok(format!("Restored; current profile: {}", current)),
            (Some(prior), None) => ui.ok(format!(
                "Restored the saved config (profile '{}' no longer exists)",
                prior
            )),
            (None, None) => ui.ok("Restored the saved config"),
        },
    }
    Ok(())
}

/// Resolve the archive password: environment first, then a prompt
fn archive_password(ui: &Ui, confirm: bool) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV)
        && !password.is_empty()
    {
        return Ok(password);
    }
    if !ui.interactive {
        return Err(explain(Error::PasswordRequired));
    }
    let password = ui.password("Archive password:", confirm)?;
    if password.is_empty() {
        bail!("Password cannot be empty");
    }
    Ok(password)
}

/// Write profiles to an archive file
pub fn export(
    manager: &ProfileManager,
    names: &[String],
    output: &Path,
    encrypt: bool,
    ui: &Ui,
) -> Result<()> {
    let names = names
        .iter()
        .map(|n| parse_name(n))
        .collect::<Result<Vec<_>>>()?;
    let password = if encrypt {
        Some(archive_password(ui, true)?)
    } else {
        None
    };

    let spinner = ui.spinner("Writing archive...");
    match manager.export_to(output, &names, password.as_deref()) {
        Ok(count) => {
            ui.spinner_finish_ok(
                &spinner,
                format!(
                    "Exported {} profile(s) to {}{}",
                    count,
                    output.display(),
                    if encrypt { " (encrypted)" } else { "" }
                ),
            );
            Ok(())
        }
        Err(e) => {
            ui.spinner_finish_err(&spinner, "Export failed");
            Err(explain(e))
        }
    }
}

/// Read an archive file into the store
pub fn import(
    manager: &ProfileManager,
    input: &Path,
    policy: Option<ConflictPolicy>,
    dry_run: bool,
    ui: &Ui,
) -> Result<()> {
    let bytes =
        fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let header = read_header(&bytes).hinted()?;
    let password = if header.encryption.is_encrypted() {
        Some(archive_password(ui, false)?)
    } else {
        None
    };
    let policy = policy.unwrap_or(manager.config().conflict_policy);

    let spinner = ui.spinner("Reading archive...");
    let report = match manager.import(&bytes, password.as_deref(), policy, dry_run) {
        Ok(report) => {
            spinner.finish_and_clear();
            report
        }
        Err(e) => {
            ui.spinner_finish_err(&spinner, "Import failed");
            return Err(explain(e));
        }
    };

    render_import(&report, policy, ui);
    if !report.failed.is_empty() {
        bail!(
            "{} profile(s) could not be written; the others were imported",
            report.failed.len()
        );
    }
    if let Some(e) = &report.refresh_error {
        bail!(
            "Profiles were imported, but the active config could not be updated: {}\nHint: Run 'ccswap refresh' once the problem is fixed.",
            e
        );
    }
    Ok(())
}

fn render_import(report: &ImportReport, policy: ConflictPolicy, ui: &Ui) {
    let mut table = ui.simple_table();
    table.set_header(vec![ui.header_cell("Profile"), ui.header_cell("Action")]);
    for write in &report.plan.writes {
        let action = match &write.action {
            PlanAction::Create => ui.colored_cell("new", AnsiColor::Green),
            PlanAction::Overwrite => ui.colored_cell("overwrite", AnsiColor::Yellow),
            PlanAction::Renamed { from } => {
                ui.colored_cell(format!("renamed from '{}'", from), AnsiColor::Cyan)
            }
        };
        table.add_row(vec![ui.cell(write.target.as_str()), action]);
    }
    for skipped in report.skipped() {
        table.add_row(vec![ui.cell(skipped.as_str()), ui.cell("skipped (exists)")]);
    }
    for (name, e) in &report.failed {
        table.add_row(vec![
            ui.cell(name.as_str()),
            ui.colored_cell(format!("failed: {}", e), AnsiColor::Red),
        ]);
    }

    ui.section(if report.dry_run {
        format!("Import plan (dry run, policy: {})", policy)
    } else {
        format!("Import (policy: {})", policy)
    });
    ui.println(table.to_string());

    if report.dry_run {
        ui.info("Dry run: nothing was written.");
    } else if report.is_complete() {
        ui.ok(format!(
            "Imported {} profile(s), skipped {}",
            report.written.len(),
            report.skipped().len()
        ));
    }
}

/// List switch backups
pub fn backup_list(manager: &ProfileManager, ui: &Ui) -> Result<()> {
    let backups = list_backups(manager.paths()).hinted()?;
    if backups.is_empty() {
        ui.warn("No backups found.");
        ui.newline();
        ui.println("Backups are created automatically when switching profiles.");
        return Ok(());
    }

    let mut table = ui.table();
    table.set_header(vec![
        ui.header_cell("ID"),
        ui.header_cell("Date"),
        ui.header_cell("Size"),
    ]);
    for backup in &backups {
        table.add_row(vec![
            ui.cell(&backup.id),
            ui.cell(backup.modified.format("%Y-%m-%d %H:%M:%S").to_string()),
            ui.cell(format_bytes(backup.size)),
        ]);
    }

    ui.section("Backups");
    ui.newline();
    ui.println(table.to_string());
    ui.newline();
    ui.info(format!(
        "{} backup(s) in {}",
        backups.len(),
        manager.paths().backups_dir.display()
    ));
    Ok(())
}

/// Remove all but the newest `keep` backups
pub fn backup_clean(manager: &ProfileManager, keep: usize, ui: &Ui) -> Result<()> {
    let removed = rotate_backups(manager.paths(), keep).hinted()?;
    if removed > 0 {
        ui.ok(format!("Removed {} old backup(s), keeping {}", removed, keep));
    } else {
        ui.ok(format!("No backups to clean (keeping {})", keep));
    }
    Ok(())
}

/// Run diagnostics; fails if any check found an error
pub fn doctor(manager: &ProfileManager, ui: &Ui) -> Result<()> {
    let checks = doctor::diagnose(manager);
    if !doctor::render(&checks, ui) {
        bail!("Doctor found problems.\nHint: See the checks marked above.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_utils::{name, setup_test_paths};
    use crate::archive::KdfParams;
    use crate::ui::ColorMode;
    use serial_test::serial;
    use tempfile::TempDir;

    fn test_ui() -> Ui {
        Ui {
            interactive: false,
            ..Ui::new(ColorMode::Never, false)
        }
    }

    fn setup(temp_dir: &TempDir) -> ProfileManager {
        ProfileManager::with_config(&setup_test_paths(temp_dir), Config::default())
    }

    #[test]
    fn test_list_and_current_without_profiles() {
        let temp_dir = TempDir::new().unwrap();
        let manager = setup(&temp_dir);
        let ui = test_ui();
        assert!(list(&manager, &ui).is_ok());
        assert!(current(&manager, &ui).is_ok());
    }

    #[test]
    fn test_new_from_current_and_use() {
        let temp_dir = TempDir::new().unwrap();
        let manager = setup(&temp_dir);
        let ui = test_ui();
        let active = &manager.paths().active_config;
        fs::create_dir_all(active.parent().unwrap()).unwrap();
        fs::write(active, r#"{"test": true}"#).unwrap();

        new(&manager, "work", NewSource::Current, &ui).unwrap();
        assert!(manager.store().exists(&name("work")));
        assert!(new(&manager, "work", NewSource::Current, &ui).is_err());

        use_profile(&manager, "work", &ui).unwrap();
        assert!(list(&manager, &ui).is_ok());
        assert!(current(&manager, &ui).is_ok());
    }

    #[test]
    fn test_errors_carry_hints() {
        let temp_dir = TempDir::new().unwrap();
        let manager = setup(&temp_dir);
        let ui = test_ui();

        let err = use_profile(&manager, "nonexistent", &ui).unwrap_err();
        assert!(err.to_string().contains("Hint: Use 'ccswap list'"));

        let err = use_profile(&manager, "../etc", &ui).unwrap_err();
        assert!(err.to_string().contains("invalid profile name"));

        let err = use_previous(&manager, &ui).unwrap_err();
        assert!(err.to_string().contains("Hint:"));
    }

    #[test]
    fn test_template_without_answers_fails_non_interactively() {
        let temp_dir = TempDir::new().unwrap();
        let manager = setup(&temp_dir);
        let ui = test_ui();
        fs::create_dir_all(&manager.paths().templates_dir).unwrap();
        fs::write(
            manager.paths().template_file("relay"),
            r#"{"env":{"KEY":"{{key}}"}}"#,
        )
        .unwrap();

        let source = NewSource::Template {
            name: "relay".to_string(),
            answers: BTreeMap::new(),
        };
        let err = new(&manager, "r", source, &ui).unwrap_err();
        assert!(err.to_string().contains("--set"));

        let source = NewSource::Template {
            name: "relay".to_string(),
            answers: parse_answers(&["key=abc".to_string()]).unwrap(),
        };
        new(&manager, "r", source, &ui).unwrap();
        assert!(templates(&manager, &ui).is_ok());
    }

    #[test]
    fn test_parse_answers() {
        let answers = parse_answers(&["a=1".to_string(), "b= x=y".to_string()]).unwrap();
        assert_eq!(answers["a"], "1");
        assert_eq!(answers["b"], " x=y");
        assert!(parse_answers(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn test_remove_current_enters_empty_mode() {
        let temp_dir = TempDir::new().unwrap();
        let manager = setup(&temp_dir);
        let ui = test_ui();
        manager.create(&name("work"), b"{}").unwrap();
        manager.use_profile(&name("work")).unwrap();

        let err = remove(&manager, "work", false, true, &ui).unwrap_err();
        assert!(err.to_string().contains("--current"));

        remove(&manager, "work", true, true, &ui).unwrap();
        assert!(manager.controller().is_empty().unwrap());
        restore(&manager, &ui).unwrap();
        assert!(!manager.controller().is_empty().unwrap());
    }

    #[test]
    fn test_export_import_plain_archive() {
        let temp_dir = TempDir::new().unwrap();
        let manager = setup(&temp_dir);
        let ui = test_ui();
        manager.create(&name("work"), b"{\"a\":1}").unwrap();
        let archive = temp_dir.path().join("profiles.ccswap");

        export(&manager, &[], &archive, false, &ui).unwrap();
        import(&manager, &archive, None, true, &ui).unwrap();
        assert_eq!(manager.store().names().unwrap(), vec![name("work")]);

        import(&manager, &archive, Some(ConflictPolicy::Rename), false, &ui).unwrap();
        assert_eq!(
            manager.store().names().unwrap(),
            vec![name("work"), name("work-2")]
        );
    }

    #[test]
    #[serial]
    fn test_encrypted_export_reads_password_from_env() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            kdf: KdfParams {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            ..Config::default()
        };
        let manager = ProfileManager::with_config(&setup_test_paths(&temp_dir), config);
        let ui = test_ui();
        manager.create(&name("work"), b"{\"a\":1}").unwrap();
        let archive = temp_dir.path().join("profiles.ccswap");

        unsafe { std::env::remove_var(PASSWORD_ENV) };
        let err = export(&manager, &[], &archive, true, &ui).unwrap_err();
        assert!(err.to_string().contains(PASSWORD_ENV));
        assert!(!archive.exists());

        unsafe { std::env::set_var(PASSWORD_ENV, "hunter2") };
        let exported = export(&manager, &[], &archive, true, &ui);
        let imported = import(&manager, &archive, Some(ConflictPolicy::Rename), false, &ui);
        unsafe { std::env::remove_var(PASSWORD_ENV) };

        exported.unwrap();
        imported.unwrap();
        let header = read_header(&fs::read(&archive).unwrap()).unwrap();
        assert!(header.encryption.is_encrypted());
        assert_eq!(
            manager.store().names().unwrap(),
            vec![name("work"), name("work-2")]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_edit_scratch_copy_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let temp_dir = TempDir::new().unwrap();
        let manager = setup(&temp_dir);
        manager.create(&name("work"), br#"{"token":"secret"}"#).unwrap();

        let profile_file = manager.paths().profile_file("work");
        let scratch = scratch_copy(&profile_file, br#"{"token":"secret"}"#).unwrap();
        let mode = fs::metadata(&scratch).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(fs::read(&scratch).unwrap(), br#"{"token":"secret"}"#);
        assert_ne!(scratch, profile_file);
    }

    #[test]
    fn test_backup_commands() {
        let temp_dir = TempDir::new().unwrap();
        let manager = setup(&temp_dir);
        let ui = test_ui();
        assert!(backup_list(&manager, &ui).is_ok());

        manager.create(&name("a"), b"{\"v\":\"a\"}").unwrap();
        manager.create(&name("b"), b"{\"v\":\"b\"}").unwrap();
        manager.use_profile(&name("a")).unwrap();
        manager.use_profile(&name("b")).unwrap();
        assert_eq!(list_backups(manager.paths()).unwrap().len(), 1);

        backup_list(&manager, &ui).unwrap();
        backup_clean(&manager, 0, &ui).unwrap();
        assert!(list_backups(manager.paths()).unwrap().is_empty());
    }
}
