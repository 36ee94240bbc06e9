//! Name-conflict resolution when importing profiles from an archive.
//!
//! [`reconcile`] is pure: it turns imported entries plus the names already in
//! the store into an [`ImportPlan`]. [`apply`] writes a plan through the
//! profile store. Each write is atomic on its own, but the import as a whole
//! is not: a failed write is reported next to the ones that succeeded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::archive::ArchiveEntry;
use crate::error::{Error, Result};
use crate::profiles::{MAX_NAME_LEN, ProfileName, ProfileStore};

/// What to do when an imported name is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Replace the existing profile's content
    Overwrite,
    /// Leave the existing profile alone and drop the imported one
    Skip,
    /// Import under the lowest free `name-N` (N >= 2)
    #[default]
    Rename,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "skip" => Ok(Self::Skip),
            "rename" => Ok(Self::Rename),
            _ => Err(format!(
                "invalid conflict policy: {} (expected overwrite, skip or rename)",
                s
            )),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Overwrite => "overwrite",
            Self::Skip => "skip",
            Self::Rename => "rename",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    /// No collision
    Create,
    /// Collision, existing content replaced
    Overwrite,
    /// Collision, imported under a new name
    Renamed { from: ProfileName },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWrite {
    pub target: ProfileName,
    pub content: Vec<u8>,
    pub action: PlanAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportPlan {
    /// Writes in the order they will be applied
    pub writes: Vec<PlannedWrite>,
    /// Colliding entries dropped under the skip policy
    pub skipped: Vec<ProfileName>,
}

/// Decide what an import would do, without touching the store
pub fn reconcile(
    imported: Vec<ArchiveEntry>,
    existing: &[ProfileName],
    policy: ConflictPolicy,
) -> ImportPlan {
    let existing: BTreeSet<&str> = existing.iter().map(|n| n.as_str()).collect();

    // Non-colliding entries keep their names, so reserve those first
    let mut taken: BTreeSet<String> = existing.iter().map(|n| n.to_string()).collect();
    for entry in &imported {
        taken.insert(entry.name.to_string());
    }

    let mut plan = ImportPlan::default();
    for entry in imported {
        if !existing.contains(entry.name.as_str()) {
            plan.writes.push(PlannedWrite {
                target: entry.name,
                content: entry.content,
                action: PlanAction::Create,
            });
            continue;
        }

        match policy {
            ConflictPolicy::Overwrite => plan.writes.push(PlannedWrite {
                target: entry.name,
                content: entry.content,
                action: PlanAction::Overwrite,
            }),
            ConflictPolicy::Skip => plan.skipped.push(entry.name),
            ConflictPolicy::Rename => {
                let target = free_name(&entry.name, &taken);
                taken.insert(target.to_string());
                plan.writes.push(PlannedWrite {
                    target,
                    content: entry.content,
                    action: PlanAction::Renamed { from: entry.name },
                });
            }
        }
    }
    plan
}

/// Lowest `name-N` (N >= 2) not in `taken`, truncating `name` to stay valid
fn free_name(name: &ProfileName, taken: &BTreeSet<String>) -> ProfileName {
    let mut n: u32 = 2;
    loop {
        let suffix = format!("-{}", n);
        let base: String = name
            .as_str()
            .chars()
            .take(MAX_NAME_LEN - suffix.len())
            .collect();
        let candidate = format!("{}{}", base, suffix);
        if !taken.contains(&candidate)
            && let Ok(valid) = ProfileName::new(candidate)
        {
            return valid;
        }
        n += 1;
    }
}

/// Outcome of applying an import plan
#[derive(Debug, Default)]
pub struct ImportReport {
    pub plan: ImportPlan,
    pub dry_run: bool,
    /// Profiles written successfully, in order
    pub written: Vec<ProfileName>,
    pub failed: Vec<(ProfileName, Error)>,
    /// Set when the current profile was overwritten but re-applying it failed
    pub refresh_error: Option<Error>,
}

impl ImportReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.refresh_error.is_none()
    }

    pub fn skipped(&self) -> &[ProfileName] {
        &self.plan.skipped
    }

    /// `(original, imported as)` for every entry moved to a free name
    pub fn renamed(&self) -> Vec<(&ProfileName, &ProfileName)> {
        self.plan
            .writes
            .iter()
            .filter_map(|w| match &w.action {
                PlanAction::Renamed { from } => Some((from, &w.target)),
                _ => None,
            })
            .collect()
    }
}

/// Write every planned entry; failures do not undo earlier writes
pub fn apply(store: &ProfileStore, plan: ImportPlan) -> ImportReport {
    let mut report = ImportReport::default();
    for write in &plan.writes {
        match store.write(&write.target, &write.content) {
            Ok(()) => report.written.push(write.target.clone()),
            Err(e) => {
                tracing::warn!(profile = %write.target, error = %e, "import write failed");
                report.failed.push((write.target.clone(), e));
            }
        }
    }
    report.plan = plan;
    report
}

/// Reconcile against the store and, unless `dry_run`, apply the plan
pub fn import_entries(
    store: &ProfileStore,
    entries: Vec<ArchiveEntry>,
    policy: ConflictPolicy,
    dry_run: bool,
) -> Result<ImportReport> {
    let existing = store.names()?;
    let plan = reconcile(entries, &existing, policy);
    if dry_run {
        return Ok(ImportReport {
            plan,
            dry_run: true,
            ..Default::default()
        });
    }
    Ok(apply(store, plan))
}
