//! Test utilities shared across test modules

use crate::paths::Paths;
use crate::profiles::ProfileName;
use tempfile::TempDir;

/// Create a Paths struct for testing using a temporary directory
///
/// Mimics the real ~/.ccswap/ store and ~/.claude/settings.json layout inside
/// the temp directory. Nothing is created on disk.
pub fn setup_test_paths(temp_dir: &TempDir) -> Paths {
    Paths::with_store(
        temp_dir.path().join(".ccswap"),
        temp_dir.path().join(".claude/settings.json"),
    )
}

pub fn name(s: &str) -> ProfileName {
    ProfileName::new(s).unwrap()
}
