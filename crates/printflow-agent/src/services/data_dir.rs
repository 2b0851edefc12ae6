// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::{Path, PathBuf};

use printflow_core::error::{PrintflowError, Result};

/// Environment variable that relocates the data directory.
pub const HOME_ENV: &str = "PRINTFLOW_HOME";

const DIR_NAME: &str = ".printflow";

/// Resolve and create the data directory.
///
/// Order: explicit path, `$PRINTFLOW_HOME`, then `~/.printflow`.
pub fn resolve(explicit: Option<PathBuf>) -> Result<PathBuf> {
    let dir = explicit
        .or_else(|| std::env::var_os(HOME_ENV).map(PathBuf::from))
        .unwrap_or_else(|| home_dir().join(DIR_NAME));
    ensure(&dir)?;
    Ok(dir)
}

fn ensure(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        PrintflowError::Configuration(format!("cannot create data directory {}: {e}", dir.display()))
    })
}

fn home_dir() -> PathBuf {
    // HOME on unix, USERPROFILE on Windows.
    for var in ["HOME", "USERPROFILE"] {
        if let Some(home) = std::env::var_os(var) {
            if !home.is_empty() {
                return PathBuf::from(home);
            }
        }
    }
    // Last resort
    std::env::temp_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_directory_wins_and_is_created() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("nested").join("agent");
        let resolved = resolve(Some(dir.clone())).expect("resolve");
        assert_eq!(resolved, dir);
        assert!(dir.is_dir());
    }

    #[test]
    fn uncreatable_directory_is_a_configuration_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let file = tmp.path().join("occupied");
        std::fs::write(&file, b"x").expect("write");
        assert!(matches!(
            resolve(Some(file.join("sub"))),
            Err(PrintflowError::Configuration(_))
        ));
    }
}
