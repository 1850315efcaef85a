// src/cli/handlers/commons.rs

// Shared by the handlers that work on a single source file.

use crate::core::paths;
use crate::models::{BufferId, BufferSnapshot};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// The buffer identity used for files opened from the command line.
pub const CLI_BUFFER: BufferId = BufferId(0);

/// Expands `~` and variables in `path` and makes it absolute.
pub fn resolve_file(path: &str) -> Result<PathBuf> {
    let expanded = paths::expand_path_template(path)?;
    dunce::canonicalize(&expanded).with_context(|| format!("Cannot open '{}'", path))
}

/// The file's content on disk, as a buffer.
pub fn read_snapshot(file: &Path) -> Result<BufferSnapshot> {
    let text = fs::read_to_string(file).with_context(|| format!("Cannot read '{}'", file.display()))?;
    Ok(BufferSnapshot {
        id: CLI_BUFFER,
        file_path: file.to_path_buf(),
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_snapshot_of_resolved_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.c");
        fs::write(&file, "int x;\n").unwrap();

        let resolved = resolve_file(&file.to_string_lossy()).unwrap();
        let snapshot = read_snapshot(&resolved).unwrap();

        assert!(resolved.is_absolute());
        assert_eq!(snapshot.text, "int x;\n");
        assert_eq!(snapshot.id, CLI_BUFFER);
        assert!(resolve_file(&dir.path().join("missing.c").to_string_lossy()).is_err());
    }
}
