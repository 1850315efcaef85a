// src/core/include_headers.rs

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A header that can complete an `#include` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMatch {
    /// `relative/path.h\t<include folder>`
    pub label: String,
    /// Path relative to the include folder, `/`-separated.
    pub path: String,
}

/// Headers have no extension (`vector`) or an extension starting with `h`.
fn is_header(file_name: &str) -> bool {
    !file_name.contains('.') || file_name.contains(".h")
}

fn relative_slash_path(file: &Path, folder: &Path) -> Option<String> {
    let relative = file.strip_prefix(folder).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn headers_in(folder: &Path, prefix: &str) -> Vec<HeaderMatch> {
    log::trace!("Looking for headers in '{}'", folder.display());
    WalkDir::new(folder)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| is_header(&entry.file_name().to_string_lossy()))
        .filter_map(|entry| relative_slash_path(entry.path(), folder))
        .filter(|path| path.starts_with(prefix))
        .map(|path| HeaderMatch {
            label: format!("{}\t{}", path, folder.display()),
            path,
        })
        .collect()
}

/// Every header below `folders` whose relative path starts with `prefix`,
/// grouped by folder in the given order.
pub fn find_headers(folders: &[PathBuf], prefix: &str) -> Vec<HeaderMatch> {
    let per_folder: Vec<Vec<HeaderMatch>> = folders
        .par_iter()
        .filter(|folder| folder.is_dir())
        .map(|folder| headers_in(folder, prefix))
        .collect();
    let matches: Vec<HeaderMatch> = per_folder.into_iter().flatten().collect();
    log::debug!("{} headers match '{}'", matches.len(), prefix);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_is_header() {
        assert!(is_header("vector"));
        assert!(is_header("a.h"));
        assert!(is_header("a.hpp"));
        assert!(is_header("a.hxx"));
        assert!(!is_header("a.cpp"));
        assert!(!is_header("CMakeLists.txt"));
    }

    #[test]
    fn test_find_headers_with_prefix() {
        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("inc");
        let second = dir.path().join("sys");
        fs::create_dir_all(first.join("lib/detail")).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(first.join("lib/api.h"), "").unwrap();
        fs::write(first.join("lib/detail/impl.hpp"), "").unwrap();
        fs::write(first.join("lib/source.cpp"), "").unwrap();
        fs::write(first.join("other.h"), "").unwrap();
        fs::write(second.join("library"), "").unwrap();

        // --- Execute ---
        let folders = vec![first.clone(), second.clone(), dir.path().join("missing")];
        let matches = find_headers(&folders, "lib");

        // --- Assert ---
        let paths: Vec<_> = matches.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["lib/api.h", "lib/detail/impl.hpp", "library"]);
        assert_eq!(matches[0].label, format!("lib/api.h\t{}", first.display()));
    }
}
