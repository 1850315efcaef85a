// src/core/cache.rs

use crate::core::search_scope::SearchScope;
use log::{debug, trace};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

/// Reads the modification time of `path`. `None` if the file is gone or the
/// platform does not report it.
pub fn modification_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// A located marker file together with the modification time it had when it
/// was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerFile {
    pub path: PathBuf,
    pub mtime: Option<SystemTime>,
}

impl MarkerFile {
    pub fn locate(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mtime = modification_time(&path);
        Self { path, mtime }
    }

    /// Folder containing the marker.
    pub fn folder(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    /// True if the file still exists and was not modified after `stamp`.
    pub fn is_unchanged_since(&self, stamp: SystemTime) -> bool {
        is_unchanged_since(&self.path, stamp)
    }
}

/// True if `path` still exists and its modification time is not newer than
/// `stamp`.
pub fn is_unchanged_since(path: &Path, stamp: SystemTime) -> bool {
    match modification_time(path) {
        Some(current) => current <= stamp,
        None => false,
    }
}

/// Walks `scope` and returns the first file literally named `marker_name`.
///
/// With a `content_predicate`, a candidate only matches if its content
/// satisfies it; unreadable candidates are skipped.
pub fn find_marker(
    marker_name: &str,
    scope: &SearchScope,
    content_predicate: Option<&dyn Fn(&str) -> bool>,
) -> Option<MarkerFile> {
    for folder in scope.folders() {
        let candidate = folder.join(marker_name);
        if !candidate.is_file() {
            continue;
        }
        if let Some(predicate) = content_predicate {
            match fs::read_to_string(&candidate) {
                Ok(content) if predicate(&content) => {}
                Ok(_) => {
                    trace!("'{}' does not match, continuing up", candidate.display());
                    continue;
                }
                Err(e) => {
                    debug!("Skipping unreadable '{}': {}", candidate.display(), e);
                    continue;
                }
            }
        }
        debug!("Found '{}' at '{}'", marker_name, candidate.display());
        return Some(MarkerFile::locate(candidate));
    }
    trace!("No '{}' in {:?}", marker_name, scope);
    None
}

#[derive(Debug, Default)]
struct PathCacheState {
    /// Source file -> marker used the last time flags were produced for it.
    marker_for_file: HashMap<PathBuf, PathBuf>,
    /// Marker -> modification time at the last successful parse.
    stamps: HashMap<PathBuf, SystemTime>,
}

/// Remembers which marker served which file and when each marker was last
/// read, so that a source can decide to reuse its parsed data.
#[derive(Debug, Default)]
pub struct PathCache {
    state: Mutex<PathCacheState>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `marker` is the one used last time for `file` and it has not
    /// changed since it was recorded.
    pub fn can_reuse(&self, file: &Path, marker: &MarkerFile) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let same_marker = state.marker_for_file.get(file) == Some(&marker.path);
        let unchanged = state
            .stamps
            .get(&marker.path)
            .is_some_and(|stamp| marker.is_unchanged_since(*stamp));
        trace!(
            "Reuse check for '{}': same marker {}, unchanged {}",
            file.display(),
            same_marker,
            unchanged
        );
        same_marker && unchanged
    }

    /// True if `marker` was parsed before and has not changed since, no
    /// matter which file asked.
    pub fn is_marker_unchanged(&self, marker: &Path) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .stamps
            .get(marker)
            .is_some_and(|stamp| is_unchanged_since(marker, *stamp))
    }

    /// Records a successful parse of `marker` on behalf of `file`. The
    /// stamp is the modification time read when the marker was located.
    pub fn record(&self, file: &Path, marker: &MarkerFile) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .marker_for_file
            .insert(file.to_path_buf(), marker.path.clone());
        if let Some(mtime) = marker.mtime {
            state.stamps.insert(marker.path.clone(), mtime);
        } else {
            state.stamps.remove(&marker.path);
        }
    }

    /// Forgets everything recorded about `marker`.
    pub fn forget_marker(&self, marker: &Path) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.stamps.remove(marker);
        state.marker_for_file.retain(|_, m| m != marker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn touch_future(path: &Path) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(120))
            .unwrap();
    }

    #[test]
    fn test_find_marker_walks_up() {
        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("a/marker.txt"), "x").unwrap();

        // --- Execute ---
        let scope = SearchScope::tree(&nested, Some(dir.path().to_path_buf()));
        let found = find_marker("marker.txt", &scope, None);

        // --- Assert ---
        let found = found.unwrap();
        assert_eq!(found.path, dir.path().join("a/marker.txt"));
        assert_eq!(found.folder(), dir.path().join("a"));
        assert!(found.mtime.is_some());
    }

    #[test]
    fn test_find_marker_respects_bound_and_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("inner");
        fs::create_dir_all(&inner).unwrap();
        fs::write(dir.path().join("CMakeLists.txt"), "project(x)").unwrap();
        fs::write(inner.join("CMakeLists.txt"), "add_library(y)").unwrap();

        // The bound excludes the outer folder.
        let bounded = SearchScope::tree(&inner, Some(inner.clone()));
        let has_project: &dyn Fn(&str) -> bool = &|c| c.contains("project");
        assert!(find_marker("CMakeLists.txt", &bounded, Some(has_project)).is_none());

        // The inner file exists but lacks the required content.
        let open = SearchScope::tree(&inner, Some(dir.path().to_path_buf()));
        let found = find_marker("CMakeLists.txt", &open, Some(has_project)).unwrap();
        assert_eq!(found.path, dir.path().join("CMakeLists.txt"));
    }

    #[test]
    fn test_path_cache_reuse_and_invalidation() {
        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        let marker_path = dir.path().join("compile_commands.json");
        fs::write(&marker_path, "[]").unwrap();
        let file = dir.path().join("main.cpp");
        let cache = PathCache::new();
        let marker = MarkerFile::locate(&marker_path);

        // --- Execute & Assert ---
        assert!(!cache.can_reuse(&file, &marker));
        cache.record(&file, &marker);
        assert!(cache.can_reuse(&file, &marker));
        assert!(cache.is_marker_unchanged(&marker_path));

        // Another marker path for the same file is never reused.
        let other = MarkerFile::locate(dir.path().join("other.json"));
        assert!(!cache.can_reuse(&file, &other));

        touch_future(&marker_path);
        assert!(!cache.can_reuse(&file, &MarkerFile::locate(&marker_path)));
    }

    #[test]
    fn test_missing_marker_is_changed() {
        let dir = tempfile::tempdir().unwrap();
        let marker_path = dir.path().join(".clang_complete");
        fs::write(&marker_path, "-Dx").unwrap();
        let marker = MarkerFile::locate(&marker_path);
        let cache = PathCache::new();
        cache.record(Path::new("/f.cpp"), &marker);

        fs::remove_file(&marker_path).unwrap();

        assert!(!cache.can_reuse(Path::new("/f.cpp"), &marker));
        assert!(!cache.is_marker_unchanged(&marker_path));
    }

    #[test]
    fn test_forget_marker() {
        let dir = tempfile::tempdir().unwrap();
        let marker_path = dir.path().join("m");
        fs::write(&marker_path, "").unwrap();
        let marker = MarkerFile::locate(&marker_path);
        let cache = PathCache::new();
        cache.record(Path::new("/f.cpp"), &marker);

        cache.forget_marker(&marker_path);

        assert!(!cache.can_reuse(Path::new("/f.cpp"), &marker));
    }
}
