// src/core/flags_cache.rs

//! # Flag resolution cache
//!
//! Remembers, for every source file, which flags it got and which artifacts
//! were looked at to get them. An entry stays valid as long as every source
//! consulted for it would find the same artifact, unchanged. When it does
//! not, the precedence chain is walked again from the start.
//!
//! The entry map is locked only to read or store an entry. Resolutions run
//! outside of it, serialized per file, so a slow CMake configure for one
//! project never holds up lookups for another.

use crate::core::cache::MarkerFile;
use crate::core::flag::FlagSet;
use crate::core::flags_source::FlagsSource;
use crate::core::search_scope::SearchScope;
use crate::models::FlagsSourceKind;
use log::{debug, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

/// What one source found while an entry was being resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceCheck {
    kind: FlagsSourceKind,
    marker: Option<(PathBuf, Option<SystemTime>)>,
}

/// The outcome of resolving flags for one file.
#[derive(Debug, Clone)]
pub struct FlagResolutionEntry {
    /// `None` if no source had flags for the file.
    pub flags: Option<FlagSet>,
    pub source: Option<FlagsSourceKind>,
    pub marker: Option<PathBuf>,
    order: Vec<FlagsSourceKind>,
    scope: SearchScope,
    checks: Vec<SourceCheck>,
}

impl FlagResolutionEntry {
    pub fn argument_list(&self) -> Vec<String> {
        self.flags
            .as_ref()
            .map(FlagSet::as_argument_list)
            .unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct FlagResolutionCache {
    sources: HashMap<FlagsSourceKind, Arc<dyn FlagsSource>>,
    entries: Mutex<HashMap<PathBuf, FlagResolutionEntry>>,
    in_flight: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    resolutions: AtomicUsize,
}

impl FlagResolutionCache {
    pub fn new(sources: Vec<Arc<dyn FlagsSource>>) -> Self {
        let sources = sources
            .into_iter()
            .map(|source| (source.kind(), source))
            .collect();
        Self {
            sources,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            resolutions: AtomicUsize::new(0),
        }
    }

    /// How many times the precedence chain was walked.
    pub fn resolution_count(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    /// The flat argument list for `file`. Empty if no source knows it.
    pub fn flags_for(&self, file: &Path, order: &[FlagsSourceKind], scope: &SearchScope) -> Vec<String> {
        self.resolve(file, order, scope).argument_list()
    }

    /// The cached entry for `file`, resolved again if it went stale.
    pub fn resolve(
        &self,
        file: &Path,
        order: &[FlagsSourceKind],
        scope: &SearchScope,
    ) -> FlagResolutionEntry {
        let file_lock = self.file_lock(file);
        let _guard = file_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let cached = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(file)
            .cloned();
        if let Some(entry) = cached {
            if self.is_valid(&entry, order, scope) {
                debug!("Flags for '{}' are cached", file.display());
                return entry;
            }
            debug!("Flags for '{}' are stale", file.display());
        }

        let entry = self.resolve_uncached(file, order, scope);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file.to_path_buf(), entry.clone());
        entry
    }

    fn file_lock(&self, file: &Path) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(in_flight.entry(file.to_path_buf()).or_default())
    }

    fn is_valid(&self, entry: &FlagResolutionEntry, order: &[FlagsSourceKind], scope: &SearchScope) -> bool {
        if entry.order != order || &entry.scope != scope {
            return false;
        }
        entry.checks.iter().all(|check| {
            let Some(source) = self.sources.get(&check.kind) else {
                return false;
            };
            match (&check.marker, source.locate(scope)) {
                (None, None) => true,
                (Some((path, Some(stamp))), Some(found)) => {
                    &found.path == path && source.is_fresh(&found, *stamp)
                }
                _ => false,
            }
        })
    }

    fn resolve_uncached(
        &self,
        file: &Path,
        order: &[FlagsSourceKind],
        scope: &SearchScope,
    ) -> FlagResolutionEntry {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        let mut entry = FlagResolutionEntry {
            flags: None,
            source: None,
            marker: None,
            order: order.to_vec(),
            scope: scope.clone(),
            checks: Vec::new(),
        };

        for kind in order {
            let Some(source) = self.sources.get(kind) else {
                warn!("No flags source registered for '{}'", kind);
                continue;
            };
            let marker = source.locate(scope);
            entry.checks.push(SourceCheck {
                kind: *kind,
                marker: marker.as_ref().map(|m: &MarkerFile| (m.path.clone(), m.mtime)),
            });
            let Some(marker) = marker else {
                continue;
            };

            match source.resolve(file, scope) {
                Ok(Some(flags)) if !flags.is_empty() => {
                    debug!(
                        "'{}' gets {} flags from {} '{}'",
                        file.display(),
                        flags.len(),
                        kind,
                        marker.path.display()
                    );
                    entry.flags = Some(flags);
                    entry.source = Some(*kind);
                    entry.marker = Some(marker.path);
                    return entry;
                }
                Ok(_) => debug!("{} has no flags for '{}'", kind, file.display()),
                Err(e) => warn!("{} unavailable for '{}': {}", kind, file.display(), e),
            }
        }

        debug!("No flags source knows '{}'", file.display());
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{COMPILATION_DB_FILENAME, FLAGS_FILENAME};
    use crate::core::flags_source::{CompilationDatabaseSource, FlagsFileSource};
    use std::fs::{self, File};
    use std::time::Duration;

    struct Fixture {
        dir: tempfile::TempDir,
        db: Arc<CompilationDatabaseSource>,
        flags_file: Arc<FlagsFileSource>,
        cache: FlagResolutionCache,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(CompilationDatabaseSource::new(vec!["-I".to_string()]));
        let flags_file = Arc::new(FlagsFileSource::new(
            FLAGS_FILENAME.to_string(),
            vec!["-I".to_string()],
        ));
        let cache = FlagResolutionCache::new(vec![
            db.clone() as Arc<dyn FlagsSource>,
            flags_file.clone() as Arc<dyn FlagsSource>,
        ]);
        Fixture {
            dir,
            db,
            flags_file,
            cache,
        }
    }

    fn write_db(dir: &Path) {
        let content = format!(
            r#"[{{"directory": "{0}", "file": "{0}/main.cpp", "command": "c++ -DFROM_DB -o m.o -c main.cpp"}}]"#,
            dir.display()
        );
        fs::write(dir.join(COMPILATION_DB_FILENAME), content).unwrap();
    }

    fn scope(dir: &Path) -> SearchScope {
        SearchScope::tree(dir, Some(dir.to_path_buf()))
    }

    const ORDER: [FlagsSourceKind; 2] = [FlagsSourceKind::CompilationDb, FlagsSourceKind::FlagsFile];

    #[test]
    fn test_database_takes_precedence() {
        // --- Setup ---
        let fx = fixture();
        write_db(fx.dir.path());
        fs::write(fx.dir.path().join(FLAGS_FILENAME), "-DFROM_FILE\n").unwrap();
        let file = fx.dir.path().join("main.cpp");

        // --- Execute ---
        let entry = fx.cache.resolve(&file, &ORDER, &scope(fx.dir.path()));

        // --- Assert ---
        assert_eq!(entry.argument_list(), vec!["-DFROM_DB"]);
        assert_eq!(entry.source, Some(FlagsSourceKind::CompilationDb));
        assert_eq!(entry.marker, Some(fx.dir.path().join(COMPILATION_DB_FILENAME)));
        assert_eq!(fx.flags_file.parse_count(), 0);
    }

    #[test]
    fn test_repeated_lookups_do_not_reparse() {
        let fx = fixture();
        write_db(fx.dir.path());
        let file = fx.dir.path().join("main.cpp");

        let first = fx.cache.flags_for(&file, &ORDER, &scope(fx.dir.path()));
        let second = fx.cache.flags_for(&file, &ORDER, &scope(fx.dir.path()));

        assert_eq!(first, second);
        assert_eq!(fx.db.parse_count(), 1);
        assert_eq!(fx.cache.resolution_count(), 1);
    }

    #[test]
    fn test_modified_database_is_reparsed() {
        // --- Setup ---
        let fx = fixture();
        write_db(fx.dir.path());
        let file = fx.dir.path().join("main.cpp");
        fx.cache.flags_for(&file, &ORDER, &scope(fx.dir.path()));

        // --- Execute ---
        File::options()
            .write(true)
            .open(fx.dir.path().join(COMPILATION_DB_FILENAME))
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        fx.cache.flags_for(&file, &ORDER, &scope(fx.dir.path()));

        // --- Assert ---
        assert_eq!(fx.db.parse_count(), 2);
        assert_eq!(fx.cache.resolution_count(), 2);
    }

    #[test]
    fn test_falls_through_to_flags_file() {
        let fx = fixture();
        fs::write(fx.dir.path().join(FLAGS_FILENAME), "-DFROM_FILE\n").unwrap();
        let file = fx.dir.path().join("main.cpp");

        let flags = fx.cache.flags_for(&file, &ORDER, &scope(fx.dir.path()));

        assert_eq!(flags, vec!["-DFROM_FILE"]);
    }

    #[test]
    fn test_new_marker_invalidates_entry() {
        // --- Setup ---
        let fx = fixture();
        let file = fx.dir.path().join("main.cpp");
        assert!(fx.cache.flags_for(&file, &ORDER, &scope(fx.dir.path())).is_empty());

        // --- Execute ---
        write_db(fx.dir.path());
        let flags = fx.cache.flags_for(&file, &ORDER, &scope(fx.dir.path()));

        // --- Assert ---
        assert_eq!(flags, vec!["-DFROM_DB"]);
        assert_eq!(fx.cache.resolution_count(), 2);
    }

    #[cfg(unix)]
    mod cmake {
        use super::*;
        use crate::constants::CMAKE_LISTS_FILENAME;
        use crate::core::flags_source::CmakeSource;
        use std::os::unix::fs::PermissionsExt;
        use std::thread;
        use std::time::Instant;

        const FAKE_CMAKE: &str = r#"#!/bin/sh
cat > compile_commands.json <<EOF
[{"directory": "$PWD", "file": "$2/a.cpp", "command": "c++ -I$2/lib -o a.o -c $2/a.cpp"}]
EOF
"#;

        const SLOW_CMAKE: &str = "#!/bin/sh\nsleep 3\n";

        fn cmake_source(dir: &Path, script: &str) -> Arc<CmakeSource> {
            let fake = dir.join("fake-cmake");
            fs::write(&fake, script).unwrap();
            fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();
            Arc::new(CmakeSource::new(
                fake.to_string_lossy().into_owned(),
                Vec::new(),
                dir.join("tmp"),
                vec!["-I".to_string()],
            ))
        }

        fn cmake_project(root: &Path) -> PathBuf {
            let project = root.join("proj");
            fs::create_dir_all(&project).unwrap();
            fs::write(project.join(CMAKE_LISTS_FILENAME), "project(demo)\n").unwrap();
            project
        }

        #[test]
        fn test_cmake_fallback_resolves_once() {
            // --- Setup ---
            let dir = tempfile::tempdir().unwrap();
            let project = cmake_project(dir.path());
            let cmake = cmake_source(dir.path(), FAKE_CMAKE);
            let cache = FlagResolutionCache::new(vec![
                Arc::new(CompilationDatabaseSource::new(vec!["-I".to_string()])) as Arc<dyn FlagsSource>,
                cmake.clone() as Arc<dyn FlagsSource>,
            ]);
            let order = [FlagsSourceKind::CompilationDb, FlagsSourceKind::Cmake];
            let file = project.join("a.cpp");

            // --- Execute ---
            let first = cache.resolve(&file, &order, &scope(&project));
            let second = cache.flags_for(&file, &order, &scope(&project));

            // --- Assert ---
            let include = format!("-I{}", project.join("lib").display());
            assert_eq!(first.argument_list(), vec![include.clone()]);
            assert_eq!(first.source, Some(FlagsSourceKind::Cmake));
            assert_eq!(second, vec![include]);
            assert_eq!(cmake.generator_runs(), 1);
            assert_eq!(cache.resolution_count(), 1);
        }

        #[test]
        fn test_slow_configure_does_not_block_other_projects() {
            // --- Setup ---
            let dir = tempfile::tempdir().unwrap();
            let slow_project = cmake_project(dir.path());
            let other_project = dir.path().join("other");
            fs::create_dir_all(&other_project).unwrap();
            fs::write(other_project.join(FLAGS_FILENAME), "-DOTHER\n").unwrap();

            let cache = Arc::new(FlagResolutionCache::new(vec![
                cmake_source(dir.path(), SLOW_CMAKE) as Arc<dyn FlagsSource>,
                Arc::new(FlagsFileSource::new(FLAGS_FILENAME.to_string(), vec!["-I".to_string()]))
                    as Arc<dyn FlagsSource>,
            ]));
            let order = [FlagsSourceKind::Cmake, FlagsSourceKind::FlagsFile];

            // --- Execute ---
            let background = {
                let cache = Arc::clone(&cache);
                let file = slow_project.join("a.cpp");
                let scope = scope(&slow_project);
                thread::spawn(move || cache.flags_for(&file, &order, &scope))
            };
            thread::sleep(Duration::from_millis(300));
            let started = Instant::now();
            let flags = cache.flags_for(&other_project.join("b.cpp"), &order, &scope(&other_project));
            let waited = started.elapsed();

            // --- Assert ---
            assert_eq!(flags, vec!["-DOTHER"]);
            assert!(waited < Duration::from_secs(1), "lookup waited {:?}", waited);
            assert!(background.join().unwrap().is_empty());
        }
    }
}
