// src/core/flags_source/cmake.rs

//! # CMake flags source
//!
//! Configures a CMake project in a private build directory so that it emits
//! a compilation database, then reads flags from that database.
//!
//! Configuring is slow, so after every successful run the files the
//! configure step depended on are recorded, with their modification times,
//! in a dependency manifest (bincode + lz4, like every binary cache of this
//! crate). CMake runs again only when:
//! - the manifest or the database is missing or unreadable,
//! - a recorded dependency changed, disappeared or appeared.

use super::{CompilationDatabaseSource, FlagsSource, SourceError};
use crate::constants::{
    CMAKE_DEPS_CACHE_FILENAME, CMAKE_LISTS_FILENAME, CMAKE_MAKEFILE_MANIFEST,
    CMAKE_PROJECT_MARKER, COMPILATION_DB_FILENAME,
};
use crate::core::cache::{self, MarkerFile};
use crate::core::flag::FlagSet;
use crate::core::paths;
use crate::core::search_scope::SearchScope;
use crate::dev_utils::BlockTimer;
use crate::models::FlagsSourceKind;
use crate::system::executor;
use lazy_static::lazy_static;
use log::{debug, info, trace, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use thiserror::Error;
use walkdir::WalkDir;

lazy_static! {
    static ref MAKEFILE_DEPENDS: Regex =
        Regex::new(r"(?s)set\(CMAKE_MAKEFILE_DEPENDS(.*?)\)").expect("Invalid depends regex");
    static ref QUOTED: Regex = Regex::new(r#""([^"]+)""#).expect("Invalid quoted regex");
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Manifest I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Manifest file is empty")]
    Empty,
    #[error("Manifest could not be decompressed: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
    #[error("Manifest could not be decoded: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("Manifest could not be encoded: {0}")]
    Encode(#[from] bincode::error::EncodeError),
}

/// A file the configure step read, as it was right after the run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    pub path: PathBuf,
    /// `None` if the file did not exist.
    pub mtime: Option<SystemTime>,
}

impl TrackedFile {
    fn capture(path: PathBuf) -> Self {
        let mtime = cache::modification_time(&path);
        Self { path, mtime }
    }

    fn has_changed(&self) -> bool {
        cache::modification_time(&self.path) != self.mtime
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DependencyManifest {
    pub cmake_lists: PathBuf,
    pub dependencies: Vec<TrackedFile>,
}

impl DependencyManifest {
    /// Records `cmake_lists` and every path of `dependencies`, once each.
    pub fn capture(cmake_lists: &Path, dependencies: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut seen = HashSet::new();
        let tracked = std::iter::once(cmake_lists.to_path_buf())
            .chain(dependencies)
            .filter(|path| seen.insert(path.clone()))
            .map(TrackedFile::capture)
            .collect();
        Self {
            cmake_lists: cmake_lists.to_path_buf(),
            dependencies: tracked,
        }
    }

    /// The first dependency that differs from its recorded state.
    pub fn stale_dependency(&self) -> Option<&Path> {
        self.dependencies
            .iter()
            .find(|dep| dep.has_changed())
            .map(|dep| dep.path.as_path())
    }
}

pub fn read_manifest(path: &Path) -> Result<DependencyManifest, ManifestError> {
    let compressed = fs::read(path)?;
    if compressed.is_empty() {
        return Err(ManifestError::Empty);
    }
    let bytes = lz4_flex::decompress_size_prepended(&compressed)?;
    let (manifest, _): (DependencyManifest, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
    Ok(manifest)
}

pub fn write_manifest(path: &Path, manifest: &DependencyManifest) -> Result<(), ManifestError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = bincode::serde::encode_to_vec(manifest, bincode::config::standard())?;
    let compressed = lz4_flex::compress_prepend_size(&bytes);
    trace!(
        "Manifest '{}': {} bytes, {} compressed",
        path.display(),
        bytes.len(),
        compressed.len()
    );
    fs::write(path, compressed)?;
    Ok(())
}

/// The files the configure step of `project_folder` depended on.
///
/// CMake's own `CMakeFiles/Makefile.cmake` is used when the generator wrote
/// one. Otherwise every `CMakeLists.txt` and `*.cmake` file of the project
/// is tracked. Files inside `build_dir` are never tracked.
pub fn collect_dependencies(build_dir: &Path, project_folder: &Path) -> Vec<PathBuf> {
    let from_makefile = fs::read_to_string(build_dir.join(CMAKE_MAKEFILE_MANIFEST))
        .ok()
        .and_then(|content| parse_makefile_depends(&content, build_dir));

    let dependencies = match from_makefile {
        Some(deps) => deps,
        None => {
            trace!("No makefile manifest, scanning '{}'", project_folder.display());
            scan_project(project_folder, build_dir)
        }
    };
    dependencies
        .into_iter()
        .filter(|path| !path.starts_with(build_dir))
        .collect()
}

fn parse_makefile_depends(content: &str, build_dir: &Path) -> Option<Vec<PathBuf>> {
    let block = MAKEFILE_DEPENDS.captures(content)?.get(1)?.as_str();
    let deps = QUOTED
        .captures_iter(block)
        .filter_map(|c| c.get(1))
        .map(|m| paths::absolutize(build_dir, Path::new(m.as_str())))
        .collect();
    Some(deps)
}

fn scan_project(project_folder: &Path, build_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(project_folder)
        .into_iter()
        .filter_entry(|entry| {
            let hidden = entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.');
            !hidden && !entry.path().starts_with(build_dir)
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name == CMAKE_LISTS_FILENAME || name.ends_with(".cmake")
        })
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// What is on disk for one CMake project.
#[derive(Debug, Clone)]
pub struct CmakeBuildInfo {
    pub cmake_lists: PathBuf,
    pub build_dir: PathBuf,
    pub database: Option<PathBuf>,
    pub manifest: Option<DependencyManifest>,
    pub needs_generation: bool,
}

#[derive(Debug)]
pub struct CmakeSource {
    cmake_binary: String,
    prefix_paths: Vec<String>,
    temp_root: PathBuf,
    database: CompilationDatabaseSource,
    /// One lock per project, so configuring one never blocks another.
    generation_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    generator_runs: AtomicUsize,
}

impl CmakeSource {
    pub fn new(
        cmake_binary: String,
        prefix_paths: Vec<String>,
        temp_root: PathBuf,
        include_prefixes: Vec<String>,
    ) -> Self {
        Self {
            cmake_binary,
            prefix_paths,
            temp_root,
            database: CompilationDatabaseSource::new(include_prefixes),
            generation_locks: Mutex::new(HashMap::new()),
            generator_runs: AtomicUsize::new(0),
        }
    }

    /// How many times the generator was started.
    pub fn generator_runs(&self) -> usize {
        self.generator_runs.load(Ordering::SeqCst)
    }

    pub fn build_dir_for(&self, cmake_lists: &Path) -> PathBuf {
        paths::cmake_build_dir(&self.temp_root, cmake_lists)
    }

    fn database_path(&self, cmake_lists: &Path) -> PathBuf {
        self.build_dir_for(cmake_lists).join(COMPILATION_DB_FILENAME)
    }

    fn manifest_path(&self, cmake_lists: &Path) -> PathBuf {
        self.build_dir_for(cmake_lists).join(CMAKE_DEPS_CACHE_FILENAME)
    }

    fn generation_lock(&self, cmake_lists: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .generation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(cmake_lists.to_path_buf()).or_default())
    }

    /// True if the project of `cmake_lists` must be configured again.
    pub fn needs_generation(&self, cmake_lists: &Path) -> bool {
        if !self.database_path(cmake_lists).is_file() {
            debug!("No database yet for '{}'", cmake_lists.display());
            return true;
        }
        let manifest = match read_manifest(&self.manifest_path(cmake_lists)) {
            Ok(manifest) => manifest,
            Err(e) => {
                debug!("Dependency manifest unusable for '{}': {}", cmake_lists.display(), e);
                return true;
            }
        };
        if manifest.cmake_lists != cmake_lists {
            return true;
        }
        match manifest.stale_dependency() {
            Some(dep) => {
                debug!("'{}' changed since last configure", dep.display());
                true
            }
            None => false,
        }
    }

    /// Path of an up-to-date database for the project, configuring it if
    /// needed. `None` if the generator did not produce one.
    pub fn ensure_database(&self, marker: &MarkerFile) -> Result<Option<PathBuf>, SourceError> {
        let lock = self.generation_lock(&marker.path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.needs_generation(&marker.path) {
            self.generate(marker)
        } else {
            Ok(Some(self.database_path(&marker.path)))
        }
    }

    fn generate(&self, marker: &MarkerFile) -> Result<Option<PathBuf>, SourceError> {
        let project_folder = marker.folder();
        let build_dir = self.build_dir_for(&marker.path);
        let _timer = BlockTimer::new(format!("cmake {}", project_folder.display()));

        if build_dir.exists() {
            fs::remove_dir_all(&build_dir).map_err(|e| SourceError::BuildDir {
                path: build_dir.clone(),
                source: e,
            })?;
        }
        fs::create_dir_all(&build_dir).map_err(|e| SourceError::BuildDir {
            path: build_dir.clone(),
            source: e,
        })?;

        let args = vec![
            "-DCMAKE_EXPORT_COMPILE_COMMANDS=ON".to_string(),
            project_folder.to_string_lossy().into_owned(),
        ];
        info!(
            "Configuring '{}' in '{}'",
            project_folder.display(),
            build_dir.display()
        );
        let output = executor::execute_args(
            &self.cmake_binary,
            &args,
            &build_dir,
            &self.prefix_path_env(),
            None,
        )?;
        self.generator_runs.fetch_add(1, Ordering::SeqCst);

        if output.success() {
            debug!("cmake output:\n{}", output.stdout.trim_end());
        } else {
            warn!(
                "cmake exited with {} for '{}':\n{}",
                output.status,
                project_folder.display(),
                output.combined().trim_end()
            );
        }

        let database = build_dir.join(COMPILATION_DB_FILENAME);
        if !database.is_file() {
            warn!("cmake produced no compilation database for '{}'", project_folder.display());
            return Ok(None);
        }

        let manifest = DependencyManifest::capture(
            &marker.path,
            collect_dependencies(&build_dir, project_folder),
        );
        if let Err(e) = write_manifest(&build_dir.join(CMAKE_DEPS_CACHE_FILENAME), &manifest) {
            warn!("Could not store dependency manifest: {}", e);
        }
        Ok(Some(database))
    }

    /// `CMAKE_PREFIX_PATH` with the configured paths in front of whatever the
    /// environment already has.
    fn prefix_path_env(&self) -> HashMap<String, String> {
        let mut entries: Vec<PathBuf> = Vec::new();
        for template in &self.prefix_paths {
            match paths::expand_path_template(template) {
                Ok(path) => entries.push(path),
                Err(e) => warn!("Skipping CMake prefix path: {}", e),
            }
        }
        if let Some(existing) = env::var_os("CMAKE_PREFIX_PATH") {
            entries.extend(env::split_paths(&existing));
        }

        let mut env_vars = HashMap::new();
        if entries.is_empty() {
            return env_vars;
        }
        match env::join_paths(&entries) {
            Ok(joined) => {
                env_vars.insert(
                    "CMAKE_PREFIX_PATH".to_string(),
                    joined.to_string_lossy().into_owned(),
                );
            }
            Err(e) => warn!("Invalid CMake prefix path: {}", e),
        }
        env_vars
    }

    /// Reports the build directory state of the project of `cmake_lists`.
    pub fn inspect(&self, cmake_lists: &Path) -> CmakeBuildInfo {
        let database = self.database_path(cmake_lists);
        CmakeBuildInfo {
            cmake_lists: cmake_lists.to_path_buf(),
            build_dir: self.build_dir_for(cmake_lists),
            database: database.is_file().then_some(database),
            manifest: read_manifest(&self.manifest_path(cmake_lists)).ok(),
            needs_generation: self.needs_generation(cmake_lists),
        }
    }

    /// Deletes the build directory of the project. Returns false if there
    /// was nothing to delete.
    pub fn clear(&self, cmake_lists: &Path) -> Result<bool, SourceError> {
        let lock = self.generation_lock(cmake_lists);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let build_dir = self.build_dir_for(cmake_lists);
        self.database.forget(&build_dir.join(COMPILATION_DB_FILENAME));
        if !build_dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&build_dir).map_err(|e| SourceError::BuildDir {
            path: build_dir.clone(),
            source: e,
        })?;
        info!("Removed '{}'", build_dir.display());
        Ok(true)
    }
}

impl FlagsSource for CmakeSource {
    fn kind(&self) -> FlagsSourceKind {
        FlagsSourceKind::Cmake
    }

    fn locate(&self, scope: &SearchScope) -> Option<MarkerFile> {
        let is_project: &dyn Fn(&str) -> bool = &|content| content.contains(CMAKE_PROJECT_MARKER);
        cache::find_marker(CMAKE_LISTS_FILENAME, scope, Some(is_project))
    }

    fn resolve(&self, file: &Path, scope: &SearchScope) -> Result<Option<FlagSet>, SourceError> {
        let Some(marker) = self.locate(scope) else {
            return Ok(None);
        };
        match self.ensure_database(&marker)? {
            Some(database) => self
                .database
                .flags_from_marker(file, &MarkerFile::locate(database)),
            None => Ok(None),
        }
    }

    fn is_fresh(&self, marker: &MarkerFile, stamp: SystemTime) -> bool {
        marker.is_unchanged_since(stamp)
            && !self.needs_generation(&marker.path)
            && self
                .database
                .is_database_unchanged(&self.database_path(&marker.path))
    }
}
