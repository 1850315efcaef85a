// src/core/flags_source/mod.rs

//! # Flag sources
//!
//! A flag source turns a project artifact (a marker file found near the
//! source file) into a [`FlagSet`]. Each source keeps its own parsed data
//! and decides by itself when the artifact must be read again.

pub mod cmake;
pub mod compilation_db;
pub mod flags_file;

use crate::core::cache::{self, MarkerFile};
use crate::core::flag::FlagSet;
use crate::core::search_scope::SearchScope;
use crate::models::{FlagsSourceKind, Settings};
use crate::system::executor::ExecutionError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

pub use cmake::CmakeSource;
pub use compilation_db::CompilationDatabaseSource;
pub use flags_file::FlagsFileSource;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Could not read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not prepare build directory '{path}': {source}")]
    BuildDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Build generator could not be started: {0}")]
    Generator(#[from] ExecutionError),
}

impl SourceError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A provider of compiler flags for source files.
pub trait FlagsSource: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> FlagsSourceKind;

    /// Finds the artifact this source reads for files in `scope`.
    fn locate(&self, scope: &SearchScope) -> Option<MarkerFile>;

    /// Flags for `file`, or `None` if this source has nothing to say about
    /// it. Errors are I/O failures on an artifact that was just located.
    fn resolve(&self, file: &Path, scope: &SearchScope) -> Result<Option<FlagSet>, SourceError>;

    /// True if flags produced from `marker` at `stamp` are still valid.
    fn is_fresh(&self, marker: &MarkerFile, stamp: SystemTime) -> bool {
        marker.is_unchanged_since(stamp)
    }
}

/// Instantiates one source of every kind, configured from `settings`.
/// `temp_root` hosts the CMake build directories.
pub fn build_sources(settings: &Settings, temp_root: &Path) -> Vec<Arc<dyn FlagsSource>> {
    let prefixes = settings.include_prefixes.clone();
    vec![
        Arc::new(CompilationDatabaseSource::new(prefixes.clone())),
        Arc::new(CmakeSource::new(
            settings.cmake_binary.clone(),
            settings.cmake_prefix_paths.clone(),
            temp_root.to_path_buf(),
            prefixes.clone(),
        )),
        Arc::new(FlagsFileSource::new(
            settings.flags_file_name.clone(),
            prefixes,
        )),
    ]
}

/// The marker lookup shared by the sources without content requirements.
pub(crate) fn locate_named(name: &str, scope: &SearchScope) -> Option<MarkerFile> {
    cache::find_marker(name, scope, None)
}
