// src/core/flags_source/flags_file.rs

use super::{FlagsSource, SourceError, locate_named};
use crate::core::cache::{MarkerFile, PathCache};
use crate::core::flag::FlagSet;
use crate::core::search_scope::SearchScope;
use crate::models::FlagsSourceKind;
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Reads a plain list of flags (`.clang_complete` by default), one per line.
#[derive(Debug)]
pub struct FlagsFileSource {
    file_name: String,
    include_prefixes: Vec<String>,
    path_cache: PathCache,
    parsed: Mutex<HashMap<PathBuf, FlagSet>>,
    parse_count: AtomicUsize,
}

impl FlagsFileSource {
    pub fn new(file_name: String, include_prefixes: Vec<String>) -> Self {
        Self {
            file_name,
            include_prefixes,
            path_cache: PathCache::new(),
            parsed: Mutex::new(HashMap::new()),
            parse_count: AtomicUsize::new(0),
        }
    }

    pub fn parse_count(&self) -> usize {
        self.parse_count.load(Ordering::SeqCst)
    }
}

impl FlagsSource for FlagsFileSource {
    fn kind(&self) -> FlagsSourceKind {
        FlagsSourceKind::FlagsFile
    }

    fn locate(&self, scope: &SearchScope) -> Option<MarkerFile> {
        locate_named(&self.file_name, scope)
    }

    fn resolve(&self, file: &Path, scope: &SearchScope) -> Result<Option<FlagSet>, SourceError> {
        let Some(marker) = self.locate(scope) else {
            return Ok(None);
        };
        let mut parsed = self.parsed.lock().unwrap_or_else(PoisonError::into_inner);

        if self.path_cache.can_reuse(file, &marker) {
            if let Some(flags) = parsed.get(&marker.path) {
                debug!("Reusing flags of '{}'", marker.path.display());
                return Ok(Some(flags.clone()).filter(|f| !f.is_empty()));
            }
        }

        let content = fs::read_to_string(&marker.path).map_err(|e| SourceError::io(&marker.path, e))?;
        let flags = FlagSet::parse(marker.folder(), content.lines(), &self.include_prefixes);
        self.parse_count.fetch_add(1, Ordering::SeqCst);
        debug!("Read {} flags from '{}'", flags.len(), marker.path.display());

        parsed.insert(marker.path.clone(), flags.clone());
        self.path_cache.record(file, &marker);
        Ok(Some(flags).filter(|f| !f.is_empty()))
    }
}
