// src/core/flags_source/compilation_db.rs

use super::{FlagsSource, SourceError, locate_named};
use crate::constants::{
    COMPILATION_DB_FILENAME, DB_COMMAND_LEADING_TOKENS, DB_COMMAND_TRAILING_TOKENS,
};
use crate::core::cache::{MarkerFile, PathCache};
use crate::core::flag::FlagSet;
use crate::core::paths;
use crate::core::search_scope::SearchScope;
use crate::dev_utils::BlockTimer;
use crate::models::FlagsSourceKind;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// One object of a `compile_commands.json` array.
#[derive(Deserialize, Debug)]
struct CompileCommand {
    #[serde(default)]
    directory: Option<PathBuf>,
    file: PathBuf,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<String>>,
}

impl CompileCommand {
    /// The full argv of the entry, from either form.
    fn argv(&self) -> Vec<String> {
        if let Some(arguments) = &self.arguments {
            return arguments.clone();
        }
        let Some(command) = &self.command else {
            return Vec::new();
        };
        shlex::split(command).unwrap_or_else(|| {
            debug!("Unbalanced quotes in '{}', splitting on spaces", command);
            command.split_whitespace().map(str::to_string).collect()
        })
    }
}

/// Flags of every entry of one database, plus their union.
#[derive(Debug, Default)]
pub struct ParsedDatabase {
    entries: HashMap<PathBuf, FlagSet>,
    all: FlagSet,
}

impl ParsedDatabase {
    /// Flags for `file`: its own entry, else the union of all entries.
    pub fn flags_for(&self, file: &Path) -> Option<FlagSet> {
        let key = paths::normalize_path(file);
        if let Some(flags) = self.entries.get(&key) {
            return Some(flags.clone());
        }
        if self.all.is_empty() {
            None
        } else {
            debug!("'{}' not in database, using all flags", key.display());
            Some(self.all.clone())
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Drops the compiler at the front and `-o <out> -c <in>` at the back.
fn strip_command<S: AsRef<str>>(argv: &[S]) -> &[S] {
    let end = argv.len().saturating_sub(DB_COMMAND_TRAILING_TOKENS);
    argv.get(DB_COMMAND_LEADING_TOKENS..end).unwrap_or_default()
}

/// Parses the content of a database located in `db_folder`. Relative
/// include bodies are anchored at `db_folder`; an entry's `directory` only
/// locates its `file`.
pub fn parse_database(content: &str, db_folder: &Path, include_prefixes: &[String]) -> ParsedDatabase {
    let commands: Vec<CompileCommand> = match serde_json::from_str(content) {
        Ok(commands) => commands,
        Err(e) => {
            warn!("Malformed compilation database in '{}': {}", db_folder.display(), e);
            return ParsedDatabase::default();
        }
    };

    let mut parsed = ParsedDatabase::default();
    for command in &commands {
        let directory = match &command.directory {
            Some(dir) => paths::absolutize(db_folder, dir),
            None => db_folder.to_path_buf(),
        };
        let argv = command.argv();
        let flags = FlagSet::parse_tokens(db_folder, strip_command(&argv), include_prefixes);
        let file = paths::absolutize(&directory, &command.file);

        parsed.all = parsed.all.merge(&flags);
        parsed.entries.insert(file, flags);
    }
    parsed
}

/// Reads flags from a `compile_commands.json` found in the search scope.
#[derive(Debug)]
pub struct CompilationDatabaseSource {
    include_prefixes: Vec<String>,
    path_cache: PathCache,
    databases: Mutex<HashMap<PathBuf, Arc<ParsedDatabase>>>,
    parse_count: AtomicUsize,
}

impl CompilationDatabaseSource {
    pub fn new(include_prefixes: Vec<String>) -> Self {
        Self {
            include_prefixes,
            path_cache: PathCache::new(),
            databases: Mutex::new(HashMap::new()),
            parse_count: AtomicUsize::new(0),
        }
    }

    /// How many times a database file was read and parsed.
    pub fn parse_count(&self) -> usize {
        self.parse_count.load(Ordering::SeqCst)
    }

    /// Flags for `file` from the database at `marker`, parsing it only if
    /// it changed since it was last read.
    pub fn flags_from_marker(
        &self,
        file: &Path,
        marker: &MarkerFile,
    ) -> Result<Option<FlagSet>, SourceError> {
        let database = self.database(file, marker)?;
        Ok(database.flags_for(file))
    }

    /// True if the database at `path` was parsed and has not changed since.
    pub fn is_database_unchanged(&self, path: &Path) -> bool {
        self.path_cache.is_marker_unchanged(path)
    }

    /// Drops the parsed copy of the database at `path`.
    pub fn forget(&self, path: &Path) {
        let mut databases = self.databases.lock().unwrap_or_else(PoisonError::into_inner);
        databases.remove(path);
        self.path_cache.forget_marker(path);
    }

    fn database(&self, file: &Path, marker: &MarkerFile) -> Result<Arc<ParsedDatabase>, SourceError> {
        // Held for the whole check-parse-store sequence.
        let mut databases = self.databases.lock().unwrap_or_else(PoisonError::into_inner);

        let reusable = self.path_cache.can_reuse(file, marker)
            || self.path_cache.is_marker_unchanged(&marker.path);
        if let Some(parsed) = databases.get(&marker.path).filter(|_| reusable) {
            debug!("Reusing parsed database '{}'", marker.path.display());
            self.path_cache.record(file, marker);
            return Ok(Arc::clone(parsed));
        }

        let _timer = BlockTimer::new(format!("parse {}", marker.path.display()));
        let content = fs::read_to_string(&marker.path).map_err(|e| SourceError::io(&marker.path, e))?;
        let parsed = Arc::new(parse_database(&content, marker.folder(), &self.include_prefixes));
        self.parse_count.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Parsed {} entries from '{}'",
            parsed.len(),
            marker.path.display()
        );

        databases.insert(marker.path.clone(), Arc::clone(&parsed));
        self.path_cache.record(file, marker);
        Ok(parsed)
    }
}

impl FlagsSource for CompilationDatabaseSource {
    fn kind(&self) -> FlagsSourceKind {
        FlagsSourceKind::CompilationDb
    }

    fn locate(&self, scope: &SearchScope) -> Option<MarkerFile> {
        locate_named(COMPILATION_DB_FILENAME, scope)
    }

    fn resolve(&self, file: &Path, scope: &SearchScope) -> Result<Option<FlagSet>, SourceError> {
        match self.locate(scope) {
            Some(marker) => self.flags_from_marker(file, &marker),
            None => Ok(None),
        }
    }
}
