// src/models.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::constants::{
    DEFAULT_JOB_DELAY, DEFAULT_MAX_CACHE_AGE, DEFAULT_SWEEP_PERIOD, FLAGS_FILENAME,
};

// --- FLAG SOURCES & ENGINES ---

/// The kinds of project artifacts flags can be read from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlagsSourceKind {
    /// A `compile_commands.json` found next to or above the file.
    CompilationDb,
    /// A `CMakeLists.txt` that is configured to produce a database.
    Cmake,
    /// A plain flags file, one flag per line.
    FlagsFile,
}

impl fmt::Display for FlagsSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CompilationDb => "compilation_db",
            Self::Cmake => "cmake",
            Self::FlagsFile => "flags_file",
        };
        f.write_str(name)
    }
}

/// The completion backends.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// A live translation unit kept in memory through libclang.
    Library,
    /// A clang subprocess per request.
    Process,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Library => f.write_str("libclang"),
            Self::Process => f.write_str("external compiler"),
        }
    }
}

/// Source language of a buffer, derived from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    C,
    Cpp,
    ObjC,
    ObjCpp,
}

impl Language {
    /// Guesses the language from a file name. Unknown extensions (including
    /// headers) are treated as C++.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("c") => Self::C,
            Some("m") => Self::ObjC,
            Some("mm") => Self::ObjCpp,
            _ => Self::Cpp,
        }
    }

    /// The name clang expects after `-x`.
    pub fn clang_name(self) -> &'static str {
        match self {
            Self::C => "c",
            Self::Cpp => "c++",
            Self::ObjC => "objective-c",
            Self::ObjCpp => "objective-c++",
        }
    }
}

// --- BUFFERS & REQUESTS ---

/// Identity of an open editor buffer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A 1-based (row, column) location inside a buffer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub row: u32,
    pub col: u32,
}

impl Position {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

/// What the host knows about a buffer at the time of a request.
#[derive(Debug, Clone)]
pub struct BufferSnapshot {
    pub id: BufferId,
    pub file_path: PathBuf,
    /// The current text, including unsaved edits.
    pub text: String,
}

impl BufferSnapshot {
    pub fn language(&self) -> Language {
        Language::from_path(&self.file_path)
    }
}

/// A file whose in-memory content overrides what is on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsavedFile {
    pub path: PathBuf,
    pub contents: String,
}

// --- RESULTS ---

/// One completion proposal, shaped for an editor: a tab-separated
/// `trigger\thint` label and a snippet with `${n:placeholder}` fields.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CompletionItem {
    pub label: String,
    pub snippet: String,
}

impl CompletionItem {
    /// The text before the tab in the label.
    pub fn trigger(&self) -> &str {
        self.label.split('\t').next().unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Note,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Parses the severity word clang prints (`error`, `fatal error`, ...).
    pub fn from_clang(word: &str) -> Option<Self> {
        match word {
            "note" => Some(Self::Note),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "fatal error" => Some(Self::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Note => "note",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal error",
        };
        f.write_str(name)
    }
}

/// A compiler message attached to a location.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub row: u32,
    pub col: u32,
    pub severity: Severity,
    pub message: String,
}

/// Cursor kinds of completion results that the exclusion policy can act on.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    ClassDecl,
    StructDecl,
    EnumConstant,
    Destructor,
    Constructor,
    Function,
    Method,
    Field,
    Variable,
    Macro,
    Namespace,
    Typedef,
    Other,
}

// --- SETTINGS ---

/// The deserialized `settings.toml`.
///
/// Every field has a default so a partial file is valid.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Flag sources in precedence order. The first one producing flags wins.
    pub flags_sources: Vec<FlagsSourceKind>,
    /// Prefixes whose body is a path (made absolute when relative).
    pub include_prefixes: Vec<String>,
    /// Flags added to every buffer. Supports `$project_base_path`,
    /// `$project_name` and `$clang_version`.
    pub common_flags: Vec<String>,
    pub c_flags: Vec<String>,
    pub cpp_flags: Vec<String>,
    pub objc_flags: Vec<String>,
    /// Add `-I<folder of the file>`.
    pub include_file_folder: bool,
    /// Add `-I<parent folder of the file>`.
    pub include_file_parent_folder: bool,
    /// Upper bound of marker searches. `None` searches up to the root.
    pub project_folder: Option<PathBuf>,
    /// Search exactly these folders, in order, instead of walking upward
    /// from the file.
    pub search_folders: Vec<PathBuf>,
    pub flags_file_name: String,
    pub cmake_binary: String,
    pub cmake_prefix_paths: Vec<String>,
    pub clang_binary: String,
    pub use_libclang: bool,
    /// Merge the compiler's predefined macros and include paths into the flags.
    pub use_default_definitions: bool,
    pub max_cache_age_secs: u64,
    pub sweep_period_secs: u64,
    pub job_delay_ms: u64,
    pub worker_threads: usize,
    /// Completion kinds that are never proposed.
    pub excluded_kinds: Vec<CursorKind>,
    /// Hide class and struct declarations unless completing after `::`.
    pub hide_class_decls_unless_scope: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            flags_sources: vec![
                FlagsSourceKind::CompilationDb,
                FlagsSourceKind::Cmake,
                FlagsSourceKind::FlagsFile,
            ],
            include_prefixes: vec!["-isystem".to_string(), "-I".to_string()],
            common_flags: vec!["-I/usr/include".to_string()],
            c_flags: vec!["-std=c11".to_string()],
            cpp_flags: vec!["-std=c++14".to_string()],
            objc_flags: Vec::new(),
            include_file_folder: true,
            include_file_parent_folder: true,
            project_folder: None,
            search_folders: Vec::new(),
            flags_file_name: FLAGS_FILENAME.to_string(),
            cmake_binary: "cmake".to_string(),
            cmake_prefix_paths: Vec::new(),
            clang_binary: "clang++".to_string(),
            use_libclang: true,
            use_default_definitions: false,
            max_cache_age_secs: DEFAULT_MAX_CACHE_AGE.as_secs(),
            sweep_period_secs: DEFAULT_SWEEP_PERIOD.as_secs(),
            job_delay_ms: u64::try_from(DEFAULT_JOB_DELAY.as_millis()).unwrap_or(50),
            worker_threads: 3,
            excluded_kinds: vec![CursorKind::Destructor, CursorKind::EnumConstant],
            hide_class_decls_unless_scope: true,
        }
    }
}

impl Settings {
    /// The language-specific flags for a buffer.
    pub fn lang_flags(&self, language: Language) -> &[String] {
        match language {
            Language::C => &self.c_flags,
            Language::Cpp => &self.cpp_flags,
            Language::ObjC | Language::ObjCpp => &self.objc_flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_extension() {
        assert_eq!(Language::from_path(Path::new("/a/b.c")), Language::C);
        assert_eq!(Language::from_path(Path::new("/a/b.cpp")), Language::Cpp);
        assert_eq!(Language::from_path(Path::new("/a/b.hpp")), Language::Cpp);
        assert_eq!(Language::from_path(Path::new("/a/b.mm")), Language::ObjCpp);
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            flags_sources = ["flags_file", "compilation_db"]
            use_libclang = false
            "#,
        )
        .unwrap();

        assert_eq!(
            settings.flags_sources,
            vec![FlagsSourceKind::FlagsFile, FlagsSourceKind::CompilationDb]
        );
        assert!(!settings.use_libclang);
        assert_eq!(settings.clang_binary, "clang++");
        assert_eq!(settings.max_cache_age_secs, 1800);
    }

    #[test]
    fn test_completion_item_trigger() {
        let item = CompletionItem {
            label: "push_back\tvoid push_back(const T &x)".to_string(),
            snippet: "push_back(${1:const T &x})".to_string(),
        };
        assert_eq!(item.trigger(), "push_back");
    }
}
