// src/core/completion/library.rs

use super::{CompletionEngine, EngineError, ExclusionPolicy, access_operator};
use crate::dev_utils::BlockTimer;
use crate::models::{CompletionItem, CursorKind, Diagnostic, EngineKind, Position, UnsavedFile};
use crate::system::executor;
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

lazy_static! {
    static ref CLANG_VERSION_RE: Regex =
        Regex::new(r"clang version (\d+(?:\.\d+)*)").expect("Invalid version regex");
}

/// Role of one piece of a completion string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// The text the user types; it becomes the trigger.
    TypedText,
    ResultType,
    Placeholder,
    Optional,
    Informative,
    /// Punctuation and any other literal text.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionChunk {
    pub kind: ChunkKind,
    pub spelling: String,
}

impl CompletionChunk {
    pub fn new(kind: ChunkKind, spelling: impl Into<String>) -> Self {
        Self {
            kind,
            spelling: spelling.into(),
        }
    }
}

/// A completion result as the library reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCompletion {
    pub chunks: Vec<CompletionChunk>,
    pub kind: CursorKind,
    /// Lower is more relevant.
    pub priority: u32,
}

impl RawCompletion {
    /// Builds the `trigger\thint` label and the snippet. Result types only
    /// go to the hint, placeholders become numbered snippet fields, optional
    /// and informative chunks are left out.
    pub fn to_item(&self) -> CompletionItem {
        let mut trigger = String::new();
        let mut hint = String::new();
        let mut snippet = String::new();
        let mut field = 1;

        for chunk in &self.chunks {
            match chunk.kind {
                ChunkKind::Optional | ChunkKind::Informative => continue,
                ChunkKind::ResultType => {
                    hint.push_str(&chunk.spelling);
                    hint.push(' ');
                    continue;
                }
                ChunkKind::TypedText => {
                    trigger.push_str(&chunk.spelling);
                    snippet.push_str(&chunk.spelling);
                }
                ChunkKind::Placeholder => {
                    snippet.push_str(&format!("${{{}:{}}}", field, chunk.spelling));
                    field += 1;
                }
                ChunkKind::Text => snippet.push_str(&chunk.spelling),
            }
            hint.push_str(&chunk.spelling);
        }

        CompletionItem {
            label: format!("{}\t{}", trigger, hint),
            snippet,
        }
    }
}

/// How a translation unit is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    pub precompiled_preamble: bool,
    pub cache_completion_results: bool,
}

impl ParseOptions {
    /// The options for a unit that is completed and reparsed repeatedly.
    pub const EDITING: Self = Self {
        precompiled_preamble: true,
        cache_completion_results: true,
    };
}

/// A parsed translation unit held by a binding.
pub trait TranslationUnit: Send + std::fmt::Debug {
    fn reparse(&mut self, unsaved: &[UnsavedFile]) -> Result<(), EngineError>;

    fn code_complete(
        &mut self,
        file: &Path,
        position: Position,
        unsaved: &[UnsavedFile],
    ) -> Result<Vec<RawCompletion>, EngineError>;

    fn diagnostics(&self) -> Vec<Diagnostic>;
}

/// One libclang binding.
pub trait ClangLibrary: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn parse(
        &self,
        file: &Path,
        args: &[String],
        unsaved: &[UnsavedFile],
        options: ParseOptions,
    ) -> Result<Box<dyn TranslationUnit>, EngineError>;
}

/// Bindings keyed by the clang version prefix they support.
#[derive(Debug, Default, Clone)]
pub struct LibraryRegistry {
    bindings: HashMap<String, Arc<dyn ClangLibrary>>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, version_prefix: impl Into<String>, library: Arc<dyn ClangLibrary>) {
        self.bindings.insert(version_prefix.into(), library);
    }

    /// The binding with the longest prefix matching `version`.
    pub fn resolve(&self, version: &str) -> Result<Arc<dyn ClangLibrary>, EngineError> {
        self.bindings
            .iter()
            .filter(|(prefix, _)| version.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, library)| {
                debug!("Using binding '{}' ({}) for clang {}", library.name(), prefix, version);
                Arc::clone(library)
            })
            .ok_or_else(|| EngineError::LibraryUnavailable(format!("no binding for clang {}", version)))
    }
}

/// Extracts the version number from `clang --version` output.
pub fn parse_clang_version(output: &str) -> Option<String> {
    CLANG_VERSION_RE
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Runs `<clang_binary> --version` and returns the version number.
pub fn detect_clang_version(clang_binary: &str, cwd: &Path) -> Result<String, EngineError> {
    let output = executor::execute_args(
        clang_binary,
        &["--version".to_string()],
        cwd,
        &HashMap::new(),
        None,
    )?;
    parse_clang_version(&output.combined()).ok_or_else(|| {
        EngineError::LibraryUnavailable(format!("could not read the version of '{}'", clang_binary))
    })
}

/// Completion through a live translation unit.
#[derive(Debug)]
pub struct LibraryEngine {
    unit: Box<dyn TranslationUnit>,
    flags: Vec<String>,
    file: PathBuf,
}

impl LibraryEngine {
    /// Parses `file` with `flags`, using `text` as its content.
    pub fn build(
        library: &dyn ClangLibrary,
        file: &Path,
        flags: Vec<String>,
        text: &str,
    ) -> Result<Self, EngineError> {
        let _timer = BlockTimer::new(format!("parse {}", file.display()));
        let unsaved = unsaved_for(file, text);
        let unit = library.parse(file, &flags, &unsaved, ParseOptions::EDITING)?;
        info!("Parsed translation unit for '{}'", file.display());
        Ok(Self {
            unit,
            flags,
            file: file.to_path_buf(),
        })
    }
}

fn unsaved_for(file: &Path, text: &str) -> Vec<UnsavedFile> {
    vec![UnsavedFile {
        path: file.to_path_buf(),
        contents: text.to_string(),
    }]
}

impl CompletionEngine for LibraryEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Library
    }

    fn flags(&self) -> &[String] {
        &self.flags
    }

    fn complete(
        &mut self,
        file: &Path,
        text: &str,
        position: Position,
        policy: &ExclusionPolicy,
    ) -> Result<Vec<CompletionItem>, EngineError> {
        let _timer = BlockTimer::new(format!("complete {}", self.file.display()));
        let mut results = self.unit.code_complete(file, position, &unsaved_for(file, text))?;
        results.sort_by_key(|r| r.priority);

        let operator = access_operator(text, position);
        let items: Vec<CompletionItem> = results
            .iter()
            .filter(|r| policy.allows(r.kind, operator))
            .map(RawCompletion::to_item)
            .collect();
        debug!("{} of {} completions kept", items.len(), results.len());
        Ok(items)
    }

    fn update(&mut self, file: &Path, text: &str) -> Result<Vec<Diagnostic>, EngineError> {
        let _timer = BlockTimer::new(format!("reparse {}", self.file.display()));
        self.unit.reparse(&unsaved_for(file, text))?;
        Ok(self.unit.diagnostics())
    }
}
