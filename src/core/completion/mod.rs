// src/core/completion/mod.rs

//! # Completion engines
//!
//! Two interchangeable backends produce completions and diagnostics for a
//! buffer: [`library::LibraryEngine`] keeps a parsed translation unit alive,
//! [`process::ProcessEngine`] runs the compiler once per request. Live
//! engines are owned by the [`session_cache::CompletionEngineCache`].

pub mod libclang;
pub mod library;
pub mod process;
pub mod session_cache;

use crate::models::{CompletionItem, CursorKind, Diagnostic, EngineKind, Position};
use crate::system::executor::ExecutionError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No libclang binding available: {0}")]
    LibraryUnavailable(String),
    #[error("Could not parse '{0}'")]
    ParseFailed(PathBuf),
    #[error("Completion failed for '{path}': {reason}")]
    CompletionFailed { path: PathBuf, reason: String },
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("Could not prepare temporary file: {0}")]
    TempFile(#[from] std::io::Error),
}

/// A backend able to complete and check one buffer.
pub trait CompletionEngine: Send + std::fmt::Debug {
    fn kind(&self) -> EngineKind;

    /// The arguments the engine was built with.
    fn flags(&self) -> &[String];

    /// Completions at `position`, with `text` standing in for the file's
    /// content on disk.
    fn complete(
        &mut self,
        file: &Path,
        text: &str,
        position: Position,
        policy: &ExclusionPolicy,
    ) -> Result<Vec<CompletionItem>, EngineError>;

    /// Brings the engine up to date with `text` and returns the diagnostics.
    fn update(&mut self, file: &Path, text: &str) -> Result<Vec<Diagnostic>, EngineError>;
}

/// Which completion results are hidden.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionPolicy {
    pub excluded_kinds: HashSet<CursorKind>,
    /// Hide class and struct declarations unless the member access
    /// operator before the cursor is `::`.
    pub hide_class_decls_unless_scope: bool,
}

impl ExclusionPolicy {
    pub fn new(excluded_kinds: impl IntoIterator<Item = CursorKind>, hide_class_decls_unless_scope: bool) -> Self {
        Self {
            excluded_kinds: excluded_kinds.into_iter().collect(),
            hide_class_decls_unless_scope,
        }
    }

    pub fn allows(&self, kind: CursorKind, operator: Option<&str>) -> bool {
        if self.excluded_kinds.contains(&kind) {
            return false;
        }
        let is_class_decl = matches!(kind, CursorKind::ClassDecl | CursorKind::StructDecl);
        !(is_class_decl && self.hide_class_decls_unless_scope && operator != Some("::"))
    }
}

/// The member access operator right before the identifier under the
/// cursor, if any. `position` is 1-based, columns count bytes.
pub fn access_operator(text: &str, position: Position) -> Option<&'static str> {
    let row = usize::try_from(position.row).ok()?.checked_sub(1)?;
    let col = usize::try_from(position.col).ok()?.checked_sub(1)?;
    let line = text.lines().nth(row)?;
    let before = line.get(..col.min(line.len()))?;
    let stem = before.trim_end_matches(|c: char| c.is_alphanumeric() || c == '_');
    ["::", "->", "."]
        .into_iter()
        .find(|operator| stem.ends_with(operator))
}
