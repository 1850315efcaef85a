// src/core/completion/libclang.rs

//! # libclang binding
//!
//! libclang is loaded at runtime into one service thread. That thread owns
//! the library handle, the index and every parsed translation unit, none of
//! which may leave it. Units handed out to engines are ids plus a channel
//! back to the service.

use super::EngineError;
use super::library::{
    ChunkKind, ClangLibrary, CompletionChunk, ParseOptions, RawCompletion, TranslationUnit,
    parse_clang_version,
};
use crate::models::{CursorKind, Diagnostic, Position, Severity, UnsavedFile};
use clang::completion::{CompletionChunk as ClangChunk, CompletionString};
use clang::diagnostic::Severity as ClangSeverity;
use clang::{Clang, EntityKind, Index, TranslationUnit as ClangUnit, Unsaved};
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

type UnitId = u64;
type Reply<T> = Sender<Result<T, EngineError>>;

#[derive(Debug)]
enum Request {
    Parse {
        file: PathBuf,
        args: Vec<String>,
        unsaved: Vec<UnsavedFile>,
        options: ParseOptions,
        reply: Reply<(UnitId, Vec<Diagnostic>)>,
    },
    Reparse {
        unit: UnitId,
        file: PathBuf,
        unsaved: Vec<UnsavedFile>,
        reply: Reply<Vec<Diagnostic>>,
    },
    Complete {
        unit: UnitId,
        file: PathBuf,
        position: Position,
        unsaved: Vec<UnsavedFile>,
        reply: Reply<Vec<RawCompletion>>,
    },
    Dispose {
        unit: UnitId,
    },
}

/// The system libclang, serving every engine from one thread.
#[derive(Debug)]
pub struct LibclangBinding {
    requests: Sender<Request>,
    version: String,
}

impl LibclangBinding {
    /// Loads libclang on a new service thread. Fails if the library cannot
    /// be found or another binding already holds it.
    pub fn start() -> Result<Self, EngineError> {
        let (requests, inbox) = mpsc::channel();
        let (ready, loaded) = mpsc::channel();
        thread::Builder::new()
            .name("libclang".to_string())
            .spawn(move || serve(inbox, ready))
            .map_err(|e| EngineError::LibraryUnavailable(format!("could not start libclang thread: {}", e)))?;

        let version = loaded
            .recv()
            .map_err(|_| stopped())?
            .map_err(EngineError::LibraryUnavailable)?;
        info!("Loaded {}", version);
        Ok(Self { requests, version })
    }

    /// The registry key of this binding: the major version with its dot,
    /// so `14.` serves clang 14.0.6 but not 140.
    pub fn version_prefix(&self) -> Option<String> {
        let version = parse_clang_version(&self.version)?;
        let major = version.split('.').next()?;
        Some(format!("{}.", major))
    }
}

impl ClangLibrary for LibclangBinding {
    fn name(&self) -> &str {
        &self.version
    }

    fn parse(
        &self,
        file: &Path,
        args: &[String],
        unsaved: &[UnsavedFile],
        options: ParseOptions,
    ) -> Result<Box<dyn TranslationUnit>, EngineError> {
        let (id, diagnostics) = round_trip(&self.requests, |reply| Request::Parse {
            file: file.to_path_buf(),
            args: args.to_vec(),
            unsaved: unsaved.to_vec(),
            options,
            reply,
        })?;
        Ok(Box::new(LibclangUnit {
            id,
            file: file.to_path_buf(),
            requests: self.requests.clone(),
            diagnostics,
        }))
    }
}

/// A translation unit living on the service thread. Dropping it releases
/// the unit there.
#[derive(Debug)]
struct LibclangUnit {
    id: UnitId,
    file: PathBuf,
    requests: Sender<Request>,
    diagnostics: Vec<Diagnostic>,
}

impl TranslationUnit for LibclangUnit {
    fn reparse(&mut self, unsaved: &[UnsavedFile]) -> Result<(), EngineError> {
        self.diagnostics = round_trip(&self.requests, |reply| Request::Reparse {
            unit: self.id,
            file: self.file.clone(),
            unsaved: unsaved.to_vec(),
            reply,
        })?;
        Ok(())
    }

    fn code_complete(
        &mut self,
        file: &Path,
        position: Position,
        unsaved: &[UnsavedFile],
    ) -> Result<Vec<RawCompletion>, EngineError> {
        round_trip(&self.requests, |reply| Request::Complete {
            unit: self.id,
            file: file.to_path_buf(),
            position,
            unsaved: unsaved.to_vec(),
            reply,
        })
    }

    fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.clone()
    }
}

impl Drop for LibclangUnit {
    fn drop(&mut self) {
        if self.requests.send(Request::Dispose { unit: self.id }).is_err() {
            trace!("libclang thread gone before unit of '{}'", self.file.display());
        }
    }
}

fn stopped() -> EngineError {
    EngineError::LibraryUnavailable("the libclang thread stopped".to_string())
}

fn round_trip<T>(
    requests: &Sender<Request>,
    make: impl FnOnce(Reply<T>) -> Request,
) -> Result<T, EngineError> {
    let (reply, answer) = mpsc::channel();
    requests.send(make(reply)).map_err(|_| stopped())?;
    answer.recv().map_err(|_| stopped())?
}

fn answer<T>(reply: Reply<T>, result: Result<T, EngineError>) {
    if reply.send(result).is_err() {
        trace!("libclang caller went away before its answer");
    }
}

/// The body of the service thread. Runs until every sender is gone.
fn serve(inbox: Receiver<Request>, ready: Sender<Result<String, String>>) {
    let clang = match Clang::new() {
        Ok(clang) => clang,
        Err(e) => {
            let _ = ready.send(Err(format!("could not load libclang: {}", e)));
            return;
        }
    };
    let index = Index::new(&clang, false, false);
    if ready.send(Ok(clang::get_version())).is_err() {
        return;
    }

    let mut service = Service {
        index: &index,
        units: HashMap::new(),
        next_id: 0,
    };
    for request in inbox {
        service.handle(request);
    }
    debug!("libclang thread stopped with {} live unit(s)", service.units.len());
}

struct Service<'i> {
    index: &'i Index<'i>,
    units: HashMap<UnitId, ClangUnit<'i>>,
    next_id: UnitId,
}

impl<'i> Service<'i> {
    fn handle(&mut self, request: Request) {
        match request {
            Request::Parse {
                file,
                args,
                unsaved,
                options,
                reply,
            } => answer(reply, self.parse(&file, &args, &unsaved, options)),
            Request::Reparse {
                unit,
                file,
                unsaved,
                reply,
            } => answer(reply, self.reparse(unit, &file, &unsaved)),
            Request::Complete {
                unit,
                file,
                position,
                unsaved,
                reply,
            } => answer(reply, self.complete(unit, &file, position, &unsaved)),
            Request::Dispose { unit } => {
                self.units.remove(&unit);
                trace!("Disposed translation unit {}", unit);
            }
        }
    }

    fn parse(
        &mut self,
        file: &Path,
        args: &[String],
        unsaved: &[UnsavedFile],
        options: ParseOptions,
    ) -> Result<(UnitId, Vec<Diagnostic>), EngineError> {
        let unsaved = to_unsaved(unsaved);
        let unit = self
            .index
            .parser(file)
            .arguments(args)
            .unsaved(&unsaved)
            .precompiled_preamble(options.precompiled_preamble)
            .cache_completion_results(options.cache_completion_results)
            .parse()
            .map_err(|e| {
                warn!("libclang could not parse '{}': {:?}", file.display(), e);
                EngineError::ParseFailed(file.to_path_buf())
            })?;

        let diagnostics = diagnostics_of(&unit);
        let id = self.next_id;
        self.next_id += 1;
        self.units.insert(id, unit);
        Ok((id, diagnostics))
    }

    fn reparse(
        &mut self,
        id: UnitId,
        file: &Path,
        unsaved: &[UnsavedFile],
    ) -> Result<Vec<Diagnostic>, EngineError> {
        // A failed reparse consumes the unit.
        let unit = self
            .units
            .remove(&id)
            .ok_or_else(|| EngineError::ParseFailed(file.to_path_buf()))?;
        let unit = unit.reparse(&to_unsaved(unsaved)).map_err(|e| {
            warn!("libclang could not reparse '{}': {:?}", file.display(), e);
            EngineError::ParseFailed(file.to_path_buf())
        })?;
        let diagnostics = diagnostics_of(&unit);
        self.units.insert(id, unit);
        Ok(diagnostics)
    }

    fn complete(
        &self,
        id: UnitId,
        file: &Path,
        position: Position,
        unsaved: &[UnsavedFile],
    ) -> Result<Vec<RawCompletion>, EngineError> {
        let unit = self.units.get(&id).ok_or_else(|| EngineError::CompletionFailed {
            path: file.to_path_buf(),
            reason: "its translation unit was released".to_string(),
        })?;
        let unsaved = to_unsaved(unsaved);
        let results = unit
            .completer(file, position.row, position.col)
            .unsaved(&unsaved)
            .complete();
        Ok(results
            .get_results()
            .iter()
            .map(|result| raw_completion(result.kind, &result.string))
            .collect())
    }
}

fn to_unsaved(files: &[UnsavedFile]) -> Vec<Unsaved> {
    files
        .iter()
        .map(|file| Unsaved::new(&file.path, &file.contents))
        .collect()
}

fn raw_completion(kind: EntityKind, string: &CompletionString<'_>) -> RawCompletion {
    RawCompletion {
        chunks: string.get_chunks().iter().map(chunk_of).collect(),
        kind: cursor_kind(kind),
        priority: u32::try_from(string.get_priority()).unwrap_or(u32::MAX),
    }
}

fn chunk_of(chunk: &ClangChunk<'_>) -> CompletionChunk {
    let literal = |spelling: &str| CompletionChunk::new(ChunkKind::Text, spelling);
    match chunk {
        ClangChunk::TypedText(text) => CompletionChunk::new(ChunkKind::TypedText, text.as_str()),
        ClangChunk::ResultType(text) => CompletionChunk::new(ChunkKind::ResultType, text.as_str()),
        ClangChunk::Placeholder(text) => CompletionChunk::new(ChunkKind::Placeholder, text.as_str()),
        ClangChunk::Informative(text) => CompletionChunk::new(ChunkKind::Informative, text.as_str()),
        ClangChunk::CurrentParameter(text) | ClangChunk::Text(text) => literal(text),
        ClangChunk::Optional(nested) => {
            let spelling: String = nested
                .get_chunks()
                .iter()
                .map(|chunk| chunk_of(chunk).spelling)
                .collect();
            CompletionChunk::new(ChunkKind::Optional, spelling)
        }
        ClangChunk::Colon => literal(":"),
        ClangChunk::Comma => literal(", "),
        ClangChunk::Equals => literal(" = "),
        ClangChunk::Semicolon => literal(";"),
        ClangChunk::LeftAngleBracket => literal("<"),
        ClangChunk::RightAngleBracket => literal(">"),
        ClangChunk::LeftBrace => literal("{"),
        ClangChunk::RightBrace => literal("}"),
        ClangChunk::LeftParenthesis => literal("("),
        ClangChunk::RightParenthesis => literal(")"),
        ClangChunk::LeftSquareBracket => literal("["),
        ClangChunk::RightSquareBracket => literal("]"),
        ClangChunk::HorizontalSpace(_) => literal(" "),
        ClangChunk::VerticalSpace(_) => literal("\n"),
    }
}

fn cursor_kind(kind: EntityKind) -> CursorKind {
    match kind {
        EntityKind::ClassDecl | EntityKind::ClassTemplate => CursorKind::ClassDecl,
        EntityKind::StructDecl => CursorKind::StructDecl,
        EntityKind::EnumConstantDecl => CursorKind::EnumConstant,
        EntityKind::Destructor => CursorKind::Destructor,
        EntityKind::Constructor => CursorKind::Constructor,
        EntityKind::FunctionDecl | EntityKind::FunctionTemplate => CursorKind::Function,
        EntityKind::Method => CursorKind::Method,
        EntityKind::FieldDecl => CursorKind::Field,
        EntityKind::VarDecl | EntityKind::ParmDecl => CursorKind::Variable,
        EntityKind::MacroDefinition => CursorKind::Macro,
        EntityKind::Namespace => CursorKind::Namespace,
        EntityKind::TypedefDecl | EntityKind::TypeAliasDecl => CursorKind::Typedef,
        _ => CursorKind::Other,
    }
}

fn severity_of(severity: ClangSeverity) -> Option<Severity> {
    match severity {
        ClangSeverity::Ignored => None,
        ClangSeverity::Note => Some(Severity::Note),
        ClangSeverity::Warning => Some(Severity::Warning),
        ClangSeverity::Error => Some(Severity::Error),
        ClangSeverity::Fatal => Some(Severity::Fatal),
    }
}

fn diagnostics_of(unit: &ClangUnit<'_>) -> Vec<Diagnostic> {
    unit.get_diagnostics()
        .iter()
        .filter_map(|diagnostic| {
            let severity = severity_of(diagnostic.get_severity())?;
            let location = diagnostic.get_location().get_file_location();
            Some(Diagnostic {
                file: location.file.map(|file| file.get_path()).unwrap_or_default(),
                row: location.line,
                col: location.column,
                severity,
                message: diagnostic.get_text(),
            })
        })
        .collect()
}
