// src/core/assistant.rs

//! # Assistant
//!
//! The entry point for a host. A request for a buffer resolves the flags of
//! its file, assembles the buffer configuration, then runs the buffer's
//! completion engine, reusing it while the configuration does not change.
//!
//! The libclang binding is selected once, when the assistant is built. If
//! none fits, every buffer uses the process engine.

use crate::core::buffer_config::{self, BufferConfig, Wildcards};
use crate::core::compiler_builtins::BuiltinsCache;
use crate::core::completion::library::{self, ClangLibrary, LibraryEngine, LibraryRegistry};
use crate::core::completion::process::ProcessEngine;
use crate::core::completion::session_cache::{CompletionEngineCache, Sweeper};
use crate::core::completion::{CompletionEngine, EngineError, ExclusionPolicy};
use crate::core::flags_cache::FlagResolutionCache;
use crate::core::flags_source::{self, FlagsSource};
use crate::core::include_headers::{self, HeaderMatch};
use crate::core::paths;
use crate::models::{BufferId, BufferSnapshot, CompletionItem, Diagnostic, EngineKind, Position, Settings};
use crate::system::job_pool::{JobPool, JobPoolError};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error(transparent)]
    Jobs(#[from] JobPoolError),
}

#[derive(Debug)]
pub struct Assistant {
    settings: Settings,
    home: PathBuf,
    flags: FlagResolutionCache,
    sessions: Arc<CompletionEngineCache>,
    builtins: BuiltinsCache,
    library: Option<Arc<dyn ClangLibrary>>,
    clang_version: Option<String>,
    policy: ExclusionPolicy,
    open_buffers: Mutex<HashSet<BufferId>>,
    jobs: JobPool,
    _sweeper: Sweeper,
}

impl Assistant {
    /// Builds an assistant with the standard flag sources, picking a
    /// binding from `registry` for the installed clang.
    pub fn new(settings: Settings, registry: &LibraryRegistry) -> Result<Self, AssistantError> {
        let sources = flags_source::build_sources(&settings, &paths::get_temp_root());
        let (library, clang_version) = select_library(&settings, registry);
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        Self::from_parts(settings, sources, library, clang_version, home)
    }

    pub fn from_parts(
        settings: Settings,
        sources: Vec<Arc<dyn FlagsSource>>,
        library: Option<Arc<dyn ClangLibrary>>,
        clang_version: Option<String>,
        home: PathBuf,
    ) -> Result<Self, AssistantError> {
        let sessions = Arc::new(CompletionEngineCache::new());
        let sweeper = sessions.start_sweeper(settings.sweep_period(), settings.max_cache_age());
        let jobs = JobPool::new(settings.worker_threads, settings.job_delay())?;
        let policy = ExclusionPolicy::new(
            settings.excluded_kinds.iter().copied(),
            settings.hide_class_decls_unless_scope,
        );
        Ok(Self {
            home,
            flags: FlagResolutionCache::new(sources),
            sessions,
            builtins: BuiltinsCache::new(),
            library,
            clang_version,
            policy,
            open_buffers: Mutex::new(HashSet::new()),
            jobs,
            _sweeper: sweeper,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn engine_kind(&self) -> EngineKind {
        if self.library.is_some() {
            EngineKind::Library
        } else {
            EngineKind::Process
        }
    }

    pub fn clang_version(&self) -> Option<&str> {
        self.clang_version.as_deref()
    }

    pub fn sessions(&self) -> &CompletionEngineCache {
        &self.sessions
    }

    /// The flags the sources produce for `file`, without any of the
    /// configured extras.
    pub fn flags_for_file(&self, file: &Path) -> Vec<String> {
        let scope = self.settings.search_scope_for(file);
        self.flags.flags_for(file, &self.settings.flags_sources, &scope)
    }

    /// The full configuration of `file`.
    pub fn config_for(&self, file: &Path) -> BufferConfig {
        let scope = self.settings.search_scope_for(file);
        let entry = self.flags.resolve(file, &self.settings.flags_sources, &scope);
        let project = buffer_config::project_folder(&self.settings, file, &entry);
        let wildcards = Wildcards::new(Some(&project), self.clang_version.clone());

        let builtins = self.settings.use_default_definitions.then(|| {
            let language = crate::models::Language::from_path(file);
            let mut std_flags = self.settings.lang_flags(language).to_vec();
            std_flags.extend(entry.argument_list());
            self.builtins.get(&self.settings.clang_binary, language, &std_flags)
        });

        buffer_config::build_config(
            &self.settings,
            file,
            &entry,
            &wildcards,
            builtins.as_ref(),
            &self.home,
        )
    }

    /// Marks a buffer as open and focused.
    pub fn open(&self, id: BufferId) {
        self.buffers().insert(id);
        self.sessions.set_focus(Some(id));
    }

    pub fn is_open(&self, id: BufferId) -> bool {
        self.buffers().contains(&id)
    }

    pub fn set_focus(&self, id: Option<BufferId>) {
        self.sessions.set_focus(id);
    }

    /// Forgets a closed buffer and releases its engine.
    pub fn on_close(&self, id: BufferId) {
        self.buffers().remove(&id);
        if self.sessions.focused() == Some(id) {
            self.sessions.set_focus(None);
        }
        self.sessions.remove(id);
    }

    pub fn complete(&self, snapshot: &BufferSnapshot, position: Position) -> Result<Vec<CompletionItem>, EngineError> {
        let config = self.config_for(&snapshot.file_path);
        self.with_engine(snapshot, &config, |engine| {
            engine.complete(&snapshot.file_path, &snapshot.text, position, &self.policy)
        })
    }

    /// Updates the buffer's engine with its current text and returns the
    /// diagnostics.
    pub fn diagnostics(&self, snapshot: &BufferSnapshot) -> Result<Vec<Diagnostic>, EngineError> {
        let config = self.config_for(&snapshot.file_path);
        self.with_engine(snapshot, &config, |engine| {
            engine.update(&snapshot.file_path, &snapshot.text)
        })
    }

    /// Headers below the include folders of `file` starting with `prefix`.
    pub fn headers(&self, file: &Path, prefix: &str) -> Vec<HeaderMatch> {
        let folders = self
            .config_for(file)
            .include_folders(&self.settings.include_prefixes);
        include_headers::find_headers(&folders, prefix)
    }

    /// Completes on the job pool and hands the result to `callback`. A newer
    /// request for the same buffer replaces this one while it is pending.
    /// Nothing is reported for a buffer closed in the meantime.
    pub fn complete_async<F>(self: &Arc<Self>, snapshot: BufferSnapshot, position: Position, callback: F)
    where
        F: FnOnce(Result<Vec<CompletionItem>, EngineError>) + Send + 'static,
    {
        let job_name = format!("complete {}", snapshot.id);
        self.submit(job_name, snapshot, move |assistant, snapshot| {
            callback(assistant.complete(snapshot, position));
        });
    }

    /// Like [`Self::complete_async`], for diagnostics.
    pub fn diagnostics_async<F>(self: &Arc<Self>, snapshot: BufferSnapshot, callback: F)
    where
        F: FnOnce(Result<Vec<Diagnostic>, EngineError>) + Send + 'static,
    {
        let job_name = format!("update {}", snapshot.id);
        self.submit(job_name, snapshot, move |assistant, snapshot| {
            callback(assistant.diagnostics(snapshot));
        });
    }

    fn submit<F>(self: &Arc<Self>, job_name: String, snapshot: BufferSnapshot, run: F)
    where
        F: FnOnce(&Self, &BufferSnapshot) + Send + 'static,
    {
        let assistant = Arc::downgrade(self);
        self.jobs.submit(job_name, move || {
            let Some(assistant) = assistant.upgrade() else {
                return;
            };
            if !assistant.is_open(snapshot.id) {
                debug!("Buffer {} is closed, dropping request", snapshot.id);
                return;
            }
            run(&assistant, &snapshot);
            if !assistant.is_open(snapshot.id) {
                assistant.sessions.remove(snapshot.id);
            }
        });
    }

    fn with_engine<R>(
        &self,
        snapshot: &BufferSnapshot,
        config: &BufferConfig,
        f: impl FnOnce(&mut dyn CompletionEngine) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        self.sessions
            .with_session(
                snapshot.id,
                &config.flags,
                self.engine_kind(),
                || self.build_engine(config, &snapshot.text),
                f,
            )
            .and_then(|result| result)
    }

    fn build_engine(&self, config: &BufferConfig, text: &str) -> Result<Box<dyn CompletionEngine>, EngineError> {
        match &self.library {
            Some(library) => Ok(Box::new(LibraryEngine::build(
                library.as_ref(),
                &config.file,
                config.flags.clone(),
                text,
            )?)),
            None => Ok(Box::new(ProcessEngine::new(
                self.settings.clang_binary.clone(),
                config.flags.clone(),
            ))),
        }
    }

    fn buffers(&self) -> std::sync::MutexGuard<'_, HashSet<BufferId>> {
        self.open_buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Detects the clang version and picks the binding for it, if the library
/// engine is enabled.
fn select_library(
    settings: &Settings,
    registry: &LibraryRegistry,
) -> (Option<Arc<dyn ClangLibrary>>, Option<String>) {
    let version = match library::detect_clang_version(&settings.clang_binary, &std::env::temp_dir()) {
        Ok(version) => Some(version),
        Err(e) => {
            debug!("Clang version unknown: {}", e);
            None
        }
    };
    if !settings.use_libclang {
        return (None, version);
    }

    let selected = match &version {
        Some(version) => registry.resolve(version),
        None => Err(EngineError::LibraryUnavailable("unknown clang version".to_string())),
    };
    match selected {
        Ok(binding) => {
            info!("Using {} engine ({})", EngineKind::Library, binding.name());
            (Some(binding), version)
        }
        Err(e) => {
            warn!("{}; using the {} engine", e, EngineKind::Process);
            (None, version)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::completion::library::fake::FakeLibrary;
    use crate::models::{FlagsSourceKind, Severity};
    use std::fs;
    use std::sync::atomic::Ordering;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        file: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("inc/lib")).unwrap();
        fs::write(root.join("inc/lib/api.h"), "").unwrap();
        fs::write(root.join(".clang_complete"), "# project flags\n-DFROM_FILE\n-Iinc\n").unwrap();
        let file = root.join("src/main.cpp");
        fs::write(&file, "int main() {}\n").unwrap();
        Fixture { _dir: dir, root, file }
    }

    fn settings_for(root: &Path) -> Settings {
        Settings {
            flags_sources: vec![FlagsSourceKind::FlagsFile],
            common_flags: Vec::new(),
            project_folder: Some(root.to_path_buf()),
            job_delay_ms: 20,
            ..Settings::default()
        }
    }

    fn assistant(fx: &Fixture, library: Option<Arc<FakeLibrary>>) -> Assistant {
        let settings = settings_for(&fx.root);
        let sources = flags_source::build_sources(&settings, &fx.root.join("tmp"));
        let library = library.map(|l| l as Arc<dyn ClangLibrary>);
        Assistant::from_parts(settings, sources, library, Some("14.0.0".to_string()), fx.root.clone())
            .unwrap()
    }

    fn snapshot(fx: &Fixture, text: &str) -> BufferSnapshot {
        BufferSnapshot {
            id: BufferId(1),
            file_path: fx.file.clone(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_flags_and_config() {
        // --- Setup ---
        let fx = fixture();
        let assistant = assistant(&fx, None);

        // --- Execute ---
        let flags = assistant.flags_for_file(&fx.file);
        let config = assistant.config_for(&fx.file);

        // --- Assert ---
        let include = format!("-I{}", fx.root.join("inc").display());
        assert_eq!(flags, vec!["-DFROM_FILE".to_string(), include.clone()]);
        assert_eq!(config.flags.first().map(String::as_str), Some("-std=c++14"));
        assert!(config.flags.contains(&include));
        assert!(config.flags.contains(&format!("-I{}", fx.root.join("src").display())));
        assert_eq!(config.source, Some(FlagsSourceKind::FlagsFile));
        assert_eq!(assistant.engine_kind(), EngineKind::Process);
    }

    #[test]
    fn test_completion_reuses_engine_until_close() {
        // --- Setup ---
        let fx = fixture();
        let library = Arc::new(FakeLibrary::default());
        let assistant = assistant(&fx, Some(library.clone()));
        let snap = snapshot(&fx, "std::vector<int> v;\nv.\n");
        assistant.open(snap.id);

        // --- Execute ---
        let first = assistant.complete(&snap, Position::new(2, 3)).unwrap();
        let second = assistant.complete(&snap, Position::new(2, 3)).unwrap();

        // --- Assert ---
        let triggers: Vec<_> = first.iter().map(|i| i.trigger()).collect();
        assert_eq!(triggers, vec!["size", "push_back"]);
        assert_eq!(first, second);
        assert_eq!(library.parses.load(Ordering::SeqCst), 1);
        assert_eq!(assistant.engine_kind(), EngineKind::Library);

        assistant.on_close(snap.id);
        assert!(assistant.sessions().is_empty());
        assistant.complete(&snap, Position::new(2, 3)).unwrap();
        assert_eq!(library.parses.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_diagnostics_through_library() {
        let fx = fixture();
        let assistant = assistant(&fx, Some(Arc::new(FakeLibrary::default())));

        let clean = assistant.diagnostics(&snapshot(&fx, "int x;\n")).unwrap();
        let broken = assistant.diagnostics(&snapshot(&fx, "error x;\n")).unwrap();

        assert!(clean.is_empty());
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].severity, Severity::Error);
        assert_eq!(broken[0].file, fx.file);
    }

    #[test]
    fn test_headers_use_include_folders() {
        let fx = fixture();
        let assistant = assistant(&fx, None);

        let headers = assistant.headers(&fx.file, "lib");

        let paths: Vec<_> = headers.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["lib/api.h"]);
    }

    #[test]
    fn test_async_completion_reports_to_callback() {
        // --- Setup ---
        let fx = fixture();
        let assistant = Arc::new(assistant(&fx, Some(Arc::new(FakeLibrary::default()))));
        let snap = snapshot(&fx, "v.\n");
        assistant.open(snap.id);
        let (tx, rx) = mpsc::channel();

        // --- Execute ---
        assistant.complete_async(snap, Position::new(1, 3), move |result| {
            tx.send(result.map(|items| items.len())).unwrap();
        });

        // --- Assert ---
        let received = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(received.unwrap(), 2);
    }

    #[test]
    fn test_async_request_for_closed_buffer_is_dropped() {
        let fx = fixture();
        let library = Arc::new(FakeLibrary::default());
        let assistant = Arc::new(assistant(&fx, Some(library.clone())));
        let snap = snapshot(&fx, "v.\n");
        assistant.open(snap.id);
        let (tx, rx) = mpsc::channel::<()>();

        assistant.complete_async(snap.clone(), Position::new(1, 3), move |_| tx.send(()).unwrap());
        assistant.on_close(snap.id);

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        assert_eq!(library.parses.load(Ordering::SeqCst), 0);
        assert!(!assistant.sessions().contains(snap.id));
    }

    #[test]
    fn test_missing_binding_falls_back_to_process_engine() {
        let fx = fixture();
        let settings = Settings {
            clang_binary: "definitely-not-clang-42".to_string(),
            ..settings_for(&fx.root)
        };

        let assistant = Assistant::new(settings, &LibraryRegistry::new()).unwrap();

        assert_eq!(assistant.engine_kind(), EngineKind::Process);
        assert_eq!(assistant.clang_version(), None);
    }
}
