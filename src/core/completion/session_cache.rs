// src/core/completion/session_cache.rs

use super::{CompletionEngine, EngineError};
use crate::models::{BufferId, EngineKind};
use log::{debug, info, trace};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A live engine, locked while it is in use.
pub type SessionHandle = Arc<Mutex<Box<dyn CompletionEngine>>>;

#[derive(Debug)]
struct SessionEntry {
    handle: SessionHandle,
    flags: Vec<String>,
    kind: EngineKind,
    last_touch: Instant,
}

impl SessionEntry {
    fn matches(&self, flags: &[String], kind: EngineKind) -> bool {
        self.flags == flags && self.kind == kind
    }
}

/// Live completion engines, one per open buffer.
#[derive(Debug, Default)]
pub struct CompletionEngineCache {
    sessions: Mutex<HashMap<BufferId, SessionEntry>>,
    focused: Mutex<Option<BufferId>>,
    builds: AtomicUsize,
}

impl CompletionEngineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many engines were built so far.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// The session of `id`. It is reused if it was built with the same
    /// `flags` and `kind`, rebuilt with `build` otherwise.
    pub fn session_for<F>(
        &self,
        id: BufferId,
        flags: &[String],
        kind: EngineKind,
        build: F,
    ) -> Result<SessionHandle, EngineError>
    where
        F: FnOnce() -> Result<Box<dyn CompletionEngine>, EngineError>,
    {
        if let Some(handle) = self.reuse(id, flags, kind) {
            trace!("Reusing session of buffer {}", id);
            return Ok(handle);
        }

        // Built without holding the map lock.
        let built = build();
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let engine = match built {
            Ok(engine) => engine,
            Err(e) => {
                // The old engine, if any, no longer matches the buffer.
                if sessions.get(&id).is_some_and(|entry| !entry.matches(flags, kind)) {
                    sessions.remove(&id);
                }
                return Err(e);
            }
        };
        self.builds.fetch_add(1, Ordering::SeqCst);

        if let Some(entry) = sessions.get_mut(&id) {
            if entry.matches(flags, kind) {
                debug!("Buffer {} got a session while building, keeping it", id);
                entry.last_touch = Instant::now();
                return Ok(Arc::clone(&entry.handle));
            }
            debug!("Flags or engine changed for buffer {}, replacing session", id);
        }
        // The old engine is dropped here or once its last user releases it.
        let handle: SessionHandle = Arc::new(Mutex::new(engine));
        sessions.insert(
            id,
            SessionEntry {
                handle: Arc::clone(&handle),
                flags: flags.to_vec(),
                kind,
                last_touch: Instant::now(),
            },
        );
        Ok(handle)
    }

    fn reuse(&self, id: BufferId, flags: &[String], kind: EngineKind) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = sessions.get_mut(&id).filter(|entry| entry.matches(flags, kind))?;
        entry.last_touch = Instant::now();
        Some(Arc::clone(&entry.handle))
    }

    /// Runs `f` on the session of `id`, building it if needed. The engine
    /// is locked only for the duration of `f`.
    pub fn with_session<F, R, T>(
        &self,
        id: BufferId,
        flags: &[String],
        kind: EngineKind,
        build: F,
        f: T,
    ) -> Result<R, EngineError>
    where
        F: FnOnce() -> Result<Box<dyn CompletionEngine>, EngineError>,
        T: FnOnce(&mut dyn CompletionEngine) -> R,
    {
        let handle = self.session_for(id, flags, kind, build)?;
        let mut engine = handle.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(engine.as_mut()))
    }

    pub fn contains(&self, id: BufferId) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases the session of a closed buffer.
    pub fn remove(&self, id: BufferId) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = sessions.remove(&id).is_some();
        if removed {
            debug!("Released session of buffer {}", id);
        }
        removed
    }

    pub fn set_focus(&self, id: Option<BufferId>) {
        let mut focused = self.focused.lock().unwrap_or_else(PoisonError::into_inner);
        *focused = id;
    }

    pub fn focused(&self) -> Option<BufferId> {
        *self.focused.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Evicts every session untouched for longer than `max_age` at `now`,
    /// except the focused one. Returns the evicted buffers.
    pub fn sweep(&self, now: Instant, max_age: Duration) -> Vec<BufferId> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let focused = self.focused();

        let stale: Vec<BufferId> = sessions
            .iter()
            .filter(|(id, entry)| {
                Some(**id) != focused && now.saturating_duration_since(entry.last_touch) > max_age
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            sessions.remove(id);
        }
        if !stale.is_empty() {
            info!("Evicted {} stale completion session(s)", stale.len());
        }
        stale
    }

    /// Sweeps every `period` on a background thread until the returned
    /// handle is dropped or the cache goes away.
    pub fn start_sweeper(self: &Arc<Self>, period: Duration, max_age: Duration) -> Sweeper {
        let cache: Weak<Self> = Arc::downgrade(self);
        let (stop, stopped) = mpsc::channel::<()>();
        let thread = thread::spawn(move || {
            loop {
                match stopped.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.sweep(Instant::now(), max_age);
            }
            trace!("Session sweeper stopped");
        });
        Sweeper {
            stop: Some(stop),
            thread: Some(thread),
        }
    }
}

/// Keeps the periodic sweep running. Dropping it stops the thread.
#[derive(Debug)]
pub struct Sweeper {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        // Dropping the sender wakes the thread up.
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Session sweeper panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::completion::ExclusionPolicy;
    use crate::models::{CompletionItem, Diagnostic, Position};
    use std::path::Path;

    #[derive(Debug)]
    struct StubEngine {
        kind: EngineKind,
        flags: Vec<String>,
        calls: usize,
    }

    impl CompletionEngine for StubEngine {
        fn kind(&self) -> EngineKind {
            self.kind
        }

        fn flags(&self) -> &[String] {
            &self.flags
        }

        fn complete(
            &mut self,
            _file: &Path,
            _text: &str,
            _position: Position,
            _policy: &ExclusionPolicy,
        ) -> Result<Vec<CompletionItem>, EngineError> {
            self.calls += 1;
            Ok(Vec::new())
        }

        fn update(&mut self, _file: &Path, _text: &str) -> Result<Vec<Diagnostic>, EngineError> {
            Ok(Vec::new())
        }
    }

    fn stub(kind: EngineKind, flags: &[String]) -> impl FnOnce() -> Result<Box<dyn CompletionEngine>, EngineError> {
        let flags = flags.to_vec();
        move || {
            Ok(Box::new(StubEngine {
                kind,
                flags,
                calls: 0,
            }) as Box<dyn CompletionEngine>)
        }
    }

    fn flags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_session_reused_for_same_flags() {
        // --- Setup ---
        let cache = CompletionEngineCache::new();
        let id = BufferId(1);
        let a = flags(&["-DA"]);

        // --- Execute ---
        let first = cache.session_for(id, &a, EngineKind::Library, stub(EngineKind::Library, &a)).unwrap();
        let second = cache.session_for(id, &a, EngineKind::Library, stub(EngineKind::Library, &a)).unwrap();

        // --- Assert ---
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.build_count(), 1);
    }

    #[test]
    fn test_session_rebuilt_when_flags_or_kind_change() {
        let cache = CompletionEngineCache::new();
        let id = BufferId(1);
        let a = flags(&["-DA"]);
        let b = flags(&["-DB"]);

        cache.session_for(id, &a, EngineKind::Library, stub(EngineKind::Library, &a)).unwrap();
        let rebuilt = cache.session_for(id, &b, EngineKind::Library, stub(EngineKind::Library, &b)).unwrap();
        assert_eq!(rebuilt.lock().unwrap().flags(), b.as_slice());

        let process = cache.session_for(id, &b, EngineKind::Process, stub(EngineKind::Process, &b)).unwrap();
        assert_eq!(process.lock().unwrap().kind(), EngineKind::Process);
        assert_eq!(cache.build_count(), 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_build_leaves_no_session() {
        let cache = CompletionEngineCache::new();
        let result = cache.session_for(BufferId(7), &[], EngineKind::Library, || {
            Err(EngineError::LibraryUnavailable("none".to_string()))
        });

        assert!(result.is_err());
        assert!(!cache.contains(BufferId(7)));
    }

    #[test]
    fn test_slow_build_does_not_block_other_buffers() {
        // --- Setup ---
        let cache = Arc::new(CompletionEngineCache::new());
        let a = flags(&["-DA"]);
        cache.session_for(BufferId(2), &a, EngineKind::Library, stub(EngineKind::Library, &a)).unwrap();

        // --- Execute ---
        let slow = {
            let cache = Arc::clone(&cache);
            let a = a.clone();
            thread::spawn(move || {
                let build = stub(EngineKind::Library, &a);
                cache.session_for(BufferId(1), &a, EngineKind::Library, move || {
                    thread::sleep(Duration::from_secs(2));
                    build()
                })
            })
        };
        thread::sleep(Duration::from_millis(200));
        let started = Instant::now();
        cache.session_for(BufferId(2), &a, EngineKind::Library, stub(EngineKind::Library, &a)).unwrap();
        let waited = started.elapsed();

        // --- Assert ---
        assert!(waited < Duration::from_secs(1), "lookup waited {:?}", waited);
        assert!(slow.join().unwrap().is_ok());
        assert!(cache.contains(BufferId(1)));
        assert_eq!(cache.build_count(), 2);
    }

    #[test]
    fn test_failed_rebuild_drops_outdated_session() {
        let cache = CompletionEngineCache::new();
        let a = flags(&["-DA"]);
        cache.session_for(BufferId(4), &a, EngineKind::Library, stub(EngineKind::Library, &a)).unwrap();

        let result = cache.session_for(BufferId(4), &flags(&["-DB"]), EngineKind::Library, || {
            Err(EngineError::ParseFailed("/b.cpp".into()))
        });

        assert!(result.is_err());
        assert!(!cache.contains(BufferId(4)));
    }

    #[test]
    fn test_with_session_runs_on_engine() {
        let cache = CompletionEngineCache::new();
        let a = flags(&["-DA"]);
        let policy = ExclusionPolicy::default();

        let items = cache
            .with_session(BufferId(3), &a, EngineKind::Process, stub(EngineKind::Process, &a), |engine| {
                engine.complete(Path::new("/a.c"), "", Position::new(1, 1), &policy)
            })
            .unwrap()
            .unwrap();

        assert!(items.is_empty());
        assert!(cache.contains(BufferId(3)));
    }

    #[test]
    fn test_sweep_respects_focus() {
        // --- Setup ---
        let cache = CompletionEngineCache::new();
        let focused = BufferId(1);
        let background = BufferId(2);
        for id in [focused, background] {
            cache.session_for(id, &[], EngineKind::Library, stub(EngineKind::Library, &[])).unwrap();
        }
        cache.set_focus(Some(focused));

        // --- Execute ---
        let fresh = cache.sweep(Instant::now(), Duration::from_secs(30 * 60));
        let evicted = cache.sweep(
            Instant::now() + Duration::from_secs(40 * 60),
            Duration::from_secs(30 * 60),
        );

        // --- Assert ---
        assert!(fresh.is_empty());
        assert_eq!(evicted, vec![background]);
        assert!(cache.contains(focused));
        assert!(!cache.contains(background));
    }

    #[test]
    fn test_remove_releases_session() {
        let cache = CompletionEngineCache::new();
        cache.session_for(BufferId(5), &[], EngineKind::Library, stub(EngineKind::Library, &[])).unwrap();

        assert!(cache.remove(BufferId(5)));
        assert!(!cache.remove(BufferId(5)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_background_sweeper_evicts() {
        let cache = Arc::new(CompletionEngineCache::new());
        cache.session_for(BufferId(9), &[], EngineKind::Library, stub(EngineKind::Library, &[])).unwrap();

        let sweeper = cache.start_sweeper(Duration::from_millis(10), Duration::ZERO);
        let deadline = Instant::now() + Duration::from_secs(5);
        while cache.contains(BufferId(9)) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        drop(sweeper);

        assert!(!cache.contains(BufferId(9)));
    }
}
