// src/system/job_pool.rs

//! # Debounced job pool
//!
//! Jobs are submitted under a name. A job waits in a pending list until no
//! new job arrived for `delay`; a newer job with the same name replaces the
//! pending one, which is then never run. When the window closes, every
//! pending job goes to a rayon pool.

use log::{debug, error, trace};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Error, Debug)]
pub enum JobPoolError {
    #[error("Could not build worker pool: {0}")]
    Workers(#[from] rayon::ThreadPoolBuildError),
    #[error("Could not start scheduler thread: {0}")]
    Scheduler(#[from] std::io::Error),
}

#[derive(Default)]
struct State {
    /// In submission order; at most one job per name.
    pending: Vec<(String, Job)>,
    deadline: Option<Instant>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
    delay: Duration,
    superseded: AtomicUsize,
    dispatched: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct JobPool {
    shared: Arc<Shared>,
    scheduler: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for JobPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPool")
            .field("delay", &self.shared.delay)
            .field("superseded", &self.superseded_count())
            .field("dispatched", &self.dispatched_count())
            .finish_non_exhaustive()
    }
}

impl JobPool {
    pub fn new(worker_threads: usize, delay: Duration) -> Result<Self, JobPoolError> {
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads.max(1))
            .thread_name(|i| format!("clang-assist-worker-{}", i))
            .panic_handler(|_| error!("A background job panicked"))
            .build()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            wakeup: Condvar::new(),
            delay,
            superseded: AtomicUsize::new(0),
            dispatched: AtomicUsize::new(0),
        });

        let scheduler_shared = Arc::clone(&shared);
        let scheduler = thread::Builder::new()
            .name("clang-assist-scheduler".to_string())
            .spawn(move || run_scheduler(&scheduler_shared, &workers))?;

        Ok(Self {
            shared,
            scheduler: Some(scheduler),
        })
    }

    /// Queues `job` under `name`, replacing a pending job of the same name,
    /// and restarts the batching window.
    pub fn submit<F>(&self, name: impl Into<String>, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let mut state = self.shared.lock();
        if let Some(slot) = state.pending.iter_mut().find(|(pending, _)| *pending == name) {
            trace!("Job '{}' superseded", name);
            slot.1 = Box::new(job);
            self.shared.superseded.fetch_add(1, Ordering::SeqCst);
        } else {
            state.pending.push((name, Box::new(job)));
        }
        state.deadline = Some(Instant::now() + self.shared.delay);
        self.shared.wakeup.notify_all();
    }

    /// Jobs replaced before they ran.
    pub fn superseded_count(&self) -> usize {
        self.shared.superseded.load(Ordering::SeqCst)
    }

    /// Jobs handed to the workers.
    pub fn dispatched_count(&self) -> usize {
        self.shared.dispatched.load(Ordering::SeqCst)
    }
}

fn run_scheduler(shared: &Shared, workers: &rayon::ThreadPool) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            break;
        }
        let now = Instant::now();
        match state.deadline {
            Some(deadline) if deadline > now => {
                state = shared
                    .wakeup
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
                continue;
            }
            Some(_) => {}
            None => {
                state = shared.wakeup.wait(state).unwrap_or_else(PoisonError::into_inner);
                continue;
            }
        }

        state.deadline = None;
        let batch = std::mem::take(&mut state.pending);
        drop(state);

        debug!("Dispatching {} job(s)", batch.len());
        for (name, job) in batch {
            trace!("Running job '{}'", name);
            shared.dispatched.fetch_add(1, Ordering::SeqCst);
            workers.spawn(job);
        }
        state = shared.lock();
    }
    let dropped = state.pending.len();
    if dropped > 0 {
        debug!("Dropping {} pending job(s) on shutdown", dropped);
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            self.shared.wakeup.notify_all();
        }
        if let Some(scheduler) = self.scheduler.take() {
            if scheduler.join().is_err() {
                error!("Job scheduler panicked");
            }
        }
    }
}
