//! Thread pool that executes submitted [`Job`]s.
//!
//! This module defines the [`WorkerPool`] struct, which owns a set of OS
//! threads draining a shared FIFO queue. The pool starts with `min_workers`
//! threads, grows up to `max_workers` while jobs are waiting and no worker is
//! idle, and lets the extra workers retire after `keep_alive` without work.
//!
//! All bookkeeping lives behind a single [`Mutex`], paired with two
//! [`Condvar`]s: one wakes idle workers when work arrives or the pool closes,
//! the other wakes [`WorkerPool::shutdown`] when the last worker exits.

use super::{Job, worker::worker_loop};
use crate::{
    config::PoolConfig,
    error::{Error, Result},
};
use core::time::Duration;
use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Instant,
};

/// Outcome of [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Every queued and in-flight job finished and all workers were joined.
    Complete,
    /// The drain deadline passed while `remaining` workers were still running
    /// jobs. Those threads are detached and finish on their own.
    TimedOut { remaining: usize },
}

/// Point-in-time view of the pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Live worker threads.
    pub workers: usize,
    /// Workers parked waiting for a job.
    pub idle: usize,
    /// Workers currently running a job.
    pub active: usize,
    /// Jobs waiting in the queue.
    pub queued: usize,
    /// Jobs that ran to completion, including those that panicked.
    pub completed: u64,
    /// Jobs that panicked.
    pub panicked: u64,
    /// Highest number of live workers observed.
    pub peak_workers: usize,
}

pub(super) struct Shared<J> {
    pub(super) name: String,
    pub(super) config: PoolConfig,
    pub(super) state: Mutex<PoolState<J>>,
    /// Signalled when a job is queued or the pool closes.
    pub(super) work_available: Condvar,
    /// Signalled when the last worker exits.
    pub(super) workers_exited: Condvar,
}

pub(super) struct PoolState<J> {
    pub(super) queue: VecDeque<J>,
    pub(super) workers: usize,
    pub(super) idle: usize,
    pub(super) active: usize,
    pub(super) completed: u64,
    pub(super) panicked: u64,
    pub(super) peak_workers: usize,
    pub(super) closed: bool,
    next_worker_id: usize,
    handles: Vec<JoinHandle<()>>,
}

/// A bounded, growable pool of worker threads.
///
/// Cloning the pool is cheap and yields another handle to the same workers.
/// Submission never blocks: jobs beyond the available workers wait in an
/// unbounded queue.
///
/// Once [`shutdown`](Self::shutdown) has been called, [`submit`](Self::submit)
/// rejects new jobs with [`Error::PoolShutdown`] and drops them.
pub struct WorkerPool<J: Job> {
    shared: Arc<Shared<J>>,
}

impl<J: Job> Clone for WorkerPool<J> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<J: Job> WorkerPool<J> {
    /// Creates a pool and prestarts `config.min_workers` threads named
    /// `{name}-worker-{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an invalid configuration and
    /// [`Error::Spawn`] if a worker thread cannot be created. Workers spawned
    /// before the failure are shut down again.
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let pool = Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    workers: 0,
                    idle: 0,
                    active: 0,
                    completed: 0,
                    panicked: 0,
                    peak_workers: 0,
                    closed: false,
                    next_worker_id: 0,
                    handles: Vec::with_capacity(config.max_workers),
                }),
                config,
                work_available: Condvar::new(),
                workers_exited: Condvar::new(),
            }),
        };

        {
            let mut state = pool.shared.state.lock();
            for _ in 0..pool.shared.config.min_workers {
                if let Err(e) = pool.spawn_worker(&mut state) {
                    drop(state);
                    pool.shutdown(None);
                    return Err(e);
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            pool = %pool.shared.name,
            min_workers = pool.shared.config.min_workers,
            max_workers = pool.shared.config.max_workers,
            "Worker pool started"
        );

        Ok(pool)
    }

    /// Queues `job` for execution and returns immediately.
    ///
    /// A new worker is started when the pool is below `min_workers`, or when
    /// queued jobs outnumber idle workers and fewer than `max_workers` exist.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolShutdown`] if the pool has been shut down. The job is
    ///   dropped.
    /// - [`Error::Spawn`] if the pool has no worker at all and a new one
    ///   could not be started. The job is dropped.
    pub fn submit(&self, job: J) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(Error::PoolShutdown);
        }

        state.queue.push_back(job);

        let below_min = state.workers < self.shared.config.min_workers;
        let backlogged =
            state.queue.len() > state.idle && state.workers < self.shared.config.max_workers;

        if below_min || backlogged {
            if let Err(e) = self.spawn_worker(&mut state) {
                if state.workers == 0 {
                    state.queue.pop_back();
                    return Err(e);
                }
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    pool = %self.shared.name,
                    workers = state.workers,
                    "Could not grow worker pool, job stays queued: {e}"
                );
            }
        }

        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Closes the pool and waits for it to drain.
    ///
    /// - Rejects all further submissions.
    /// - Lets every queued and in-flight job run to completion.
    /// - Waits for all workers to exit and joins them.
    ///
    /// With `timeout`, waiting stops at the deadline and the still-busy
    /// workers are detached; they exit once their current jobs and the rest of
    /// the queue are done. Calling `shutdown` again is harmless.
    pub fn shutdown(&self, timeout: Option<Duration>) -> Drain {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();

        if !state.closed {
            state.closed = true;
            #[cfg(feature = "tracing")]
            tracing::info!(
                pool = %self.shared.name,
                queued = state.queue.len(),
                active = state.active,
                "Draining worker pool"
            );
            self.shared.work_available.notify_all();
        }

        while state.workers > 0 {
            match deadline {
                None => self.shared.workers_exited.wait(&mut state),
                Some(deadline) => {
                    if self
                        .shared
                        .workers_exited
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
            }
        }

        let remaining = state.workers;
        let handles = core::mem::take(&mut state.handles);
        drop(state);

        if remaining > 0 {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                pool = %self.shared.name,
                remaining,
                "Drain timed out, detaching busy workers"
            );
            return Drain::TimedOut { remaining };
        }

        for handle in handles {
            if handle.join().is_err() {
                #[cfg(feature = "tracing")]
                tracing::error!(pool = %self.shared.name, "Worker thread panicked");
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!(pool = %self.shared.name, "Worker pool shutdown complete");
        Drain::Complete
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Returns a snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            workers: state.workers,
            idle: state.idle,
            active: state.active,
            queued: state.queue.len(),
            completed: state.completed,
            panicked: state.panicked,
            peak_workers: state.peak_workers,
        }
    }

    /// Starts one worker thread. Must be called with the state lock held; the
    /// new thread blocks on that lock until the caller releases it.
    fn spawn_worker(&self, state: &mut PoolState<J>) -> Result<()> {
        let worker_id = state.next_worker_id;
        let shared = Arc::clone(&self.shared);

        let handle = thread::Builder::new()
            .name(format!("{}-worker-{worker_id}", self.shared.name))
            .spawn(move || worker_loop(worker_id, shared))
            .map_err(|source| Error::Spawn {
                what: "worker",
                source,
            })?;

        state.next_worker_id += 1;
        state.workers += 1;
        state.peak_workers = state.peak_workers.max(state.workers);

        // Retired workers leave finished handles behind.
        state.handles.retain(|h| !h.is_finished());
        state.handles.push(handle);
        Ok(())
    }
}
