use super::{Job, manager::Shared};
use parking_lot::MutexGuard;
#[cfg(feature = "tracing")]
use std::any::Any;
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

/// Body of every pool worker thread.
///
/// The worker pops jobs from the shared queue in FIFO order and runs them
/// with the state lock released. When the queue is empty it parks on the
/// `work_available` condvar:
///
/// - While the pool has more than `min_workers` workers, the park is bounded
///   by `keep_alive`; a worker that wakes up to an empty queue after the full
///   idle period retires.
/// - Once the pool is closed and the queue is empty, the worker exits.
///
/// A panicking job is caught and counted; the worker keeps serving. The last
/// worker to exit wakes any thread blocked in `shutdown`.
pub(super) fn worker_loop<J: Job>(worker_id: usize, shared: Arc<Shared<J>>) {
    #[cfg(feature = "tracing")]
    tracing::trace!(pool = %shared.name, "Worker {worker_id} started");

    let mut state = shared.state.lock();
    loop {
        if let Some(job) = state.queue.pop_front() {
            state.active += 1;
            let completed = MutexGuard::unlocked(&mut state, || run_job(worker_id, job));
            state.active -= 1;
            state.completed += 1;
            if !completed {
                state.panicked += 1;
            }
            continue;
        }

        if state.closed {
            #[cfg(feature = "tracing")]
            tracing::trace!(pool = %shared.name, "Worker {worker_id} draining complete");
            break;
        }

        state.idle += 1;
        let retire = if state.workers > shared.config.min_workers {
            let timed_out = shared
                .work_available
                .wait_for(&mut state, shared.config.keep_alive)
                .timed_out();
            timed_out
                && state.queue.is_empty()
                && !state.closed
                && state.workers > shared.config.min_workers
        } else {
            shared.work_available.wait(&mut state);
            false
        };
        state.idle -= 1;

        if retire {
            #[cfg(feature = "tracing")]
            tracing::trace!(pool = %shared.name, "Worker {worker_id} retired after idling");
            break;
        }
    }

    state.workers -= 1;
    if state.workers == 0 {
        shared.workers_exited.notify_all();
    }
}

/// Runs one job, returning `false` if it panicked.
fn run_job<J: Job>(_worker_id: usize, job: J) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
        Ok(()) => true,
        Err(_payload) => {
            #[cfg(feature = "tracing")]
            tracing::error!(
                "Worker {_worker_id} caught a panicking job: {}",
                panic_message(_payload.as_ref())
            );
            false
        }
    }
}

/// Extracts the message from a panic payload.
#[cfg(feature = "tracing")]
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
