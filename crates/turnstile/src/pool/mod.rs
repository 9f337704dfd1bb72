//! Growable pool of worker threads fed by an unbounded job queue.
//!
//! ## Structure
//!
//! - [`manager`] - [`WorkerPool`]: submission, growth and graceful drain.
//! - [`worker`] - the loop each worker thread runs, including idle retirement
//!   and panic isolation.

pub mod manager;
pub(crate) mod worker;


pub use manager::{Drain, PoolStats, WorkerPool};

/// A unit of work executed exactly once on a pool worker.
///
/// Any `FnOnce() + Send + 'static` closure is a job. Long-lived submitters
/// such as the acceptor use a named type instead so the job's contents are
/// explicit.
pub trait Job: Send + 'static {
    fn run(self);
}

impl<F> Job for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self) {
        self();
    }
}
