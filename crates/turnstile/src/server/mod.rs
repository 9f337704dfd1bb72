//! Lifecycle controller for the acceptor.
//!
//! [`Server`] ties the pieces together: `start` binds the listener, creates
//! the worker pool and spawns the acceptor thread; `stop` tells the acceptor
//! to stop accepting and waits until every connection it already accepted has
//! been handled.
//!
//! ## Structure
//!
//! - `acceptor` - listener binding and the accept loop.
//! - `state` - the [`ServerState`] machine.

pub(crate) mod acceptor;
mod state;

pub use state::ServerState;

use crate::{
    config::ServerConfig,
    connection::ConnectionJob,
    error::{Error, Result},
    handler::{Handler, SharedHandler},
    pool::{PoolStats, WorkerPool},
};
use acceptor::Acceptor;
use parking_lot::Mutex;
use state::StateCell;
use std::{
    net::SocketAddr,
    sync::Arc,
    thread::{self, JoinHandle},
};
use tokio_util::sync::CancellationToken;

/// Resources belonging to one start/stop cycle.
struct Run {
    local_addr: SocketAddr,
    pool: WorkerPool<ConnectionJob>,
    shutdown: CancellationToken,
    terminated: CancellationToken,
    /// Taken by the `stop` that joins it.
    acceptor: Option<JoinHandle<()>>,
}

/// A TCP acceptor that dispatches each connection to a [`Handler`] on a
/// bounded worker pool.
///
/// All methods take `&self`, so a server can be shared (e.g. in an [`Arc`])
/// between the thread that starts it and the thread that stops it.
///
/// # Lifecycle
///
/// - [`start`](Self::start) fails with [`Error::Bind`] if the port cannot be
///   bound, and with [`Error::AlreadyStarted`] while a run is active. A
///   stopped server can be started again. A failed start leaves the state as
///   it was: [`ServerState::Created`] for a server that never ran,
///   [`ServerState::Stopped`] otherwise.
/// - [`stop`](Self::stop) blocks until the accepted connections are handled
///   (bounded by [`ServerConfig::drain_timeout`]) and is idempotent.
/// - If the listener fails while running, the run ends on its own: the state
///   becomes [`ServerState::Stopped`] and the [`terminated`](Self::terminated)
///   token is cancelled.
/// - Dropping the server stops it.
///
/// The queries ([`local_addr`](Self::local_addr),
/// [`pool_stats`](Self::pool_stats), [`terminated`](Self::terminated)) never
/// wait for a drain in progress, so handlers may call them.
///
/// # Example
///
/// ```no_run
/// use std::io::{BufRead, BufReader, Read, Write};
/// use turnstile::{Server, ServerConfig};
///
/// let server = Server::new(ServerConfig::new(7878));
/// server.start(|input: &mut dyn Read, output: &mut dyn Write| -> anyhow::Result<()> {
///     let mut line = String::new();
///     BufReader::new(input).read_line(&mut line)?;
///     output.write_all(line.as_bytes())?;
///     Ok(())
/// })?;
///
/// // ...
///
/// server.stop()?;
/// # Ok::<(), turnstile::Error>(())
/// ```
pub struct Server {
    config: ServerConfig,
    state: Arc<StateCell>,
    /// Serializes `start` and `stop`; held across a whole drain.
    lifecycle: Mutex<()>,
    /// Held only briefly, never across a join.
    run: Mutex<Option<Run>>,
}

impl Server {
    /// Creates a server for `config`. Nothing is bound until
    /// [`start`](Self::start).
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: Arc::new(StateCell::new(ServerState::Created)),
            lifecycle: Mutex::new(()),
            run: Mutex::new(None),
        }
    }

    /// Installs `handler`, binds the listener and starts accepting on a
    /// dedicated thread. Returns once the listener is bound.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] if the server is running or stopping.
    /// - [`Error::InvalidConfig`] if the configuration is invalid.
    /// - [`Error::Bind`] if the port is unavailable or access is denied.
    /// - [`Error::Spawn`] if the acceptor or a worker thread cannot be
    ///   created.
    ///
    /// On error the state is left unchanged: [`ServerState::Created`] if the
    /// server never ran, [`ServerState::Stopped`] otherwise.
    pub fn start<H: Handler>(&self, handler: H) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        let state = self.state.load();
        if !state.is_startable() {
            return Err(Error::AlreadyStarted { state });
        }

        // A run that ended on a listener failure still holds its thread.
        let stale = self.run.lock().take();
        if let Some(handle) = stale.and_then(|run| run.acceptor) {
            if handle.join().is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!("Previous acceptor thread panicked");
            }
        }

        self.config.validate()?;
        let listener = acceptor::bind(&self.config)?;
        let local_addr = listener.local_addr().map_err(|source| Error::Bind {
            addr: self.config.addr(),
            source,
        })?;

        let pool = WorkerPool::new("turnstile", self.config.pool.clone())?;
        let handler: SharedHandler = Arc::new(handler);
        let shutdown = CancellationToken::new();
        let terminated = CancellationToken::new();

        let acceptor = Acceptor {
            listener,
            local_addr,
            pool: pool.clone(),
            handler,
            shutdown: shutdown.clone(),
            terminated: terminated.clone(),
            state: Arc::clone(&self.state),
            drain_timeout: self.config.drain_timeout,
            accept_backoff: self.config.accept_backoff,
        };

        self.state.store(ServerState::Running);
        let spawned = thread::Builder::new()
            .name("turnstile-acceptor".into())
            .spawn(move || acceptor.run());

        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                self.state.store(state);
                pool.shutdown(None);
                return Err(Error::Spawn {
                    what: "acceptor",
                    source,
                });
            }
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            addr = %local_addr,
            backlog = self.config.backlog,
            min_workers = self.config.pool.min_workers,
            max_workers = self.config.pool.max_workers,
            "Server started"
        );

        *self.run.lock() = Some(Run {
            local_addr,
            pool,
            shutdown,
            terminated,
            acceptor: Some(handle),
        });
        Ok(())
    }

    /// Stops accepting and waits for accepted connections to be handled.
    ///
    /// - Cancels the acceptor's shutdown token and wakes its pending
    ///   `accept`.
    /// - Waits for the acceptor thread, which closes the listener and drains
    ///   the worker pool.
    ///
    /// In-flight handlers are never interrupted. Calling `stop` on a server
    /// that is not running, or calling it again, has no effect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AcceptorPanicked`] if the acceptor thread panicked.
    /// The server is [`ServerState::Stopped`] afterwards in every case.
    pub fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        let (local_addr, shutdown, terminated, handle) = {
            let mut run = self.run.lock();
            let Some(current) = run.as_mut() else {
                return Ok(());
            };
            let Some(handle) = current.acceptor.take() else {
                return Ok(());
            };
            (
                current.local_addr,
                current.shutdown.clone(),
                current.terminated.clone(),
                handle,
            )
        };

        if self
            .state
            .transition(ServerState::Running, ServerState::Stopping)
        {
            #[cfg(feature = "tracing")]
            tracing::info!(addr = %local_addr, "Stopping server");
            shutdown.cancel();
            acceptor::wake(local_addr);
        }

        let joined = handle.join();
        self.run.lock().take();

        if joined.is_err() {
            self.state.store(ServerState::Stopped);
            terminated.cancel();
            return Err(Error::AcceptorPanicked);
        }
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.state.load()
    }

    /// Address the current run is bound to. Useful with port `0`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.run.lock().as_ref().map(|run| run.local_addr)
    }

    /// Counters of the current run's worker pool.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.run.lock().as_ref().map(|run| run.pool.stats())
    }

    /// Token cancelled once the current run has fully ended, whether through
    /// [`stop`](Self::stop) or a listener failure. Await
    /// [`CancellationToken::cancelled`] to be notified asynchronously.
    pub fn terminated(&self) -> Option<CancellationToken> {
        self.run.lock().as_ref().map(|run| run.terminated.clone())
    }

    /// The configuration this server was created with.
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Err(_e) = self.stop() {
            #[cfg(feature = "tracing")]
            tracing::error!("Error stopping server on drop: {_e}");
        }
    }
}
