//! Listening socket and the blocking accept loop.
//!
//! The acceptor thread owns the listener for the whole run. It blocks in
//! `accept`, wraps each connection into a [`ConnectionJob`] and hands it to the
//! worker pool without waiting for it. When the loop ends, because stop was
//! requested or because the listener itself failed, the acceptor closes the
//! listener, drains the pool and marks the server [`ServerState::Stopped`].

use super::state::{ServerState, StateCell};
use crate::{
    config::ServerConfig,
    connection::{Connection, ConnectionJob},
    error::{Error, Result},
    handler::SharedHandler,
    pool::WorkerPool,
};
use core::time::Duration;
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread,
};
use tokio_util::sync::CancellationToken;

/// How long `stop` waits for its wake-up connection to be established.
const WAKE_TIMEOUT: Duration = Duration::from_millis(250);

/// Creates a listener on `config.addr()` with the configured backlog.
///
/// `SO_REUSEADDR` is enabled on Unix so a restarted server can rebind while
/// old connections linger in `TIME_WAIT`; it does not allow two live
/// listeners on the same port.
pub(crate) fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let addr = config.addr();
    let bind_err = |source| Error::Bind { addr, source };

    let socket =
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;

    #[cfg(unix)]
    socket.set_reuse_address(true).map_err(bind_err)?;

    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(config.backlog).map_err(bind_err)?;

    Ok(socket.into())
}

/// Source of accepted connections driven by [`accept_loop`].
pub(crate) trait Accept {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

impl Accept for TcpListener {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self)
    }
}

/// Why the accept loop returned.
#[derive(Debug)]
pub(crate) enum LoopExit {
    /// The shutdown token was cancelled.
    Cancelled,
    /// The listening socket failed.
    ListenerFailed(io::Error),
}

/// Everything the acceptor thread owns for one run.
pub(crate) struct Acceptor {
    pub(crate) listener: TcpListener,
    pub(crate) local_addr: SocketAddr,
    pub(crate) pool: WorkerPool<ConnectionJob>,
    pub(crate) handler: SharedHandler,
    pub(crate) shutdown: CancellationToken,
    pub(crate) terminated: CancellationToken,
    pub(crate) state: Arc<StateCell>,
    pub(crate) drain_timeout: Option<Duration>,
    pub(crate) accept_backoff: Duration,
}

impl Acceptor {
    /// Body of the acceptor thread.
    pub(crate) fn run(self) {
        let Self {
            listener,
            local_addr: _local_addr,
            pool,
            handler,
            shutdown,
            terminated,
            state,
            drain_timeout,
            accept_backoff,
        } = self;

        #[cfg(feature = "tracing")]
        let _enter = tracing::info_span!("acceptor", addr = %_local_addr).entered();
        #[cfg(feature = "tracing")]
        tracing::info!("Accepting connections");

        let _exit = accept_loop(&listener, &pool, &handler, &shutdown, accept_backoff);

        #[cfg(feature = "tracing")]
        match &_exit {
            LoopExit::Cancelled => tracing::info!("Stop requested, no longer accepting"),
            LoopExit::ListenerFailed(e) => {
                tracing::error!("Listener failed, accept loop terminated: {e}");
            }
        }

        // Either stop() already moved us to Stopping or the listener failed
        // while running.
        state.transition(ServerState::Running, ServerState::Stopping);
        drop(listener);

        let _drain = pool.shutdown(drain_timeout);

        #[cfg(feature = "tracing")]
        match _drain {
            crate::pool::Drain::Complete => tracing::info!("All accepted connections handled"),
            crate::pool::Drain::TimedOut { remaining } => {
                tracing::warn!("Drain timed out with {remaining} connections still in flight");
            }
        }

        state.store(ServerState::Stopped);
        terminated.cancel();

        #[cfg(feature = "tracing")]
        tracing::info!("Acceptor stopped");
    }
}

/// Accepts connections until `shutdown` is cancelled or the listener fails.
///
/// - The token is checked before every `accept` and again after it returns,
///   so a connection that arrives after stop was requested is dropped instead
///   of dispatched.
/// - Errors concerning a single pending client are skipped.
/// - Running out of descriptors or socket memory pauses for `backoff` and then
///   keeps accepting; the listener itself is still healthy.
pub(crate) fn accept_loop<L: Accept>(
    listener: &L,
    pool: &WorkerPool<ConnectionJob>,
    handler: &SharedHandler,
    shutdown: &CancellationToken,
    backoff: Duration,
) -> LoopExit {
    let mut next_id: u64 = 0;

    loop {
        if shutdown.is_cancelled() {
            return LoopExit::Cancelled;
        }

        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(_e) if is_transient(&_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Skipping failed accept: {_e}");
                continue;
            }
            Err(_e) if is_resource_exhausted(&_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    backoff_ms = backoff.as_millis() as u64,
                    "Out of resources accepting connections, backing off: {_e}"
                );
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return LoopExit::ListenerFailed(e),
        };

        if shutdown.is_cancelled() {
            #[cfg(feature = "tracing")]
            tracing::debug!(%peer, "Dropping connection accepted during shutdown");
            return LoopExit::Cancelled;
        }

        next_id += 1;

        #[cfg(feature = "tracing")]
        tracing::debug!(id = next_id, %peer, "Accepted connection");

        let job = ConnectionJob::new(Connection::new(next_id, peer, stream), Arc::clone(handler));
        if let Err(_e) = pool.submit(job) {
            #[cfg(feature = "tracing")]
            tracing::warn!(id = next_id, %peer, "Dropping connection: {_e}");
        }
    }
}

/// Errors that concern one pending client rather than the listener.
pub(crate) fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::WouldBlock
    )
}

/// Process-wide exhaustion (`EMFILE`, `ENFILE`, `ENOBUFS`, `ENOMEM`). The
/// pending connection stays in the backlog until resources free up.
pub(crate) fn is_resource_exhausted(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::OutOfMemory {
        return true;
    }

    #[cfg(unix)]
    {
        if let Some(code) = e.raw_os_error() {
            return matches!(
                code,
                libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM
            );
        }
    }

    false
}

/// Unblocks an acceptor parked in `accept` by connecting to it.
///
/// A listener bound to an unspecified address is reached over loopback. A
/// failed connection attempt is fine: it means the listener is already gone.
pub(crate) fn wake(local_addr: SocketAddr) {
    let target = match local_addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local_addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), local_addr.port())
        }
        _ => local_addr,
    };

    let _woken = TcpStream::connect_timeout(&target, WAKE_TIMEOUT);

    #[cfg(feature = "tracing")]
    match _woken {
        Ok(_) => tracing::trace!(%target, "Woke acceptor"),
        Err(e) => tracing::debug!(%target, "Wake-up connection failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use std::io::{Read, Write};
    use std::time::Instant;

    fn loopback_config() -> ServerConfig {
        ServerConfig::new(0)
            .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_pool(PoolConfig::new(1, 2, Duration::from_secs(1)).unwrap())
    }

    fn noop_handler() -> SharedHandler {
        Arc::new(|_: &mut dyn Read, _: &mut dyn Write| -> anyhow::Result<()> { Ok(()) })
    }

    fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn classifies_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[cfg(unix)]
    #[test]
    fn classifies_resource_exhaustion() {
        for code in [libc::EMFILE, libc::ENFILE, libc::ENOBUFS, libc::ENOMEM] {
            let e = io::Error::from_raw_os_error(code);
            assert!(is_resource_exhausted(&e), "{e}");
            assert!(!is_transient(&e), "{e}");
        }
        assert!(!is_resource_exhausted(&io::Error::from_raw_os_error(libc::EINVAL)));
        assert!(!is_resource_exhausted(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
    }

    #[test]
    fn bind_reports_the_address() {
        let first = bind(&loopback_config()).unwrap();
        let taken = first.local_addr().unwrap();

        let mut config = loopback_config();
        config.port = taken.port();
        match bind(&config) {
            Err(Error::Bind { addr, .. }) => assert_eq!(addr, taken),
            other => panic!("expected bind error, got {other:?}"),
        }
    }

    #[test]
    fn wake_unblocks_a_cancelled_loop() {
        let listener = bind(&loopback_config()).unwrap();
        let local_addr = listener.local_addr().unwrap();
        let pool = WorkerPool::new("wake", loopback_config().pool).unwrap();
        let shutdown = CancellationToken::new();

        let loop_pool = pool.clone();
        let loop_shutdown = shutdown.clone();
        let handle = thread::spawn(move || {
            accept_loop(
                &listener,
                &loop_pool,
                &noop_handler(),
                &loop_shutdown,
                Duration::from_millis(10),
            )
        });

        shutdown.cancel();
        wake(local_addr);

        assert!(matches!(handle.join().unwrap(), LoopExit::Cancelled));
        assert_eq!(pool.stats().completed, 0);
        pool.shutdown(None);
    }

    /// Fails the first `failures` accepts with `EMFILE`, like a process at its
    /// descriptor limit, then accepts normally.
    #[cfg(unix)]
    struct DescriptorLimited {
        listener: TcpListener,
        failures: std::sync::atomic::AtomicUsize,
    }

    #[cfg(unix)]
    impl Accept for DescriptorLimited {
        fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
            use std::sync::atomic::Ordering;

            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(io::Error::from_raw_os_error(libc::EMFILE));
            }
            self.listener.accept()
        }
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_exhaustion_backs_off_and_keeps_accepting() {
        let listener = bind(&loopback_config()).unwrap();
        let local_addr = listener.local_addr().unwrap();
        let limited = DescriptorLimited {
            listener,
            failures: std::sync::atomic::AtomicUsize::new(3),
        };
        let pool = WorkerPool::new("limited", loopback_config().pool).unwrap();
        let shutdown = CancellationToken::new();

        let loop_pool = pool.clone();
        let loop_shutdown = shutdown.clone();
        let handle = thread::spawn(move || {
            accept_loop(
                &limited,
                &loop_pool,
                &noop_handler(),
                &loop_shutdown,
                Duration::from_millis(10),
            )
        });

        // The client waits in the backlog while accept is failing, then is
        // served once descriptors are available again.
        let client = TcpStream::connect(local_addr).unwrap();
        assert!(eventually(|| pool.stats().completed == 1));
        assert!(!handle.is_finished());
        drop(client);

        shutdown.cancel();
        wake(local_addr);
        assert!(matches!(handle.join().unwrap(), LoopExit::Cancelled));
        pool.shutdown(None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn listener_failure_stops_the_run() {
        let listener = bind(&loopback_config()).unwrap();
        let local_addr = listener.local_addr().unwrap();
        let listener_ref = listener.try_clone().unwrap();
        let pool = WorkerPool::new("failing", loopback_config().pool).unwrap();
        let state = Arc::new(StateCell::new(ServerState::Running));
        let terminated = CancellationToken::new();

        let acceptor = Acceptor {
            listener,
            local_addr,
            pool: pool.clone(),
            handler: noop_handler(),
            shutdown: CancellationToken::new(),
            terminated: terminated.clone(),
            state: Arc::clone(&state),
            drain_timeout: None,
            accept_backoff: Duration::from_millis(10),
        };
        let handle = thread::spawn(move || acceptor.run());

        // Give the acceptor time to park in accept, then break the listening
        // socket underneath it. Linux fails the pending accept with EINVAL.
        thread::sleep(Duration::from_millis(100));
        socket2::SockRef::from(&listener_ref)
            .shutdown(std::net::Shutdown::Read)
            .unwrap();

        handle.join().unwrap();
        assert_eq!(state.load(), ServerState::Stopped);
        assert!(terminated.is_cancelled());
        assert!(pool.is_shutdown());
    }
}
