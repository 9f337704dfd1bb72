use crate::error::{Error, Result};
use core::time::Duration;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default number of pending connections the OS queues for the listener.
pub const DEFAULT_BACKLOG: i32 = 50;

/// Default number of workers kept alive even when idle.
pub const DEFAULT_MIN_WORKERS: usize = 5;

/// Default upper bound on concurrently running workers.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Default idle duration after which workers above the minimum retire.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(3);

/// Default pause before accepting again when the process is out of file
/// descriptors or socket buffers.
pub const DEFAULT_ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Sizing of a [`WorkerPool`](crate::WorkerPool).
///
/// The pool keeps `min_workers` threads alive, grows up to `max_workers` while
/// jobs are queued and no worker is idle, and retires the extra workers once
/// they have been idle for `keep_alive`. The pending-job queue is unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub keep_alive: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

impl PoolConfig {
    /// Builds a validated pool configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `max_workers` is zero or
    /// `min_workers` exceeds `max_workers`.
    pub fn new(min_workers: usize, max_workers: usize, keep_alive: Duration) -> Result<Self> {
        let config = Self {
            min_workers,
            max_workers,
            keep_alive,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the `1 <= max_workers` and `min_workers <= max_workers`
    /// invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::invalid_config("max_workers must be greater than 0"));
        }
        if self.min_workers > self.max_workers {
            return Err(Error::invalid_config(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        Ok(())
    }
}

/// Runtime configuration for a [`Server`](crate::Server).
///
/// Only the listen address is required; everything else has defaults that
/// match a small general-purpose service: all interfaces, a backlog of 50, a
/// pool of 5 to 10 workers, and an unbounded graceful drain on stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind. `0.0.0.0` listens on all IPv4 interfaces.
    pub host: IpAddr,
    /// Port to bind. `0` lets the OS pick an ephemeral port.
    pub port: u16,
    /// Maximum number of pending, not yet accepted, connections.
    pub backlog: i32,
    /// Worker pool sizing.
    pub pool: PoolConfig,
    /// Upper bound on how long `stop` waits for the pool to drain. `None`
    /// waits until every accepted connection has been handled.
    pub drain_timeout: Option<Duration>,
    /// Pause after `accept` fails for lack of descriptors or memory. The
    /// listener stays open and accepting resumes afterwards.
    pub accept_backoff: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ServerConfig {
    /// Creates a configuration listening on all interfaces at `port`.
    pub fn new(port: u16) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            backlog: DEFAULT_BACKLOG,
            pool: PoolConfig::default(),
            drain_timeout: None,
            accept_backoff: DEFAULT_ACCEPT_BACKOFF,
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    #[must_use]
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Option<Duration>) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    #[must_use]
    pub fn with_accept_backoff(mut self, accept_backoff: Duration) -> Self {
        self.accept_backoff = accept_backoff;
        self
    }

    /// The socket address the listener binds to.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Validates the backlog and the pool sizing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the backlog is not positive or the
    /// pool configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.backlog <= 0 {
            return Err(Error::invalid_config(format!(
                "backlog must be greater than 0 (got {})",
                self.backlog
            )));
        }
        self.pool.validate()
    }
}
