//! Error types for the acceptor and its worker pool.
//!
//! This module defines the central [`Error`] enum, which captures every failure
//! that is reported to the caller of the lifecycle and pool APIs.
//!
//! ## Error Cases
//! - `Bind`: The listening socket could not be created, bound, or put into the
//!   listening state. Fatal to `start`.
//! - `AlreadyStarted`: `start` was invoked while a run is still active.
//! - `InvalidConfig`: A configuration value violates its constraints.
//! - `PoolShutdown`: A job was submitted to a pool that is draining or closed.
//! - `Spawn`: The OS refused to create an acceptor or worker thread.
//! - `AcceptorPanicked`: The acceptor thread unwound instead of exiting.
//!
//! Failures raised while serving a single connection are intentionally absent:
//! they are logged and isolated to that connection, never surfaced here.

use crate::server::ServerState;
use std::io;
use std::net::SocketAddr;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the acceptor, lifecycle controller and worker pool.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The listener could not be bound to the configured address.
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// `start` was called while the server was not startable.
    #[error("server is already {state}")]
    AlreadyStarted { state: ServerState },

    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The worker pool no longer accepts jobs.
    #[error("worker pool is shut down")]
    PoolShutdown,

    /// A thread could not be spawned.
    #[error("failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// The acceptor thread panicked.
    #[error("acceptor thread panicked")]
    AcceptorPanicked,
}

impl Error {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
