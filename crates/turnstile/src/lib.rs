//! # `turnstile`: Generic TCP Connection Acceptor
//!
//! `turnstile` binds a listening port, accepts incoming TCP connections on a
//! dedicated thread, and dispatches each connection to a pluggable
//! [`Handler`] running on a bounded, growable [`WorkerPool`]. The acceptor
//! knows nothing about protocols, so the same server is reused unchanged by
//! any handler.
//!
//! ## Highlights
//!
//! - **One operation to implement**: a handler reads from one stream and
//!   writes to another. Closures work too.
//! - **Growable worker pool**: starts with `min_workers`, grows up to
//!   `max_workers` under load, queues the rest, and retires idle workers.
//! - **Failure isolation**: handler errors and panics are logged and confined
//!   to their connection; the socket is always closed.
//! - **Graceful stop**: no new connections after `stop`, every accepted
//!   connection is still served, with an optional drain timeout.
//! - **Explicit cancellation**: the accept loop observes a
//!   [`CancellationToken`](tokio_util::sync::CancellationToken) rather than a
//!   global flag.
//!
//! ## Usage
//!
//! ```no_run
//! use std::io::{Read, Write};
//! use turnstile::{PoolConfig, Server, ServerConfig};
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = ServerConfig::new(7878)
//!     .with_pool(PoolConfig::new(2, 8, Duration::from_secs(30))?);
//!
//! let server = Server::new(config);
//! server.start(|input: &mut dyn Read, output: &mut dyn Write| -> anyhow::Result<()> {
//!     std::io::copy(input, output)?;
//!     Ok(())
//! })?;
//!
//! // ... later, from any thread:
//! server.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `tracing`: emits lifecycle, per-connection and pool events through the
//!   `tracing` crate (`acceptor` and `connection` spans). Off by default.
//!
//! ## Module Overview
//!
//! - [`handler`] - the [`Handler`] capability.
//! - [`pool`] - [`WorkerPool`], [`Job`] and pool statistics.
//! - [`server`] - [`Server`] lifecycle and the accept loop.
//! - [`config`] - [`ServerConfig`] and [`PoolConfig`].
//! - [`error`] - [`Error`] and [`Result`].

pub mod config;
mod connection;
pub mod error;
pub mod handler;
pub mod pool;
pub mod server;

pub use config::{PoolConfig, ServerConfig};
pub use error::{Error, Result};
pub use handler::Handler;
pub use pool::{Drain, Job, PoolStats, WorkerPool};
pub use server::{Server, ServerState};
