//! The per-connection capability plugged into a [`Server`](crate::Server).
//!
//! A [`Handler`] owns all protocol knowledge: it reads requests from the
//! connection's input stream, computes whatever it computes, and writes the
//! response to the output stream. The acceptor knows nothing beyond this one
//! operation, so the same acceptor serves any protocol.
//!
//! Handlers are installed once per run and shared read-only by every worker,
//! hence the `Send + Sync + 'static` bound. Any closure with the matching
//! signature is a handler:
//!
//! ```
//! use std::io::{Read, Write};
//!
//! let discard = |input: &mut dyn Read, _output: &mut dyn Write| -> anyhow::Result<()> {
//!     std::io::copy(input, &mut std::io::sink())?;
//!     Ok(())
//! };
//! # fn assert_handler<H: turnstile::Handler>(_: &H) {}
//! # assert_handler(&discard);
//! ```

use std::io::{Read, Write};
use std::sync::Arc;

/// Protocol logic for a single connection.
///
/// `handle` is invoked on a worker thread with exclusive access to the
/// connection's streams. Returning `Err` or panicking marks only this
/// connection as failed: the failure is logged, the socket is closed, and the
/// server keeps accepting. The output is flushed after a successful return;
/// the socket is closed in every case.
pub trait Handler: Send + Sync + 'static {
    /// Serves one connection.
    ///
    /// # Errors
    ///
    /// Any error is treated as a per-connection failure.
    fn handle(&self, input: &mut dyn Read, output: &mut dyn Write) -> anyhow::Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&mut dyn Read, &mut dyn Write) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, input: &mut dyn Read, output: &mut dyn Write) -> anyhow::Result<()> {
        self(input, output)
    }
}

/// Shared, type-erased handler installed for one run.
pub(crate) type SharedHandler = Arc<dyn Handler>;
