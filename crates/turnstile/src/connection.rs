//! Accepted connections and the job that serves them.
//!
//! A [`Connection`] is exclusively owned by the [`ConnectionJob`] that handles
//! it. The socket is shut down and closed when the connection is dropped, so
//! it is released whether the handler returned normally, returned an error,
//! or panicked.

#[cfg(feature = "tracing")]
use crate::pool::worker::panic_message;
use crate::{handler::SharedHandler, pool::Job};
use std::{
    io::{self, BufWriter, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    panic::{self, AssertUnwindSafe},
};

/// One accepted client session.
#[derive(Debug)]
#[cfg_attr(not(feature = "tracing"), allow(dead_code))]
pub(crate) struct Connection {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
}

impl Connection {
    pub(crate) const fn new(id: u64, peer: SocketAddr, stream: TcpStream) -> Self {
        Self { id, peer, stream }
    }

    #[cfg(feature = "tracing")]
    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    #[cfg(feature = "tracing")]
    pub(crate) const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Hands the connection's streams to `handler` and flushes the buffered
    /// output once it returns successfully.
    fn serve(&self, handler: &SharedHandler) -> anyhow::Result<()> {
        let mut input = &self.stream;
        let mut output = BufWriter::new(&self.stream);
        handler.handle(&mut input, &mut output)?;
        output.flush()?;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The peer may already be gone; the descriptor is closed either way.
        let _shutdown = self.stream.shutdown(Shutdown::Both);

        #[cfg(feature = "tracing")]
        if let Err(e) = _shutdown {
            if e.kind() != io::ErrorKind::NotConnected {
                tracing::trace!(id = self.id, "Socket shutdown failed: {e}");
            }
        }
    }
}

/// A connection paired with the handler installed for the current run.
///
/// This is the only job type the acceptor submits to its pool. Every failure
/// raised while serving is contained here and logged.
pub(crate) struct ConnectionJob {
    connection: Connection,
    handler: SharedHandler,
}

impl ConnectionJob {
    pub(crate) const fn new(connection: Connection, handler: SharedHandler) -> Self {
        Self {
            connection,
            handler,
        }
    }
}

impl Job for ConnectionJob {
    fn run(self) {
        let Self {
            connection,
            handler,
        } = self;

        #[cfg(feature = "tracing")]
        let _enter = tracing::debug_span!(
            "connection",
            id = connection.id(),
            peer = %connection.peer()
        )
        .entered();

        let _outcome = panic::catch_unwind(AssertUnwindSafe(|| connection.serve(&handler)));

        #[cfg(feature = "tracing")]
        match _outcome {
            Ok(Ok(())) => tracing::debug!("Connection handled"),
            Ok(Err(e)) => tracing::warn!("Connection handler failed: {e:#}"),
            Err(payload) => tracing::error!(
                "Connection handler panicked: {}",
                panic_message(payload.as_ref())
            ),
        }

        drop(connection);

        #[cfg(feature = "tracing")]
        tracing::trace!("Connection closed");
    }
}
