use core::fmt;
use portable_atomic::{AtomicU8, Ordering};

/// Lifecycle of a [`Server`](crate::Server).
///
/// ```text
/// Created --start--> Running --stop / listener failure--> Stopping --drained--> Stopped
///                       ^                                                        |
///                       +------------------------start---------------------------+
/// ```
///
/// A failed `start` does not move the state: a server that never ran stays
/// `Created` and a stopped one stays `Stopped`. Both are startable.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Constructed, never started.
    Created = 0,
    /// Listener bound and accept loop running.
    Running = 1,
    /// No longer accepting; in-flight connections are draining.
    Stopping = 2,
    /// Listener closed and pool drained.
    Stopped = 3,
}

impl ServerState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// Returns `true` if `start` may be invoked in this state.
    pub const fn is_startable(self) -> bool {
        matches!(self, Self::Created | Self::Stopped)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Atomic cell holding a [`ServerState`], shared between the controller and
/// the acceptor thread.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new(state: ServerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ServerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves from `from` to `to`, returning `false` if the current state is
    /// not `from`.
    pub(crate) fn transition(&self, from: ServerState, to: ServerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
