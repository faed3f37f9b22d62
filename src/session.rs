//! Connection identifiers and per-frame dispatch sessions.

use std::{fmt, sync::Arc};

use crate::{header::FrameHeader, transport::Transport};

/// Identifier a transport assigns to each accepted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Everything needed to dispatch one frame and reply to it.
///
/// A session is built fresh for every complete frame and moved into the
/// dispatch path; nothing retains it once the reply has been queued.
pub struct Session {
    /// Connection the frame arrived on.
    pub connection: ConnectionId,
    /// Transport owning the connection.
    pub transport: Arc<dyn Transport>,
    /// Parsed header of the frame.
    pub header: Box<dyn FrameHeader>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.connection)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}
