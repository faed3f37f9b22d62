//! Server and transport configuration.
//!
//! All option structs deserialize with `serde`, filling any omitted field
//! from its [`Default`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{header::MAX_FOLLOW_BYTES, transport::BackoffConfig};

/// Cooperative yielding policy for the dispatch loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessConfig {
    /// Number of frames to dispatch within one receive invocation before
    /// yielding to other tasks.
    ///
    /// A zero value disables the counter and relies solely on `time_slice`.
    pub frames_per_yield: usize,
    /// Optional time budget after which a long-running burst yields even if
    /// the frame threshold has not been reached.
    pub time_slice: Option<Duration>,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            frames_per_yield: 256,
            time_slice: None,
        }
    }
}

/// Options applied to every transport bound to a server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Initial capacity of each connection's read buffer.
    pub read_buffer_capacity: usize,
    /// Buffered-but-unconsumed bytes allowed per connection before it is closed.
    pub max_pending_bytes: usize,
    /// Disable Nagle's algorithm on accepted sockets.
    pub nodelay: bool,
    /// Retry policy for failed `accept()` calls.
    pub backoff: BackoffConfig,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            read_buffer_capacity: 8 * 1024,
            max_pending_bytes: MAX_FOLLOW_BYTES + 64 * 1024,
            nodelay: true,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Top-level server options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Dispatch loop yielding policy.
    pub fairness: FairnessConfig,
    /// Options pushed down to every bound transport.
    pub transport: TransportOptions,
}
