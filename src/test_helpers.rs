//! Test doubles shared by unit tests.

use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    config::TransportOptions,
    dispatch::YieldPoint,
    session::ConnectionId,
    transport::{SendCompletion, Transport, TransportError, TransportHandlers},
};

/// Transport that records every frame handed to `send`.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ConnectionId, Bytes)>>,
    fail_sends: bool,
}

impl RecordingTransport {
    /// Transport whose sends all complete with [`TransportError::Closed`].
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail_sends: true,
        }
    }

    /// Frames sent so far.
    pub fn sent(&self) -> Vec<(ConnectionId, Bytes)> { self.sent.lock().expect("lock").clone() }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn listen(&self, _url: &str) -> Result<(), TransportError> { Ok(()) }

    fn set_options(&self, _options: &TransportOptions) {}

    fn bind(&self, _handlers: TransportHandlers) -> Result<(), TransportError> { Ok(()) }

    fn send(&self, connection: ConnectionId, data: Bytes, completion: SendCompletion) {
        if self.fail_sends {
            completion(Err(TransportError::Closed));
            return;
        }
        self.sent.lock().expect("lock").push((connection, data));
        completion(Ok(()));
    }

    fn local_url(&self) -> Option<String> { None }

    fn shutdown(&self) {}

    async fn closed(&self) {}
}

/// Yield point that only counts how often it was reached.
#[derive(Debug, Default)]
pub struct CountingYield(AtomicUsize);

impl CountingYield {
    pub fn count(&self) -> usize { self.0.load(Ordering::SeqCst) }
}

#[async_trait]
impl YieldPoint for CountingYield {
    async fn yield_now(&self) { self.0.fetch_add(1, Ordering::SeqCst); }
}
