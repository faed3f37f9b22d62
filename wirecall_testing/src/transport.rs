//! In-memory transport doubles and a driver emulating transport buffering.

use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use wirecall::{
    ConnectionId,
    DispatchError,
    Dispatcher,
    config::TransportOptions,
    dispatch::YieldPoint,
    transport::{SendCompletion, Transport, TransportError, TransportHandlers},
};

/// Transport that records every frame queued through `send`.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ConnectionId, Bytes)>>,
    handlers: Mutex<Option<TransportHandlers>>,
}

impl RecordingTransport {
    /// Create a shared recording transport.
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Frames sent so far, with their connection.
    pub fn sent(&self) -> Vec<(ConnectionId, Bytes)> { self.sent.lock().expect("lock").clone() }

    /// Concatenated bytes sent on `connection`.
    pub fn sent_bytes(&self, connection: ConnectionId) -> Vec<u8> {
        self.sent()
            .into_iter()
            .filter(|(c, _)| *c == connection)
            .flat_map(|(_, data)| data.to_vec())
            .collect()
    }

    /// Returns `true` once a server has bound its handlers.
    pub fn is_bound(&self) -> bool { self.handlers.lock().expect("lock").is_some() }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn listen(&self, _url: &str) -> Result<(), TransportError> { Ok(()) }

    fn set_options(&self, _options: &TransportOptions) {}

    fn bind(&self, handlers: TransportHandlers) -> Result<(), TransportError> {
        let mut slot = self.handlers.lock().expect("lock");
        if slot.is_some() {
            return Err(TransportError::AlreadyBound);
        }
        *slot = Some(handlers);
        Ok(())
    }

    fn send(&self, connection: ConnectionId, data: Bytes, completion: SendCompletion) {
        self.sent.lock().expect("lock").push((connection, data));
        completion(Ok(()));
    }

    fn local_url(&self) -> Option<String> { None }

    fn shutdown(&self) {}

    async fn closed(&self) {}
}

/// Yield point counting how often the dispatcher yielded.
#[derive(Debug, Default)]
pub struct CountingYield(AtomicUsize);

impl CountingYield {
    /// Create a shared counter.
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Yields observed so far.
    pub fn count(&self) -> usize { self.0.load(Ordering::SeqCst) }
}

#[async_trait]
impl YieldPoint for CountingYield {
    async fn yield_now(&self) { self.0.fetch_add(1, Ordering::SeqCst); }
}

/// Outcome of feeding chunks through [`drive_chunks`].
#[derive(Debug)]
pub struct DriveOutcome {
    /// Bytes still buffered after the last chunk.
    pub pending: Vec<u8>,
    /// Fatal error that stopped delivery, if any.
    pub error: Option<DispatchError>,
}

/// Feed `chunks` to `dispatcher` the way a transport does.
///
/// Each chunk is appended to the buffered suffix and the whole buffer is
/// handed over; the consumed prefix is dropped afterwards. Delivery stops at
/// the first fatal error.
pub async fn drive_chunks<I, C>(
    dispatcher: &Dispatcher,
    transport: &Arc<dyn Transport>,
    connection: ConnectionId,
    chunks: I,
) -> DriveOutcome
where
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
{
    let mut pending = Vec::new();
    for chunk in chunks {
        pending.extend_from_slice(chunk.as_ref());
        match dispatcher.receive(transport, connection, &pending).await {
            Ok(consumed) => {
                pending.drain(..consumed);
            }
            Err(e) => {
                return DriveOutcome {
                    pending,
                    error: Some(e),
                };
            }
        }
    }
    DriveOutcome {
        pending,
        error: None,
    }
}
