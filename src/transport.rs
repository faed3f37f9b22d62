//! Transport collaborator interface.
//!
//! A transport owns sockets and delivers bytes; the server only sees it
//! through [`Transport`]. Inbound data is pushed to a [`ReceiveHandler`],
//! which reports how many bytes it consumed. Any unconsumed suffix is kept by
//! the transport and redelivered, prefixed to newly arrived bytes, on the
//! next invocation.

mod backoff;
pub mod tcp;

use std::{fmt, io, sync::Arc};

use async_trait::async_trait;
pub use backoff::BackoffConfig;
use bytes::Bytes;
pub use tcp::TcpTransport;
use thiserror::Error;

use crate::{config::TransportOptions, dispatch::DispatchError, session::ConnectionId};

/// Errors raised by transports.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The listen URL could not be parsed or resolved.
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    /// The URL scheme is not handled by this transport.
    #[error("unsupported url scheme `{0}`")]
    UnsupportedScheme(String),
    /// Handlers were already installed on this transport.
    #[error("transport is already bound to a server")]
    AlreadyBound,
    /// `listen` was called before any handlers were bound.
    #[error("transport has no handlers bound")]
    NotBound,
    /// `listen` was called on a transport that is already listening.
    #[error("transport is already listening on {0}")]
    AlreadyListening(String),
    /// The connection is unknown or has been closed.
    #[error("connection {0} is not connected")]
    NotConnected(ConnectionId),
    /// Listening was attempted outside a Tokio runtime.
    #[error("no Tokio runtime available to serve connections")]
    NoRuntime,
    /// The transport has been shut down.
    #[error("transport is closed")]
    Closed,
    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Completion invoked exactly once with the outcome of a [`Transport::send`].
pub type SendCompletion = Box<dyn FnOnce(Result<(), TransportError>) + Send>;

/// Consumer of inbound connection bytes.
#[async_trait]
pub trait ReceiveHandler: Send + Sync {
    /// Process the buffered bytes of `connection`.
    ///
    /// `data` is the whole buffered but unconsumed byte range. Returns the
    /// number of bytes consumed from its front.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when the connection must be closed.
    async fn on_receive(
        &self,
        transport: &Arc<dyn Transport>,
        connection: ConnectionId,
        data: &[u8],
    ) -> Result<usize, DispatchError>;
}

/// Observer of connection lifecycle events.
pub trait ConnectionObserver: Send + Sync {
    /// A connection was accepted.
    fn on_connected(&self, transport: &dyn Transport, connection: ConnectionId);

    /// A connection was closed, with the error that closed it if any.
    fn on_disconnected(
        &self,
        transport: &dyn Transport,
        connection: ConnectionId,
        error: Option<&io::Error>,
    );
}

/// Callbacks a server installs on a transport.
#[derive(Clone)]
pub struct TransportHandlers {
    /// Receives inbound bytes.
    pub receive: Arc<dyn ReceiveHandler>,
    /// Optional lifecycle observer.
    pub observer: Option<Arc<dyn ConnectionObserver>>,
}

impl fmt::Debug for TransportHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandlers")
            .field("receive", &"<handler>")
            .field("observer", &self.observer.as_ref().map(|_| "<observer>"))
            .finish()
    }
}

/// Byte transport serving connections on behalf of a server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start accepting connections on `url`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the URL is invalid or binding fails.
    fn listen(&self, url: &str) -> Result<(), TransportError>;

    /// Apply options; connections accepted afterwards use them.
    fn set_options(&self, options: &TransportOptions);

    /// Install the server's callbacks. A transport can be bound only once.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyBound`] on a second call.
    fn bind(&self, handlers: TransportHandlers) -> Result<(), TransportError>;

    /// Queue `data` for delivery on `connection`.
    ///
    /// `completion` runs once the bytes are written or the send fails.
    fn send(&self, connection: ConnectionId, data: Bytes, completion: SendCompletion);

    /// Resolved, externally reachable address, once listening.
    fn local_url(&self) -> Option<String>;

    /// Stop accepting connections and close every open connection.
    fn shutdown(&self);

    /// Wait until every task started by the transport has finished.
    async fn closed(&self);
}
