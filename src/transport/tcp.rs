//! TCP implementation of [`Transport`].
//!
//! Each accepted connection gets a reader task, which buffers inbound bytes
//! and hands them to the bound [`ReceiveHandler`](super::ReceiveHandler), and
//! a writer task draining an unbounded queue of outbound frames. Frames
//! queued for one connection are written in the order they were sent.

use std::{
    any::Any,
    io,
    net::{SocketAddr, ToSocketAddrs},
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        OnceLock,
        PoisonError,
        RwLock,
        Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use dashmap::DashMap;
use futures::FutureExt;
use log::{debug, error, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener,
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::Handle,
    select,
    sync::mpsc,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::Instrument;
use url::{Host, Url};

use super::{SendCompletion, Transport, TransportError, TransportHandlers};
use crate::{config::TransportOptions, session::ConnectionId};

/// URL scheme served by [`TcpTransport`].
pub const SCHEME: &str = "tcp";

struct Outbound {
    data: Bytes,
    completion: SendCompletion,
}

/// Transport accepting TCP connections on a single listen address.
///
/// Listening requires a Tokio runtime and bound handlers.
///
/// ```no_run
/// use wirecall::transport::{TcpTransport, Transport};
///
/// # fn example(handlers: wirecall::transport::TransportHandlers) -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TcpTransport::new();
/// transport.bind(handlers)?;
/// transport.listen("tcp://127.0.0.1:0")?;
/// println!("listening on {:?}", transport.local_url());
/// # Ok(())
/// # }
/// ```
pub struct TcpTransport {
    me: Weak<TcpTransport>,
    handlers: OnceLock<TransportHandlers>,
    options: RwLock<TransportOptions>,
    local_addr: OnceLock<SocketAddr>,
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl TcpTransport {
    /// Create an unbound, idle transport.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            handlers: OnceLock::new(),
            options: RwLock::new(TransportOptions::default()),
            local_addr: OnceLock::new(),
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Address the listener is bound to, once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.local_addr.get().copied() }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize { self.connections.len() }

    fn options(&self) -> TransportOptions {
        *self.options.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let backoff = self.options().backoff.normalized();
        let mut delay = backoff.initial_delay;
        loop {
            select! {
                biased;

                () = self.shutdown.cancelled() => break,
                res = listener.accept() => match res {
                    Ok((stream, peer)) => {
                        self.spawn_connection(stream, peer);
                        delay = backoff.initial_delay;
                    }
                    Err(e) => {
                        let local_addr = self.local_addr();
                        warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                        sleep(delay).await;
                        delay = backoff.next_delay(delay);
                    }
                },
            }
        }
        debug!("accept loop stopped: local_addr={:?}", self.local_addr());
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let options = self.options();
        if let Err(e) = stream.set_nodelay(options.nodelay) {
            warn!("failed to set TCP_NODELAY: peer_addr={peer}, error={e}");
        }
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id, tx);

        let this = Arc::clone(self);
        let span = tracing::info_span!("connection", id = %id, peer = %peer);
        self.tracker.spawn(
            async move {
                let fut = AssertUnwindSafe(Arc::clone(&this).serve(id, stream, rx, options))
                    .catch_unwind();
                if let Err(panic) = fut.await {
                    this.connections.remove(&id);
                    let panic_msg = panic_message(panic.as_ref());
                    error!("connection task panicked: panic={panic_msg}, peer_addr={peer}");
                    tracing::error!(panic = %panic_msg, %peer, "connection task panicked");
                    if let Some(observer) = this.handlers.get().and_then(|h| h.observer.as_ref()) {
                        let err = io::Error::other(format!("connection task panicked: {panic_msg}"));
                        observer.on_disconnected(this.as_ref(), id, Some(&err));
                    }
                }
            }
            .instrument(span),
        );
    }

    async fn serve(
        self: Arc<Self>,
        id: ConnectionId,
        stream: TcpStream,
        rx: mpsc::UnboundedReceiver<Outbound>,
        options: TransportOptions,
    ) {
        let Some(handlers) = self.handlers.get().cloned() else {
            self.connections.remove(&id);
            return;
        };
        if let Some(observer) = &handlers.observer {
            observer.on_connected(self.as_ref(), id);
        }

        let (mut reader, writer) = stream.into_split();
        self.tracker
            .spawn(write_loop(writer, rx, self.shutdown.clone()).in_current_span());

        let transport: Arc<dyn Transport> = Arc::clone(&self) as Arc<dyn Transport>;
        let error = self
            .read_loop(&transport, &handlers, id, &mut reader, &options)
            .await;

        // Dropping the sender lets the writer flush what is queued and then
        // close the socket.
        self.connections.remove(&id);
        if let Some(observer) = &handlers.observer {
            observer.on_disconnected(self.as_ref(), id, error.as_ref());
        }
    }

    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn read_loop(
        &self,
        transport: &Arc<dyn Transport>,
        handlers: &TransportHandlers,
        id: ConnectionId,
        reader: &mut OwnedReadHalf,
        options: &TransportOptions,
    ) -> Option<io::Error> {
        let mut buf = BytesMut::with_capacity(options.read_buffer_capacity);
        loop {
            buf.reserve(options.read_buffer_capacity.max(1));
            let read = select! {
                biased;

                () = self.shutdown.cancelled() => return None,
                res = reader.read_buf(&mut buf) => res,
            };
            match read {
                Ok(0) => {
                    debug!("peer closed connection: connection={id}, pending={}", buf.len());
                    return None;
                }
                Ok(_) => {}
                Err(e) => return Some(e),
            }

            match handlers.receive.on_receive(transport, id, &buf).await {
                Ok(consumed) => buf.advance(consumed.min(buf.len())),
                Err(e) => {
                    warn!("closing connection: connection={id}, error={e}");
                    return Some(io::Error::new(io::ErrorKind::InvalidData, e));
                }
            }

            if buf.len() > options.max_pending_bytes {
                warn!(
                    "closing connection: connection={id}, pending={}, max_pending_bytes={}",
                    buf.len(),
                    options.max_pending_bytes
                );
                return Some(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "pending bytes limit exceeded",
                ));
            }
        }
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    shutdown: CancellationToken,
) {
    loop {
        let next = select! {
            biased;

            () = shutdown.cancelled() => None,
            msg = rx.recv() => msg,
        };
        let Some(Outbound { data, completion }) = next else {
            break;
        };
        let result = writer.write_all(&data).await.map_err(TransportError::from);
        let failed = result.is_err();
        completion(result);
        if failed {
            break;
        }
    }

    rx.close();
    while let Ok(Outbound { completion, .. }) = rx.try_recv() {
        completion(Err(TransportError::Closed));
    }
    if let Err(e) = writer.shutdown().await {
        debug!("socket shutdown failed: error={e}");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else {
        format!("{panic:?}")
    }
}

/// Resolve a `tcp://host:port` URL to a socket address.
///
/// # Errors
///
/// Returns [`TransportError::UnsupportedScheme`] for other schemes and
/// [`TransportError::InvalidUrl`] if the URL lacks a host or port or the host
/// does not resolve.
pub fn resolve_listen_url(raw: &str) -> Result<SocketAddr, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidUrl {
        url: raw.to_owned(),
        reason: reason.to_owned(),
    };
    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != SCHEME {
        return Err(TransportError::UnsupportedScheme(url.scheme().to_owned()));
    }
    let port = url.port().ok_or_else(|| invalid("missing port"))?;
    match url.host() {
        Some(Host::Ipv4(ip)) => Ok(SocketAddr::from((ip, port))),
        Some(Host::Ipv6(ip)) => Ok(SocketAddr::from((ip, port))),
        Some(Host::Domain(domain)) => (domain, port)
            .to_socket_addrs()
            .map_err(|e| invalid(&e.to_string()))?
            .next()
            .ok_or_else(|| invalid("host did not resolve")),
        None => Err(invalid("missing host")),
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn listen(&self, url: &str) -> Result<(), TransportError> {
        if let Some(addr) = self.local_addr.get() {
            return Err(TransportError::AlreadyListening(addr.to_string()));
        }
        if self.handlers.get().is_none() {
            return Err(TransportError::NotBound);
        }
        let this = self.me.upgrade().ok_or(TransportError::Closed)?;
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let addr = resolve_listen_url(url)?;
        let std_listener = std::net::TcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let bound = listener.local_addr()?;
        if self.local_addr.set(bound).is_err() {
            let addr = self.local_addr().map_or_else(String::new, |a| a.to_string());
            return Err(TransportError::AlreadyListening(addr));
        }

        debug!("listening: url={url}, local_addr={bound}");
        self.tracker.spawn_on(this.accept_loop(listener), &runtime);
        Ok(())
    }

    fn set_options(&self, options: &TransportOptions) {
        *self.options.write().unwrap_or_else(PoisonError::into_inner) = *options;
    }

    fn bind(&self, handlers: TransportHandlers) -> Result<(), TransportError> {
        self.handlers
            .set(handlers)
            .map_err(|_| TransportError::AlreadyBound)
    }

    fn send(&self, connection: ConnectionId, data: Bytes, completion: SendCompletion) {
        let outbound = Outbound { data, completion };
        let rejected = match self.connections.get(&connection) {
            Some(tx) => tx.send(outbound).err().map(|e| e.0),
            None => Some(outbound),
        };
        if let Some(Outbound { completion, .. }) = rejected {
            completion(Err(TransportError::NotConnected(connection)));
        }
    }

    fn local_url(&self) -> Option<String> { self.local_addr().map(|addr| format!("{SCHEME}://{addr}")) }

    fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
    }

    async fn closed(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) { self.shutdown.cancel(); }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connection_count())
            .field("closed", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}
