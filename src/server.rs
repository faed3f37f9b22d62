//! RPC server tying services, transports and registration together.
//!
//! A [`Server`] owns a service registry and a [`Dispatcher`] over it, binds
//! that dispatcher to any number of transports, and publishes the listening
//! addresses through an optional [`Registrar`].

use std::{future::Future, io, sync::Arc};

use log::{debug, info, warn};
use tokio::signal;

use crate::{
    config::ServerOptions,
    dispatch::{Dispatcher, YieldPoint},
    header::HeaderFactory,
    metrics,
    registrar::{Registrar, RegistrationError, registrar_for_url},
    registry::{RegistryError, ServiceRegistry},
    service::Service,
    session::ConnectionId,
    transport::{ConnectionObserver, TcpTransport, Transport, TransportError, TransportHandlers},
};

/// Logs connection lifecycle events and tracks the active connection gauge.
#[derive(Debug, Default)]
struct ConnectionTracker;

impl ConnectionObserver for ConnectionTracker {
    fn on_connected(&self, transport: &dyn Transport, connection: ConnectionId) {
        debug!(
            "connection opened: connection={connection}, local_url={:?}",
            transport.local_url()
        );
        metrics::inc_connections();
    }

    fn on_disconnected(
        &self,
        transport: &dyn Transport,
        connection: ConnectionId,
        error: Option<&io::Error>,
    ) {
        match error {
            Some(e) => debug!(
                "connection closed: connection={connection}, local_url={:?}, error={e}",
                transport.local_url()
            ),
            None => debug!(
                "connection closed: connection={connection}, local_url={:?}",
                transport.local_url()
            ),
        }
        metrics::dec_connections();
    }
}

/// RPC server.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use wirecall::{server::Server, service::RpcService};
///
/// # #[tokio::main]
/// # async fn main() -> wirecall::Result<()> {
/// let echo = RpcService::new("Echo").typed_method("echo", |code: i32| Some(code))?;
///
/// let mut server = Server::new();
/// server.register_service(Arc::new(echo))?;
/// server.listen("tcp://127.0.0.1:48080")?;
/// server.run().await;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    observer: Arc<ConnectionTracker>,
    options: ServerOptions,
    transports: Vec<Arc<dyn Transport>>,
    registrar: Option<Arc<dyn Registrar>>,
}

impl Default for Server {
    fn default() -> Self { Self::new() }
}

impl Server {
    /// Create a server with no services, transports or registrar.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(Arc::new(ServiceRegistry::new()))),
            observer: Arc::new(ConnectionTracker),
            options: ServerOptions::default(),
            transports: Vec::new(),
            registrar: None,
        }
    }

    /// Dispatcher shared by every bound transport.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> { &self.dispatcher }

    /// Current options.
    #[must_use]
    pub fn options(&self) -> &ServerOptions { &self.options }

    /// Transports bound so far, in binding order.
    #[must_use]
    pub fn transports(&self) -> &[Arc<dyn Transport>] { &self.transports }

    /// Register `service` under its name.
    ///
    /// Services may be added while the server is running.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateService`] if the name is taken.
    pub fn register_service(&self, service: Arc<dyn Service>) -> Result<(), RegistryError> {
        let name = service.name().to_owned();
        self.dispatcher.registry().register(service)?;
        debug!("service registered: service={name}");
        Ok(())
    }

    /// Remove the service called `name`, if registered.
    ///
    /// Frames already being dispatched to it finish normally; later frames
    /// naming it close their connection.
    pub fn remove_service(&self, name: &str) -> Option<Arc<dyn Service>> {
        let removed = self.dispatcher.registry().remove(name);
        if removed.is_some() {
            debug!("service removed: service={name}");
        }
        removed
    }

    /// Replace the header factory used to parse inbound frames.
    pub fn set_header_factory(&self, factory: HeaderFactory) { self.dispatcher.set_header_factory(factory); }

    /// Replace the point at which long bursts of frames yield.
    pub fn set_yield_point(&self, yield_point: Arc<dyn YieldPoint>) {
        self.dispatcher.set_yield_point(yield_point);
    }

    /// Apply `options` to the dispatcher and every bound transport.
    pub fn set_options(&mut self, options: ServerOptions) {
        self.dispatcher.set_fairness(options.fairness);
        for transport in &self.transports {
            transport.set_options(&options.transport);
        }
        self.options = options;
    }

    /// Install `registrar`, withdrawing everything the previous one published.
    pub fn set_registrar(&mut self, registrar: Arc<dyn Registrar>) {
        if let Some(previous) = self.registrar.replace(registrar) {
            previous.unregister();
        }
    }

    fn handlers(&self) -> TransportHandlers {
        TransportHandlers {
            receive: Arc::clone(&self.dispatcher) as _,
            observer: Some(Arc::clone(&self.observer) as _),
        }
    }

    /// Serve RPCs arriving on `transport`.
    ///
    /// The server's transport options are applied once the transport is
    /// bound.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyBound`] if the transport already
    /// serves a server.
    pub fn bind_transport(&mut self, transport: Arc<dyn Transport>) -> Result<(), TransportError> {
        transport.bind(self.handlers())?;
        transport.set_options(&self.options.transport);
        self.transports.push(transport);
        Ok(())
    }

    /// Create a TCP transport listening on `url` and bind it.
    ///
    /// Outside a Tokio runtime this fails with [`TransportError::NoRuntime`].
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the URL is invalid or the address
    /// cannot be bound. The server is left unchanged.
    pub fn listen(&mut self, url: &str) -> Result<(), TransportError> {
        let transport = TcpTransport::new();
        self.bind_transport(Arc::clone(&transport) as _)?;
        if let Err(e) = transport.listen(url) {
            warn!("listen failed: url={url}, error={e}");
            transport.shutdown();
            self.transports.pop();
            return Err(e);
        }
        info!(
            "listening: url={url}, local_url={}",
            transport.local_url().unwrap_or_default()
        );
        Ok(())
    }

    /// Addresses of every listening transport.
    #[must_use]
    pub fn local_urls(&self) -> Vec<String> {
        self.transports.iter().filter_map(|t| t.local_url()).collect()
    }

    /// Publish every listening address under `registry_url`.
    ///
    /// Without an installed registrar, one is derived from the URL scheme.
    /// Failures are logged and returned; the server keeps serving.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] if no registrar is available, no
    /// transport is listening, or the registrar rejects an address.
    pub fn register_to(&mut self, registry_url: &str) -> Result<(), RegistrationError> {
        let registrar = match &self.registrar {
            Some(registrar) => Arc::clone(registrar),
            None => {
                let registrar = registrar_for_url(registry_url).inspect_err(|e| {
                    warn!("no registrar for url: registry_url={registry_url}, error={e}");
                })?;
                self.registrar = Some(Arc::clone(&registrar));
                registrar
            }
        };

        let addresses = self.local_urls();
        if addresses.is_empty() {
            warn!("register skipped: registry_url={registry_url}, error=no listening transport");
            return Err(RegistrationError::NoLocalAddress);
        }
        for address in &addresses {
            registrar.register(registry_url, address).inspect_err(|e| {
                warn!("register failed: registry_url={registry_url}, address={address}, error={e}");
            })?;
            info!("registered: registry_url={registry_url}, address={address}");
        }
        Ok(())
    }

    /// Stop every transport, wait for their tasks, and unregister.
    pub async fn shutdown(&self) {
        for transport in &self.transports {
            transport.shutdown();
        }
        for transport in &self.transports {
            transport.closed().await;
        }
        if let Some(registrar) = &self.registrar {
            registrar.unregister();
        }
        info!("server stopped");
    }

    /// Serve until Ctrl+C is received, then shut down.
    pub async fn run(self) {
        self.run_with_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("failed to listen for shutdown signal: error={e}");
            }
        })
        .await;
    }

    /// Serve until `shutdown` resolves, then shut down.
    pub async fn run_with_shutdown<S>(self, shutdown: S)
    where
        S: Future<Output = ()> + Send,
    {
        shutdown.await;
        self.shutdown().await;
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        for transport in &self.transports {
            transport.shutdown();
        }
        if let Some(registrar) = &self.registrar {
            registrar.unregister();
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("services", &self.dispatcher.registry().names())
            .field("options", &self.options)
            .field("local_urls", &self.local_urls())
            .field("registrar", &self.registrar.is_some())
            .finish_non_exhaustive()
    }
}
