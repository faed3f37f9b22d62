//! Services and their method tables.
//!
//! A [`Service`] resolves a wire-level method name to a handler and invokes
//! it with the raw payload bytes. [`RpcService`] is the table-backed
//! implementation most applications register.

use std::{collections::HashMap, fmt, sync::Arc};

use bincode::{Decode, Encode, config};
use thiserror::Error;

use crate::message::{BincodeMessage, CodecError, Message};

/// Outcome of invoking a method.
///
/// `Ok(None)` means the call was processed and no reply is owed.
pub type MethodResult = Result<Option<Box<dyn Message>>, ServiceError>;

/// Errors raised by services while building method tables or handling calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// The service has no method with the requested name.
    #[error("unknown method `{method}` on service `{service}`")]
    UnknownMethod { service: String, method: String },
    /// A method with this name was already registered.
    #[error("method `{0}` was already registered")]
    DuplicateMethod(String),
    /// The request payload could not be decoded.
    #[error("failed to decode request: {0}")]
    Decode(#[source] CodecError),
    /// The handler reported an application error.
    #[error("handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A named group of methods invocable by wire-level name.
pub trait Service: Send + Sync {
    /// Name clients address this service by.
    fn name(&self) -> &str;

    /// Invoke `method` with the raw request `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnknownMethod`] if the method does not exist,
    /// or any error produced while handling the call.
    fn call_method(&self, method: &str, payload: &[u8]) -> MethodResult;
}

/// Handler stored in an [`RpcService`] method table.
pub type MethodHandler = Arc<dyn Fn(&[u8]) -> MethodResult + Send + Sync>;

/// Service backed by a name-keyed method table.
///
/// ```
/// use wirecall::service::{RpcService, Service};
///
/// let service = RpcService::new("Echo")
///     .typed_method("echo", |code: u32| Some(code))
///     .expect("register echo");
/// assert_eq!(service.name(), "Echo");
/// ```
pub struct RpcService {
    name: String,
    methods: HashMap<String, MethodHandler>,
}

impl RpcService {
    /// Create a service with an empty method table.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Register a handler receiving raw payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::DuplicateMethod`] if `name` is already taken.
    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Result<Self, ServiceError>
    where
        F: Fn(&[u8]) -> MethodResult + Send + Sync + 'static,
    {
        let name = name.into();
        if self.methods.contains_key(&name) {
            return Err(ServiceError::DuplicateMethod(name));
        }
        self.methods.insert(name, Arc::new(handler));
        Ok(self)
    }

    /// Register a handler working on `bincode`-encoded values.
    ///
    /// The request is decoded into `Req`; the handler returns `Some(resp)` to
    /// reply or `None` to send nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::DuplicateMethod`] if `name` is already taken.
    pub fn typed_method<Req, Resp, F>(
        self,
        name: impl Into<String>,
        handler: F,
    ) -> Result<Self, ServiceError>
    where
        Req: Decode<()> + 'static,
        Resp: Encode + Decode<()> + Send + 'static,
        F: Fn(Req) -> Option<Resp> + Send + Sync + 'static,
    {
        self.method(name, move |payload: &[u8]| {
            let (request, _) = bincode::decode_from_slice::<Req, _>(payload, config::standard())
                .map_err(|e| ServiceError::Decode(CodecError::from(e)))?;
            Ok(handler(request).map(|resp| Box::new(BincodeMessage::owned(resp)) as Box<dyn Message>))
        })
    }

    /// Names of the registered methods, in no particular order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> { self.methods.keys().map(String::as_str) }
}

impl Service for RpcService {
    fn name(&self) -> &str { &self.name }

    fn call_method(&self, method: &str, payload: &[u8]) -> MethodResult {
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| ServiceError::UnknownMethod {
                service: self.name.clone(),
                method: method.to_owned(),
            })?;
        handler(payload)
    }
}

impl fmt::Debug for RpcService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.method_names().collect();
        methods.sort_unstable();
        f.debug_struct("RpcService")
            .field("name", &self.name)
            .field("methods", &methods)
            .finish()
    }
}
