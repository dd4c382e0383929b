//! Method handlers and the path-keyed registry.

use crate::call::{
    BoxFuture, ServerDuplexStream, ServerReadableStream, ServerUnaryCall, ServerWritableStream,
    UnaryReply,
};
use crate::error::ServerError;
use crate::status::Status;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Streaming shape of a method, derived from which sides may send
/// multiple messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Unary,
    ClientStream,
    ServerStream,
    Bidi,
}

impl MethodKind {
    /// Derive the shape from the streaming flags of a method definition.
    pub fn from_streaming(request_stream: bool, response_stream: bool) -> Self {
        match (request_stream, response_stream) {
            (false, false) => MethodKind::Unary,
            (true, false) => MethodKind::ClientStream,
            (false, true) => MethodKind::ServerStream,
            (true, true) => MethodKind::Bidi,
        }
    }
}

/// Serializer from a response value (already encoded by the user's type
/// layer) to wire bytes.
pub type SerializeFn = Arc<dyn Fn(Bytes) -> Result<Bytes, Status> + Send + Sync>;
/// Deserializer from wire bytes to a request value.
pub type DeserializeFn = Arc<dyn Fn(Bytes) -> Result<Bytes, Status> + Send + Sync>;

/// The identity codec. Payloads pass through untouched.
pub fn identity_codec() -> SerializeFn {
    Arc::new(|payload| Ok(payload))
}

/// Unary handler: single request in, single reply out.
pub type UnaryFn =
    Arc<dyn Fn(ServerUnaryCall) -> BoxFuture<'static, Result<UnaryReply, Status>> + Send + Sync>;
/// Client-streaming handler: request stream in, single reply out.
pub type ClientStreamFn = Arc<
    dyn Fn(ServerReadableStream) -> BoxFuture<'static, Result<UnaryReply, Status>> + Send + Sync,
>;
/// Server-streaming handler: single request in, response stream out.
pub type ServerStreamFn =
    Arc<dyn Fn(ServerWritableStream) -> BoxFuture<'static, Result<(), Status>> + Send + Sync>;
/// Bidirectional handler.
pub type BidiFn =
    Arc<dyn Fn(ServerDuplexStream) -> BoxFuture<'static, Result<(), Status>> + Send + Sync>;

/// A user callback with a signature determined by the method's shape.
#[derive(Clone)]
pub enum HandlerFn {
    Unary(UnaryFn),
    ClientStream(ClientStreamFn),
    ServerStream(ServerStreamFn),
    Bidi(BidiFn),
}

impl HandlerFn {
    pub fn kind(&self) -> MethodKind {
        match self {
            HandlerFn::Unary(_) => MethodKind::Unary,
            HandlerFn::ClientStream(_) => MethodKind::ClientStream,
            HandlerFn::ServerStream(_) => MethodKind::ServerStream,
            HandlerFn::Bidi(_) => MethodKind::Bidi,
        }
    }
}

/// A registered method. Immutable after registration.
pub struct MethodHandler {
    /// Method path, unique within a server.
    pub path: String,
    /// Streaming shape.
    pub kind: MethodKind,
    /// Response serializer.
    pub serialize: SerializeFn,
    /// Request deserializer.
    pub deserialize: DeserializeFn,
    /// The user callback.
    pub func: HandlerFn,
}

impl MethodHandler {
    pub fn new(
        path: impl Into<String>,
        func: HandlerFn,
        serialize: SerializeFn,
        deserialize: DeserializeFn,
    ) -> Self {
        let kind = func.kind();
        Self {
            path: path.into(),
            kind,
            serialize,
            deserialize,
            func,
        }
    }
}

/// Path-keyed handler registry.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<MethodHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Returns false iff the path is already taken;
    /// the existing handler is never overwritten.
    pub fn register(&mut self, handler: MethodHandler) -> bool {
        if self.handlers.contains_key(&handler.path) {
            return false;
        }
        self.handlers.insert(handler.path.clone(), Arc::new(handler));
        true
    }

    /// Remove a handler. Returns whether the path was registered.
    pub fn unregister(&mut self, path: &str) -> bool {
        self.handlers.remove(path).is_some()
    }

    /// Look up the handler for a method path.
    pub fn lookup(&self, path: &str) -> Option<Arc<MethodHandler>> {
        self.handlers.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// One method of a service definition.
#[derive(Clone)]
pub struct MethodDefinition {
    /// Full method path, e.g. `/package.Service/Method`.
    pub path: String,
    pub request_stream: bool,
    pub response_stream: bool,
    /// Wire-form method name to fall back to when the primary name is
    /// absent from the implementation map.
    pub original_name: Option<String>,
    pub request_serialize: SerializeFn,
    pub request_deserialize: DeserializeFn,
    pub response_serialize: SerializeFn,
    pub response_deserialize: DeserializeFn,
}

impl MethodDefinition {
    /// A definition with identity codecs, for tests and raw-bytes services.
    pub fn raw(path: impl Into<String>, request_stream: bool, response_stream: bool) -> Self {
        Self {
            path: path.into(),
            request_stream,
            response_stream,
            original_name: None,
            request_serialize: identity_codec(),
            request_deserialize: identity_codec(),
            response_serialize: identity_codec(),
            response_deserialize: identity_codec(),
        }
    }
}

/// A service: method name to definition.
pub type ServiceDefinition = HashMap<String, MethodDefinition>;

/// A service implementation: method name to callback.
pub type ServiceImplementation = HashMap<String, HandlerFn>;

pub(crate) fn unimplemented_method_status(path: &str) -> Status {
    Status::unimplemented(format!("The server does not implement the method {path}"))
}

/// Build the handler installed for a method with no implementation: it
/// completes every call with UNIMPLEMENTED.
pub(crate) fn default_handler(kind: MethodKind, path: &str) -> HandlerFn {
    let status = unimplemented_method_status(path);
    match kind {
        MethodKind::Unary => {
            let status = status.clone();
            HandlerFn::Unary(Arc::new(move |_call| {
                let status = status.clone();
                Box::pin(async move { Err(status) })
            }))
        }
        MethodKind::ClientStream => {
            let status = status.clone();
            HandlerFn::ClientStream(Arc::new(move |_stream| {
                let status = status.clone();
                Box::pin(async move { Err(status) })
            }))
        }
        MethodKind::ServerStream => {
            let status = status.clone();
            HandlerFn::ServerStream(Arc::new(move |_stream| {
                let status = status.clone();
                Box::pin(async move { Err(status) })
            }))
        }
        MethodKind::Bidi => HandlerFn::Bidi(Arc::new(move |_stream| {
            let status = status.clone();
            Box::pin(async move { Err(status) })
        })),
    }
}

/// Derive the handlers a service definition contributes: shape from the
/// streaming flags, implementation selected by method name with an
/// `original_name` fallback, and a default UNIMPLEMENTED handler where
/// no implementation exists.
pub(crate) fn build_service_handlers(
    definition: &ServiceDefinition,
    implementation: &ServiceImplementation,
) -> Result<Vec<MethodHandler>, ServerError> {
    if definition.is_empty() {
        return Err(ServerError::EmptyService);
    }

    let mut handlers = Vec::with_capacity(definition.len());
    for (name, method) in definition {
        let kind = MethodKind::from_streaming(method.request_stream, method.response_stream);
        let func = implementation
            .get(name)
            .or_else(|| {
                method
                    .original_name
                    .as_deref()
                    .and_then(|original| implementation.get(original))
            })
            .cloned()
            .unwrap_or_else(|| default_handler(kind, &method.path));
        handlers.push(MethodHandler::new(
            method.path.clone(),
            func,
            method.response_serialize.clone(),
            method.request_deserialize.clone(),
        ));
    }
    Ok(handlers)
}
