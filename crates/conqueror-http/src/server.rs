//! HTTP server transport.
//!
//! Exposes registered message handlers as HTTP endpoints.
//!
//! # Architecture
//!
//! - [`HttpEndpointRegistry`] maps `(method, path)` to a message type
//! - [`HttpServer`] accepts connections with hyper and Tokio
//! - every request gets its own service scope and [`ConquerorContext`]
//! - the handler runs through [`dispatch`] with transport `http (server)`
//!
//! # Example
//!
//! ```rust,ignore
//! use conqueror_http::{HttpEndpointRegistry, HttpServer, HttpServerConfig};
//!
//! let mut endpoints = HttpEndpointRegistry::new();
//! endpoints.map::<CreateOrderCommand>()?;
//!
//! HttpServer::new(HttpServerConfig::default(), provider, endpoints)
//!     .run()
//!     .await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use conqueror_core::{
    ambient_trace_id, ConquerorContext, ConquerorError, MessageId, ServiceProvider, TransportRole,
    TransportType,
};
use conqueror_messaging::dispatch;
use conqueror_middleware::BoxFuture;
use conqueror_telemetry::metrics::record_http_request;
use conqueror_telemetry::tracing::{parse_traceparent, TRACEPARENT_HEADER};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::codec::{
    decode_context_headers, encode_upstream_context_data, CONQUEROR_CONTEXT_HEADER,
    CONQUEROR_MESSAGE_ID_HEADER,
};
use crate::config::HttpServerConfig;
use crate::error::HttpServerError;
use crate::message::HttpMessage;
use crate::shutdown::{RequestTracker, ShutdownSignal};
use crate::HTTP_TRANSPORT_NAME;

/// Body type of every response.
pub type ResponseBody = Full<Bytes>;

/// Response type produced by the server.
pub type HttpResponse = Response<ResponseBody>;

struct EndpointRequest {
    headers: HeaderMap,
    query: Option<String>,
    body: Bytes,
    service_provider: ServiceProvider,
    cancellation_token: CancellationToken,
}

type Endpoint = Arc<dyn Fn(EndpointRequest) -> BoxFuture<'static, HttpResponse> + Send + Sync>;

/// A mapped endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpEndpoint {
    /// Request method.
    pub method: Method,
    /// Request path.
    pub path: String,
    /// Name of the message type served.
    pub message_type: &'static str,
}

struct Route {
    info: HttpEndpoint,
    endpoint: Endpoint,
}

enum Lookup<'a> {
    Found(&'a Route),
    MethodNotAllowed,
    NotFound,
}

/// The message types a server exposes.
#[derive(Default)]
pub struct HttpEndpointRegistry {
    routes: IndexMap<String, HashMap<Method, Route>>,
}

impl HttpEndpointRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exposes `M` at [`HttpMessage::path`] with [`HttpMessage::http_method`].
    ///
    /// The handler for `M` is looked up per request, so it may be registered
    /// before or after mapping.
    ///
    /// # Errors
    ///
    /// Returns [`ConquerorError::InvalidRegistration`] if the path does not
    /// start with `/` or another message type already uses the same method
    /// and path.
    pub fn map<M>(&mut self) -> Result<&mut Self, ConquerorError>
    where
        M: HttpMessage,
        M::Response: Serialize + DeserializeOwned,
    {
        let path = M::path();
        let method = M::http_method();

        if !path.starts_with('/') {
            return Err(ConquerorError::invalid_registration(format!(
                "path '{path}' of message type '{}' must start with '/'",
                M::message_type_name()
            )));
        }

        let methods = self.routes.entry(path.clone()).or_default();
        if let Some(existing) = methods.get(&method) {
            return Err(ConquerorError::invalid_registration(format!(
                "{method} {path} is already mapped to message type '{}', cannot map '{}'",
                existing.info.message_type,
                M::message_type_name()
            )));
        }

        let endpoint: Endpoint = Arc::new(|request: EndpointRequest| -> BoxFuture<'static, HttpResponse> {
            Box::pin(serve_message::<M>(request))
        });

        tracing::debug!(%method, %path, message_type = M::message_type_name(), "mapped endpoint");

        methods.insert(
            method.clone(),
            Route {
                info: HttpEndpoint {
                    method,
                    path,
                    message_type: M::message_type_name(),
                },
                endpoint,
            },
        );
        Ok(self)
    }

    /// Returns the mapped endpoints in mapping order of their paths.
    #[must_use]
    pub fn endpoints(&self) -> Vec<HttpEndpoint> {
        self.routes
            .values()
            .flat_map(|methods| methods.values().map(|route| route.info.clone()))
            .collect()
    }

    /// Number of mapped endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    /// Returns `true` if nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, method: &Method, path: &str) -> Lookup<'_> {
        match self.routes.get(path) {
            Some(methods) => methods
                .get(method)
                .map_or(Lookup::MethodNotAllowed, Lookup::Found),
            None => Lookup::NotFound,
        }
    }
}

impl fmt::Debug for HttpEndpointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEndpointRegistry")
            .field("endpoints", &self.endpoints())
            .finish()
    }
}

/// Serves mapped message types over HTTP/1.1.
pub struct HttpServer {
    config: HttpServerConfig,
    service_provider: ServiceProvider,
    endpoints: HttpEndpointRegistry,
}

impl HttpServer {
    /// Creates a server resolving handlers from `service_provider`.
    #[must_use]
    pub fn new(
        config: HttpServerConfig,
        service_provider: ServiceProvider,
        endpoints: HttpEndpointRegistry,
    ) -> Self {
        Self {
            config,
            service_provider,
            endpoints,
        }
    }

    /// Returns the server configuration.
    #[must_use]
    pub const fn config(&self) -> &HttpServerConfig {
        &self.config
    }

    /// Returns the mapped endpoints.
    #[must_use]
    pub const fn endpoints(&self) -> &HttpEndpointRegistry {
        &self.endpoints
    }

    /// Binds the listener without accepting connections yet.
    pub async fn bind(self) -> Result<BoundHttpServer, HttpServerError> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|e| HttpServerError::InvalidAddress {
                addr: self.config.http_addr.clone(),
                reason: e.to_string(),
            })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HttpServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        Ok(BoundHttpServer {
            listener,
            local_addr,
            server: Arc::new(self),
        })
    }

    /// Runs until SIGTERM or SIGINT.
    pub async fn run(self) -> Result<(), HttpServerError> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals())
            .await
    }

    /// Runs until `shutdown` fires.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), HttpServerError> {
        self.bind().await?.serve_with_shutdown(shutdown).await
    }

    /// Handles one request.
    ///
    /// Never fails: errors become error responses.
    pub async fn handle_request<B>(&self, request: Request<B>) -> HttpResponse
    where
        B: Body,
        B::Error: fmt::Display,
    {
        let started = Instant::now();
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let response =
            match tokio::time::timeout(self.config.request_timeout(), self.route(request)).await {
                Ok(response) => response,
                Err(_) => {
                    tracing::warn!(%method, %path, "request timed out");
                    plain_error(
                        StatusCode::GATEWAY_TIMEOUT,
                        "REQUEST_TIMEOUT",
                        "request timed out",
                    )
                }
            };

        let status = response.status().as_u16();
        let label = if self.endpoints.routes.contains_key(&path) {
            path.as_str()
        } else {
            "unmatched"
        };
        record_http_request(label, status);
        tracing::debug!(
            http.method = %method,
            http.path = %path,
            http.status_code = status,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "served request"
        );

        response
    }

    async fn route<B>(&self, request: Request<B>) -> HttpResponse
    where
        B: Body,
        B::Error: fmt::Display,
    {
        let (parts, body) = request.into_parts();

        let endpoint = match self.endpoints.lookup(&parts.method, parts.uri.path()) {
            Lookup::Found(route) => Arc::clone(&route.endpoint),
            Lookup::MethodNotAllowed => {
                return plain_error(
                    StatusCode::METHOD_NOT_ALLOWED,
                    "METHOD_NOT_ALLOWED",
                    &format!("{} is not allowed for {}", parts.method, parts.uri.path()),
                )
            }
            Lookup::NotFound => {
                return plain_error(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    &format!("no endpoint at {}", parts.uri.path()),
                )
            }
        };

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return plain_error(
                    StatusCode::BAD_REQUEST,
                    "INVALID_BODY",
                    &format!("failed to read request body: {e}"),
                )
            }
        };

        // Cancelled when the request future is dropped, e.g. on disconnect.
        let cancellation_token = CancellationToken::new();
        let _cancel_on_drop = cancellation_token.clone().drop_guard();

        endpoint(EndpointRequest {
            headers: parts.headers,
            query: parts.uri.query().map(ToString::to_string),
            body,
            service_provider: self.service_provider.create_scope(),
            cancellation_token,
        })
        .await
    }
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("config", &self.config)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

/// A server whose listener is bound.
#[derive(Debug)]
pub struct BoundHttpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    server: Arc<HttpServer>,
}

impl BoundHttpServer {
    /// The address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `shutdown` fires, then waits up to the
    /// configured shutdown timeout for requests in flight.
    pub async fn serve_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), HttpServerError> {
        let Self {
            listener,
            local_addr,
            server,
        } = self;
        let tracker = RequestTracker::new();

        tracing::info!(addr = %local_addr, endpoints = server.endpoints.len(), "HTTP server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let server = Arc::clone(&server);
                        let tracker = tracker.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(server, stream, tracker, shutdown).await {
                                tracing::debug!(%remote_addr, error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "failed to accept connection"),
                },
                () = shutdown.recv() => {
                    tracing::info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        let timeout = server.config.shutdown_timeout();
        tokio::select! {
            () = tracker.wait_idle() => tracing::info!("all requests completed"),
            () = tokio::time::sleep(timeout) => tracing::warn!(
                active = tracker.active(),
                "shutdown timeout reached with requests in flight"
            ),
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn serve_connection(
    server: Arc<HttpServer>,
    stream: TcpStream,
    tracker: RequestTracker,
    shutdown: ShutdownSignal,
) -> Result<(), hyper::Error> {
    let service = service_fn(move |request: Request<Incoming>| {
        let server = Arc::clone(&server);
        let guard = tracker.track();
        async move {
            let response = server.handle_request(request).await;
            drop(guard);
            Ok::<_, std::convert::Infallible>(response)
        }
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => return result,
        () = shutdown.recv() => connection.as_mut().graceful_shutdown(),
    }
    connection.await
}

async fn serve_message<M>(request: EndpointRequest) -> HttpResponse
where
    M: HttpMessage,
    M::Response: Serialize + DeserializeOwned,
{
    let conqueror_context = ConquerorContext::new();

    if let Err(e) = decode_request_context(&conqueror_context, &request.headers) {
        tracing::debug!(message_type = M::message_type_name(), error = %e, "rejected context header");
        return error_response(&e, None);
    }

    let message: M = match read_message(request.query.as_deref(), &request.body, M::http_method()) {
        Ok(message) => message,
        Err(reason) => {
            return plain_error(
                StatusCode::BAD_REQUEST,
                "INVALID_MESSAGE",
                &format!("invalid {} payload: {reason}", M::message_type_name()),
            )
        }
    };

    let message_id = conqueror_context.message_id().map(|id| id.to_string());
    let result = dispatch(
        message,
        &request.service_provider,
        &conqueror_context,
        TransportType::new(HTTP_TRANSPORT_NAME, TransportRole::Server),
        request.cancellation_token,
    )
    .await;

    match result {
        Ok(response) => success_response::<M>(&conqueror_context, &response),
        Err(e) => {
            tracing::debug!(message_type = M::message_type_name(), error = %e, "handler failed");
            error_response(&e, message_id.as_deref())
        }
    }
}

fn decode_request_context(
    conqueror_context: &ConquerorContext,
    headers: &HeaderMap,
) -> Result<(), ConquerorError> {
    decode_context_headers(conqueror_context, headers)?;

    let message_id = headers
        .get(CONQUEROR_MESSAGE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<MessageId>().ok())
        .unwrap_or_default();
    conqueror_context.set_message_id(message_id);

    if ambient_trace_id().is_none() {
        let trace_id = headers
            .get(TRACEPARENT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_traceparent);
        if let Some(trace_id) = trace_id {
            conqueror_context.set_trace_id(trace_id)?;
        }
    }
    Ok(())
}

fn read_message<M: DeserializeOwned>(
    query: Option<&str>,
    body: &Bytes,
    method: Method,
) -> Result<M, String> {
    if method == Method::GET {
        return serde_urlencoded::from_str(query.unwrap_or_default()).map_err(|e| e.to_string());
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        // Payload-less messages: unit structs read `null`, structs with only
        // defaulted fields read `{}`.
        return serde_json::from_slice(b"null")
            .or_else(|_| serde_json::from_slice(b"{}"))
            .map_err(|e: serde_json::Error| e.to_string());
    }

    serde_json::from_slice(body).map_err(|e| e.to_string())
}

fn success_response<M>(conqueror_context: &ConquerorContext, response: &M::Response) -> HttpResponse
where
    M: HttpMessage,
    M::Response: Serialize + DeserializeOwned,
{
    let status = M::success_status();
    let mut builder = Response::builder().status(status);
    if let Some(header) = encode_upstream_context_data(conqueror_context) {
        builder = builder.header(CONQUEROR_CONTEXT_HEADER, header);
    }

    if status == StatusCode::NO_CONTENT {
        return builder
            .body(Full::new(Bytes::new()))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
    }

    match serde_json::to_vec(response) {
        Ok(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))),
        Err(e) => error_response(&ConquerorError::execution(e), None),
    }
}

fn error_response(error: &ConquerorError, message_id: Option<&str>) -> HttpResponse {
    let body = serde_json::to_vec(&error.to_envelope(message_id)).unwrap_or_default();
    Response::builder()
        .status(error.status_code())
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn plain_error(status: StatusCode, code: &str, message: &str) -> HttpResponse {
    let body = serde_json::json!({
        "error": {
            "code": code,
            "message": message
        }
    });

    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
