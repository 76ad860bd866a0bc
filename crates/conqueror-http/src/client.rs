//! HTTP client transport.
//!
//! ```rust,ignore
//! use conqueror_http::HttpTransportBuilderExt;
//!
//! let total = clients
//!     .for_message::<CreateOrderCommand>()
//!     .with_transport(|builder| builder.use_http("http://orders:8080"))
//!     .handle(CreateOrderCommand { items: 3 })
//!     .await?;
//! ```

use std::sync::Arc;

use conqueror_core::{
    ConquerorContext, ConquerorError, ConquerorResult, ServiceProvider, TransportFailure,
    TransportRole, TransportType,
};
use conqueror_messaging::{TransportBuilder, TransportSender};
use conqueror_middleware::BoxFuture;
use conqueror_telemetry::tracing::{format_traceparent, TRACEPARENT_HEADER};
use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::codec::{
    decode_context_headers, encode_downstream_context_data, CONQUEROR_CONTEXT_HEADER,
    CONQUEROR_MESSAGE_ID_HEADER,
};
use crate::config::HttpClientConfig;
use crate::message::HttpMessage;
use crate::HTTP_TRANSPORT_NAME;

/// Sends messages to an [`HttpServer`](crate::HttpServer).
#[derive(Debug, Clone)]
pub struct HttpTransportClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransportClient {
    /// Creates a client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Creates a client sending through an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// The server address requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for<M>(&self) -> String
    where
        M: HttpMessage,
        M::Response: Serialize + DeserializeOwned,
    {
        format!("{}{}", self.base_url.trim_end_matches('/'), M::path())
    }

    async fn execute<M>(
        &self,
        message: M,
        conqueror_context: &ConquerorContext,
    ) -> ConquerorResult<M::Response>
    where
        M: HttpMessage,
        M::Response: Serialize + DeserializeOwned,
    {
        let message_type = M::message_type_name();
        let fault = |source: Box<dyn std::error::Error + Send + Sync>| {
            ConquerorError::from(TransportFailure::fault(
                client_transport_type(),
                message_type,
                source,
            ))
        };

        let url = self.url_for::<M>();
        let method = M::http_method();
        let mut request = if method == Method::GET {
            let query = serde_urlencoded::to_string(&message).map_err(|e| fault(e.into()))?;
            let url = if query.is_empty() {
                url
            } else {
                format!("{url}?{query}")
            };
            self.client.get(url)
        } else {
            let body = serde_json::to_vec(&message).map_err(|e| fault(e.into()))?;
            let request = self.client.request(method.clone(), url);
            if body == b"null" {
                request
            } else {
                request
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(body)
            }
        };

        if let Some(context) = encode_downstream_context_data(conqueror_context) {
            request = request.header(CONQUEROR_CONTEXT_HEADER, context);
        }
        if let Some(message_id) = conqueror_context.message_id() {
            request = request.header(CONQUEROR_MESSAGE_ID_HEADER, message_id.to_string());
        }
        if let Some(traceparent) = format_traceparent(&conqueror_context.trace_id()) {
            request = request.header(TRACEPARENT_HEADER, traceparent);
        }

        tracing::debug!(message_type, %method, base_url = %self.base_url, "sending message over HTTP");

        let response = request.send().await.map_err(|e| fault(e.into()))?;
        let status = response.status();

        if !status.is_success() {
            tracing::debug!(message_type, status = status.as_u16(), "remote handler failed");
            let mut failure = TransportFailure::status(
                client_transport_type(),
                message_type,
                status.as_u16(),
                String::new(),
            );
            match response.text().await {
                Ok(content) => failure.response_content = Some(content),
                Err(e) => {
                    tracing::debug!(message_type, error = %e, "failed to read error response body");
                    failure.response_content = None;
                    failure.source = Some(e.into());
                }
            }
            return Err(failure.into());
        }

        decode_context_headers(conqueror_context, response.headers())?;

        let body = response.bytes().await.map_err(|e| fault(e.into()))?;
        let body: &[u8] = if body.is_empty() { b"null" } else { &body };
        serde_json::from_slice(body).map_err(|e| fault(e.into()))
    }
}

fn client_transport_type() -> TransportType {
    TransportType::new(HTTP_TRANSPORT_NAME, TransportRole::Client)
}

impl<M> TransportSender<M> for HttpTransportClient
where
    M: HttpMessage,
    M::Response: Serialize + DeserializeOwned,
{
    fn transport_type(&self) -> TransportType {
        client_transport_type()
    }

    fn send<'a>(
        &'a self,
        message: M,
        _service_provider: &'a ServiceProvider,
        conqueror_context: &'a ConquerorContext,
        cancellation_token: CancellationToken,
    ) -> BoxFuture<'a, ConquerorResult<M::Response>> {
        Box::pin(async move {
            tokio::select! {
                biased;
                () = cancellation_token.cancelled() => Err(ConquerorError::Cancelled),
                result = self.execute(message, conqueror_context) => result,
            }
        })
    }
}

/// Adds the HTTP transport to [`TransportBuilder`].
pub trait HttpTransportBuilderExt {
    /// Sends to the server at `base_url`.
    ///
    /// A `reqwest::Client` registered in the calling scope is reused;
    /// otherwise one is built from a registered [`HttpClientConfig`], or with
    /// default settings.
    fn use_http<M>(&self, base_url: impl Into<String>) -> Arc<dyn TransportSender<M>>
    where
        M: HttpMessage,
        M::Response: Serialize + DeserializeOwned;
}

impl HttpTransportBuilderExt for TransportBuilder<'_> {
    fn use_http<M>(&self, base_url: impl Into<String>) -> Arc<dyn TransportSender<M>>
    where
        M: HttpMessage,
        M::Response: Serialize + DeserializeOwned,
    {
        Arc::new(HttpTransportClient::with_client(
            http_client(self.service_provider()),
            base_url,
        ))
    }
}

fn http_client(service_provider: &ServiceProvider) -> reqwest::Client {
    if let Some(client) = service_provider.resolve::<reqwest::Client>() {
        return (*client).clone();
    }

    service_provider
        .resolve::<HttpClientConfig>()
        .and_then(|config| match config.build_client() {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "invalid HTTP client settings, using defaults");
                None
            }
        })
        .unwrap_or_default()
}
