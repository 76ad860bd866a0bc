//! End-to-end tests over a real socket.

use conqueror_core::{
    ConquerorContext, ConquerorError, Message, Scope, ServiceCollection, UnitResponse,
};
use conqueror_http::{
    HttpEndpointRegistry, HttpMessage, HttpMessageKind, HttpServer, HttpServerConfig,
    HttpTransportBuilderExt, ShutdownSignal, CONQUEROR_CONTEXT_HEADER,
};
use conqueror_messaging::{MessageClient, MessageClients, MessageHandlerRegistration};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TestCommand {
    payload: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TestCommandResponse {
    payload: i32,
}

impl Message for TestCommand {
    type Response = TestCommandResponse;
}

impl HttpMessage for TestCommand {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SearchQuery {
    term: String,
    limit: usize,
}

impl Message for SearchQuery {
    type Response = Vec<String>;
}

impl HttpMessage for SearchQuery {
    const KIND: HttpMessageKind = HttpMessageKind::Query;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResetCommand;

impl Message for ResetCommand {
    type Response = UnitResponse;
}

impl HttpMessage for ResetCommand {}

#[derive(Debug, thiserror::Error)]
#[error("payload must be positive")]
struct NegativePayload;

#[derive(Default)]
struct Observations {
    downstream: Mutex<Vec<Option<String>>>,
    bidirectional: Mutex<Vec<Option<String>>>,
    trace_ids: Mutex<Vec<String>>,
    message_ids: Mutex<Vec<String>>,
}

struct TestServer {
    base_url: String,
    shutdown: ShutdownSignal,
    handle: JoinHandle<Result<(), conqueror_http::HttpServerError>>,
}

impl TestServer {
    async fn start(observations: Arc<Observations>) -> Self {
        let mut services = ServiceCollection::new();
        services
            .add_message_handler_delegate::<TestCommand, _, _>(move |message, ctx| {
                let observations = Arc::clone(&observations);
                async move {
                    let context = ctx.conqueror_context();
                    observations.downstream.lock().push(
                        context
                            .downstream_context_data()
                            .get_str("tenant")
                            .map(ToString::to_string),
                    );
                    observations.bidirectional.lock().push(
                        context
                            .context_data()
                            .get_str("x")
                            .map(ToString::to_string),
                    );
                    observations.trace_ids.lock().push(ctx.trace_id());
                    if let Some(id) = ctx.message_id() {
                        observations.message_ids.lock().push(id.to_string());
                    }

                    if message.payload < 0 {
                        return Err(ConquerorError::execution(NegativePayload));
                    }

                    context
                        .context_data()
                        .set("z", "w", Scope::AcrossTransports);
                    context
                        .upstream_context_data()
                        .set("served-by", "orders", Scope::AcrossTransports);
                    context
                        .upstream_context_data()
                        .set("local-only", "1", Scope::InProcess);

                    Ok(TestCommandResponse {
                        payload: message.payload + 1,
                    })
                }
            })
            .add_message_handler_delegate::<SearchQuery, _, _>(|query, _ctx| async move {
                Ok((0..query.limit)
                    .map(|i| format!("{}-{i}", query.term))
                    .collect::<Vec<_>>())
            })
            .add_message_handler_delegate::<ResetCommand, _, _>(|_command, _ctx| async {
                Ok(UnitResponse)
            });

        let mut endpoints = HttpEndpointRegistry::new();
        endpoints
            .map::<TestCommand>()
            .unwrap()
            .map::<SearchQuery>()
            .unwrap()
            .map::<ResetCommand>()
            .unwrap();

        let config = HttpServerConfig {
            http_addr: "127.0.0.1:0".to_string(),
            ..HttpServerConfig::default()
        };
        let bound = HttpServer::new(config, services.build_provider(), endpoints)
            .bind()
            .await
            .unwrap();

        let base_url = format!("http://{}", bound.local_addr());
        let shutdown = ShutdownSignal::new();
        let handle = tokio::spawn(bound.serve_with_shutdown(shutdown.clone()));

        Self {
            base_url,
            shutdown,
            handle,
        }
    }

    fn client<M>(&self, context: &ConquerorContext) -> MessageClient<M>
    where
        M: HttpMessage,
        M::Response: Serialize + for<'de> Deserialize<'de>,
    {
        let base_url = self.base_url.clone();
        MessageClients::new(&ServiceCollection::new().build_provider())
            .for_message::<M>()
            .with_context(context.clone())
            .with_transport(move |builder| builder.use_http::<M>(base_url.clone()))
    }

    async fn stop(self) {
        self.shutdown.trigger();
        self.handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_command_endpoint_returns_json() {
    let server = TestServer::start(Arc::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/commands/test", server.base_url))
        .json(&serde_json::json!({ "payload": 10 }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "payload": 11 }));

    server.stop().await;
}

#[tokio::test]
async fn test_client_sends_command_over_http() {
    let server = TestServer::start(Arc::default()).await;

    let response = server
        .client::<TestCommand>(&ConquerorContext::new())
        .handle(TestCommand { payload: 10 })
        .await
        .unwrap();

    assert_eq!(response, TestCommandResponse { payload: 11 });
    server.stop().await;
}

#[tokio::test]
async fn test_context_data_crosses_the_wire_both_ways() {
    let observations = Arc::new(Observations::default());
    let server = TestServer::start(Arc::clone(&observations)).await;

    let context = ConquerorContext::new();
    context.context_data().set("x", "y", Scope::AcrossTransports);
    context
        .downstream_context_data()
        .set("tenant", "acme", Scope::AcrossTransports);

    server
        .client::<TestCommand>(&context)
        .handle(TestCommand { payload: 1 })
        .await
        .unwrap();

    assert_eq!(*observations.bidirectional.lock(), [Some("y".to_string())]);
    assert_eq!(*observations.downstream.lock(), [Some("acme".to_string())]);

    assert_eq!(context.context_data().get_str("x"), Some("y"));
    assert_eq!(context.context_data().get_str("z"), Some("w"));
    assert_eq!(
        context.upstream_context_data().get_str("served-by"),
        Some("orders")
    );
    assert!(!context.upstream_context_data().contains_key("local-only"));

    server.stop().await;
}

#[tokio::test]
async fn test_in_process_scope_stays_local() {
    let observations = Arc::new(Observations::default());
    let server = TestServer::start(Arc::clone(&observations)).await;

    let context = ConquerorContext::new();
    context
        .downstream_context_data()
        .set("tenant", "acme", Scope::InProcess);

    server
        .client::<TestCommand>(&context)
        .handle(TestCommand { payload: 1 })
        .await
        .unwrap();

    assert_eq!(*observations.downstream.lock(), [None]);
    server.stop().await;
}

#[tokio::test]
async fn test_trace_and_message_ids_cross_the_wire() {
    let observations = Arc::new(Observations::default());
    let server = TestServer::start(Arc::clone(&observations)).await;

    let context = ConquerorContext::new();
    let trace_id = context.trace_id();
    let sent_ids = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&sent_ids);
    server
        .client::<TestCommand>(&context)
        .with_pipeline(move |pipeline| {
            let recorded = Arc::clone(&recorded);
            pipeline.use_fn("record-id", move |ctx| {
                if let Some(id) = ctx.conqueror_context().message_id() {
                    recorded.lock().push(id.to_string());
                }
                ctx.proceed()
            });
        })
        .handle(TestCommand { payload: 1 })
        .await
        .unwrap();

    assert_eq!(*observations.trace_ids.lock(), [trace_id]);
    assert_eq!(*observations.message_ids.lock(), *sent_ids.lock());
    assert_eq!(sent_ids.lock().len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_trace_id_of_active_span_reaches_the_server() {
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };

    let observations = Arc::new(Observations::default());
    let server = TestServer::start(Arc::clone(&observations)).await;

    let context = ConquerorContext::new();
    {
        let span_context = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let _attached = opentelemetry::Context::current()
            .with_remote_span_context(span_context)
            .attach();
        assert_eq!(context.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
    }

    server
        .client::<TestCommand>(&context)
        .handle(TestCommand { payload: 1 })
        .await
        .unwrap();

    assert_eq!(
        *observations.trace_ids.lock(),
        ["4bf92f3577b34da6a3ce929d0e0e4736"]
    );
    server.stop().await;
}

#[tokio::test]
async fn test_handler_error_surfaces_as_transport_failure() {
    let server = TestServer::start(Arc::default()).await;

    let err = server
        .client::<TestCommand>(&ConquerorContext::new())
        .handle(TestCommand { payload: -1 })
        .await
        .unwrap_err();

    let failure = err.as_transport_failure().unwrap();
    assert_eq!(failure.status_code, Some(500));
    assert!(failure
        .response_content
        .as_deref()
        .unwrap()
        .contains("EXECUTION_FAILED"));
    assert!(failure.source.is_none());
    assert_eq!(err.status_code(), http::StatusCode::INTERNAL_SERVER_ERROR);

    server.stop().await;
}

#[tokio::test]
async fn test_query_is_sent_as_get() {
    let server = TestServer::start(Arc::default()).await;

    let response = reqwest::Client::new()
        .get(format!("{}/api/queries/search?term=a&limit=2", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let results = server
        .client::<SearchQuery>(&ConquerorContext::new())
        .handle(SearchQuery {
            term: "order".to_string(),
            limit: 3,
        })
        .await
        .unwrap();
    assert_eq!(results, ["order-0", "order-1", "order-2"]);

    server.stop().await;
}

#[tokio::test]
async fn test_unit_command_returns_no_content() {
    let server = TestServer::start(Arc::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/commands/reset", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let result = server
        .client::<ResetCommand>(&ConquerorContext::new())
        .handle(ResetCommand)
        .await
        .unwrap();
    assert_eq!(result, UnitResponse);

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_context_header_is_rejected() {
    let observations = Arc::new(Observations::default());
    let server = TestServer::start(Arc::clone(&observations)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/commands/test", server.base_url))
        .header(CONQUEROR_CONTEXT_HEADER, "garbage")
        .json(&serde_json::json!({ "payload": 1 }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(observations.trace_ids.lock().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_body_is_rejected() {
    let server = TestServer::start(Arc::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/commands/test", server.base_url))
        .body("{\"payload\": \"ten\"}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let server = TestServer::start(Arc::default()).await;
    let base_url = server.base_url.clone();
    server.stop().await;

    let result = reqwest::Client::new()
        .post(format!("{base_url}/api/commands/reset"))
        .send()
        .await;
    assert!(result.is_err());
}
