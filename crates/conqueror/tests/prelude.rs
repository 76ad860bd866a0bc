//! A call through the facade using only the prelude.

use conqueror::prelude::*;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Greet {
    name: String,
}

impl Message for Greet {
    type Response = String;
}

#[tokio::test]
async fn test_in_process_call_with_context_data() {
    let mut services = ServiceCollection::new();
    services.add_message_handler_delegate_with_pipeline::<Greet, _, _, _>(
        |message, ctx: HandlerContext| async move {
            let context = ctx.conqueror_context();
            let greeting = context
                .downstream_context_data()
                .get_str("greeting")
                .unwrap_or("Hello")
                .to_string();
            context
                .upstream_context_data()
                .set("greeted", message.name.as_str(), Scope::InProcess);
            Ok(format!("{greeting}, {}!", message.name))
        },
        |pipeline| {
            pipeline.use_middleware(TimeoutMiddleware::new(Duration::from_secs(5)));
        },
    );
    let provider = services.build_provider();

    let context = ConquerorContext::new();
    context
        .downstream_context_data()
        .set("greeting", "Hi", Scope::InProcess);

    let reply = MessageClients::new(&provider)
        .for_message::<Greet>()
        .with_context(context.clone())
        .with_pipeline(|pipeline| {
            pipeline.use_middleware(RetryMiddleware::new(2));
        })
        .handle(Greet {
            name: "Ada".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(reply, "Hi, Ada!");
    assert_eq!(context.upstream_context_data().get_str("greeted"), Some("Ada"));
}

#[test]
fn test_default_config_loads() {
    let config = ConfigLoader::new().load().unwrap();
    assert_eq!(config, ConquerorConfig::default());
}
