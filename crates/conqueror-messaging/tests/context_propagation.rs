//! Context data visibility across a client call, its handler and a message
//! sent from within that handler.
//!
//! ```text
//! depth 1  PreExecution                                              PostExecution
//! depth 2    TransportBuilder ClientPipelineBuilder ClientMiddleware(pre/post)
//! depth 3      PipelineBuilder Middleware(pre) HandlerPreNested NestedClassPre ... (post)
//! depth 5        NestedMessageHandler
//! ```

use conqueror_core::{
    ConquerorContext, ConquerorContextAccessor, ConquerorResult, DataDirection, Message, Scope,
    ServiceCollection, ServiceProvider,
};
use conqueror_messaging::{HandlerContext, MessageClients, MessageHandlerRegistration};
use conqueror_middleware::Pipeline;
use parking_lot::Mutex;
use std::sync::Arc;

const KEY: &str = "tracked-key";
const VALUE: &str = "tracked-value";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    PreExecution,
    TransportBuilder,
    ClientPipelineBuilder,
    ClientMiddlewarePre,
    PipelineBuilder,
    MiddlewarePre,
    HandlerPreNested,
    NestedClassPre,
    NestedMessageHandler,
    NestedClassPost,
    HandlerPostNested,
    MiddlewarePost,
    ClientMiddlewarePost,
    PostExecution,
}

const ALL_LOCATIONS: [Location; 14] = [
    Location::PreExecution,
    Location::TransportBuilder,
    Location::ClientPipelineBuilder,
    Location::ClientMiddlewarePre,
    Location::PipelineBuilder,
    Location::MiddlewarePre,
    Location::HandlerPreNested,
    Location::NestedClassPre,
    Location::NestedMessageHandler,
    Location::NestedClassPost,
    Location::HandlerPostNested,
    Location::MiddlewarePost,
    Location::ClientMiddlewarePost,
    Location::PostExecution,
];

const ALL_DIRECTIONS: [DataDirection; 3] = [
    DataDirection::Downstream,
    DataDirection::Upstream,
    DataDirection::Bidirectional,
];

impl Location {
    fn order(self) -> usize {
        ALL_LOCATIONS
            .iter()
            .position(|location| *location == self)
            .unwrap()
    }

    const fn depth(self) -> u8 {
        match self {
            Self::PreExecution | Self::PostExecution => 1,
            Self::TransportBuilder
            | Self::ClientPipelineBuilder
            | Self::ClientMiddlewarePre
            | Self::ClientMiddlewarePost => 2,
            Self::NestedMessageHandler => 5,
            _ => 3,
        }
    }
}

/// Whether data written at `from` can be read at `to`.
fn reaches(direction: DataDirection, from: Location, to: Location) -> bool {
    if to.order() < from.order() {
        return false;
    }
    match direction {
        DataDirection::Downstream => to.depth() >= from.depth(),
        DataDirection::Upstream => to.depth() <= from.depth(),
        DataDirection::Bidirectional => true,
    }
}

fn expected_visible(
    direction: DataDirection,
    set_at: Location,
    remove_at: Option<Location>,
    observed_at: Location,
) -> bool {
    let removed = remove_at.is_some_and(|remove_at| {
        reaches(direction, set_at, remove_at) && reaches(direction, remove_at, observed_at)
    });
    reaches(direction, set_at, observed_at) && !removed
}

struct Tracker {
    direction: DataDirection,
    set_at: Location,
    remove_at: Option<Location>,
    observed: Mutex<Vec<Location>>,
}

impl Tracker {
    fn new(direction: DataDirection, set_at: Location, remove_at: Option<Location>) -> Arc<Self> {
        Arc::new(Self {
            direction,
            set_at,
            remove_at,
            observed: Mutex::new(Vec::new()),
        })
    }

    fn visit(&self, location: Location, ctx: &ConquerorContext) {
        let mut data = ctx.data(self.direction);
        if location == self.set_at {
            data.set(KEY, VALUE, Scope::InProcess);
        }
        if Some(location) == self.remove_at {
            data.remove(KEY);
        }
        if data.get_str(KEY) == Some(VALUE) {
            self.observed.lock().push(location);
        }
    }

    fn observed(&self) -> Vec<Location> {
        self.observed.lock().clone()
    }
}

/// Helper invoked from the handler that only knows the ambient context.
struct NestedClass;

impl NestedClass {
    fn run(tracker: &Tracker, location: Location) {
        let ctx = ConquerorContextAccessor::current().expect("handler runs with an ambient context");
        tracker.visit(location, &ctx);
    }
}

struct Outer;

impl Message for Outer {
    type Response = ();
}

struct Nested;

impl Message for Nested {
    type Response = ();
}

fn provider(tracker: &Arc<Tracker>) -> ServiceProvider {
    let mut services = ServiceCollection::new();

    let handler_tracker = Arc::clone(tracker);
    let pipeline_tracker = Arc::clone(tracker);
    services.add_message_handler_delegate_with_pipeline::<Outer, _, _, _>(
        move |Outer, ctx: HandlerContext| {
            let tracker = Arc::clone(&handler_tracker);
            async move {
                tracker.visit(Location::HandlerPreNested, ctx.conqueror_context());
                NestedClass::run(&tracker, Location::NestedClassPre);
                ctx.message_client::<Nested>().handle(Nested).await?;
                NestedClass::run(&tracker, Location::NestedClassPost);
                tracker.visit(Location::HandlerPostNested, ctx.conqueror_context());
                Ok(())
            }
        },
        move |pipeline: &mut Pipeline<Outer>| {
            pipeline_tracker.visit(Location::PipelineBuilder, pipeline.conqueror_context());
            let tracker = Arc::clone(&pipeline_tracker);
            pipeline.use_fn("tracker", move |ctx| {
                let tracker = Arc::clone(&tracker);
                Box::pin(async move {
                    let context = ctx.conqueror_context();
                    tracker.visit(Location::MiddlewarePre, context);
                    let response = ctx.proceed().await;
                    tracker.visit(Location::MiddlewarePost, context);
                    response
                })
            });
        },
    );

    let nested_tracker = Arc::clone(tracker);
    services.add_message_handler_delegate::<Nested, _, _>(move |Nested, ctx: HandlerContext| {
        nested_tracker.visit(Location::NestedMessageHandler, ctx.conqueror_context());
        async { Ok(()) }
    });

    services.build_provider()
}

async fn run_scenario(tracker: &Arc<Tracker>) -> ConquerorResult<()> {
    let provider = provider(tracker);
    let root = ConquerorContext::new();
    tracker.visit(Location::PreExecution, &root);

    let transport_tracker = Arc::clone(tracker);
    let pipeline_tracker = Arc::clone(tracker);
    MessageClients::new(&provider)
        .for_message::<Outer>()
        .with_context(root.clone())
        .with_transport(move |builder| {
            transport_tracker.visit(Location::TransportBuilder, builder.conqueror_context());
            builder.use_in_process()
        })
        .with_pipeline(move |pipeline| {
            pipeline_tracker.visit(Location::ClientPipelineBuilder, pipeline.conqueror_context());
            let tracker = Arc::clone(&pipeline_tracker);
            pipeline.use_fn("client-tracker", move |ctx| {
                let tracker = Arc::clone(&tracker);
                Box::pin(async move {
                    let context = ctx.conqueror_context();
                    tracker.visit(Location::ClientMiddlewarePre, context);
                    let response = ctx.proceed().await;
                    tracker.visit(Location::ClientMiddlewarePost, context);
                    response
                })
            });
        })
        .handle(Outer)
        .await?;

    tracker.visit(Location::PostExecution, &root);
    Ok(())
}

fn expected_locations(
    direction: DataDirection,
    set_at: Location,
    remove_at: Option<Location>,
) -> Vec<Location> {
    ALL_LOCATIONS
        .into_iter()
        .filter(|observed_at| expected_visible(direction, set_at, remove_at, *observed_at))
        .collect()
}

#[tokio::test]
async fn test_visibility_matrix() {
    let mut mismatches = Vec::new();

    for direction in ALL_DIRECTIONS {
        for set_at in ALL_LOCATIONS {
            let tracker = Tracker::new(direction, set_at, None);
            run_scenario(&tracker).await.unwrap();

            let expected = expected_locations(direction, set_at, None);
            if tracker.observed() != expected {
                mismatches.push(format!(
                    "{direction:?} set at {set_at:?}: expected {expected:?}, observed {:?}",
                    tracker.observed()
                ));
            }
        }
    }

    assert!(mismatches.is_empty(), "{}", mismatches.join("\n"));
}

#[tokio::test]
async fn test_removal_matrix() {
    let mut mismatches = Vec::new();

    for direction in ALL_DIRECTIONS {
        for set_at in ALL_LOCATIONS {
            for remove_at in ALL_LOCATIONS
                .into_iter()
                .filter(|remove_at| remove_at.order() > set_at.order())
            {
                let tracker = Tracker::new(direction, set_at, Some(remove_at));
                run_scenario(&tracker).await.unwrap();

                let expected = expected_locations(direction, set_at, Some(remove_at));
                if tracker.observed() != expected {
                    mismatches.push(format!(
                        "{direction:?} set at {set_at:?}, removed at {remove_at:?}: expected {expected:?}, observed {:?}",
                        tracker.observed()
                    ));
                }
            }
        }
    }

    assert!(mismatches.is_empty(), "{}", mismatches.join("\n"));
}

#[tokio::test]
async fn test_downstream_reaches_two_levels_but_not_a_sibling_call() {
    #[derive(Clone)]
    struct Read;

    impl Message for Read {
        type Response = Option<String>;
    }

    struct Write;

    impl Message for Write {
        type Response = ();
    }

    let mut services = ServiceCollection::new();
    services.add_message_handler_delegate::<Read, _, _>(|Read, ctx: HandlerContext| async move {
        Ok(ctx
            .conqueror_context()
            .downstream_context_data()
            .get_str("k")
            .map(str::to_string))
    });
    services.add_message_handler_delegate::<Write, _, _>(|Write, ctx: HandlerContext| async move {
        ctx.conqueror_context()
            .downstream_context_data()
            .set("sibling", "v", Scope::InProcess);
        Ok(())
    });
    let provider = services.build_provider();
    let clients = MessageClients::new(&provider);

    let root = ConquerorContext::new();
    root.downstream_context_data().set("k", "v", Scope::InProcess);
    let seen = clients
        .for_message::<Read>()
        .with_context(root.clone())
        .handle(Read)
        .await
        .unwrap();
    assert_eq!(seen.as_deref(), Some("v"));

    clients
        .for_message::<Write>()
        .with_context(root.clone())
        .handle(Write)
        .await
        .unwrap();
    assert!(!root.downstream_context_data().contains_key("sibling"));

    let sibling = ConquerorContext::new();
    let seen = clients
        .for_message::<Read>()
        .with_context(sibling)
        .handle(Read)
        .await
        .unwrap();
    assert_eq!(seen, None);
}

#[tokio::test]
async fn test_trace_id_stable_and_message_ids_distinct() {
    #[derive(Default)]
    struct Seen {
        trace_ids: Vec<String>,
        message_ids: Vec<String>,
    }

    let seen = Arc::new(Mutex::new(Seen::default()));
    let mut services = ServiceCollection::new();

    let outer_seen = Arc::clone(&seen);
    services.add_message_handler_delegate::<Outer, _, _>(move |Outer, ctx: HandlerContext| {
        let seen = Arc::clone(&outer_seen);
        async move {
            record(&seen, &ctx);
            ctx.message_client::<Nested>().handle(Nested).await?;
            ctx.message_client::<Nested>().handle(Nested).await
        }
    });
    let nested_seen = Arc::clone(&seen);
    services.add_message_handler_delegate::<Nested, _, _>(move |Nested, ctx: HandlerContext| {
        record(&nested_seen, &ctx);
        async { Ok(()) }
    });

    fn record(seen: &Mutex<Seen>, ctx: &HandlerContext) {
        let mut seen = seen.lock();
        seen.trace_ids.push(ctx.trace_id());
        seen.message_ids
            .push(ctx.message_id().map(|id| id.to_string()).unwrap_or_default());
    }

    let root = ConquerorContext::new();
    let trace_id = root.trace_id();
    MessageClients::new(&services.build_provider())
        .for_message::<Outer>()
        .with_context(root.clone())
        .handle(Outer)
        .await
        .unwrap();

    let seen = seen.lock();
    assert_eq!(seen.trace_ids.len(), 3);
    assert!(seen.trace_ids.iter().all(|id| *id == trace_id));

    let mut message_ids = seen.message_ids.clone();
    message_ids.sort();
    message_ids.dedup();
    assert_eq!(message_ids.len(), 3);
    assert!(message_ids.iter().all(|id| !id.is_empty()));
    assert_eq!(root.trace_id(), trace_id);
}

#[tokio::test]
async fn test_ambient_context_is_parent_when_none_is_given() {
    let mut services = ServiceCollection::new();
    services.add_message_handler_delegate::<Nested, _, _>(|Nested, ctx: HandlerContext| async move {
        ctx.conqueror_context()
            .upstream_context_data()
            .set("reply", "done", Scope::InProcess);
        Ok(())
    });
    let provider = services.build_provider();
    let root = ConquerorContext::new();

    ConquerorContextAccessor::scope(Some(root.clone()), async {
        MessageClients::new(&provider)
            .for_message::<Nested>()
            .handle(Nested)
            .await
            .unwrap();
    })
    .await;

    assert_eq!(root.upstream_context_data().get_str("reply"), Some("done"));
}

#[tokio::test]
async fn test_bidirectional_last_writer_wins() {
    let mut services = ServiceCollection::new();
    services.add_message_handler_delegate::<Nested, _, _>(|Nested, ctx: HandlerContext| async move {
        let mut data = ctx.conqueror_context().context_data();
        assert_eq!(data.get_str("shared"), Some("client"));
        data.set("shared", "server", Scope::AcrossTransports);
        drop(data);
        Ok(())
    });
    let provider = services.build_provider();
    let root = ConquerorContext::new();
    root.context_data()
        .set("shared", "client", Scope::AcrossTransports);

    MessageClients::new(&provider)
        .for_message::<Nested>()
        .with_context(root.clone())
        .handle(Nested)
        .await
        .unwrap();

    let data = root.context_data();
    assert_eq!(data.get_str("shared"), Some("server"));
    assert_eq!(data.scope_of("shared"), Some(Scope::AcrossTransports));
}

#[tokio::test]
async fn test_concurrent_nested_calls_keep_each_others_bidirectional_data() {
    struct Mark(&'static str);

    impl Message for Mark {
        type Response = ();
    }

    let mut services = ServiceCollection::new();
    services.add_message_handler_delegate::<Mark, _, _>(|Mark(key), ctx: HandlerContext| async move {
        ctx.conqueror_context()
            .context_data()
            .set(key, "set", Scope::InProcess);
        tokio::task::yield_now().await;
        Ok(())
    });
    services.add_message_handler_delegate::<Outer, _, _>(|Outer, ctx: HandlerContext| async move {
        let mark_a = ctx.message_client::<Mark>();
        let mark_b = ctx.message_client::<Mark>();
        let (first, second) = tokio::join!(mark_a.handle(Mark("a")), mark_b.handle(Mark("b")));
        first?;
        second?;

        let data = ctx.conqueror_context().context_data();
        assert!(data.contains_key("a"));
        assert!(data.contains_key("b"));
        drop(data);
        Ok(())
    });

    let root = ConquerorContext::new();
    MessageClients::new(&services.build_provider())
        .for_message::<Outer>()
        .with_context(root.clone())
        .handle(Outer)
        .await
        .unwrap();

    let data = root.context_data();
    assert_eq!(data.get_str("a"), Some("set"));
    assert_eq!(data.get_str("b"), Some("set"));
}

#[tokio::test]
async fn test_created_context_outside_scope_is_passed_explicitly() {
    struct Read;

    impl Message for Read {
        type Response = Option<String>;
    }

    let mut services = ServiceCollection::new();
    services.add_message_handler_delegate::<Read, _, _>(|Read, ctx: HandlerContext| async move {
        Ok(ctx
            .conqueror_context()
            .downstream_context_data()
            .get_str("tenant")
            .map(str::to_string))
    });
    let clients = MessageClients::new(&services.build_provider());

    let guard = ConquerorContextAccessor::get_or_create();
    guard
        .context()
        .downstream_context_data()
        .set("tenant", "acme", Scope::InProcess);
    assert!(ConquerorContextAccessor::current().is_none());

    let implicit = clients.for_message::<Read>().handle(Read).await.unwrap();
    assert_eq!(implicit, None);

    let explicit = clients
        .for_message::<Read>()
        .with_context(guard.context())
        .handle(Read)
        .await
        .unwrap();
    assert_eq!(explicit.as_deref(), Some("acme"));
}
