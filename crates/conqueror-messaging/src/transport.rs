//! Client-side transports.
//!
//! A [`TransportSender`] delivers a message to wherever its handler lives
//! and returns the response. The in-process transport looks the handler up
//! in the local [`MessageHandlerRegistry`]; other transports live in their
//! own crates.

use crate::registry::MessageHandlerRegistry;
use conqueror_core::{
    ConquerorContext, ConquerorError, ConquerorResult, Message, ServiceProvider, TransportRole,
    TransportType,
};
use conqueror_middleware::BoxFuture;
use tokio_util::sync::CancellationToken;

/// Sends messages of type `M` and returns their responses.
pub trait TransportSender<M: Message>: Send + Sync {
    /// The transport as seen from the client side.
    fn transport_type(&self) -> TransportType;

    /// Delivers `message` on behalf of `conqueror_context`.
    ///
    /// Context data written by the receiving side must end up in
    /// `conqueror_context` before the returned future resolves.
    fn send<'a>(
        &'a self,
        message: M,
        service_provider: &'a ServiceProvider,
        conqueror_context: &'a ConquerorContext,
        cancellation_token: CancellationToken,
    ) -> BoxFuture<'a, ConquerorResult<M::Response>>;
}

/// Invokes handlers registered in the same process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InProcessTransport;

impl<M: Message> TransportSender<M> for InProcessTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::in_process(TransportRole::Client)
    }

    fn send<'a>(
        &'a self,
        message: M,
        service_provider: &'a ServiceProvider,
        conqueror_context: &'a ConquerorContext,
        cancellation_token: CancellationToken,
    ) -> BoxFuture<'a, ConquerorResult<M::Response>> {
        Box::pin(dispatch(
            message,
            service_provider,
            conqueror_context,
            TransportType::in_process(TransportRole::Server),
            cancellation_token,
        ))
    }
}

/// Runs the registered handler for `M` below `conqueror_context`.
///
/// This is the receiving end shared by every transport.
///
/// # Errors
///
/// Returns [`ConquerorError::HandlerNotRegistered`] if no handler is
/// registered for `M`, and otherwise whatever the handler pipeline returns.
pub async fn dispatch<M: Message>(
    message: M,
    service_provider: &ServiceProvider,
    conqueror_context: &ConquerorContext,
    transport_type: TransportType,
    cancellation_token: CancellationToken,
) -> ConquerorResult<M::Response> {
    let invoker = service_provider
        .resolve::<MessageHandlerRegistry>()
        .and_then(|registry| registry.invoker::<M>())
        .ok_or(ConquerorError::HandlerNotRegistered {
            message_type: M::message_type_name(),
        })?;

    invoker
        .invoke(
            message,
            service_provider,
            conqueror_context,
            transport_type,
            cancellation_token,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MessageHandlerRegistration;
    use conqueror_core::ServiceCollection;

    struct Unhandled;

    impl Message for Unhandled {
        type Response = ();
    }

    #[tokio::test]
    async fn test_missing_handler_is_reported() {
        let provider = ServiceCollection::new().build_provider();

        let err = dispatch(
            Unhandled,
            &provider,
            &ConquerorContext::new(),
            TransportType::in_process(TransportRole::Server),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            ConquerorError::HandlerNotRegistered {
                message_type: "Unhandled"
            }
        ));
    }

    #[tokio::test]
    async fn test_in_process_send_reaches_handler() {
        let mut services = ServiceCollection::new();
        services.add_message_handler_delegate::<Unhandled, _, _>(|_, ctx| async move {
            assert_eq!(ctx.transport_type().role(), TransportRole::Server);
            assert!(ctx.transport_type().is_in_process());
            Ok(())
        });
        let provider = services.build_provider();

        let sender: &dyn TransportSender<Unhandled> = &InProcessTransport;
        assert_eq!(sender.transport_type().role(), TransportRole::Client);
        sender
            .send(Unhandled, &provider, &ConquerorContext::new(), CancellationToken::new())
            .await
            .unwrap();
    }
}
