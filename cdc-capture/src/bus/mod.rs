use futures::future::BoxFuture;

use crate::api::BusError;

pub mod kafka;
pub mod print;

/// Resolves once the broker acknowledged (or refused) a message.
pub type Acknowledgement = BoxFuture<'static, Result<(), BusError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub transaction_id: u64,
}

/// Client for the message bus CDC events are written to. Shared between all
/// in-flight requests, implementations must be safe to call concurrently.
pub trait MessageBus: Send + Sync {
    /// Enqueues the message. Errors returned here mean the message was never
    /// queued, the returned future reports the delivery outcome.
    fn send(&self, message: OutboundMessage) -> Result<Acknowledgement, BusError>;
}
