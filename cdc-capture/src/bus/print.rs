use futures::FutureExt;
use metrics::counter;
use tracing::info;

use crate::api::BusError;
use crate::bus::{Acknowledgement, MessageBus, OutboundMessage};

/// Logs events instead of sending them, for local debugging.
pub struct PrintBus {}

impl MessageBus for PrintBus {
    fn send(&self, message: OutboundMessage) -> Result<Acknowledgement, BusError> {
        info!(
            topic = message.topic.as_str(),
            transaction_id = message.transaction_id,
            "cdc event: {}",
            message.payload
        );
        counter!("capture_cdc_print_bus_messages_total").increment(1);

        Ok(futures::future::ready(Ok(())).boxed())
    }
}
