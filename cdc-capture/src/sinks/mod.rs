use async_trait::async_trait;

use crate::api::SinkError;
use crate::record::TransactionRecord;

pub mod log;

/// Consumer of finished transactions.
///
/// Sinks are awaited one after the other before the response is returned,
/// they only get to borrow the record for the duration of the call.
#[async_trait]
pub trait TransactionSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn record(&self, record: &TransactionRecord) -> Result<(), SinkError>;
}
