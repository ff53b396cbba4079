use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{CdcEvent, ConfigurationIncomplete, PublishError, SinkError};
use crate::bus::{MessageBus, OutboundMessage};
use crate::config::CdcConfig;
use crate::prometheus::report_dropped_events;
use crate::record::TransactionRecord;
use crate::sinks::TransactionSink;

/// Upper bound on the wait for a broker acknowledgement.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);

enum Mode {
    Disabled,
    Incomplete(ConfigurationIncomplete),
    Enabled {
        topic: String,
        bus: Arc<dyn MessageBus>,
    },
}

/// Best-effort emitter of one CDC event per finished transaction.
///
/// Publishing never fails from the caller's point of view: errors are logged
/// and counted, there are no retries.
pub struct CdcPublisher {
    mode: Mode,
    debug: bool,
}

impl CdcPublisher {
    pub fn new(config: &CdcConfig, bus: Option<Arc<dyn MessageBus>>) -> Self {
        let mode = if config.cdc_disabled {
            warn!("CDC_DISABLED is set, CDC events will not be sent");
            Mode::Disabled
        } else {
            match (&config.cdc_kafka, &config.cdc_topic, bus) {
                (None, _, _) => Mode::Incomplete(ConfigurationIncomplete::MissingEndpoint),
                (_, None, _) => Mode::Incomplete(ConfigurationIncomplete::MissingTopic),
                (_, _, None) => Mode::Incomplete(ConfigurationIncomplete::MissingClient),
                (Some(_), Some(topic), Some(bus)) => Mode::Enabled {
                    topic: topic.clone(),
                    bus,
                },
            }
        };

        if let Mode::Incomplete(reason) = &mode {
            warn!("CDC configuration is incomplete, events will not be sent: {}", reason);
        }

        CdcPublisher {
            mode,
            debug: config.cdc_debug,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.mode, Mode::Enabled { .. })
    }

    #[instrument(skip_all, fields(transaction_id = record.id()))]
    pub async fn publish(&self, record: &TransactionRecord) {
        if let Err(err) = self.try_publish(record).await {
            error!(
                transaction_id = record.id(),
                method = record.method(),
                url = record.url(),
                "error in sending CDC event: {}",
                err
            );
            report_dropped_events(err.cause(), 1);
        }
    }

    /// Same as [`publish`](Self::publish) but reports the send failure.
    /// Skipped events (disabled, misconfigured, unfinished) are not errors.
    pub async fn try_publish(&self, record: &TransactionRecord) -> Result<(), PublishError> {
        let (topic, bus) = match &self.mode {
            Mode::Disabled => {
                debug!(transaction_id = record.id(), "ignoring CDC event, CDC_DISABLED is set");
                return Ok(());
            }
            Mode::Incomplete(reason) => {
                warn!(transaction_id = record.id(), "ignoring CDC event: {}", reason);
                report_dropped_events("config_incomplete", 1);
                return Ok(());
            }
            Mode::Enabled { topic, bus } => (topic, bus),
        };

        let Some(event) = CdcEvent::from_record(record) else {
            warn!(
                transaction_id = record.id(),
                "ignoring CDC event for a transaction without response"
            );
            report_dropped_events("unfinished_transaction", 1);
            return Ok(());
        };

        if self.debug {
            info!(transaction_id = record.id(), "{}", debug_dump(record));
        }

        let payload = serde_json::to_string(&event)?;
        let ack = bus.send(OutboundMessage {
            topic: topic.clone(),
            payload,
            transaction_id: record.id(),
        })?;

        match tokio::time::timeout(ACK_TIMEOUT, ack).await {
            Err(_) => Err(PublishError::Timeout(ACK_TIMEOUT)),
            Ok(delivery) => {
                delivery?;
                counter!("capture_cdc_events_published_total").increment(1);
                Ok(())
            }
        }
    }
}

/// One-line view of a transaction printed when `CDC_DEBUG` is set.
fn debug_dump(record: &TransactionRecord) -> String {
    format!(
        "(CDC) {} {} {} => {} {:?}",
        record.method(),
        record.url(),
        String::from_utf8_lossy(record.request_body()),
        record.status_code(),
        record.response_headers().unwrap_or_default()
    )
}

#[async_trait]
impl TransactionSink for CdcPublisher {
    fn name(&self) -> &'static str {
        "cdc_publisher"
    }

    async fn record(&self, record: &TransactionRecord) -> Result<(), SinkError> {
        self.publish(record).await;
        Ok(())
    }
}
