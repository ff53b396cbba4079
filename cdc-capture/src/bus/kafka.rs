use std::time::Duration;

use futures::FutureExt;
use metrics::{counter, gauge};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, error, info, warn};

use crate::api::BusError;
use crate::bus::{Acknowledgement, MessageBus, OutboundMessage};
use crate::config::KafkaConfig;
use crate::prometheus::report_dropped_events;

struct KafkaContext;

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        gauge!("capture_cdc_kafka_callback_queue_depth").set(stats.replyq as f64);
        gauge!("capture_cdc_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("capture_cdc_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
        gauge!("capture_cdc_kafka_producer_queue_bytes").set(stats.msg_size as f64);
        gauge!("capture_cdc_kafka_producer_queue_bytes_limit").set(stats.msg_size_max as f64);

        for (_, stats) in stats.brokers {
            let id_string = format!("{}", stats.nodeid);
            gauge!(
                "capture_cdc_kafka_broker_requests_pending",
                "broker" => id_string.clone()
            )
            .set(stats.outbuf_cnt as f64);
            gauge!(
                "capture_cdc_kafka_broker_responses_awaiting",
                "broker" => id_string.clone()
            )
            .set(stats.waitresp_cnt as f64);
            counter!(
                "capture_cdc_kafka_broker_tx_errors_total",
                "broker" => id_string.clone()
            )
            .absolute(stats.txerrs);
            counter!(
                "capture_cdc_kafka_broker_rx_errors_total",
                "broker" => id_string
            )
            .absolute(stats.rxerrs);
        }
    }
}

#[derive(Clone)]
pub struct KafkaBus {
    producer: FutureProducer<KafkaContext>,
}

impl KafkaBus {
    pub fn new(hosts: &str, config: &KafkaConfig) -> anyhow::Result<KafkaBus> {
        info!("connecting to Kafka brokers at {}...", hosts);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.max.bytes",
                config.kafka_producer_message_max_bytes.to_string(),
            )
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", &config.kafka_compression_codec)
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            );

        if !config.kafka_client_id.is_empty() {
            client_config.set("client.id", &config.kafka_client_id);
        }

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(KafkaContext)?;

        // CDC is observational: an unreachable cluster only means events get dropped
        match producer.client().fetch_metadata(
            Some("__consumer_offsets"),
            Timeout::After(Duration::new(10, 0)),
        ) {
            Ok(_) => info!("connected to Kafka brokers"),
            Err(err) => warn!("could not reach Kafka brokers, CDC events may be dropped: {}", err),
        }

        Ok(KafkaBus { producer })
    }

    pub fn flush(&self) -> Result<(), KafkaError> {
        self.producer.flush(Duration::new(30, 0))
    }
}

impl MessageBus for KafkaBus {
    fn send(&self, message: OutboundMessage) -> Result<Acknowledgement, BusError> {
        let transaction_id = message.transaction_id.to_string();

        let delivery = self
            .producer
            .send_result(FutureRecord {
                topic: message.topic.as_str(),
                payload: Some(&message.payload),
                partition: None,
                key: None::<&str>,
                timestamp: None,
                headers: Some(OwnedHeaders::new().insert(Header {
                    key: "transaction_id",
                    value: Some(&transaction_id),
                })),
            })
            .map_err(|(err, _)| {
                match err.rdkafka_error_code() {
                    Some(RDKafkaErrorCode::MessageSizeTooLarge) => {
                        report_dropped_events("kafka_message_size", 1)
                    }
                    Some(RDKafkaErrorCode::QueueFull) => report_dropped_events("kafka_queue_full", 1),
                    _ => error!("failed to produce CDC event: {}", err),
                }
                BusError::Kafka(err)
            })?;

        Ok(delivery
            .map(|result| match result {
                // Cancelled due to timeout while retrying
                Err(_) => Err(BusError::Cancelled),
                Ok(Err((err, _))) => Err(BusError::Kafka(err)),
                Ok(Ok(_)) => Ok(()),
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::DefaultProducerContext;
    use rdkafka::types::{RDKafkaApiKey, RDKafkaRespErr};

    use crate::api::PublishError;
    use crate::bus::kafka::KafkaBus;
    use crate::bus::{MessageBus, OutboundMessage};
    use crate::config::{CdcConfig, KafkaConfig};
    use crate::publisher::CdcPublisher;
    use crate::record::TransactionRecord;

    fn start_on_mocked_bus() -> (MockCluster<'static, DefaultProducerContext>, KafkaBus) {
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        let config = KafkaConfig {
            kafka_producer_linger_ms: 0,
            kafka_producer_queue_mib: 50,
            kafka_message_timeout_ms: 500,
            kafka_producer_message_max_bytes: 1000000,
            kafka_compression_codec: "none".to_string(),
            kafka_tls: false,
            kafka_client_id: "".to_string(),
        };
        let bus = KafkaBus::new(&cluster.bootstrap_servers(), &config)
            .expect("failed to create bus");
        (cluster, bus)
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            topic: "http_cdc".to_string(),
            payload: r#"{"request":{},"response":{}}"#.to_string(),
            transaction_id: 1,
        }
    }

    fn finished_record() -> TransactionRecord {
        let mut record = TransactionRecord::new(
            3,
            "GET".to_string(),
            "/api/2.0/experiments/list".to_string(),
            vec![],
            0,
            Bytes::new(),
        );
        record.start_response(200, vec![]).unwrap();
        record.finish_response(vec![]).unwrap();
        record
    }

    #[tokio::test]
    async fn kafka_bus_error_handling() {
        // Uses a mocked Kafka broker that allows injecting write errors, to check error handling.
        // We test different cases in a single test to amortize the startup cost of the producer.
        let (cluster, bus) = start_on_mocked_bus();

        // Wait for producer to be healthy, to keep kafka_message_timeout_ms short and tests faster
        for _ in 0..20 {
            let ack = bus.send(message()).expect("failed to enqueue");
            if ack.await.is_ok() {
                break;
            }
        }

        bus.send(message())
            .expect("failed to enqueue")
            .await
            .expect("failed to send one event");

        // Sustained transient errors time out inside librdkafka and surface on the ack
        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_BROKER_NOT_AVAILABLE; 50];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        assert!(bus.send(message()).expect("failed to enqueue").await.is_err());

        // Recovered cluster acknowledges again
        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_BROKER_NOT_AVAILABLE; 2];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        bus.send(message())
            .expect("failed to enqueue")
            .await
            .expect("failed to send event after recovery");
    }

    #[tokio::test]
    async fn publisher_over_kafka() {
        let (cluster, bus) = start_on_mocked_bus();
        let config = CdcConfig {
            cdc_kafka: Some(cluster.bootstrap_servers()),
            cdc_topic: Some("http_cdc".to_string()),
            cdc_debug: true,
            cdc_disabled: false,
        };
        let publisher = CdcPublisher::new(&config, Some(Arc::new(bus)));
        let record = finished_record();

        let mut outcome: Result<(), PublishError> = Ok(());
        for _ in 0..20 {
            outcome = publisher.try_publish(&record).await;
            if outcome.is_ok() {
                break;
            }
        }
        outcome.expect("failed to publish through the mock cluster");
    }
}
