use std::net::SocketAddr;

use envconfig::Envconfig;
use tracing::Level;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "cdc-capture")]
    pub otel_service_name: String,

    #[envconfig(default = "info")]
    pub log_level: Level,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "")]
    pub mount_prefix: String, // Routing prefix the wrapped app is served under

    #[envconfig(default = "20971520")]
    pub max_body_bytes: usize,

    #[envconfig(default = "false")]
    pub log_transactions: bool,

    #[envconfig(nested = true)]
    pub cdc: CdcConfig,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

#[derive(Envconfig, Clone, Debug, Default)]
pub struct CdcConfig {
    pub cdc_kafka: Option<String>, // Broker endpoint, publishing is enabled when set
    pub cdc_topic: Option<String>,
    #[envconfig(default = "false")]
    pub cdc_debug: bool,
    #[envconfig(default = "false")]
    pub cdc_disabled: bool,
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic
    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes
    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds
    #[envconfig(default = "1000000")]
    pub kafka_producer_message_max_bytes: u32,
    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
    #[envconfig(default = "false")]
    pub kafka_tls: bool,
    #[envconfig(default = "")]
    pub kafka_client_id: String,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn cdc_config_from_env() {
        let env = HashMap::from([
            ("CDC_KAFKA".to_string(), "kafka:9092".to_string()),
            ("CDC_TOPIC".to_string(), "http_cdc".to_string()),
            ("CDC_DISABLED".to_string(), "true".to_string()),
        ]);
        let config = CdcConfig::init_from_hashmap(&env).expect("invalid config");

        assert_eq!(config.cdc_kafka.as_deref(), Some("kafka:9092"));
        assert_eq!(config.cdc_topic.as_deref(), Some("http_cdc"));
        assert!(!config.cdc_debug);
        assert!(config.cdc_disabled);
    }

    #[test]
    fn defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).expect("invalid config");

        assert_eq!(config.address.to_string(), "127.0.0.1:3000");
        assert_eq!(config.mount_prefix, "");
        assert_eq!(config.max_body_bytes, 20 * 1024 * 1024);
        assert!(config.cdc.cdc_kafka.is_none());
        assert!(!config.cdc.cdc_disabled);
        assert_eq!(config.kafka.kafka_compression_codec, "none");
    }
}
