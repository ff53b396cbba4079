use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::warn;

use crate::bus::kafka::KafkaBus;
use crate::bus::print::PrintBus;
use crate::bus::MessageBus;
use crate::config::Config;
use crate::interceptor::Interceptor;
use crate::publisher::CdcPublisher;
use crate::router;
use crate::sinks::log::LogSink;

fn create_kafka_bus(config: &Config) -> anyhow::Result<Option<KafkaBus>> {
    if config.cdc.cdc_disabled || config.print_sink {
        return Ok(None);
    }
    config
        .cdc
        .cdc_kafka
        .as_deref()
        .map(|hosts| KafkaBus::new(hosts, &config.kafka))
        .transpose()
}

/// Print mode wins over any configured broker.
fn select_bus(config: &Config, kafka: Option<&KafkaBus>) -> Option<Arc<dyn MessageBus>> {
    if config.print_sink {
        return Some(Arc::new(PrintBus {}));
    }
    let bus: Arc<dyn MessageBus> = Arc::new(kafka?.clone());
    Some(bus)
}

pub fn build_interceptor(config: &Config, bus: Option<Arc<dyn MessageBus>>) -> Interceptor {
    let mut cdc = config.cdc.clone();
    if config.print_sink {
        // Print sink stands in for the broker endpoint
        cdc.cdc_kafka.get_or_insert_with(|| "print".to_string());
    }

    let mut interceptor = Interceptor::new()
        .with_mount_prefix(config.mount_prefix.clone())
        .with_max_body_bytes(config.max_body_bytes);
    if config.log_transactions {
        interceptor = interceptor.with_sink(Arc::new(LogSink {}));
    }
    interceptor.with_sink(Arc::new(CdcPublisher::new(&cdc, bus)))
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let kafka = create_kafka_bus(&config).context("failed to create Kafka producer")?;
    let bus = select_bus(&config, kafka.as_ref());

    let app = router::router(build_interceptor(&config, bus), config.export_prometheus);

    tracing::info!("listening on {:?}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server stopped unexpectedly")?;

    if let Some(kafka) = kafka {
        if let Err(err) = kafka.flush() {
            warn!("failed to flush pending CDC events: {}", err);
        }
    }
    Ok(())
}
