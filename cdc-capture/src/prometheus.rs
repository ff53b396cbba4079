// prometheus exporter setup

use metrics::counter;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

pub const CAPTURE_CDC_EVENTS_DROPPED_TOTAL: &str = "capture_cdc_events_dropped_total";

pub fn report_dropped_events(cause: &'static str, quantity: u64) {
    counter!(CAPTURE_CDC_EVENTS_DROPPED_TOTAL, "cause" => cause).increment(quantity);
}

pub fn report_sink_error(sink: &'static str) {
    counter!("capture_cdc_sink_errors_total", "sink" => sink).increment(1);
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const DURATION_MILLISECONDS: &[f64] = &[
        1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
    ];
    const BODY_SIZES: &[f64] = &[
        1024.0,     // 1KB
        10240.0,    // 10KB
        102400.0,   // 100KB
        1048576.0,  // 1MB
        10485760.0, // 10MB
        20971520.0, // 20MB, default buffering limit
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_ms".to_string()),
            DURATION_MILLISECONDS,
        )
        .expect("invalid duration buckets")
        .set_buckets_for_metric(
            Matcher::Full("capture_cdc_request_body_size".to_string()),
            BODY_SIZES,
        )
        .expect("invalid body size buckets")
        .install_recorder()
        .expect("failed to install metrics recorder")
}
