use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use tracing::info;

use crate::api::SinkError;
use crate::content::is_binary;
use crate::record::TransactionRecord;
use crate::sinks::TransactionSink;

/// Dumps every transaction to the logs.
pub struct LogSink {}

impl LogSink {
    pub fn render(record: &TransactionRecord) -> String {
        let mut lines = vec![
            format!("SR: {}", record.id()),
            format!("{} {}", record.method(), record.url()),
            format!("{:?}", record.request_headers()),
            format!(
                "{} bytes: {}",
                record.content_length(),
                render_body(record.request_body(), record.request_content_type())
            ),
            format!(
                "=> {} :: {:.3} ms :: {:?}",
                record.status_code(),
                record.duration_msecs().unwrap_or_default(),
                record.response_headers().unwrap_or_default()
            ),
        ];

        if let Some(chunks) = record.response_chunks() {
            let body: Vec<u8> = chunks.iter().flat_map(|chunk| chunk.iter().copied()).collect();
            lines.push(render_body(&Bytes::from(body), record.response_content_type()));
        }
        if record.response_truncated() {
            lines.push("<response truncated>".to_string());
        }
        lines.push("========".to_string());
        lines.join("\n")
    }
}

fn render_body(body: &Bytes, content_type: Option<&str>) -> String {
    if body.is_empty() {
        return "<EMPTY>".to_string();
    }
    if content_type.is_some_and(is_binary) {
        return format!("<{} bytes binary>", body.len());
    }
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<{} bytes binary>", body.len()),
    }
}

#[async_trait]
impl TransactionSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn record(&self, record: &TransactionRecord) -> Result<(), SinkError> {
        info!("{}", Self::render(record));
        counter!("capture_cdc_transactions_logged_total").increment(1);
        Ok(())
    }
}
