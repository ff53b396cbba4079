#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;

use cdc_capture::api::{BusError, SinkError};
use cdc_capture::bus::{Acknowledgement, MessageBus, OutboundMessage};
use cdc_capture::config::CdcConfig;
use cdc_capture::record::TransactionRecord;
use cdc_capture::sinks::TransactionSink;

/// Owned copy of what a sink observed.
#[derive(Debug, Clone)]
pub struct Captured {
    pub id: u64,
    pub method: String,
    pub url: String,
    pub request_headers: Vec<(String, String)>,
    pub content_length: usize,
    pub request_body: Bytes,
    pub status: Option<u16>,
    pub response_headers: Option<Vec<(String, String)>>,
    pub response_chunks: Option<Vec<Bytes>>,
    pub response_truncated: bool,
    pub duration_msecs: Option<f64>,
}

impl Captured {
    pub fn response_body(&self) -> Vec<u8> {
        self.response_chunks
            .iter()
            .flatten()
            .flat_map(|chunk| chunk.iter().copied())
            .collect()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    captured: Mutex<Vec<Captured>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn captured(&self) -> Vec<Captured> {
        self.captured.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn record(&self, record: &TransactionRecord) -> Result<(), SinkError> {
        self.captured.lock().unwrap().push(Captured {
            id: record.id(),
            method: record.method().to_string(),
            url: record.url().to_string(),
            request_headers: record.request_headers().to_vec(),
            content_length: record.content_length(),
            request_body: record.request_body().clone(),
            status: record.status(),
            response_headers: record.response_headers().map(|headers| headers.to_vec()),
            response_chunks: record.response_chunks().map(|chunks| chunks.to_vec()),
            response_truncated: record.response_truncated(),
            duration_msecs: record.duration_msecs(),
        });
        Ok(())
    }
}

pub struct FailingSink {}

#[async_trait]
impl TransactionSink for FailingSink {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn record(&self, _: &TransactionRecord) -> Result<(), SinkError> {
        Err(SinkError::Failed(anyhow!("disk full")))
    }
}

pub struct PanickingSink {}

#[async_trait]
impl TransactionSink for PanickingSink {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn record(&self, _: &TransactionRecord) -> Result<(), SinkError> {
        panic!("sink bug")
    }
}

/// Message bus acknowledging everything and keeping what it was sent.
#[derive(Default)]
pub struct MemoryBus {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|message| serde_json::from_str(&message.payload).expect("invalid payload"))
            .collect()
    }
}

impl MessageBus for MemoryBus {
    fn send(&self, message: OutboundMessage) -> Result<Acknowledgement, BusError> {
        self.sent.lock().unwrap().push(message);
        Ok(futures::future::ready(Ok(())).boxed())
    }
}

pub fn cdc_config() -> CdcConfig {
    CdcConfig {
        cdc_kafka: Some("localhost:9092".to_string()),
        cdc_topic: Some("http_cdc".to_string()),
        cdc_debug: true,
        cdc_disabled: false,
    }
}
