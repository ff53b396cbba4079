use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::content::is_binary;
use crate::record::TransactionRecord;

/// The request body could not be buffered. Surfaced to the caller, the
/// wrapped handler is never invoked.
#[derive(Error, Debug)]
pub enum BodyError {
    #[error("invalid content length: {0}")]
    InvalidLength(String),
    #[error("request body truncated: declared {declared} bytes, read {read}")]
    Truncated { declared: usize, read: usize },
    #[error("failed to read request body: {0}")]
    Unreadable(String),
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl IntoResponse for BodyError {
    fn into_response(self) -> Response {
        match self {
            BodyError::InvalidLength(_) | BodyError::Truncated { .. } | BodyError::Unreadable(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            BodyError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
        }
        .into_response()
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header {0} holds a value that is not valid UTF-8")]
    InvalidValue(String),
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("delivery was cancelled before acknowledgement")]
    Cancelled,
    #[error("message rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to send event: {0}")]
    Send(#[from] BusError),
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
}

impl PublishError {
    pub fn cause(&self) -> &'static str {
        match self {
            PublishError::Serialization(_) => "serialization",
            PublishError::Send(_) => "send_error",
            PublishError::Timeout(_) => "ack_timeout",
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationIncomplete {
    #[error("CDC_KAFKA is not defined")]
    MissingEndpoint,
    #[error("CDC_TOPIC is not defined")]
    MissingTopic,
    #[error("no message bus client was configured")]
    MissingClient,
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink failed: {0}")]
    Failed(#[from] anyhow::Error),
}

#[derive(Debug, Serialize, PartialEq)]
pub struct RequestSection<'a> {
    pub body: Value,
    pub method: &'a str,
    pub url: &'a str,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ResponseSection {
    pub status: u16,
}

/// Payload written to the CDC topic for one transaction.
#[derive(Debug, Serialize, PartialEq)]
pub struct CdcEvent<'a> {
    pub request: RequestSection<'a>,
    pub response: ResponseSection,
}

impl<'a> CdcEvent<'a> {
    /// Returns None for records that have not completed their response.
    pub fn from_record(record: &'a TransactionRecord) -> Option<Self> {
        if !record.is_complete() {
            return None;
        }
        Some(CdcEvent {
            request: RequestSection {
                body: encode_body(record.request_body(), record.request_content_type()),
                method: record.method(),
                url: record.url(),
            },
            response: ResponseSection {
                status: record.status()?,
            },
        })
    }
}

/// JSON representation of a captured body.
///
/// Textual bodies are decoded as JSON when possible and kept as a string
/// otherwise. Binary or non UTF-8 bodies are base64 encoded.
pub fn encode_body(body: &[u8], content_type: Option<&str>) -> Value {
    if body.is_empty() {
        return Value::String(String::new());
    }

    let binary = content_type.is_some_and(is_binary);
    if !binary {
        if let Ok(value) = serde_json::from_slice::<Value>(body) {
            return value;
        }
        if let Ok(text) = std::str::from_utf8(body) {
            return Value::String(text.to_string());
        }
    }
    Value::String(STANDARD.encode(body))
}
