use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;

/// Value reported by [`TransactionRecord::status_code`] before the response started.
pub const STATUS_NOT_SET: i32 = -1;

pub type HeaderPairs = Vec<(String, String)>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordError {
    #[error("response was already started for transaction {0}")]
    ResponseAlreadyStarted(u64),
    #[error("response was not started for transaction {0}")]
    ResponseNotStarted(u64),
    #[error("response was already finished for transaction {0}")]
    ResponseAlreadyFinished(u64),
}

/// Capture of a single request/response exchange.
///
/// The request side is fixed at construction. The response side is filled in
/// two steps: [`start_response`](Self::start_response) when the status and
/// headers are known, then [`finish_response`](Self::finish_response) once
/// the body has been produced.
#[derive(Debug)]
pub struct TransactionRecord {
    id: u64,
    method: String,
    url: String,
    request_headers: HeaderPairs,
    content_length: usize,
    request_body: Bytes,
    status: Option<u16>,
    response_headers: Option<HeaderPairs>,
    response_chunks: Option<Vec<Bytes>>,
    response_truncated: bool,
    duration_msecs: Option<f64>,
    started_at: Instant,
}

impl TransactionRecord {
    pub fn new(
        id: u64,
        method: String,
        url: String,
        request_headers: HeaderPairs,
        content_length: usize,
        request_body: Bytes,
    ) -> Self {
        Self {
            id,
            method,
            url,
            request_headers,
            content_length,
            request_body,
            status: None,
            response_headers: None,
            response_chunks: None,
            response_truncated: false,
            duration_msecs: None,
            started_at: Instant::now(),
        }
    }

    pub fn start_response(&mut self, status: u16, headers: HeaderPairs) -> Result<(), RecordError> {
        if self.status.is_some() {
            return Err(RecordError::ResponseAlreadyStarted(self.id));
        }
        self.status = Some(status);
        self.response_headers = Some(headers);
        Ok(())
    }

    pub fn finish_response(&mut self, chunks: Vec<Bytes>) -> Result<(), RecordError> {
        if self.status.is_none() {
            return Err(RecordError::ResponseNotStarted(self.id));
        }
        if self.duration_msecs.is_some() {
            return Err(RecordError::ResponseAlreadyFinished(self.id));
        }
        self.duration_msecs = Some(self.started_at.elapsed().as_secs_f64() * 1000.0);
        self.response_chunks = Some(chunks);
        Ok(())
    }

    /// Flags the captured chunks as a prefix of what the caller received.
    pub fn mark_response_truncated(&mut self) {
        self.response_truncated = true;
    }

    pub fn is_complete(&self) -> bool {
        self.duration_msecs.is_some()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn request_headers(&self) -> &[(String, String)] {
        &self.request_headers
    }

    /// Case-insensitive lookup of the first captured request header with this name.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn request_content_type(&self) -> Option<&str> {
        self.request_header("Content-Type")
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn request_body(&self) -> &Bytes {
        &self.request_body
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn status_code(&self) -> i32 {
        self.status.map_or(STATUS_NOT_SET, i32::from)
    }

    pub fn response_headers(&self) -> Option<&[(String, String)]> {
        self.response_headers.as_deref()
    }

    pub fn response_content_type(&self) -> Option<&str> {
        self.response_headers()?
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("Content-Type"))
            .map(|(_, value)| value.as_str())
    }

    pub fn response_chunks(&self) -> Option<&[Bytes]> {
        self.response_chunks.as_deref()
    }

    pub fn response_truncated(&self) -> bool {
        self.response_truncated
    }

    pub fn duration_msecs(&self) -> Option<f64> {
        self.duration_msecs
    }
}
