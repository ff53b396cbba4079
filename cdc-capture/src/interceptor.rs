use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, HeaderValue, Request, Response, Uri};
use axum::response::IntoResponse;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use http_body::{Body as HttpBody, Frame, SizeHint};
use metrics::{counter, histogram};
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use crate::api::{BodyError, HeaderError};
use crate::prometheus::report_sink_error;
use crate::record::{HeaderPairs, TransactionRecord};
use crate::sinks::TransactionSink;

pub const DEFAULT_MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Header names that do not follow the `Word-Word` capitalization rule.
const HEADER_NAME_OVERRIDES: [(&str, &str); 3] = [
    ("cgi-authorization", "Authorization"),
    ("content-length", "Content-Length"),
    ("content-type", "Content-Type"),
];

/// State shared by every intercepted request: id counter and sinks.
pub struct Interceptor {
    next_id: AtomicU64,
    sinks: Vec<Arc<dyn TransactionSink>>,
    mount_prefix: String,
    max_body_bytes: usize,
}

impl Default for Interceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor {
    pub fn new() -> Self {
        Interceptor {
            next_id: AtomicU64::new(0),
            sinks: Vec::new(),
            mount_prefix: String::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Registers a sink, sinks are called in registration order.
    pub fn with_sink(mut self, sink: Arc<dyn TransactionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_mount_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mount_prefix = prefix.into();
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn into_layer(self) -> CdcLayer {
        CdcLayer {
            interceptor: Arc::new(self),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn request_url(&self, uri: &Uri) -> String {
        match uri.query() {
            Some(query) if !query.is_empty() => {
                format!("{}{}?{}", self.mount_prefix, uri.path(), query)
            }
            _ => format!("{}{}", self.mount_prefix, uri.path()),
        }
    }

    async fn handle<S>(
        self: Arc<Self>,
        request: Request<Body>,
        mut inner: S,
    ) -> Result<Response<Body>, S::Error>
    where
        S: Service<Request<Body>, Response = Response<Body>>,
    {
        let id = self.next_id();
        let method = request.method().to_string();
        let url = self.request_url(request.uri());
        let request_headers = extract_headers(request.headers()).unwrap_or_else(|err| {
            debug!(transaction_id = id, "not capturing request headers: {}", err);
            Vec::new()
        });

        let (mut parts, body) = request.into_parts();
        let (content_length, request_body, body) =
            match buffer_body(&mut parts.headers, body, self.max_body_bytes).await {
                Ok(buffered) => buffered,
                Err(err) => {
                    warn!(
                        transaction_id = id,
                        method = method.as_str(),
                        url = url.as_str(),
                        "rejecting request: {}",
                        err
                    );
                    counter!("capture_cdc_rejected_requests_total").increment(1);
                    return Ok(err.into_response());
                }
            };
        histogram!("capture_cdc_request_body_size").record(content_length as f64);

        let mut record =
            TransactionRecord::new(id, method, url, request_headers, content_length, request_body);

        let response = inner.call(Request::from_parts(parts, body)).await?;

        let (parts, body) = response.into_parts();
        let status = parts.status.as_u16();
        if let Err(err) = record.start_response(status, response_headers(&parts.headers)) {
            error!("{}", err);
        }

        let body = CaptureBody {
            inner: body,
            capture: Some(Capture::new(self, record)),
            delivery: None,
        };
        Ok(Response::from_parts(parts, Body::new(body)))
    }

    async fn deliver(&self, record: &TransactionRecord) {
        counter!("capture_cdc_transactions_total").increment(1);
        if let Some(duration) = record.duration_msecs() {
            histogram!("capture_cdc_transaction_duration_ms").record(duration);
        }

        for sink in &self.sinks {
            match AssertUnwindSafe(sink.record(record)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(transaction_id = record.id(), sink = sink.name(), "sink failed: {}", err);
                    report_sink_error(sink.name());
                }
                Err(_) => {
                    error!(transaction_id = record.id(), sink = sink.name(), "sink panicked");
                    report_sink_error(sink.name());
                }
            }
        }
    }
}

/// Tower layer capturing every request/response pair going through the wrapped service.
#[derive(Clone)]
pub struct CdcLayer {
    interceptor: Arc<Interceptor>,
}

impl<S> Layer<S> for CdcLayer {
    type Service = CdcService<S>;

    fn layer(&self, service: S) -> Self::Service {
        CdcService {
            inner: service,
            interceptor: self.interceptor.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CdcService<S> {
    inner: S,
    interceptor: Arc<Interceptor>,
}

impl<S> Service<Request<Body>> for CdcService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // Keep the service that was driven to readiness, leave a fresh clone behind
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let interceptor = self.interceptor.clone();

        async move { interceptor.handle(request, inner).await }.boxed()
    }
}

/// `x-request-id` -> `X-Request-Id`, with a few irregular names mapped explicitly.
pub fn normalize_header_name(name: &str) -> String {
    if let Some((_, canonical)) = HEADER_NAME_OVERRIDES
        .iter()
        .find(|(raw, _)| raw.eq_ignore_ascii_case(name))
    {
        return canonical.to_string();
    }

    name.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

pub fn extract_headers(headers: &HeaderMap) -> Result<HeaderPairs, HeaderError> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = std::str::from_utf8(value.as_bytes())
                .map_err(|_| HeaderError::InvalidValue(name.to_string()))?;
            Ok((normalize_header_name(name.as_str()), value.to_string()))
        })
        .collect()
}

fn response_headers(headers: &HeaderMap) -> HeaderPairs {
    headers
        .iter()
        .map(|(name, value)| {
            (
                normalize_header_name(name.as_str()),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
pub enum DeclaredLength {
    Absent,
    Undetermined,
    Exact(usize),
}

pub fn declared_length(headers: &HeaderMap) -> Result<DeclaredLength, BodyError> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(DeclaredLength::Absent);
    };
    let value = value
        .to_str()
        .map_err(|_| BodyError::InvalidLength(String::from_utf8_lossy(value.as_bytes()).into_owned()))?
        .trim();

    match value {
        "" => Ok(DeclaredLength::Absent),
        "-1" => Ok(DeclaredLength::Undetermined),
        _ => value
            .parse()
            .map(DeclaredLength::Exact)
            .map_err(|_| BodyError::InvalidLength(value.to_string())),
    }
}

/// Reads the request body into memory and returns a fresh body over the same
/// bytes for the wrapped service. Requests without a declared length are
/// captured as empty and forwarded untouched.
async fn buffer_body(
    headers: &mut HeaderMap,
    body: Body,
    limit: usize,
) -> Result<(usize, Bytes, Body), BodyError> {
    let bytes = match declared_length(headers)? {
        DeclaredLength::Absent => return Ok((0, Bytes::new(), body)),
        DeclaredLength::Exact(declared) if declared > limit => {
            return Err(BodyError::TooLarge { limit })
        }
        DeclaredLength::Exact(declared) => {
            let mut bytes = read_body(body, declared, limit).await?;
            if bytes.len() < declared {
                return Err(BodyError::Truncated {
                    declared,
                    read: bytes.len(),
                });
            }
            bytes.truncate(declared);
            bytes.freeze()
        }
        DeclaredLength::Undetermined => {
            let bytes = read_body(body, usize::MAX, limit).await?.freeze();
            headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            bytes
        }
    };

    Ok((bytes.len(), bytes.clone(), Body::from(bytes)))
}

async fn read_body(body: Body, wanted: usize, limit: usize) -> Result<BytesMut, BodyError> {
    let mut stream = body.into_data_stream();
    let mut buffer = BytesMut::new();

    while buffer.len() < wanted {
        match stream.next().await {
            Some(Ok(chunk)) => {
                buffer.extend_from_slice(&chunk);
                if buffer.len() > limit && wanted == usize::MAX {
                    return Err(BodyError::TooLarge { limit });
                }
            }
            Some(Err(err)) => return Err(BodyError::Unreadable(err.to_string())),
            None => break,
        }
    }
    Ok(buffer)
}

/// Response body copy held until the wrapped body is exhausted.
struct Capture {
    interceptor: Arc<Interceptor>,
    record: TransactionRecord,
    chunks: Vec<Bytes>,
    captured: usize,
    truncated: bool,
}

impl Capture {
    fn new(interceptor: Arc<Interceptor>, record: TransactionRecord) -> Self {
        Capture {
            interceptor,
            record,
            chunks: Vec::new(),
            captured: 0,
            truncated: false,
        }
    }

    /// Keeps at most `max_body_bytes` of response data, the caller still gets everything.
    fn push(&mut self, data: &Bytes) {
        let room = self.interceptor.max_body_bytes.saturating_sub(self.captured);
        if data.len() > room {
            if room > 0 {
                self.chunks.push(data.slice(..room));
                self.captured += room;
            }
            self.truncated = true;
        } else if !data.is_empty() {
            self.chunks.push(data.clone());
            self.captured += data.len();
        }
    }

    async fn finish(mut self) {
        if self.truncated {
            debug!(
                transaction_id = self.record.id(),
                limit = self.interceptor.max_body_bytes,
                "response body exceeds the capture limit, keeping a prefix"
            );
            self.record.mark_response_truncated();
        }
        match self.record.finish_response(self.chunks) {
            Ok(()) => self.interceptor.deliver(&self.record).await,
            Err(err) => error!("{}", err),
        }
    }
}

/// Passes every frame of the wrapped response through untouched, trailers
/// included, while copying data frames into the transaction record. Sinks run
/// once the wrapped body is exhausted, before the end of stream is reported.
/// A body that fails or is dropped early is not delivered.
struct CaptureBody {
    inner: Body,
    capture: Option<Capture>,
    delivery: Option<BoxFuture<'static, ()>>,
}

impl HttpBody for CaptureBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        loop {
            if let Some(delivery) = this.delivery.as_mut() {
                ready!(delivery.poll_unpin(cx));
                this.delivery = None;
                return Poll::Ready(None);
            }

            match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => {
                    if let (Some(capture), Some(data)) = (this.capture.as_mut(), frame.data_ref()) {
                        capture.push(data);
                    }
                    return Poll::Ready(Some(Ok(frame)));
                }
                Some(Err(err)) => {
                    if let Some(capture) = this.capture.take() {
                        warn!(
                            transaction_id = capture.record.id(),
                            "response body failed, transaction not captured: {}", err
                        );
                    }
                    return Poll::Ready(Some(Err(err)));
                }
                None => match this.capture.take() {
                    Some(capture) => this.delivery = Some(capture.finish().boxed()),
                    None => return Poll::Ready(None),
                },
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        // Pending sinks need one more poll
        self.capture.is_none() && self.delivery.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
