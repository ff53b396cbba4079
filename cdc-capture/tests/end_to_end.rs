use std::sync::Arc;

use assert_json_diff::assert_json_eq;
use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use cdc_capture::config::CdcConfig;
use cdc_capture::interceptor::Interceptor;
use cdc_capture::publisher::CdcPublisher;
use cdc_capture::router::router;

mod common;
use common::*;

async fn get_order() -> impl IntoResponse {
    ([(CONTENT_TYPE, "application/json")], r#"{"ok":true}"#)
}

#[tokio::test]
async fn captures_and_publishes_a_get_request() {
    let sink = RecordingSink::new();
    let bus = MemoryBus::new();
    let interceptor = Interceptor::new()
        .with_sink(sink.clone())
        .with_sink(Arc::new(CdcPublisher::new(&cdc_config(), Some(bus.clone()))));
    let app = Router::new()
        .route("/orders", get(get_order))
        .layer(interceptor.into_layer());

    let request = Request::builder()
        .uri("/orders?id=42")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], br#"{"ok":true}"#);

    let captured = sink.captured();
    assert_eq!(captured.len(), 1);
    let record = &captured[0];
    assert_eq!(record.method, "GET");
    assert_eq!(record.url, "/orders?id=42");
    assert_eq!(record.content_length, 0);
    assert_eq!(record.status, Some(200));
    assert!(record
        .response_headers
        .as_ref()
        .unwrap()
        .contains(&("Content-Type".to_string(), "application/json".to_string())));
    assert_eq!(record.response_body(), br#"{"ok":true}"#.to_vec());

    let payloads = bus.payloads();
    assert_eq!(payloads.len(), 1);
    assert_json_eq!(
        payloads[0],
        json!({
            "request": {"body": "", "method": "GET", "url": "/orders?id=42"},
            "response": {"status": 200}
        })
    );
}

#[tokio::test]
async fn disabled_cdc_still_serves_requests() {
    let bus = MemoryBus::new();
    let config = CdcConfig {
        cdc_disabled: true,
        ..cdc_config()
    };
    let interceptor =
        Interceptor::new().with_sink(Arc::new(CdcPublisher::new(&config, Some(bus.clone()))));
    let app = Router::new()
        .route("/orders", get(get_order))
        .layer(interceptor.into_layer());

    let request = Request::builder().uri("/orders").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(bus.payloads().is_empty());
}

#[tokio::test]
async fn demo_router_echoes_and_publishes() {
    let sink = RecordingSink::new();
    let bus = MemoryBus::new();
    let interceptor = Interceptor::new()
        .with_sink(sink.clone())
        .with_sink(Arc::new(CdcPublisher::new(&cdc_config(), Some(bus.clone()))));
    let app = router(interceptor, false);

    let payload = r#"{"name":"churn-model","tags":[]}"#;
    let request = Request::builder()
        .method("POST")
        .uri("/echo")
        .header(CONTENT_TYPE, "application/json")
        .header(CONTENT_LENGTH, payload.len().to_string())
        .body(Body::from(payload))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], payload.as_bytes());

    assert_eq!(&sink.captured()[0].request_body[..], payload.as_bytes());
    assert_json_eq!(
        bus.payloads()[0],
        json!({
            "request": {
                "body": {"name": "churn-model", "tags": []},
                "method": "POST",
                "url": "/echo"
            },
            "response": {"status": 200}
        })
    );
}
