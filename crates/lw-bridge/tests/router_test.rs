use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use lw_bridge::receiver::router;
use lw_core::config::ReceiverConfig;
use lw_core::types::{SignalPayload, SignalSource};
use tower::ServiceExt;

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn network_report_becomes_http_call_signal() {
    let (tx, rx) = flume::unbounded();
    let app = router(&ReceiverConfig::default(), tx);

    let resp = app
        .oneshot(post_json(
            "/livewire/network",
            r#"{"method":"get","url":"http://localhost:5173/api/usres?page=2","status":404,"duration":37}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let signal = rx.try_recv().expect("signal forwarded");
    assert_eq!(signal.source, SignalSource::Network);
    match signal.payload {
        SignalPayload::HttpCall(call) => {
            assert_eq!(call.status, Some(404));
            assert_eq!(call.duration_ms, Some(37));
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn malformed_network_report_is_rejected() {
    let (tx, rx) = flume::unbounded();
    let app = router(&ReceiverConfig::default(), tx);

    let resp = app
        .oneshot(post_json("/livewire/network", r#"{"url": 5}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(rx.is_empty());
}

#[tokio::test]
async fn bare_options_is_answered() {
    let (tx, _rx) = flume::unbounded();
    let app = router(&ReceiverConfig::default(), tx);

    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/livewire/console-error")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_path_is_404() {
    let (tx, _rx) = flume::unbounded();
    let app = router(&ReceiverConfig::default(), tx);

    let resp = app
        .oneshot(post_json("/elsewhere", "{}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
