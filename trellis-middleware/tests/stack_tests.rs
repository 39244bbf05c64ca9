//! The stock middleware installed together, the way an application would.

use bytes::Bytes;
use http::{Method, Request};
use http_body_util::BodyExt;
use trellis_core::{App, Context, Handler, StatusCode};
use trellis_middleware::{
    CorsConfig, X_REQUEST_ID, cors_with, gzip, logger, recover, request_id, secure,
};

async fn explode(_c: &mut Context) -> trellis_core::Result<()> {
    panic!("stack test panic")
}

fn app() -> App {
    let mut app = App::new();
    app.pre(request_id());
    app.use_middleware(logger())
        .use_middleware(recover())
        .use_middleware(secure())
        .use_middleware(cors_with(
            CorsConfig::new().allow_origins(["https://app.example"]),
        ))
        .use_middleware(gzip());
    app.get(
        "/greeting",
        Handler::new(|c| Box::pin(async move { c.string(StatusCode::OK, "hello ".repeat(64)) })),
    )
    .unwrap();
    app.get("/panic", Handler::new(|c| Box::pin(explode(c))))
        .unwrap();
    app
}

#[tokio::test]
async fn test_full_stack_on_success() {
    let request = Request::get("/greeting")
        .header("Origin", "https://app.example")
        .header("Accept-Encoding", "gzip")
        .body(Bytes::new())
        .unwrap();
    let response = app().serve(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[&X_REQUEST_ID].len(), 32);
    assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
    assert_eq!(headers["access-control-allow-origin"], "https://app.example");
    assert_eq!(headers["content-encoding"], "gzip");
    let vary: Vec<_> = headers.get_all("vary").iter().collect();
    assert_eq!(vary, vec!["Origin", "Accept-Encoding"]);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.len() < "hello ".len() * 64);
}

#[tokio::test]
async fn test_panic_is_logged_and_answered() {
    let request = Request::get("/panic").body(Bytes::new()).unwrap();
    let response = app().serve(request).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().contains_key(&X_REQUEST_ID));
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
}

#[tokio::test]
async fn test_preflight_short_circuits_before_routing_errors() {
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/greeting")
        .header("Origin", "https://app.example")
        .header("Access-Control-Request-Method", "GET")
        .body(Bytes::new())
        .unwrap();
    let response = app().serve(request).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()["access-control-max-age"], "600");
    assert!(!response.headers().contains_key("content-encoding"));
}
