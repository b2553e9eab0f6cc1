//! Delegation of external targets to the outbound client.

use hmvc_router::config::ApplicationConfig;
use hmvc_router::error::ErrorKind;
use hmvc_router::http::RequestContext;

mod common;

fn app() -> ApplicationConfig {
    ApplicationConfig {
        base_url: "/kohana/".into(),
        ..ApplicationConfig::default()
    }
}

#[tokio::test]
async fn test_external_reply_becomes_envelope() {
    let backend = common::start_mock_backend("200 OK", "from backend").await;
    let dispatcher = common::dispatcher(app());

    let request = RequestContext::new(&format!("http://{backend}/feed"), &app());
    assert!(request.is_external());

    let response = dispatcher.dispatch(request).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), b"from backend");
    assert_eq!(response.header("X-Backend"), Some("mock"));
    assert_eq!(response.header("Content-Type"), Some("text/plain"));
}

#[tokio::test]
async fn test_external_error_status_is_kept() {
    let backend = common::start_mock_backend("404 Not Found", "gone").await;
    let dispatcher = common::dispatcher(app());

    let request = RequestContext::new(&format!("http://{backend}/missing"), &app());
    let response = dispatcher.dispatch(request).await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.body(), b"gone");
}

#[tokio::test]
async fn test_external_status_outside_table_fails() {
    let backend = common::start_mock_backend("418 I'm a teapot", "short and stout").await;
    let dispatcher = common::dispatcher(app());

    let request = RequestContext::new(&format!("http://{backend}/teapot"), &app());
    let failure = dispatcher.dispatch(request).await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::ExternalRequest);
    assert_eq!(failure.response.status(), 502);
}

#[tokio::test]
async fn test_unreachable_target_is_not_retried() {
    let dispatcher = common::dispatcher(app());

    let request = RequestContext::new("http://127.0.0.1:1/down", &app());
    let failure = dispatcher.dispatch(request).await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::ExternalRequest);
    assert_eq!(failure.response.status(), 502);
}
