//! Integration tests for the one-click executor.
//!
//! Each test spins up an Axum server on a random port and POSTs the
//! one-click body at it through the real reqwest client.

use std::time::Duration;

use axum::Router;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{any, post};
use tokio::net::TcpListener;

use unsub_assist::unsubscribe::OneClickExecutor;

const USER_AGENT: &str = "unsub-assist-test/0.1";

/// Only accept a well-formed one-click request.
async fn strict_one_click(headers: HeaderMap, body: String) -> StatusCode {
    let form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        == Some(USER_AGENT);
    if form && agent && body == "List-Unsubscribe=One-Click" {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    }
}

/// Start an Axum server on a random port, return its base URL.
async fn start_server() -> String {
    let app = Router::new()
        .route("/one-click", post(strict_one_click))
        .route("/no-content", post(|| async { StatusCode::NO_CONTENT }))
        .route(
            "/moved",
            post(|| async { (StatusCode::FOUND, [(header::LOCATION, "/landing")]) }),
        )
        .route("/landing", any(|| async { "You have been unsubscribed" }))
        .route("/not-modified", post(|| async { StatusCode::NOT_MODIFIED }))
        .route("/bad", post(|| async { StatusCode::BAD_REQUEST }))
        .route("/error", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route(
            "/slow",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn executor() -> OneClickExecutor {
    OneClickExecutor::new(USER_AGENT, Duration::from_secs(5))
}

#[tokio::test]
async fn posts_one_click_body_with_form_content_type() {
    let base = start_server().await;
    let result = executor().execute(&format!("{base}/one-click")).await;
    assert!(result.ok, "{result:?}");
    assert_eq!(result.status, Some(200));
}

#[tokio::test]
async fn no_content_counts_as_success() {
    let base = start_server().await;
    let result = executor().execute(&format!("{base}/no-content")).await;
    assert!(result.ok);
    assert_eq!(result.status, Some(204));
}

#[tokio::test]
async fn follows_redirects_to_final_page() {
    let base = start_server().await;
    let result = executor().execute(&format!("{base}/moved")).await;
    assert!(result.ok);
    assert_eq!(result.status, Some(200));
    assert_eq!(result.final_url.as_deref(), Some(format!("{base}/landing").as_str()));
}

#[tokio::test]
async fn non_redirect_3xx_counts_as_success() {
    let base = start_server().await;
    let result = executor().execute(&format!("{base}/not-modified")).await;
    assert!(result.ok);
    assert_eq!(result.status, Some(304));
}

#[tokio::test]
async fn client_and_server_errors_are_failures() {
    let base = start_server().await;
    let exec = executor();

    let bad = exec.execute(&format!("{base}/bad")).await;
    assert!(!bad.ok);
    assert_eq!(bad.status, Some(400));

    let missing = exec.execute(&format!("{base}/nowhere")).await;
    assert!(!missing.ok);
    assert_eq!(missing.status, Some(404));

    let error = exec.execute(&format!("{base}/error")).await;
    assert!(!error.ok);
    assert_eq!(error.status, Some(500));
}

#[tokio::test]
async fn timeout_is_a_failure_without_status() {
    let base = start_server().await;
    let result = executor()
        .execute_with_timeout(&format!("{base}/slow"), Duration::from_millis(200))
        .await;
    assert!(!result.ok);
    assert!(result.status.is_none());
    assert!(result.error.is_some());
}

#[tokio::test]
async fn refused_connection_is_a_failure_without_status() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = executor().execute(&format!("http://{addr}/one-click")).await;
    assert!(!result.ok);
    assert!(result.status.is_none());
}
