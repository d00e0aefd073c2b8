mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::TestApp;

fn health_request() -> Request<Body> {
    Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn health_check_returns_ok() {
    let app = TestApp::spawn().await;

    let response = app.send(health_request()).await;

    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "llm-generate");
    assert_eq!(body["api_key_configured"], true);
    response.assert_cors_headers();
}

#[tokio::test]
async fn health_check_reports_missing_api_key() {
    let app = TestApp::with_api_key(None).await;

    let response = app.send(health_request()).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["api_key_configured"], false);
    assert!(!String::from_utf8_lossy(&response.body).contains(common::TEST_API_KEY));
}

#[tokio::test]
async fn application_serves_health_over_tcp() {
    use llm_generate::config::ProxyConfig;
    use llm_generate::startup::Application;
    use secrecy::Secret;
    use service_core::config::Config;

    let config = ProxyConfig {
        common: Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_concurrency: 4,
        },
        api_key: Some(Secret::new(common::TEST_API_KEY.to_string())),
        project_id: None,
    };

    let app = Application::build(config)
        .await
        .expect("Failed to build application");
    let port = app.port();
    assert_ne!(port, 0);

    tokio::spawn(async move {
        let _ = app.run_until_stopped().await;
    });

    let response = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/health", port))
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
}
